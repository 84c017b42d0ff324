//! Abandonment detection
//!
//! There is no background task: every hook calls [`AbandonmentScanner::maybe_scan`],
//! and at most one of them per interval actually scans. Each stale session is
//! reported only by the caller that wins its claim.

pub mod throttle;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use svtk_common::config::{DuplicatePolicy, TrackingConfig};
use svtk_common::time::format_timestamp;
use svtk_common::Result;
use tracing::{debug, info, warn};

use crate::assembler;
use crate::dispatch::ChannelDispatcher;
use crate::session::{SessionStore, TransportSessions};

pub use throttle::{ScanPermit, ScanThrottle};

/// Summary of one scan pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Candidate groups found past the cutoff
    pub considered: usize,
    /// `session_abandoned` events emitted by this pass
    pub sent: usize,
    pub cutoff: String,
    /// Transport sessions deleted by this pass
    #[serde(skip)]
    pub invalidated: Vec<String>,
}

#[derive(Clone)]
pub struct AbandonmentScanner {
    store: SessionStore,
    transports: Arc<dyn TransportSessions>,
    dispatcher: ChannelDispatcher,
    throttle: ScanThrottle,
    threshold: Duration,
    inactivity_min: u64,
}

impl AbandonmentScanner {
    pub fn new(
        store: SessionStore,
        transports: Arc<dyn TransportSessions>,
        dispatcher: ChannelDispatcher,
        tracking: &TrackingConfig,
    ) -> Self {
        let throttle = ScanThrottle::new(store.pool().clone(), tracking.self_scan_interval());
        Self {
            store,
            transports,
            dispatcher,
            throttle,
            threshold: tracking.abandon_threshold(),
            inactivity_min: tracking.abandon_threshold_minutes(),
        }
    }

    /// Scan if due and nobody else is scanning; never fails the caller
    pub async fn maybe_scan(&self, now: DateTime<Utc>) -> Option<ScanReport> {
        let permit = match self.throttle.try_acquire(now).await {
            Ok(Some(permit)) => permit,
            Ok(None) => return None,
            Err(e) => {
                debug!("Scan slot unavailable: {}", e);
                return None;
            }
        };

        let report = match self.scan_pass(now).await {
            Ok(report) => Some(report),
            Err(e) if e.is_transient() => {
                warn!("Abandonment scan skipped: {}", e);
                None
            }
            Err(e) => {
                warn!("Abandonment scan failed: {}", e);
                None
            }
        };

        if let Err(e) = permit.release().await {
            warn!("Failed to release scan marker: {}", e);
        }
        report
    }

    /// Run one pass without the rate limiter
    ///
    /// Safe to run concurrently with other passes: the per-row claim decides
    /// who reports each session.
    pub async fn scan_pass(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let cutoff = now - self.threshold;
        let candidates = self.store.abandonment_candidates(cutoff).await?;
        let considered = candidates.len();
        let mut sent = 0;
        let mut invalidated = Vec::new();

        for candidate in candidates {
            if !self.store.claim_abandoned(now, candidate.id).await? {
                debug!(id = candidate.id, "Abandonment already claimed elsewhere");
                continue;
            }

            match self.store.cascade_mark_abandoned(now, &candidate).await {
                Ok(0) => {}
                Ok(n) => debug!(id = candidate.id, related = n, "Related rows marked abandoned"),
                Err(e) => warn!(id = candidate.id, "Cascade marking failed: {}", e),
            }

            let event = assembler::abandoned(now, &candidate, self.inactivity_min);
            self.dispatcher.dispatch(&event).await;
            sent += 1;

            let transport = candidate.transport_id();
            if self.transport_finished(&transport).await {
                match self.transports.invalidate(&transport).await {
                    Ok(()) => invalidated.push(transport),
                    Err(e) => {
                        warn!(id = candidate.id, "Transport session invalidation failed: {}", e)
                    }
                }
            }
        }

        let report = ScanReport {
            considered,
            sent,
            cutoff: format_timestamp(cutoff),
            invalidated,
        };
        if considered > 0 {
            info!(
                considered = report.considered,
                sent = report.sent,
                cutoff = %report.cutoff,
                "Abandonment scan complete"
            );
        } else {
            debug!(cutoff = %report.cutoff, "Abandonment scan found nothing");
        }
        Ok(report)
    }

    /// Whether the transport session of an abandoned row can be dropped
    ///
    /// Per-tab tracking keeps it while another tab is still open.
    async fn transport_finished(&self, transport: &str) -> bool {
        if self.store.duplicate_policy() == DuplicatePolicy::Collapse {
            return true;
        }
        match self.store.has_open_rows(transport).await {
            Ok(open) => !open,
            Err(e) => {
                warn!(transport, "Open-row check failed, keeping transport session: {}", e);
                false
            }
        }
    }
}
