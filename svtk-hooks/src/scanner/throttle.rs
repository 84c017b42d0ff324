//! Rate limiter for the self-triggered scan
//!
//! Two layers: an in-process `try_lock` so concurrent requests in one process
//! do not even touch the marker, and a conditional update of the shared
//! `scan_marker` row so that only one process per interval wins.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use svtk_common::time::to_millis;
use svtk_common::Result;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// A marker left `running` for this many intervals is considered stale
const STALE_INTERVALS: i32 = 10;

/// Exclusive right to run one scan pass
pub struct ScanPermit {
    db: SqlitePool,
    _local: OwnedMutexGuard<()>,
}

impl ScanPermit {
    /// Clear the `running` flag; the scan timestamp stays
    pub async fn release(self) -> Result<()> {
        sqlx::query("UPDATE scan_marker SET running = 0 WHERE id = 1")
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct ScanThrottle {
    db: SqlitePool,
    interval: Duration,
    local: Arc<Mutex<()>>,
}

impl ScanThrottle {
    pub fn new(db: SqlitePool, interval: Duration) -> Self {
        Self {
            db,
            interval,
            local: Arc::new(Mutex::new(())),
        }
    }

    /// Try to take the scan slot without blocking
    ///
    /// Returns `None` when the last scan is younger than the interval or
    /// another scan holds the slot.
    pub async fn try_acquire(&self, now: DateTime<Utc>) -> Result<Option<ScanPermit>> {
        let Ok(local) = Arc::clone(&self.local).try_lock_owned() else {
            debug!("Scan already running in this process");
            return Ok(None);
        };

        let due_before = to_millis(now - self.interval);
        let stale_before = to_millis(now - self.interval * STALE_INTERVALS);

        let result = sqlx::query(
            r#"
            UPDATE scan_marker
            SET last_scan_at = ?, running = 1
            WHERE id = 1
              AND last_scan_at <= ?
              AND (running = 0 OR last_scan_at <= ?)
            "#,
        )
        .bind(to_millis(now))
        .bind(due_before)
        .bind(stale_before)
        .execute(&self.db)
        .await?;

        match result.rows_affected() {
            1 => Ok(Some(ScanPermit {
                db: self.db.clone(),
                _local: local,
            })),
            0 => {
                debug!("Scan not due or held elsewhere");
                Ok(None)
            }
            n => {
                warn!(rows = n, "Unexpected scan marker update count");
                Ok(None)
            }
        }
    }
}
