//! Notification fan-out
//!
//! Every assembled event goes to every configured sink concurrently. A failing
//! sink never stops the others, and every attempt is journaled. Delivery is
//! best-effort: there are no retries.

pub mod journal;
pub mod pubsub;
pub mod webhook;

use async_trait::async_trait;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use svtk_common::config::TomlConfig;
use svtk_common::events::EventPayload;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use journal::Journal;
pub use pubsub::{pubsub_attributes, PubSubSink};
pub use webhook::WebhookSink;

/// Sink-level failure
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid sink configuration: {0}")]
    Config(String),
}

/// A notification channel
#[async_trait]
pub trait Sink: Send + Sync {
    /// Channel name as recorded in the journal (e.g. "webhook")
    fn name(&self) -> &'static str;

    /// Deliver one payload, returning a short success detail
    async fn send(&self, payload: &EventPayload) -> Result<String, SinkError>;
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub success: bool,
    pub detail: String,
}

impl SinkOutcome {
    fn from_result(sink: &'static str, result: Result<String, SinkError>) -> Self {
        match result {
            Ok(detail) => Self {
                sink,
                success: true,
                detail,
            },
            Err(e) => Self {
                sink,
                success: false,
                detail: e.to_string(),
            },
        }
    }
}

/// Outcomes of dispatching one event
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub event: &'static str,
    pub outcomes: Vec<SinkOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

/// Fans events out to the configured sinks
#[derive(Clone)]
pub struct ChannelDispatcher {
    sinks: Vec<Arc<dyn Sink>>,
    journal: Option<Arc<Journal>>,
}

impl ChannelDispatcher {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, journal: Option<Journal>) -> Self {
        Self {
            sinks,
            journal: journal.map(Arc::new),
        }
    }

    /// Build the sinks enabled in `config`
    ///
    /// A sink that is enabled but cannot be built is logged and left out.
    pub fn from_config(config: &TomlConfig, journal_path: Option<PathBuf>) -> Self {
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();

        if config.webhook.enabled {
            if config.webhook.url.trim().is_empty() {
                warn!("Webhook channel enabled but no URL configured");
            } else {
                match WebhookSink::new(&config.webhook) {
                    Ok(sink) => sinks.push(Arc::new(sink)),
                    Err(e) => warn!("Webhook channel disabled: {}", e),
                }
            }
        }

        if config.pubsub.enabled {
            match PubSubSink::new(&config.pubsub) {
                Ok(sink) => sinks.push(Arc::new(sink)),
                Err(e) => warn!("Pub/Sub channel disabled: {}", e),
            }
        }

        let journal = if config.logging.json_journal {
            journal_path.map(Journal::new)
        } else {
            None
        };

        info!(
            sinks = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            journal = journal.is_some(),
            "Notification channels configured"
        );

        Self::new(sinks, journal)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Send `payload` to every sink and journal each attempt
    pub async fn dispatch(&self, payload: &EventPayload) -> DispatchReport {
        let event = payload.event_name();
        let base = payload.base();

        if self.sinks.is_empty() {
            warn!(
                event,
                session_id = %base.session_id,
                "No notification channel enabled, event not sent"
            );
            let undelivered = SinkOutcome {
                sink: "none",
                success: false,
                detail: "no notification channel enabled".to_string(),
            };
            self.record_attempt(payload, &undelivered).await;
        }

        let futures = self.sinks.iter().map(|sink| {
            let sink = Arc::clone(sink);
            async move {
                let name = sink.name();
                SinkOutcome::from_result(name, sink.send(payload).await)
            }
        });
        let outcomes = join_all(futures).await;

        for outcome in &outcomes {
            if outcome.success {
                debug!(
                    event,
                    sink = outcome.sink,
                    session_id = %base.session_id,
                    detail = %outcome.detail,
                    "Event delivered"
                );
            } else {
                warn!(
                    event,
                    sink = outcome.sink,
                    session_id = %base.session_id,
                    error = %outcome.detail,
                    "Event delivery failed"
                );
            }

            self.record_attempt(payload, outcome).await;
        }

        info!(
            event,
            survey_id = base.survey_id,
            response_id = ?base.response_id,
            session_id = %base.session_id,
            answer_groups = payload.answers().len(),
            delivered = outcomes.iter().filter(|o| o.success).count(),
            attempted = outcomes.len(),
            "Event dispatched"
        );

        DispatchReport { event, outcomes }
    }

    async fn record_attempt(&self, payload: &EventPayload, outcome: &SinkOutcome) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(payload, outcome).await {
                warn!("Journal write failed: {}", e);
            }
        }
    }
}
