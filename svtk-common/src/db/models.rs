//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::from_millis;

/// Lifecycle state of one tracked session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Completed,
    Abandoned,
}

/// One row of `tracked_sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: i64,
    /// `survey_<survey_id>_<transport_id>`, unique
    pub correlation_key: String,
    pub survey_id: i64,
    pub response_id: Option<i64>,
    /// Last known page index, never decreases
    pub step: i64,
    /// Unix milliseconds
    pub started_at: i64,
    /// Unix milliseconds, bumped by every heartbeat
    pub last_seen: i64,
    pub completed: bool,
    pub abandoned_sent: bool,
    pub abandoned_sent_at: Option<i64>,
    pub uuid: Option<String>,
    pub custom_id: Option<String>,
    pub transport_session_id: Option<String>,
}

impl SessionRecord {
    pub fn state(&self) -> SessionState {
        if self.abandoned_sent {
            SessionState::Abandoned
        } else if self.completed {
            SessionState::Completed
        } else {
            SessionState::Active
        }
    }

    pub fn started_at_utc(&self) -> DateTime<Utc> {
        from_millis(self.started_at)
    }

    pub fn last_seen_utc(&self) -> DateTime<Utc> {
        from_millis(self.last_seen)
    }

    /// Transport id of the row, recovered from the correlation key for legacy rows
    pub fn transport_id(&self) -> String {
        if let Some(id) = &self.transport_session_id {
            return id.clone();
        }
        let prefix = format!("survey_{}_", self.survey_id);
        self.correlation_key
            .strip_prefix(&prefix)
            .unwrap_or(&self.correlation_key)
            .to_string()
    }
}
