//! Lifecycle event payloads
//!
//! Every payload is serialized once and sent unchanged to every sink, so the
//! JSON shape here is the wire format of the webhook body and the Pub/Sub data.

mod answer_types;

pub use answer_types::{push_answer, AnswerEntry, AnswerGroup};

use serde::{Deserialize, Serialize};

/// Fields shared by every lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBase {
    /// Correlation key form: `survey_<survey_id>_<transport_id>`
    pub session_id: String,
    /// Unix seconds at assembly time
    pub event_time: i64,
    /// `YYYY-MM-DD HH:MM:SS` (UTC) at assembly time
    pub timestamp: String,
    pub survey_id: i64,
    pub response_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
}

/// Lifecycle event, tagged by `event`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    /// First page of a fresh survey scope was shown
    SurveyStarted {
        #[serde(flatten)]
        base: EventBase,
        /// 0 on the welcome page
        step: i64,
    },

    /// A page was posted back; carries the answers of the submitted page
    PageSubmit {
        #[serde(flatten)]
        base: EventBase,
        step_submitted: i64,
        answers: Vec<AnswerGroup>,
    },

    /// Final submission
    SurveyCompleted {
        #[serde(flatten)]
        base: EventBase,
        started_at: Option<String>,
        completed_at: String,
        duration_seconds: Option<i64>,
        completed: bool,
        session_end_date: String,
        answers: Vec<AnswerGroup>,
    },

    /// Emitted once by the scanner after a successful claim
    SessionAbandoned {
        #[serde(flatten)]
        base: EventBase,
        last_step: Option<i64>,
        started_at: String,
        last_seen_at: String,
        inactivity_min: u64,
    },
}

impl EventPayload {
    /// Value of the `event` tag
    pub fn event_name(&self) -> &'static str {
        match self {
            EventPayload::SurveyStarted { .. } => "survey_started",
            EventPayload::PageSubmit { .. } => "page_submit",
            EventPayload::SurveyCompleted { .. } => "survey_completed",
            EventPayload::SessionAbandoned { .. } => "session_abandoned",
        }
    }

    pub fn base(&self) -> &EventBase {
        match self {
            EventPayload::SurveyStarted { base, .. }
            | EventPayload::PageSubmit { base, .. }
            | EventPayload::SurveyCompleted { base, .. }
            | EventPayload::SessionAbandoned { base, .. } => base,
        }
    }

    /// `step` of a started event
    pub fn step(&self) -> Option<i64> {
        match self {
            EventPayload::SurveyStarted { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// `step_submitted` of a page submit
    pub fn step_submitted(&self) -> Option<i64> {
        match self {
            EventPayload::PageSubmit { step_submitted, .. } => Some(*step_submitted),
            _ => None,
        }
    }

    /// Answers carried by the event, empty for events without answers
    pub fn answers(&self) -> &[AnswerGroup] {
        match self {
            EventPayload::PageSubmit { answers, .. }
            | EventPayload::SurveyCompleted { answers, .. } => answers,
            _ => &[],
        }
    }
}
