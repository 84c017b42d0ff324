//! Lifecycle event assembly
//!
//! Pure functions: everything an event needs is passed in, nothing is read
//! from storage here.

use chrono::{DateTime, Utc};
use svtk_common::db::SessionRecord;
use svtk_common::events::{AnswerGroup, EventBase, EventPayload};
use svtk_common::time::format_timestamp;

use crate::session::SurveyScope;

/// Identity of the session an event is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSource {
    pub survey_id: i64,
    pub transport_id: String,
    pub response_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub uuid: Option<String>,
    pub custom_id: Option<String>,
}

impl EventSource {
    /// Source for a live hook, identifiers taken from the survey scope
    pub fn from_scope(
        survey_id: i64,
        transport_id: &str,
        response_id: Option<i64>,
        scope: &SurveyScope,
    ) -> Self {
        Self {
            survey_id,
            transport_id: transport_id.to_string(),
            response_id,
            started_at: scope.start_time_utc(),
            uuid: scope.uuid.clone(),
            custom_id: scope.custom_id.clone(),
        }
    }

    /// Source for the scanner, identifiers taken from the stored row
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            survey_id: record.survey_id,
            transport_id: record.transport_id(),
            response_id: record.response_id,
            started_at: Some(record.started_at_utc()),
            uuid: record.uuid.clone(),
            custom_id: record.custom_id.clone(),
        }
    }

    pub fn session_id(&self) -> String {
        format!("survey_{}_{}", self.survey_id, self.transport_id)
    }
}

fn base(now: DateTime<Utc>, source: &EventSource) -> EventBase {
    EventBase {
        session_id: source.session_id(),
        event_time: now.timestamp(),
        timestamp: format_timestamp(now),
        survey_id: source.survey_id,
        response_id: source.response_id,
        session_start_date: source.started_at.map(format_timestamp),
        uuid: source.uuid.clone(),
        custom_id: source.custom_id.clone(),
    }
}

pub fn started(now: DateTime<Utc>, source: &EventSource, step: i64) -> EventPayload {
    EventPayload::SurveyStarted {
        base: base(now, source),
        step,
    }
}

pub fn page_submit(
    now: DateTime<Utc>,
    source: &EventSource,
    step_submitted: i64,
    answers: Vec<AnswerGroup>,
) -> EventPayload {
    EventPayload::PageSubmit {
        base: base(now, source),
        step_submitted,
        answers,
    }
}

pub fn completed(now: DateTime<Utc>, source: &EventSource, answers: Vec<AnswerGroup>) -> EventPayload {
    let completed_at = format_timestamp(now);
    let duration_seconds = source
        .started_at
        .map(|start| (now - start).num_seconds().max(0));

    EventPayload::SurveyCompleted {
        base: base(now, source),
        started_at: source.started_at.map(format_timestamp),
        completed_at: completed_at.clone(),
        duration_seconds,
        completed: true,
        session_end_date: completed_at,
        answers,
    }
}

pub fn abandoned(now: DateTime<Utc>, record: &SessionRecord, inactivity_min: u64) -> EventPayload {
    let source = EventSource::from_record(record);
    EventPayload::SessionAbandoned {
        base: base(now, &source),
        last_step: Some(record.step),
        started_at: format_timestamp(record.started_at_utc()),
        last_seen_at: format_timestamp(record.last_seen_utc()),
        inactivity_min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use svtk_common::events::AnswerEntry;
    use svtk_common::time::to_millis;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()
    }

    fn source() -> EventSource {
        EventSource {
            survey_id: 12,
            transport_id: "tx1".to_string(),
            response_id: Some(40),
            started_at: Some(t0()),
            uuid: Some("u-1".to_string()),
            custom_id: None,
        }
    }

    #[test]
    fn test_base_fields() {
        let event = started(t0(), &source(), 0);
        let base = event.base();
        assert_eq!(base.session_id, "survey_12_tx1");
        assert_eq!(base.event_time, t0().timestamp());
        assert_eq!(base.timestamp, "2026-05-04 10:00:00");
        assert_eq!(base.session_start_date.as_deref(), Some("2026-05-04 10:00:00"));
        assert_eq!(event.step(), Some(0));
    }

    #[test]
    fn test_completed_duration() {
        let answers = vec![AnswerGroup {
            question_id: 1,
            answers: vec![AnswerEntry::text("ok")],
        }];
        let event = completed(t0() + Duration::seconds(95), &source(), answers);
        match event {
            EventPayload::SurveyCompleted {
                duration_seconds,
                completed,
                completed_at,
                session_end_date,
                answers,
                ..
            } => {
                assert_eq!(duration_seconds, Some(95));
                assert!(completed);
                assert_eq!(completed_at, "2026-05-04 10:01:35");
                assert_eq!(session_end_date, completed_at);
                assert_eq!(answers.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_completed_without_start_has_no_duration() {
        let mut src = source();
        src.started_at = None;
        let value = serde_json::to_value(completed(t0(), &src, Vec::new())).unwrap();
        assert!(value["duration_seconds"].is_null());
        assert!(value["started_at"].is_null());
    }

    #[test]
    fn test_abandoned_uses_row_identifiers() {
        let record = SessionRecord {
            id: 9,
            correlation_key: "survey_12_tx1".to_string(),
            survey_id: 12,
            response_id: None,
            step: 1,
            started_at: to_millis(t0()),
            last_seen: to_millis(t0() + Duration::seconds(30)),
            completed: false,
            abandoned_sent: true,
            abandoned_sent_at: None,
            uuid: Some("row-uuid".to_string()),
            custom_id: Some("row-custom".to_string()),
            transport_session_id: Some("tx1".to_string()),
        };

        let value = serde_json::to_value(abandoned(t0() + Duration::minutes(4), &record, 3)).unwrap();
        assert_eq!(value["event"], "session_abandoned");
        assert_eq!(value["last_step"], 1);
        assert_eq!(value["inactivity_min"], 3);
        assert_eq!(value["last_seen_at"], "2026-05-04 10:00:30");
        assert_eq!(value["uuid"], "row-uuid");
        assert_eq!(value["custom_id"], "row-custom");
    }
}
