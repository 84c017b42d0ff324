//! Channel delivery against a local HTTP receiver
//!
//! Covers the webhook auth header, failing channels, and the per-attempt
//! journal.

mod helpers;

use axum::http::StatusCode;
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use svtk_common::config::TomlConfig;
use svtk_common::events::{EventBase, EventPayload};
use svtk_hooks::dispatch::{ChannelDispatcher, Sink, WebhookSink};
use tempfile::TempDir;

use helpers::TestReceiver;

fn started_payload() -> EventPayload {
    EventPayload::SurveyStarted {
        base: EventBase {
            session_id: "survey_12_tx1".to_string(),
            event_time: 1_700_000_000,
            timestamp: "2023-11-14 22:13:20".to_string(),
            survey_id: 12,
            response_id: None,
            session_start_date: Some("2023-11-14 22:13:20".to_string()),
            uuid: Some("u-1".to_string()),
            custom_id: None,
        },
        step: 0,
    }
}

fn read_journal(path: &std::path::Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_webhook_sends_auth_header_and_event_body() {
    let receiver = TestReceiver::start(StatusCode::OK).await;

    let mut config = TomlConfig::default();
    config.webhook.url = receiver.hook_url();
    config.webhook.auth_header_name = "X-Survey-Token".to_string();
    config.webhook.auth_header_value = "s3cret".to_string();

    let sink = WebhookSink::new(&config.webhook).unwrap();
    let detail = sink.send(&started_payload()).await.unwrap();
    assert_eq!(detail, "HTTP 200");

    let received = receiver.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].headers["x-survey-token"], "s3cret");
    assert_eq!(received[0].body["event"], "survey_started");
    assert_eq!(received[0].body["session_id"], "survey_12_tx1");
    assert_eq!(received[0].body["step"], 0);
}

#[tokio::test]
async fn test_webhook_non_success_status_is_a_failure() {
    let receiver = TestReceiver::start(StatusCode::INTERNAL_SERVER_ERROR).await;

    let mut config = TomlConfig::default();
    config.webhook.url = receiver.hook_url();

    let sink = WebhookSink::new(&config.webhook).unwrap();
    let err = sink.send(&started_payload()).await.unwrap_err();
    assert!(err.to_string().starts_with("HTTP 500"));
    assert_eq!(receiver.received().len(), 1);
}

#[tokio::test]
async fn test_journal_records_every_attempt() {
    let webhook = TestReceiver::start(StatusCode::OK).await;
    let pubsub = TestReceiver::start(StatusCode::SERVICE_UNAVAILABLE).await;
    let dir = TempDir::new().unwrap();
    let journal_path = dir.path().join("logs").join("events.ndjson");

    let mut config = TomlConfig::default();
    config.webhook.url = webhook.hook_url();
    config.pubsub.enabled = true;
    config.pubsub.project_id = "proj".to_string();
    config.pubsub.topic = "events".to_string();
    config.pubsub.endpoint = pubsub.url.clone();

    let dispatcher = ChannelDispatcher::from_config(&config, Some(journal_path.clone()));
    assert_eq!(dispatcher.sink_count(), 2);

    let report = dispatcher.dispatch(&started_payload()).await;
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.delivered(), 1);

    // Webhook still delivered while Pub/Sub failed
    assert_eq!(webhook.received().len(), 1);

    let published = pubsub.received();
    assert_eq!(published.len(), 1);
    let message = &published[0].body["messages"][0];
    assert_eq!(message["attributes"]["event"], "survey_started");
    let data = general_purpose::STANDARD
        .decode(message["data"].as_str().unwrap())
        .unwrap();
    let decoded: Value = serde_json::from_slice(&data).unwrap();
    assert_eq!(decoded["session_id"], "survey_12_tx1");

    let entries = read_journal(&journal_path);
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry["event"], "survey_started");
        assert_eq!(entry["payload"]["survey_id"], 12);
    }
    let webhook_entry = entries.iter().find(|e| e["sink"] == "webhook").unwrap();
    assert_eq!(webhook_entry["success"], true);
    let pubsub_entry = entries.iter().find(|e| e["sink"] == "pubsub").unwrap();
    assert_eq!(pubsub_entry["success"], false);
    assert!(pubsub_entry["detail"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_journal_disabled_writes_nothing() {
    let webhook = TestReceiver::start(StatusCode::OK).await;
    let dir = TempDir::new().unwrap();
    let journal_path = dir.path().join("events.ndjson");

    let mut config = TomlConfig::default();
    config.webhook.url = webhook.hook_url();
    config.logging.json_journal = false;

    let dispatcher = ChannelDispatcher::from_config(&config, Some(journal_path.clone()));
    let report = dispatcher.dispatch(&started_payload()).await;
    assert_eq!(report.delivered(), 1);
    assert!(!journal_path.exists());
}
