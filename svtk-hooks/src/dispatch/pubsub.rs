//! Google Pub/Sub channel over the REST publish API
//!
//! Authentication uses an OAuth access token read from `credentials_path` on
//! every publish, so an external refresher can rotate it. Without a path the
//! request is unauthenticated, which is what the local emulator expects.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use svtk_common::config::PubSubConfig;
use svtk_common::events::EventPayload;

use super::{Sink, SinkError};

/// Value of the `source` attribute
const SOURCE: &str = "svtk";

/// Value of the `schema` attribute
const SCHEMA_VERSION: &str = "v1";

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

/// Message attributes for `payload`; absent values are omitted
pub fn pubsub_attributes(payload: &EventPayload) -> BTreeMap<String, String> {
    let base = payload.base();
    let mut attrs = BTreeMap::new();

    attrs.insert("event".to_string(), payload.event_name().to_string());
    attrs.insert("survey_id".to_string(), base.survey_id.to_string());
    if let Some(response_id) = base.response_id {
        attrs.insert("response_id".to_string(), response_id.to_string());
    }
    if let Some(step) = payload.step() {
        attrs.insert("step".to_string(), step.to_string());
    }
    if let Some(step) = payload.step_submitted() {
        attrs.insert("step_submitted".to_string(), step.to_string());
    }
    if let Some(uuid) = base.uuid.as_deref().filter(|v| !v.is_empty()) {
        attrs.insert("uuid".to_string(), uuid.to_string());
    }
    if let Some(custom_id) = base.custom_id.as_deref().filter(|v| !v.is_empty()) {
        attrs.insert("custom_id".to_string(), custom_id.to_string());
    }
    attrs.insert("source".to_string(), SOURCE.to_string());
    attrs.insert("schema".to_string(), SCHEMA_VERSION.to_string());
    attrs
}

pub struct PubSubSink {
    client: reqwest::Client,
    publish_url: String,
    credentials_path: Option<PathBuf>,
}

impl PubSubSink {
    pub fn new(config: &PubSubConfig) -> Result<Self, SinkError> {
        if config.project_id.trim().is_empty() {
            return Err(SinkError::Config("project_id is empty".to_string()));
        }
        if config.topic.trim().is_empty() {
            return Err(SinkError::Config("topic is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let publish_url = format!(
            "{}/v1/projects/{}/topics/{}:publish",
            config.endpoint.trim_end_matches('/'),
            config.project_id.trim(),
            config.topic.trim()
        );

        Ok(Self {
            client,
            publish_url,
            credentials_path: config.credentials_path.clone(),
        })
    }

    async fn access_token(&self) -> Result<Option<String>, SinkError> {
        let Some(path) = &self.credentials_path else {
            return Ok(None);
        };
        let token = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SinkError::Credentials(format!("{}: {}", path.display(), e)))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(SinkError::Credentials(format!(
                "{}: empty token",
                path.display()
            )));
        }
        Ok(Some(token.to_string()))
    }
}

#[async_trait]
impl Sink for PubSubSink {
    fn name(&self) -> &'static str {
        "pubsub"
    }

    async fn send(&self, payload: &EventPayload) -> Result<String, SinkError> {
        let data = serde_json::to_vec(payload)?;
        let body = json!({
            "messages": [{
                "data": general_purpose::STANDARD.encode(data),
                "attributes": pubsub_attributes(payload),
            }]
        });

        let mut request = self.client.post(&self.publish_url).json(&body);
        if let Some(token) = self.access_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let published: PublishResponse = response.json().await?;
        Ok(match published.message_ids.first() {
            Some(id) => format!("message {}", id),
            None => format!("HTTP {}", status.as_u16()),
        })
    }
}
