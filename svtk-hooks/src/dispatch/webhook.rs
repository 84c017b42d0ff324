//! HTTP webhook channel

use async_trait::async_trait;
use std::time::Duration;
use svtk_common::config::WebhookConfig;
use svtk_common::events::EventPayload;

use super::{Sink, SinkError};

/// Longest response body kept in a failure detail
const MAX_ERROR_BODY: usize = 200;

/// POSTs the event JSON to a single URL
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    auth_header: Option<(String, String)>,
}

impl WebhookSink {
    pub fn new(config: &WebhookConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("svtk-hooks/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let name = config.auth_header_name.trim();
        let auth_header = if name.is_empty() {
            None
        } else {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SinkError::Config(format!("auth header name '{}': {}", name, e)))?;
            Some((name.to_string(), config.auth_header_value.clone()))
        };

        Ok(Self {
            client,
            url: config.url.trim().to_string(),
            auth_header,
        })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, payload: &EventPayload) -> Result<String, SinkError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some((name, value)) = &self.auth_header {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(format!("HTTP {}", status.as_u16()));
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_header_name() {
        let config = WebhookConfig {
            url: "http://127.0.0.1:9/hook".to_string(),
            auth_header_name: "bad header".to_string(),
            ..WebhookConfig::default()
        };
        assert!(matches!(WebhookSink::new(&config), Err(SinkError::Config(_))));
    }

    #[test]
    fn test_blank_header_name_means_no_header() {
        let config = WebhookConfig {
            url: " http://127.0.0.1:9/hook ".to_string(),
            auth_header_value: "ignored".to_string(),
            ..WebhookConfig::default()
        };
        let sink = WebhookSink::new(&config).unwrap();
        assert!(sink.auth_header.is_none());
        assert_eq!(sink.url, "http://127.0.0.1:9/hook");
    }
}
