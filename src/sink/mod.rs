//! Write-back of enriched events to MISP

use crate::error::{GlueError, Result};
use crate::event::Event;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Destination for updated events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Replace the stored event with the given full state
    async fn persist(&self, event: &Event) -> Result<()>;
}

/// MISP REST client using `events/edit/{id}`
#[derive(Debug, Clone)]
pub struct MispSink {
    base_url: Url,
    client: Client,
}

impl MispSink {
    pub fn new(url: &str, api_key: &str, verify_tls: bool, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(url).map_err(|e| GlueError::InvalidConfigValue {
            path: "misp.url".to_string(),
            message: e.to_string(),
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut auth = HeaderValue::from_str(api_key).map_err(|_| {
            GlueError::Config(
                "MISP API key contains characters not allowed in a header".to_string(),
            )
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(timeout)
            .build()
            .map_err(|e| GlueError::Http {
                source: e,
                context: "Failed to build MISP client".to_string(),
            })?;

        Ok(Self { base_url, client })
    }

    fn edit_url(&self, event_id: &str) -> Result<Url> {
        let numeric = !event_id.is_empty() && event_id.bytes().all(|b| b.is_ascii_digit());
        if !numeric && Uuid::parse_str(event_id).is_err() {
            return Err(GlueError::SinkRejected {
                event_id: event_id.to_string(),
                message: "event id is neither numeric nor a UUID".to_string(),
            });
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GlueError::InvalidConfigValue {
                path: "misp.url".to_string(),
                message: format!("{} cannot be used as a base URL", self.base_url),
            })?
            .pop_if_empty()
            .extend(["events", "edit", event_id]);

        Ok(url)
    }
}

#[async_trait]
impl EventSink for MispSink {
    async fn persist(&self, event: &Event) -> Result<()> {
        let url = self.edit_url(&event.id)?;
        let body = event.to_envelope()?;

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GlueError::Http {
                source: e,
                context: format!("Failed to send update for event {}", event.id),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| GlueError::Http {
            source: e,
            context: format!("Failed to read update response for event {}", event.id),
        })?;

        if !status.is_success() {
            return Err(GlueError::SinkRejected {
                event_id: event.id.clone(),
                message: format!("HTTP {}: {}", status.as_u16(), truncate(&text, 200)),
            });
        }

        // MISP can answer 200 with an `errors` object
        if let Ok(serde_json::Value::Object(reply)) = serde_json::from_str(&text) {
            if let Some(errors) = reply.get("errors") {
                return Err(GlueError::SinkRejected {
                    event_id: event.id.clone(),
                    message: errors.to_string(),
                });
            }
        }

        tracing::debug!(event_id = %event.id, "Event updated");
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
