use super::logging::{debug_payload_enabled, emit_debug_payload};
use crate::config::Config;
use crate::error::TransportError;
use crate::types::{ApiMessage, ToolManifestEntry};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
#[cfg(test)]
use std::sync::Arc;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

const SYSTEM_PROMPT: &str = "You are the AI prompt designer for a chatbot platform.\n\
The user describes how their bot should behave; you maintain the bot's behavior prompt.\n\
Structure every reply with the dual-channel protocol:\n\
---CHAT_RESPONSE---\n\
<short conversational reply to the user>\n\
---AI_PROMPT---\n\
<the full, updated bot behavior prompt>\n\
---END---\n\
Omit the AI_PROMPT section when the user is only chatting and no prompt change is needed.\n\
Never mix behavior rules into the CHAT_RESPONSE section.\n\
For bot configuration changes (language, logo, theme, status, welcome message, display name) call the update_bot_config tool instead of describing the change in text.";

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[cfg(test)]
pub trait MockStreamProducer: Send + Sync {
    fn create_mock_stream(&self, messages: &[ApiMessage]) -> Result<ByteStream, TransportError>;
}

/// HTTP client for the streaming completion endpoint.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_url: String,
    api_version: String,
    #[cfg(test)]
    mock_stream_producer: Option<Arc<dyn MockStreamProducer>>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_url: config.api_url.clone(),
            api_version: config.api_version.clone(),
            #[cfg(test)]
            mock_stream_producer: None,
        }
    }

    #[cfg(test)]
    pub fn new_mock(mock_producer: Arc<dyn MockStreamProducer>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: None,
            model: "mock-model".to_string(),
            api_url: "http://localhost:8000/v1/completions".to_string(),
            api_version: "2024-06-01".to_string(),
            mock_stream_producer: Some(mock_producer),
        }
    }

    /// Open a cancelable, single-pass byte stream for one completion turn.
    ///
    /// The caller pulls chunks and feeds them to an
    /// [`EventParser`](super::stream::EventParser); dropping the stream
    /// cancels the in-flight request.
    pub async fn create_stream(
        &self,
        messages: &[ApiMessage],
        tools: &[ToolManifestEntry],
    ) -> Result<ByteStream, TransportError> {
        #[cfg(test)]
        {
            if let Some(producer) = &self.mock_stream_producer {
                return producer.create_mock_stream(messages);
            }
        }

        let mut payload = json!({
            "model": self.model,
            "max_tokens": resolve_max_tokens(),
            "stream": true,
            "system": SYSTEM_PROMPT,
            "messages": messages,
        });
        if !tools.is_empty() {
            let payload_object = payload
                .as_object_mut()
                .expect("payload must be a JSON object");
            payload_object.insert("tool_choice".to_string(), json!({ "type": "auto" }));
            payload_object.insert("tools".to_string(), json!(tools));
        }

        let mut request = self
            .http
            .post(&self.api_url)
            .header("content-type", "application/json")
            .header("api-version", &self.api_version)
            .json(&payload);

        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }

        if debug_payload_enabled() {
            emit_debug_payload(&self.api_url, &payload);
        }

        let response = request
            .send()
            .await
            .map_err(|error| map_transport_error(error, &self.api_url))?
            .error_for_status()
            .map_err(|error| map_transport_error(error, &self.api_url))?;

        let request_url = self.api_url.clone();
        let stream = response
            .bytes_stream()
            .map(move |item| item.map_err(|error| map_transport_error(error, &request_url)));
        Ok(Box::pin(stream))
    }
}

fn map_transport_error(error: reqwest::Error, request_url: &str) -> TransportError {
    if let Some(status) = error.status() {
        if status.as_u16() == 429 {
            return TransportError::RateLimited;
        }
        return TransportError::Http {
            url: request_url.to_string(),
            status: status.as_u16(),
        };
    }
    if error.is_timeout() {
        return TransportError::Timeout {
            url: request_url.to_string(),
        };
    }
    if error.is_connect() {
        return TransportError::Connect {
            url: request_url.to_string(),
            reason: error.to_string(),
        };
    }
    TransportError::Stream(error.to_string())
}

fn resolve_max_tokens() -> u32 {
    std::env::var("BOTSTUDIO_MAX_TOKENS")
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map(|v| v.clamp(256, 16_384))
        .unwrap_or(DEFAULT_MAX_TOKENS)
}

/// Manifest for the single configuration tool the prompt designer may call.
pub fn tool_manifest() -> Vec<ToolManifestEntry> {
    vec![ToolManifestEntry {
        name: "update_bot_config".to_string(),
        description: "Apply one or more bot configuration changes. Each task maps a \
                      configuration key to its new string value."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "key": { "type": "string" },
                            "value": { "type": "string" }
                        },
                        "required": ["key", "value"]
                    }
                }
            },
            "required": ["tasks"]
        }),
    }]
}
