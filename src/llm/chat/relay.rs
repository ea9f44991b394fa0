//! CMS AJAX relay.
//!
//! The relay receives a form post (`action`, `nonce`, `endpoint`, `data`) and answers with
//! `{"success": bool, "data": ...}` once the host has finished. On success `data` is the
//! host body as a string; a string that itself decodes to a JSON string was encoded twice
//! and is unwrapped exactly once more. Object or array `data` is taken as one record.
//! On failure `data` carries the reason.

use async_trait::async_trait;
use bytes::Bytes;
use log::{ debug, info, warn };
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{ empty_stream, send_cancellable, ChatTransport, ChunkStream };
use crate::error::TransportError;
use crate::llm::TransportConfig;
use crate::models::chat::{ ChatRequest, ModelDescriptor, ModelList };

#[derive(Debug, Deserialize)]
struct RelayEnvelope {
    success: bool,
    #[serde(default)]
    data: Value,
}

#[derive(Debug)]
pub struct RelayTransport {
    http: HttpClient,
    relay_url: String,
    action: String,
    nonce: String,
}

impl RelayTransport {
    pub fn new(relay_url: impl Into<String>, action: impl Into<String>, nonce: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            relay_url: relay_url.into(),
            action: action.into(),
            nonce: nonce.into(),
        }
    }

    pub fn from_config(config: &TransportConfig, relay_url: String) -> Self {
        Self::new(relay_url, config.relay_action.clone(), config.auth_token.clone().unwrap_or_default())
    }

    fn form(&self, endpoint: &str, data: String) -> reqwest::RequestBuilder {
        self.http
            .post(&self.relay_url)
            .form(
                &[
                    ("action", self.action.as_str()),
                    ("nonce", self.nonce.as_str()),
                    ("endpoint", endpoint),
                    ("data", data.as_str()),
                ]
            )
    }
}

/// Returns the host body carried by a relay envelope.
pub fn unwrap_envelope(raw: &str) -> Result<String, TransportError> {
    let envelope: RelayEnvelope = serde_json
        ::from_str(raw)
        .map_err(|e| TransportError::Envelope(e.to_string()))?;

    if !envelope.success {
        let reason = match envelope.data {
            Value::String(s) if !s.is_empty() => s,
            Value::Null | Value::String(_) => "API request failed".to_string(),
            other => other.to_string(),
        };
        return Err(TransportError::Relay(reason));
    }

    match envelope.data {
        Value::String(body) =>
            match serde_json::from_str::<Value>(&body) {
                Ok(Value::String(inner)) => {
                    debug!("Relay body was encoded twice, unwrapping");
                    Ok(inner)
                }
                _ => Ok(body),
            }
        Value::Null => Err(TransportError::Envelope("success without data".into())),
        other => Ok(other.to_string()),
    }
}

#[async_trait]
impl ChatTransport for RelayTransport {
    async fn open_chat_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken
    ) -> Result<ChunkStream, TransportError> {
        let data = serde_json
            ::to_string(request)
            .map_err(|e| TransportError::Envelope(e.to_string()))?;
        let response = match send_cancellable(self.form("chat", data), &cancel).await? {
            Some(response) => response,
            None => {
                info!("Relay request cancelled before the relay responded");
                return Ok(empty_stream());
            }
        };

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Relay request cancelled while reading the envelope");
                return Ok(empty_stream());
            }
            text = response.text() => text?,
        };
        let body = unwrap_envelope(&raw)?;
        Ok(Box::pin(futures::stream::once(async move { Ok::<_, TransportError>(Bytes::from(body)) })))
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError> {
        let resp = self.form("tags", "{}".to_string()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16() });
        }
        let body = unwrap_envelope(&resp.text().await?)?;
        let list: ModelList = serde_json::from_str(&body).map_err(|e| {
            warn!("Relay returned an unreadable model list: {}", e);
            TransportError::Envelope(e.to_string())
        })?;
        Ok(list.models)
    }

    fn describe(&self) -> String {
        format!("relay envelope via {} (action {})", self.relay_url, self.action)
    }
}
