pub mod chat;
pub mod decoder;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_CHAT_ROUTE: &str = "/api/chat";
pub const DEFAULT_TAGS_ROUTE: &str = "/api/tags";
pub const DEFAULT_RELAY_ACTION: &str = "ocw_proxy_ollama";

/// How requests reach the model host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Streams straight from the host, or from an edge relay that forwards the body verbatim.
    Direct,
    /// Posts through a CMS AJAX relay that answers with a `{success, data}` envelope.
    Relay,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseTransportKindError {
    message: String,
}

impl fmt::Display for ParseTransportKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseTransportKindError {}

impl FromStr for TransportKind {
    type Err = ParseTransportKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" | "ollama" | "worker" => Ok(TransportKind::Direct),
            "relay" | "wordpress" | "ajax" => Ok(TransportKind::Relay),
            _ =>
                Err(ParseTransportKindError {
                    message: format!("Invalid transport type: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Relay => write!(f, "relay"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub base_url: String,
    pub chat_route: String,
    pub tags_route: String,
    pub relay_url: Option<String>,
    pub relay_action: String,
    pub auth_token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Direct,
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_route: DEFAULT_CHAT_ROUTE.to_string(),
            tags_route: DEFAULT_TAGS_ROUTE.to_string(),
            relay_url: None,
            relay_action: DEFAULT_RELAY_ACTION.to_string(),
            auth_token: None,
        }
    }
}

/// Joins a base URL and a route the way the host expects, tolerating stray slashes.
pub fn endpoint(base_url: &str, route: &str) -> String {
    if route.is_empty() {
        return base_url.trim_end_matches('/').to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), route.trim_start_matches('/'))
}
