pub mod console;

use clap::Parser;

use crate::llm::{
    TransportConfig,
    TransportKind,
    DEFAULT_BASE_URL,
    DEFAULT_CHAT_ROUTE,
    DEFAULT_RELAY_ACTION,
    DEFAULT_TAGS_ROUTE,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Transport Args ---
    /// How to reach the model host (direct, relay)
    #[arg(long, env = "CHAT_TRANSPORT", default_value = "direct")]
    pub transport: TransportKind,

    /// Base URL of the model host or of an edge relay that forwards requests verbatim
    #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Route for streaming chat requests, appended to the base URL
    #[arg(long, env = "CHAT_ROUTE", default_value = DEFAULT_CHAT_ROUTE)]
    pub chat_route: String,

    /// Route for listing models, appended to the base URL
    #[arg(long, env = "TAGS_ROUTE", default_value = DEFAULT_TAGS_ROUTE)]
    pub tags_route: String,

    /// AJAX endpoint of the CMS relay (e.g., https://example.com/wp-admin/admin-ajax.php). Required for --transport relay.
    #[arg(long, env = "RELAY_URL")]
    pub relay_url: Option<String>,

    /// `action` field sent with every relay request.
    #[arg(long, env = "RELAY_ACTION", default_value = DEFAULT_RELAY_ACTION)]
    pub relay_action: String,

    /// Opaque token passed through to the host (bearer header) or relay (nonce field)
    #[arg(long, env = "CHAT_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    // --- Conversation Args ---
    /// Model to chat with. Overrides the saved selection.
    #[arg(long, env = "CHAT_MODEL")]
    pub model: Option<String>,

    /// JSON file holding the saved conversation and model selection. Memory only when unset.
    #[arg(long, env = "CHAT_STATE_PATH")]
    pub state_path: Option<String>,

    /// JSON persona file used to build the system message. Built-in persona when unset.
    #[arg(long, env = "PERSONA_PATH")]
    pub persona_path: Option<String>,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Args {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            kind: self.transport,
            base_url: self.base_url.clone(),
            chat_route: self.chat_route.clone(),
            tags_route: self.tags_route.clone(),
            relay_url: self.relay_url.clone(),
            relay_action: self.relay_action.clone(),
            auth_token: self.auth_token.clone(),
        }
    }
}
