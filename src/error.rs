use thiserror::Error;

/// Failure of the request/stream itself. Fatal to the current generation only.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error! status: {status}")]
    Status {
        status: u16,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("relay request failed: {0}")]
    Relay(String),

    #[error("invalid relay envelope: {0}")]
    Envelope(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status } => Some(*status),
            TransportError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("state JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("persona file IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("persona JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Persona(#[from] PersonaError),

    #[error("a generation is already in flight")]
    Busy,

    #[error("message is empty")]
    EmptyMessage,

    #[error("configuration error: {0}")]
    Config(String),
}
