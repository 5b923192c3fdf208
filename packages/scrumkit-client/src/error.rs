use scrumkit_core::errors::is_network_message;
use scrumkit_core::rate_limit::RateLimited;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    /// Transient connectivity failures; the only errors worth retrying.
    pub fn is_network(&self) -> bool {
        match self {
            StoreError::Network(_) => true,
            StoreError::Rejected { message, .. } => is_network_message(message),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            return StoreError::Network(e.to_string());
        }
        match e.status() {
            Some(status) if status.as_u16() == 401 => StoreError::Unauthorized,
            Some(status) => StoreError::Rejected {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_decode() => StoreError::Rejected {
                status: 0,
                message: e.to_string(),
            },
            None => StoreError::Network(e.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Channel {topic} failed to join: {reason}")]
    JoinFailed { topic: String, reason: String },

    #[error("Channel {0} is closed")]
    Closed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Gave up reconnecting {topic} after {attempts} attempts")]
    RetriesExhausted { topic: String, attempts: u32 },
}

/// Failures of a board session operation.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("Item not found: {0}")]
    UnknownItem(String),

    #[error("Column not found: {0}")]
    UnknownColumn(String),
}
