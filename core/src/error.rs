/// Error types for the sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("A send is already in flight")]
    Busy,

    #[error("Send failed: {reason}")]
    SendFailed { draft: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Draft text handed back by a failed send, if any
    pub fn draft(&self) -> Option<&str> {
        match self {
            SyncError::SendFailed { draft, .. } => Some(draft),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
