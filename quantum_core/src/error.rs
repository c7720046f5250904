//! Error types for the sync core.

use quantum_env::EnvError;
use thiserror::Error;

/// Errors surfaced by the sync core.
///
/// None of these is fatal to a session: decode failures drop the message,
/// store failures fall back to defaults, channel failures degrade to
/// local-only mode.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Channel error: {0}")]
    Env(#[from] EnvError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMessage(err.to_string())
    }
}

/// Errors at the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Corrupt value: {0}")]
    Corrupt(String),
}
