//! Error types for the Quantum Reality environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The channel could not be initialized (bind failed, relay unreachable)
    #[error("Transport init failed: {0}")]
    TransportInit(String),

    /// Network send failed (buffer full, socket error, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The channel is not connected or has been shut down
    #[error("Channel closed")]
    Closed,

    /// Target peer is unreachable (simulated partition)
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Frame serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EnvError {
    /// Creates a transport initialization error.
    pub fn transport_init(msg: impl Into<String>) -> Self {
        Self::TransportInit(msg.into())
    }

    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(peer: impl std::fmt::Display) -> Self {
        Self::PeerUnreachable(peer.to_string())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
