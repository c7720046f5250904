//! Common types for the Quantum Reality environment abstraction.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a peer process.
///
/// Production ids look like `player_<n>_<unixMillis>`; the random part is
/// generated without coordination so any number of peers can join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generates a fresh id for a peer starting at `now_ms`.
    pub fn generate(now_ms: u64) -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..10_000);
        Self(format!("player_{}_{}", n, now_ms))
    }

    /// Generates an id with a UUID suffix (used when no clock is available).
    pub fn random() -> Self {
        Self(format!("player_{}", Uuid::new_v4().simple()))
    }

    /// Creates a deterministic PeerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(format!("player_{}", seed))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two logical topics of the Sync Channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Keyed, append-only set of object announcements
    Objects,

    /// Append-only stream of discrete event messages
    Events,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Objects => f.write_str("objects"),
            Topic::Events => f.write_str("events"),
        }
    }
}

/// Envelope for messages carried by the Sync Channel.
///
/// This is a transport-layer wrapper - the payload is opaque bytes that the
/// core decodes into a `SyncMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic the envelope was published on
    pub topic: Topic,

    /// Dedup key (object id) for the objects topic, `None` for events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Peer that published the envelope
    pub origin: PeerId,

    /// The encoded message bytes
    pub payload: Vec<u8>,

    /// Timestamp when the envelope was created (publisher's clock)
    pub timestamp_ms: u64,
}

impl Envelope {
    /// Creates an objects-topic envelope keyed by `key`.
    pub fn object(key: impl Into<String>, origin: PeerId, payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            topic: Topic::Objects,
            key: Some(key.into()),
            origin,
            payload,
            timestamp_ms,
        }
    }

    /// Creates an events-topic envelope.
    pub fn event(origin: PeerId, payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            topic: Topic::Events,
            key: None,
            origin,
            payload,
            timestamp_ms,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
