//! Data model and wire messages.
//!
//! Messages are JSON with camelCase fields; events carry their kind in a
//! `type` tag. The aliases accept the field names older clients used
//! (`id`, `creator`, `timestamp`).

use quantum_env::{Envelope, PeerId, Topic};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Globally unique object id: `obj_<creatorId>_<creationTimestamp>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(creator: &PeerId, created_at: u64) -> Self {
        Self(format!("obj_{}_{}", creator, created_at))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the id back into creator and timestamp.
    ///
    /// Creator ids contain underscores, so the timestamp is taken after the
    /// last one.
    pub fn parts(&self) -> Option<(PeerId, u64)> {
        let rest = self.0.strip_prefix("obj_")?;
        let (creator, ts) = rest.rsplit_once('_')?;
        if creator.is_empty() {
            return None;
        }
        Some((PeerId::from(creator), ts.parse().ok()?))
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position in scene coordinates. Semantic only; the renderer consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    #[default]
    Active,
    Frozen,
}

/// A live object in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantumObject {
    pub id: ObjectId,
    pub creator_id: PeerId,
    pub position: Position,
    pub created_at: u64,
    pub state: ObjectState,
}

impl QuantumObject {
    pub fn from_announcement(announcement: &ObjectAnnouncement) -> Self {
        Self {
            id: announcement.id.clone(),
            creator_id: announcement.creator_id.clone(),
            position: announcement.position,
            created_at: announcement.created_at,
            state: ObjectState::Active,
        }
    }

    pub fn announcement(&self) -> ObjectAnnouncement {
        ObjectAnnouncement {
            id: self.id.clone(),
            creator_id: self.creator_id.clone(),
            position: self.position,
            created_at: self.created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ObjectState::Active
    }
}

/// Object creation announcement, published on the objects topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAnnouncement {
    pub id: ObjectId,
    #[serde(alias = "creator")]
    pub creator_id: PeerId,
    pub position: Position,
    #[serde(alias = "timestamp")]
    pub created_at: u64,
}

/// Discrete event, published on the events topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// Mark an object inert
    Freeze {
        #[serde(rename = "targetId", alias = "id")]
        target_id: ObjectId,
        #[serde(rename = "creatorId", alias = "creator", default, skip_serializing_if = "Option::is_none")]
        creator_id: Option<PeerId>,
    },

    /// Destroy an object
    Shatter {
        #[serde(rename = "targetId", alias = "id")]
        target_id: ObjectId,
        #[serde(rename = "creatorId", alias = "creator", default, skip_serializing_if = "Option::is_none")]
        creator_id: Option<PeerId>,
    },

    /// Clear every live object
    RealityShatter {
        #[serde(rename = "creatorId", alias = "creator", default, skip_serializing_if = "Option::is_none")]
        creator_id: Option<PeerId>,
    },

    /// Spawn a cosmetic hazard at a location
    Volcano {
        location: Position,
        #[serde(rename = "creatorId", alias = "creator", default, skip_serializing_if = "Option::is_none")]
        creator_id: Option<PeerId>,
    },

    /// One prophecy was fulfilled somewhere in the session
    ProphecyFulfilled {
        #[serde(rename = "creatorId", alias = "creator")]
        creator_id: PeerId,
        #[serde(rename = "fulfilledAt")]
        fulfilled_at: u64,
    },
}

impl SyncEvent {
    pub fn freeze(target_id: ObjectId, creator_id: PeerId) -> Self {
        Self::Freeze { target_id, creator_id: Some(creator_id) }
    }

    pub fn shatter(target_id: ObjectId, creator_id: PeerId) -> Self {
        Self::Shatter { target_id, creator_id: Some(creator_id) }
    }

    pub fn reality_shatter(creator_id: PeerId) -> Self {
        Self::RealityShatter { creator_id: Some(creator_id) }
    }

    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::Freeze { .. } => "freeze",
            SyncEvent::Shatter { .. } => "shatter",
            SyncEvent::RealityShatter { .. } => "reality-shatter",
            SyncEvent::Volcano { .. } => "volcano",
            SyncEvent::ProphecyFulfilled { .. } => "prophecy-fulfilled",
        }
    }

    pub fn creator(&self) -> Option<&PeerId> {
        match self {
            SyncEvent::Freeze { creator_id, .. }
            | SyncEvent::Shatter { creator_id, .. }
            | SyncEvent::RealityShatter { creator_id }
            | SyncEvent::Volcano { creator_id, .. } => creator_id.as_ref(),
            SyncEvent::ProphecyFulfilled { creator_id, .. } => Some(creator_id),
        }
    }

    pub fn target(&self) -> Option<&ObjectId> {
        match self {
            SyncEvent::Freeze { target_id, .. } | SyncEvent::Shatter { target_id, .. } => Some(target_id),
            _ => None,
        }
    }
}

/// Everything that travels over the Sync Channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Announce(ObjectAnnouncement),
    Event(SyncEvent),
}

impl SyncMessage {
    /// Wraps the message in a channel envelope.
    pub fn to_envelope(&self, origin: PeerId, timestamp_ms: u64) -> Result<Envelope, CoreError> {
        match self {
            SyncMessage::Announce(announcement) => {
                let payload = serde_json::to_vec(announcement)?;
                Ok(Envelope::object(announcement.id.as_str(), origin, payload, timestamp_ms))
            }
            SyncMessage::Event(event) => {
                let payload = serde_json::to_vec(event)?;
                Ok(Envelope::event(origin, payload, timestamp_ms))
            }
        }
    }

    /// Decodes an envelope.
    ///
    /// Unknown event types, malformed JSON and announcements whose id does
    /// not match the envelope key are all `InvalidMessage`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, CoreError> {
        match envelope.topic {
            Topic::Objects => {
                let announcement: ObjectAnnouncement = serde_json::from_slice(&envelope.payload)?;
                if envelope.key.as_deref() != Some(announcement.id.as_str()) {
                    return Err(CoreError::InvalidMessage(format!(
                        "announcement {} published under key {:?}",
                        announcement.id, envelope.key
                    )));
                }
                Ok(SyncMessage::Announce(announcement))
            }
            Topic::Events => Ok(SyncMessage::Event(serde_json::from_slice(&envelope.payload)?)),
        }
    }
}
