//! Object Registry - the local view of which quantum objects exist.
//!
//! The registry is the fold of every announcement and event this peer has
//! observed. Ids are idempotency keys: inserting a known id, removing an
//! unknown one, or freezing twice are all no-ops.

use quantum_env::PeerId;
use std::collections::BTreeMap;
use tracing::debug;

use crate::message::{ObjectAnnouncement, ObjectId, ObjectState, Position, QuantumObject};
use crate::role::RoleMachine;

/// Result of observing an announcement.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// New object, now live; the caller materializes it
    Inserted(QuantumObject),

    /// Announcement of this peer's own creation
    OwnOrigin,

    /// Id already live
    Duplicate,
}

/// Result of a freeze request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeOutcome {
    Frozen,
    AlreadyFrozen,
    Absent,
}

pub struct ObjectRegistry {
    local_peer: PeerId,
    objects: BTreeMap<ObjectId, QuantumObject>,
}

impl ObjectRegistry {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            objects: BTreeMap::new(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Creates an object owned by this peer.
    ///
    /// Rejected (returns `None`) unless the role machine accepts the
    /// creation: the peer must be a Dreamer outside the cooldown window.
    pub fn create_local(
        &mut self,
        position: Position,
        now_ms: u64,
        roles: &mut RoleMachine,
    ) -> Option<QuantumObject> {
        if !roles.try_begin_creation(now_ms) {
            debug!(role = %roles.role(), "local creation rejected");
            return None;
        }

        let id = ObjectId::new(&self.local_peer, now_ms);
        if self.objects.contains_key(&id) {
            return None;
        }

        let object = QuantumObject {
            id: id.clone(),
            creator_id: self.local_peer.clone(),
            position,
            created_at: now_ms,
            state: ObjectState::Active,
        };
        self.objects.insert(id, object.clone());
        Some(object)
    }

    /// Folds in an announcement received from the channel.
    pub fn observe_remote(&mut self, announcement: &ObjectAnnouncement) -> Observation {
        if announcement.creator_id == self.local_peer {
            return Observation::OwnOrigin;
        }
        if self.objects.contains_key(&announcement.id) {
            return Observation::Duplicate;
        }

        let object = QuantumObject::from_announcement(announcement);
        self.objects.insert(object.id.clone(), object.clone());
        Observation::Inserted(object)
    }

    pub fn freeze(&mut self, id: &ObjectId) -> FreezeOutcome {
        match self.objects.get_mut(id) {
            Some(object) if object.state == ObjectState::Frozen => FreezeOutcome::AlreadyFrozen,
            Some(object) => {
                object.state = ObjectState::Frozen;
                FreezeOutcome::Frozen
            }
            None => FreezeOutcome::Absent,
        }
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<QuantumObject> {
        self.objects.remove(id)
    }

    /// Removes every live object, whoever created it.
    pub fn remove_all(&mut self) -> Vec<QuantumObject> {
        std::mem::take(&mut self.objects).into_values().collect()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&QuantumObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Ids in sorted order.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuantumObject> {
        self.objects.values()
    }
}
