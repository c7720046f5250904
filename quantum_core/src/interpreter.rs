//! Event Interpreter - folds `SyncEvent`s into local state.
//!
//! Local and remote events take the same path. Every arm is idempotent, so
//! duplicate delivery, the publisher's own echo and out-of-order arrival are
//! harmless.

use tracing::debug;

use crate::collaborators::{Renderer, StyleHint};
use crate::message::{ObjectId, Position, SyncEvent};
use crate::prophecy::{FulfilmentOutcome, ProphecyBoard};
use crate::registry::{FreezeOutcome, ObjectRegistry};

/// What applying an event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Frozen(ObjectId),
    Removed(ObjectId),
    /// Reality-shatter; number of objects cleared
    Cleared(usize),
    Volcano(Position),
    Prophecy(FulfilmentOutcome),
    /// Nothing to do (already applied, or target absent)
    Noop,
}

#[derive(Debug, Clone)]
pub struct EventInterpreter {
    fade_duration_ms: u64,
}

impl EventInterpreter {
    pub fn new(fade_duration_ms: u64) -> Self {
        Self { fade_duration_ms }
    }

    pub fn apply(
        &self,
        event: &SyncEvent,
        registry: &mut ObjectRegistry,
        prophecy: &mut ProphecyBoard,
        renderer: &dyn Renderer,
    ) -> Applied {
        match event {
            SyncEvent::Freeze { target_id, .. } => match registry.freeze(target_id) {
                FreezeOutcome::Frozen => {
                    renderer.object_restyled(target_id, StyleHint::Frozen);
                    Applied::Frozen(target_id.clone())
                }
                FreezeOutcome::AlreadyFrozen | FreezeOutcome::Absent => {
                    debug!(%target_id, "freeze ignored");
                    Applied::Noop
                }
            },

            SyncEvent::Shatter { target_id, .. } => match registry.remove(target_id) {
                Some(_) => {
                    renderer.object_removed(target_id);
                    Applied::Removed(target_id.clone())
                }
                None => {
                    debug!(%target_id, "shatter of absent object ignored");
                    Applied::Noop
                }
            },

            SyncEvent::RealityShatter { .. } => {
                let removed = registry.remove_all();
                if removed.is_empty() {
                    return Applied::Cleared(0);
                }
                // The fade is cosmetic; the registry is already empty.
                renderer.all_objects_faded(self.fade_duration_ms);
                for object in &removed {
                    renderer.object_removed(&object.id);
                }
                Applied::Cleared(removed.len())
            }

            SyncEvent::Volcano { location, .. } => {
                renderer.volcano_erupted(*location);
                Applied::Volcano(*location)
            }

            SyncEvent::ProphecyFulfilled { creator_id, fulfilled_at } => {
                Applied::Prophecy(prophecy.record(creator_id, *fulfilled_at))
            }
        }
    }
}
