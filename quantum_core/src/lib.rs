//! Quantum Reality Sync Core - peer state synchronization without a central authority.
//!
//! Every peer folds the same stream of announcements and events into its own
//! view, so the shared scene converges without write coordination:
//! 1. **Object Registry**: set-union of creations, keyed by `obj_<creator>_<ts>`
//! 2. **Event Interpreter**: idempotent freeze / shatter / reality-shatter
//! 3. **Debt Ledger**: bounded, per-peer resource drained by Collapsers

pub mod collaborators;
pub mod config;
pub mod debt_ledger;
pub mod error;
pub mod input;
pub mod interpreter;
pub mod message;
pub mod prophecy;
pub mod registry;
pub mod role;
pub mod runtime;
pub mod session;
pub mod store;

// Re-export key types for convenience
pub use collaborators::{
    Collaborators, Display, DisplayEvent, RecordingDisplay, RecordingRenderer, RenderEvent, Renderer,
    StyleHint, TracingDisplay, TracingRenderer,
};
pub use config::SessionConfig;
pub use debt_ledger::{debt_percent, DebtLedger, DEBT_MAX, DEBT_MIN};
pub use error::{CoreError, StoreError};
pub use input::{tilt_to_position, InputEvent};
pub use interpreter::{Applied, EventInterpreter};
pub use message::{ObjectAnnouncement, ObjectId, ObjectState, Position, QuantumObject, SyncEvent, SyncMessage};
pub use prophecy::{FulfilmentOutcome, ProphecyBoard};
pub use registry::{FreezeOutcome, ObjectRegistry, Observation};
pub use role::{InputHandler, Role, RoleMachine, RoleTransition};
pub use runtime::{run_session, spawn_session, SessionHandle};
pub use session::{PeerSession, SessionInbox};
pub use store::{DebtStore, MemoryDebtStore, SledDebtStore, DEBT_KEY};
