//! One-way notification sinks consumed by the core.
//!
//! The core decides *that* something should appear, change or disappear;
//! how it is drawn or displayed is the collaborator's business. Neither
//! trait ever calls back into the core.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use crate::message::{ObjectId, Position};
use crate::role::Role;

/// Styling hint passed with a restyle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleHint {
    /// Grey, metallic: the object has been frozen
    Frozen,
}

/// Scene-side collaborator.
pub trait Renderer: Send + Sync {
    fn object_created(&self, id: &ObjectId, position: Position);
    fn object_restyled(&self, id: &ObjectId, hint: StyleHint);
    fn object_removed(&self, id: &ObjectId);
    fn all_objects_faded(&self, duration_ms: u64);
    fn debt_opacity_changed(&self, fraction: f64);
    fn volcano_erupted(&self, location: Position);
}

/// Text-side collaborator.
pub trait Display: Send + Sync {
    fn role_changed(&self, role: Role);
    fn debt_changed(&self, percent: u32);
    fn status(&self, text: &str);
    fn prophecy(&self, text: &str);
}

/// The pair of sinks a session reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub display: Arc<dyn Display>,
}

impl Collaborators {
    pub fn new(renderer: Arc<dyn Renderer>, display: Arc<dyn Display>) -> Self {
        Self { renderer, display }
    }

    /// Collaborators that write every notification to the log.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingRenderer), Arc::new(TracingDisplay))
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Renderer that logs scene changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRenderer;

impl Renderer for TracingRenderer {
    fn object_created(&self, id: &ObjectId, position: Position) {
        info!(%id, x = position.x, y = position.y, z = position.z, "object materialized");
    }

    fn object_restyled(&self, id: &ObjectId, hint: StyleHint) {
        info!(%id, ?hint, "object restyled");
    }

    fn object_removed(&self, id: &ObjectId) {
        info!(%id, "object removed");
    }

    fn all_objects_faded(&self, duration_ms: u64) {
        info!(duration_ms, "reality shatters");
    }

    fn debt_opacity_changed(&self, fraction: f64) {
        info!(fraction, "scene opacity");
    }

    fn volcano_erupted(&self, location: Position) {
        info!(x = location.x, y = location.y, z = location.z, "volcano erupted");
    }
}

/// Display that logs text updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDisplay;

impl Display for TracingDisplay {
    fn role_changed(&self, role: Role) {
        info!("ROLE CHANGED TO {}", role.label());
    }

    fn debt_changed(&self, percent: u32) {
        info!("Quantum debt: {}%", percent);
    }

    fn status(&self, text: &str) {
        info!("{}", text);
    }

    fn prophecy(&self, text: &str) {
        info!("Prophecy: {}", text);
    }
}

/// A single recorded renderer notification.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Created(ObjectId, Position),
    Restyled(ObjectId, StyleHint),
    Removed(ObjectId),
    Faded(u64),
    Opacity(f64),
    Volcano(Position),
}

/// Renderer that keeps a journal, for tests and the simulator.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    journal: Mutex<Vec<RenderEvent>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<RenderEvent> {
        self.journal().clone()
    }

    pub fn clear(&self) {
        self.journal().clear();
    }

    fn journal(&self) -> MutexGuard<'_, Vec<RenderEvent>> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: RenderEvent) {
        self.journal().push(event);
    }
}

impl Renderer for RecordingRenderer {
    fn object_created(&self, id: &ObjectId, position: Position) {
        self.push(RenderEvent::Created(id.clone(), position));
    }

    fn object_restyled(&self, id: &ObjectId, hint: StyleHint) {
        self.push(RenderEvent::Restyled(id.clone(), hint));
    }

    fn object_removed(&self, id: &ObjectId) {
        self.push(RenderEvent::Removed(id.clone()));
    }

    fn all_objects_faded(&self, duration_ms: u64) {
        self.push(RenderEvent::Faded(duration_ms));
    }

    fn debt_opacity_changed(&self, fraction: f64) {
        self.push(RenderEvent::Opacity(fraction));
    }

    fn volcano_erupted(&self, location: Position) {
        self.push(RenderEvent::Volcano(location));
    }
}

/// A single recorded display notification.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Role(Role),
    Debt(u32),
    Status(String),
    Prophecy(String),
}

/// Display that keeps a journal, for tests and the simulator.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    journal: Mutex<Vec<DisplayEvent>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.journal().clone()
    }

    /// Status lines only.
    pub fn statuses(&self) -> Vec<String> {
        self.journal()
            .iter()
            .filter_map(|e| match e {
                DisplayEvent::Status(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn journal(&self) -> MutexGuard<'_, Vec<DisplayEvent>> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Display for RecordingDisplay {
    fn role_changed(&self, role: Role) {
        self.journal().push(DisplayEvent::Role(role));
    }

    fn debt_changed(&self, percent: u32) {
        self.journal().push(DisplayEvent::Debt(percent));
    }

    fn status(&self, text: &str) {
        self.journal().push(DisplayEvent::Status(text.to_string()));
    }

    fn prophecy(&self, text: &str) {
        self.journal().push(DisplayEvent::Prophecy(text.to_string()));
    }
}
