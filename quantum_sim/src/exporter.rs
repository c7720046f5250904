//! JSON exporter for offline inspection of simulation runs.
//!
//! Exports per-player snapshots of the shared scene as JSON frames.

use quantum_core::{ObjectState, QuantumObject, Role};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Every player's view of the scene
    pub players: Vec<PlayerFrame>,

    /// Events (partitions, heals, reality-shatters, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// One player's state at a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerFrame {
    pub peer_id: String,
    pub role: Role,
    pub debt: f64,
    pub online: bool,
    pub objects: Vec<ObjectFrame>,
}

/// An object as one player sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectFrame {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub frozen: bool,
}

impl From<&QuantumObject> for ObjectFrame {
    fn from(object: &QuantumObject) -> Self {
        Self {
            id: object.id.as_str().to_string(),
            x: object.position.x,
            y: object.position.y,
            z: object.position.z,
            frozen: object.state == ObjectState::Frozen,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
