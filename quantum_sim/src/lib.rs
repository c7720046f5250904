//! Quantum Reality Deterministic Simulation Testing (DST) Harness
//!
//! This crate runs many real `PeerSession`s against one simulated Sync
//! Channel so convergence can be checked deterministically.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advances only when the world ticks
//! - **Network**: Per-peer replicas with latency, loss, and partitions
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock + per-player RNG streams)  │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼────┐                       │
//! │  │ Player  │              │ Player  │     ...               │
//! │  │ Dreamer │              │Collapser│                       │
//! │  └────┬────┘              └────┬────┘                       │
//! │       │       SimChannel       │                            │
//! │  ┌────▼────────────────────────▼────┐                       │
//! │  │              SimHub               │                       │
//! │  │  (replicas, in-flight, faults)    │                       │
//! │  └───────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use quantum_sim::{SimWorld, SimConfig, PlayerScript};
//!
//! let mut world = SimWorld::new(SimConfig { seed: 42, ..Default::default() });
//! world.spawn_players(&[PlayerScript::dreamer(0.3), PlayerScript::collapser(0.2)]).await;
//! world.run_for(10_000).await;
//! world.settle().await;
//! assert!(world.converged());
//! ```

mod context;
mod exporter;
mod network;
mod player;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use exporter::{ObjectFrame, PlayerFrame, SimEvent, SimExport, SimFrame};
pub use network::{SimChannel, SimHub, SimNetworkController, SimNetworkStats};
pub use player::{PlayerScript, SimPlayer};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimWorld};
