//! Quantum Reality Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the sync core run
//! unchanged in **Production** (tokio + UDP gossip) and **Simulation**
//! (virtual clock + in-process hub).
//!
//! # Intercepted sources of non-determinism
//!
//! - Time (`now()`, `now_millis()`, `sleep()`)
//! - Randomness (`random_unit()`), which decides interaction outcomes
//! - The Sync Channel (`publish()`, `subscribe()`)
//!
//! # Example
//!
//! ```ignore
//! use quantum_env::{QuantumContext, SyncChannel, Topic};
//!
//! async fn pump<Ctx: QuantumContext, Chan: SyncChannel>(ctx: &Ctx, chan: &Chan) {
//!     chan.connect().await?;
//!     let mut events = chan.subscribe(Topic::Events).await?;
//!     loop {
//!         tokio::select! {
//!             Some(envelope) = events.recv() => apply(envelope),
//!             _ = ctx.sleep(Duration::from_secs(60)) => decay(),
//!         }
//!     }
//! }
//! ```

mod context;
mod channel;
mod types;
mod error;
mod fanout;
mod memory;
mod tokio_impl;
mod udp;

pub use context::QuantumContext;
pub use channel::{SyncChannel, NetworkController};
pub use types::{PeerId, Topic, Envelope};
pub use error::EnvError;
pub use fanout::TopicLog;
pub use memory::{MemoryHub, MemoryChannel};
pub use tokio_impl::TokioContext;
pub use udp::{UdpGossipChannel, UdpGossipConfig};
