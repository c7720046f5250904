//! Sync Channel abstraction shared by all Quantum Reality peers.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::EnvError;
use crate::types::{Envelope, PeerId, Topic};

/// Append-only broadcast primitive with two logical topics.
///
/// # Implementations
///
/// - **Tests**: `MemoryChannel` - one shared log per process
/// - **Production**: `UdpGossipChannel` - JSON frames to a static peer list
/// - **Simulation**: `SimChannel` - per-peer replicas with latency/loss
///
/// # Delivery contract
///
/// ```text
/// Peer A                    Channel                     Peer B
///   |-- publish(obj) -------->|                            |
///   |<-- objects rx ----------|-- [latency] -------------->|-- objects rx
///   |                         |                            |
/// (late joiner C subscribes: receives every known object id once)
/// ```
///
/// - The objects subscription yields each distinct key once, including
///   keys observed before the subscription was made.
/// - The events subscription yields every event observed after the
///   subscription, in local receipt order.
/// - Publishers may or may not see their own publications echo back;
///   consumers must tolerate both.
#[async_trait]
pub trait SyncChannel: Send + Sync + 'static {
    /// Initializes the transport.
    ///
    /// # Returns
    /// * `Err(EnvError::TransportInit)` - The substrate is unreachable;
    ///   callers degrade to local-only mode.
    async fn connect(&self) -> Result<(), EnvError>;

    /// Publishes an envelope. Fire-and-forget.
    ///
    /// Success means "queued", not "delivered".
    async fn publish(&self, envelope: Envelope) -> Result<(), EnvError>;

    /// Subscribes to a topic.
    async fn subscribe(&self, topic: Topic) -> Result<UnboundedReceiver<Envelope>, EnvError>;

    /// Returns this peer's ID.
    fn local_id(&self) -> PeerId;
}

/// Fault injection for simulated channels.
pub trait NetworkController: Send + Sync {
    /// Creates a network partition between two peer sets.
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets latency for a specific link.
    fn set_link_latency(&self, from: &PeerId, to: &PeerId, latency_ms: u64);

    /// Sets message loss probability for a link (0.0 - 1.0).
    fn set_link_loss(&self, from: &PeerId, to: &PeerId, loss_rate: f64);
}
