//! Simulated Sync Channel with fault injection.
//!
//! Every peer owns a replica of both topics. Publishing appends to the
//! publisher's replica at once and queues one copy per remote peer; the
//! world moves copies into the target replicas when their virtual delivery
//! time comes due.

use async_trait::async_trait;
use quantum_env::{EnvError, Envelope, NetworkController, PeerId, QuantumContext, SyncChannel, Topic, TopicLog};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::context::SimContext;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Network controller for fault injection.
#[derive(Debug, Default)]
pub struct SimNetworkController {
    /// Per-link latency in milliseconds
    link_latency: Mutex<HashMap<(PeerId, PeerId), u64>>,

    /// Per-link loss rate (0.0 - 1.0)
    link_loss: Mutex<HashMap<(PeerId, PeerId), f64>>,

    /// Active partitions (peers across a pair cannot communicate)
    partitions: Mutex<Vec<(Vec<PeerId>, Vec<PeerId>)>>,
}

impl SimNetworkController {
    /// Creates a new network controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if two peers can communicate (not partitioned).
    pub fn can_communicate(&self, from: &PeerId, to: &PeerId) -> bool {
        let partitions = lock(&self.partitions);

        for (group_a, group_b) in partitions.iter() {
            let from_in_a = group_a.contains(from);
            let from_in_b = group_b.contains(from);
            let to_in_a = group_a.contains(to);
            let to_in_b = group_b.contains(to);

            // Partitioned if one is in A and other in B (or vice versa)
            if (from_in_a && to_in_b) || (from_in_b && to_in_a) {
                return false;
            }
        }

        true
    }

    /// Gets the latency override for a link, if any.
    pub fn latency(&self, from: &PeerId, to: &PeerId) -> Option<u64> {
        lock(&self.link_latency).get(&(from.clone(), to.clone())).copied()
    }

    /// Gets the loss rate for a link (default 0.0).
    pub fn loss(&self, from: &PeerId, to: &PeerId) -> f64 {
        lock(&self.link_loss)
            .get(&(from.clone(), to.clone()))
            .copied()
            .unwrap_or(0.0)
    }

    /// Number of active partitions.
    pub fn partition_count(&self) -> usize {
        lock(&self.partitions).len()
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]) {
        lock(&self.partitions).push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        lock(&self.partitions).clear();
    }

    fn set_link_latency(&self, from: &PeerId, to: &PeerId, latency_ms: u64) {
        lock(&self.link_latency).insert((from.clone(), to.clone()), latency_ms);
    }

    fn set_link_loss(&self, from: &PeerId, to: &PeerId, loss_rate: f64) {
        lock(&self.link_loss).insert((from.clone(), to.clone()), loss_rate.clamp(0.0, 1.0));
    }
}

/// Counters kept by the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimNetworkStats {
    /// Envelopes published by any peer
    pub published: u64,

    /// Remote copies queued
    pub sent: u64,

    /// Remote copies that reached their replica
    pub delivered: u64,

    /// Copies dropped by link loss
    pub dropped_loss: u64,

    /// Copies dropped by a partition
    pub dropped_partition: u64,

    /// Objects copied by anti-entropy
    pub repaired: u64,
}

struct Replica {
    log: TopicLog,
    connected: bool,
}

struct InFlight {
    deliver_at_ms: u64,
    seq: u64,
    from: PeerId,
    to: PeerId,
    envelope: Envelope,
}

#[derive(Default)]
struct HubState {
    replicas: BTreeMap<PeerId, Replica>,
    in_flight: Vec<InFlight>,
    published: Vec<Envelope>,
    unreachable: BTreeSet<PeerId>,
    next_seq: u64,
    stats: SimNetworkStats,
}

impl HubState {
    fn enqueue(&mut self, from: PeerId, to: PeerId, envelope: Envelope, deliver_at_ms: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.sent += 1;
        self.in_flight.push(InFlight {
            deliver_at_ms,
            seq,
            from,
            to,
            envelope,
        });
    }
}

/// The simulated substrate shared by every `SimChannel`.
#[derive(Clone)]
pub struct SimHub {
    context: Arc<SimContext>,
    controller: Arc<SimNetworkController>,
    state: Arc<Mutex<HubState>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
    base_latency_ms: u64,
}

impl SimHub {
    /// Creates a hub on the given clock; `seed` drives link loss.
    pub fn new(context: Arc<SimContext>, seed: u64, base_latency_ms: u64) -> Self {
        Self {
            context,
            controller: Arc::new(SimNetworkController::new()),
            state: Arc::new(Mutex::new(HubState::default())),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            base_latency_ms,
        }
    }

    /// Creates the channel endpoint (and empty replica) for a peer.
    pub fn channel(&self, local_id: PeerId) -> SimChannel {
        lock(&self.state).replicas.entry(local_id.clone()).or_insert_with(|| Replica {
            log: TopicLog::new(),
            connected: false,
        });
        SimChannel {
            local_id,
            hub: self.clone(),
        }
    }

    pub fn controller(&self) -> &SimNetworkController {
        &self.controller
    }

    /// Makes `connect()` fail for a peer (or succeed again).
    pub fn set_reachable(&self, peer: &PeerId, reachable: bool) {
        let mut state = lock(&self.state);
        if reachable {
            state.unreachable.remove(peer);
        } else {
            state.unreachable.insert(peer.clone());
        }
    }

    fn now_ms(&self) -> u64 {
        self.context.now().as_millis() as u64
    }

    fn latency(&self, from: &PeerId, to: &PeerId) -> u64 {
        self.controller.latency(from, to).unwrap_or(self.base_latency_ms)
    }

    /// Marks a peer connected and queues the object backlog of every
    /// reachable replica towards it.
    fn join(&self, peer: &PeerId) -> Result<(), EnvError> {
        let now = self.now_ms();
        let mut state = lock(&self.state);
        if state.unreachable.contains(peer) {
            return Err(EnvError::transport_init(format!("{} cannot reach the mesh", peer)));
        }
        let Some(replica) = state.replicas.get_mut(peer) else {
            return Err(EnvError::unreachable(peer));
        };
        replica.connected = true;

        let mut backlog = Vec::new();
        for (other, replica) in &state.replicas {
            if other == peer || !replica.connected || !self.controller.can_communicate(other, peer) {
                continue;
            }
            for envelope in replica.log.objects() {
                backlog.push((other.clone(), envelope.clone(), now + self.latency(other, peer)));
            }
        }
        debug!(%peer, backlog = backlog.len(), "peer joined");
        for (from, envelope, at) in backlog {
            state.enqueue(from, peer.clone(), envelope, at);
        }
        Ok(())
    }

    fn route(&self, from: &PeerId, envelope: Envelope) -> Result<(), EnvError> {
        let now = self.now_ms();
        let mut state = lock(&self.state);
        match state.replicas.get_mut(from) {
            Some(replica) if replica.connected => {
                replica.log.append(envelope.clone());
            }
            _ => return Err(EnvError::Closed),
        }
        state.stats.published += 1;
        state.published.push(envelope.clone());

        let targets: Vec<PeerId> = state
            .replicas
            .iter()
            .filter(|(id, replica)| *id != from && replica.connected)
            .map(|(id, _)| id.clone())
            .collect();

        for to in targets {
            let loss = self.controller.loss(from, &to);
            if loss > 0.0 && lock(&self.rng).gen::<f64>() < loss {
                state.stats.dropped_loss += 1;
                continue;
            }
            let at = now + self.latency(from, &to);
            state.enqueue(from.clone(), to, envelope.clone(), at);
        }
        Ok(())
    }

    fn subscribe(&self, peer: &PeerId, topic: Topic) -> Result<UnboundedReceiver<Envelope>, EnvError> {
        let mut state = lock(&self.state);
        match state.replicas.get_mut(peer) {
            Some(replica) if replica.connected => Ok(replica.log.subscribe(topic)),
            _ => Err(EnvError::Closed),
        }
    }

    /// Delivers every queued copy whose time has come.
    ///
    /// Partitions are checked at delivery, so copies in flight when a
    /// partition starts are lost.
    pub fn deliver_due(&self) -> usize {
        let now = self.now_ms();
        let mut state = lock(&self.state);

        let mut due: Vec<InFlight> = Vec::new();
        let mut later = Vec::with_capacity(state.in_flight.len());
        for item in state.in_flight.drain(..) {
            if item.deliver_at_ms <= now {
                due.push(item);
            } else {
                later.push(item);
            }
        }
        state.in_flight = later;
        due.sort_by_key(|item| (item.deliver_at_ms, item.seq));

        let mut delivered = 0;
        for item in due {
            if !self.controller.can_communicate(&item.from, &item.to) {
                state.stats.dropped_partition += 1;
                continue;
            }
            if let Some(replica) = state.replicas.get_mut(&item.to) {
                replica.log.append(item.envelope);
                delivered += 1;
            }
        }
        state.stats.delivered += delivered as u64;
        delivered as usize
    }

    /// Copies still in flight.
    pub fn pending(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    /// Unions the object sets of every pair of peers that can talk.
    ///
    /// Events are never re-offered: replaying a reality-shatter would clear
    /// objects created after it.
    pub fn anti_entropy(&self) -> usize {
        let mut state = lock(&self.state);
        let snapshot: Vec<(PeerId, Vec<Envelope>)> = state
            .replicas
            .iter()
            .filter(|(_, replica)| replica.connected)
            .map(|(id, replica)| (id.clone(), replica.log.objects().to_vec()))
            .collect();

        let mut repaired = 0;
        for (source, objects) in &snapshot {
            for (target, _) in &snapshot {
                if source == target || !self.controller.can_communicate(source, target) {
                    continue;
                }
                let Some(replica) = state.replicas.get_mut(target) else {
                    continue;
                };
                for envelope in objects {
                    if replica.log.append(envelope.clone()) {
                        repaired += 1;
                    }
                }
            }
        }
        state.stats.repaired += repaired as u64;
        debug!(repaired, "anti-entropy pass");
        repaired
    }

    /// Object keys held by a peer's replica.
    pub fn object_keys(&self, peer: &PeerId) -> BTreeSet<String> {
        lock(&self.state)
            .replicas
            .get(peer)
            .map(|r| r.log.objects().iter().filter_map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Everything held by a peer's replica, objects first.
    pub fn replica_envelopes(&self, peer: &PeerId) -> Vec<Envelope> {
        lock(&self.state)
            .replicas
            .get(peer)
            .map(|r| r.log.objects().iter().chain(r.log.events()).cloned().collect())
            .unwrap_or_default()
    }

    /// Every publication, in publish order.
    pub fn published(&self) -> Vec<Envelope> {
        lock(&self.state).published.clone()
    }

    pub fn stats(&self) -> SimNetworkStats {
        lock(&self.state).stats
    }
}

impl NetworkController for SimHub {
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]) {
        self.controller.partition(group_a, group_b);
    }

    fn heal_all(&self) {
        self.controller.heal_all();
    }

    fn set_link_latency(&self, from: &PeerId, to: &PeerId, latency_ms: u64) {
        self.controller.set_link_latency(from, to, latency_ms);
    }

    fn set_link_loss(&self, from: &PeerId, to: &PeerId, loss_rate: f64) {
        self.controller.set_link_loss(from, to, loss_rate);
    }
}

/// Simulated Sync Channel endpoint for one peer.
pub struct SimChannel {
    local_id: PeerId,
    hub: SimHub,
}

#[async_trait]
impl SyncChannel for SimChannel {
    async fn connect(&self) -> Result<(), EnvError> {
        self.hub.join(&self.local_id)
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), EnvError> {
        self.hub.route(&self.local_id, envelope)
    }

    async fn subscribe(&self, topic: Topic) -> Result<UnboundedReceiver<Envelope>, EnvError> {
        self.hub.subscribe(&self.local_id, topic)
    }

    fn local_id(&self) -> PeerId {
        self.local_id.clone()
    }
}
