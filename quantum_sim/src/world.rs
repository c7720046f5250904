//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::exporter::{ObjectFrame, PlayerFrame, SimEvent, SimExport, SimFrame};
use crate::network::SimHub;
use crate::player::{PlayerScript, SimPlayer};

use quantum_core::{ObjectId, ObjectState, SessionConfig, SyncMessage};
use quantum_env::{Envelope, NetworkController, PeerId, QuantumContext, Topic};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of players to spawn
    pub num_players: usize,

    /// Virtual milliseconds per tick
    pub tick_ms: u64,

    /// One-way delivery delay on links without an override
    pub base_latency_ms: u64,

    /// Session tuning shared by every player
    pub session: SessionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_players: 4,
            tick_ms: 100,
            base_latency_ms: 40,
            session: SessionConfig::default(),
        }
    }
}

/// Hard stop for `settle`, in ticks.
const SETTLE_LIMIT_TICKS: u64 = 10_000;

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Simulated substrate
    pub hub: SimHub,

    players: Vec<SimPlayer>,

    /// Current tick count
    tick_count: u64,

    last_decay_ms: u64,
    last_prophecy_ms: u64,
    last_reconnect_ms: u64,

    recording: Option<Recording>,
}

struct Recording {
    export: SimExport,
    every_ticks: u64,
    pending_events: Vec<SimEvent>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let network_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let context = SimContext::shared(context_seed);
        let hub = SimHub::new(context.clone(), network_seed, config.base_latency_ms);

        Self {
            config,
            context,
            hub,
            players: Vec::new(),
            tick_count: 0,
            last_decay_ms: 0,
            last_prophecy_ms: 0,
            last_reconnect_ms: 0,
            recording: None,
        }
    }

    /// Adds and starts one player. Returns its id.
    pub async fn add_player(&mut self, script: PlayerScript) -> PeerId {
        self.add_player_with(script, true).await
    }

    /// Adds a player whose first connection attempt may be refused.
    pub async fn add_player_with(&mut self, script: PlayerScript, reachable: bool) -> PeerId {
        let index = self.players.len() as u64;
        let peer_id = PeerId::from_seed(index);
        self.hub.set_reachable(&peer_id, reachable);

        let player_seed = self.config.seed.wrapping_mul(0x517cc1b727220a95).wrapping_add(index);
        let mut player = SimPlayer::new(
            Arc::new(self.context.fork(index)),
            self.hub.channel(peer_id.clone()),
            self.config.session.clone(),
            script,
            player_seed,
        );
        player.start().await;
        debug!(peer = %peer_id, role = %player.session().role(), online = player.session().is_online(), "player joined");

        self.players.push(player);
        peer_id
    }

    /// Adds one player per script.
    pub async fn spawn_players(&mut self, scripts: &[PlayerScript]) -> Vec<PeerId> {
        let mut ids = Vec::with_capacity(scripts.len());
        for script in scripts {
            ids.push(self.add_player(*script).await);
        }
        ids
    }

    /// Advances simulation by one tick.
    ///
    /// Order within a tick: clock, player actions, delivery, inbox drain,
    /// then the periodic session timers.
    pub async fn tick(&mut self) {
        self.context.advance_time(Duration::from_millis(self.config.tick_ms));

        for player in &mut self.players {
            player.act().await;
        }
        self.hub.deliver_due();
        self.pump_all();
        self.run_timers().await;

        self.tick_count += 1;
        self.record_frame();
    }

    /// Ticks until `duration_ms` of virtual time has passed.
    pub async fn run_for(&mut self, duration_ms: u64) {
        let ticks = duration_ms / self.config.tick_ms.max(1);
        for _ in 0..ticks {
            self.tick().await;
        }
    }

    /// Lets in-flight copies land without any player acting.
    ///
    /// Always advances at least one tick. Returns false if copies were still
    /// in flight at the hard stop.
    pub async fn settle(&mut self) -> bool {
        let mut ticks = 0;
        loop {
            self.context.advance_time(Duration::from_millis(self.config.tick_ms));
            self.hub.deliver_due();
            self.pump_all();
            self.run_timers().await;
            self.tick_count += 1;
            self.record_frame();
            ticks += 1;

            if self.hub.pending() == 0 {
                return true;
            }
            if ticks >= SETTLE_LIMIT_TICKS {
                return false;
            }
        }
    }

    /// Drains every player's inbox.
    pub fn pump_all(&mut self) -> usize {
        self.players.iter_mut().map(SimPlayer::pump).sum()
    }

    /// Runs a hub repair pass and lets players see the result.
    pub fn anti_entropy(&mut self) -> usize {
        let repaired = self.hub.anti_entropy();
        self.pump_all();
        if repaired > 0 {
            self.note(SimEvent::info(format!("anti-entropy repaired {} objects", repaired)));
        }
        repaired
    }

    /// Splits players into two groups that cannot reach each other.
    pub fn partition(&mut self, group_a: &[PeerId], group_b: &[PeerId]) {
        self.hub.partition(group_a, group_b);
        info!(a = group_a.len(), b = group_b.len(), "network partitioned");
        self.note(SimEvent::warn("partition"));
    }

    /// Removes every partition.
    pub fn heal(&mut self) {
        self.hub.heal_all();
        info!("network healed");
        self.note(SimEvent::info("heal"));
    }

    /// Sets the same loss rate on every directed link between players.
    pub fn set_uniform_loss(&mut self, loss_rate: f64) {
        let ids = self.peer_ids();
        for from in &ids {
            for to in &ids {
                if from != to {
                    self.hub.set_link_loss(from, to, loss_rate);
                }
            }
        }
    }

    /// Re-delivers what the replicas hold, `rounds` times over.
    ///
    /// Each player is re-sent the announcements of objects it still holds
    /// and every event except reality-shatter. Announcements of removed
    /// objects would resurrect them since nothing is tombstoned, and a
    /// reality-shatter clears objects created after it.
    pub fn echo_storm(&mut self, rounds: usize) -> usize {
        let mut storm: Vec<Envelope> = Vec::new();
        for id in self.peer_ids() {
            storm.extend(
                self.hub
                    .replica_envelopes(&id)
                    .into_iter()
                    .filter(|e| !is_reality_shatter(e)),
            );
        }

        let mut replayed = 0;
        for _ in 0..rounds {
            for player in &mut self.players {
                let live: BTreeSet<String> = player
                    .object_ids()
                    .iter()
                    .map(|id| id.as_str().to_string())
                    .collect();
                for envelope in &storm {
                    if envelope.topic == Topic::Objects
                        && !envelope.key.as_ref().is_some_and(|key| live.contains(key))
                    {
                        continue;
                    }
                    player.session_mut().handle_envelope(envelope);
                    replayed += 1;
                }
            }
        }
        debug!(replayed, "echo storm finished");
        replayed
    }

    /// Counts publications of one event kind across the whole run.
    pub fn count_published(&self, kind: &str) -> usize {
        self.hub
            .published()
            .iter()
            .filter_map(|e| SyncMessage::from_envelope(e).ok())
            .filter(|m| matches!(m, SyncMessage::Event(event) if event.kind() == kind))
            .count()
    }

    /// Live object ids per player.
    pub fn object_sets(&self) -> Vec<BTreeSet<ObjectId>> {
        self.players.iter().map(SimPlayer::object_ids).collect()
    }

    /// Live objects with their states, per player.
    pub fn object_states(&self) -> Vec<BTreeMap<ObjectId, ObjectState>> {
        self.players.iter().map(SimPlayer::object_states).collect()
    }

    /// True if every player holds the same objects in the same states.
    pub fn converged(&self) -> bool {
        let states = self.object_states();
        states.windows(2).all(|pair| pair[0] == pair[1])
    }

    /// Starts recording a frame every `every_ticks` ticks.
    pub fn start_recording(&mut self, scenario: &str, every_ticks: u64) {
        self.recording = Some(Recording {
            export: SimExport::new(scenario, self.config.seed),
            every_ticks: every_ticks.max(1),
            pending_events: Vec::new(),
        });
    }

    /// Stops recording and hands back what was captured.
    pub fn take_export(&mut self) -> Option<SimExport> {
        self.recording.take().map(|r| r.export)
    }

    /// Attaches an event to the next recorded frame.
    pub fn note(&mut self, event: SimEvent) {
        if let Some(recording) = self.recording.as_mut() {
            recording.pending_events.push(event);
        }
    }

    pub fn players(&self) -> &[SimPlayer] {
        &self.players
    }

    pub fn player(&self, index: usize) -> Option<&SimPlayer> {
        self.players.get(index)
    }

    pub fn player_mut(&mut self, index: usize) -> Option<&mut SimPlayer> {
        self.players.get_mut(index)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.players.iter().map(|p| p.peer_id().clone()).collect()
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    /// Returns the current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns the number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Fires decay, prophecy rotation and reconnect when their periods
    /// have elapsed, as the session loop's timers would.
    async fn run_timers(&mut self) {
        let now = self.context.elapsed_ms();
        let decay_ms = self.config.session.decay_interval_ms;
        let prophecy_ms = self.config.session.prophecy_interval_ms;
        let reconnect_ms = self.config.session.reconnect_interval_ms;

        if now.saturating_sub(self.last_decay_ms) >= decay_ms {
            self.last_decay_ms = now;
            for player in &mut self.players {
                player.session_mut().decay_tick();
            }
        }

        if now.saturating_sub(self.last_prophecy_ms) >= prophecy_ms {
            self.last_prophecy_ms = now;
            for player in &mut self.players {
                player.session_mut().rotate_prophecy();
            }
        }

        if now.saturating_sub(self.last_reconnect_ms) >= reconnect_ms {
            self.last_reconnect_ms = now;
            let mut rejoined = 0;
            for player in &mut self.players {
                if player.reconnect().await {
                    rejoined += 1;
                }
            }
            if rejoined > 0 {
                self.note(SimEvent::info(format!("{} players reconnected", rejoined)));
            }
        }
    }

    fn record_frame(&mut self) {
        let time_sec = self.time();
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        if self.tick_count % recording.every_ticks != 0 {
            return;
        }

        let players = self
            .players
            .iter()
            .map(|p| PlayerFrame {
                peer_id: p.peer_id().to_string(),
                role: p.session().role(),
                debt: p.session().debt(),
                online: p.session().is_online(),
                objects: p.session().registry().iter().map(ObjectFrame::from).collect(),
            })
            .collect();

        recording.export.add_frame(SimFrame {
            time_sec,
            players,
            events: std::mem::take(&mut recording.pending_events),
        });
    }
}

fn is_reality_shatter(envelope: &Envelope) -> bool {
    matches!(
        SyncMessage::from_envelope(envelope),
        Ok(SyncMessage::Event(event)) if event.kind() == "reality-shatter"
    )
}
