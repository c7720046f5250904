//! Scenario runner - executes convergence and fault-injection scenarios.

use crate::exporter::{SimEvent, SimExport};
use crate::player::PlayerScript;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use quantum_core::{RenderEvent, Role, SessionConfig, DEBT_MAX, DEBT_MIN};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Live objects held by the first player at the end
    pub final_object_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Recorded frames, when export was requested
    pub export: Option<SimExport>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Envelopes published by any player
    pub envelopes_published: u64,

    /// Remote copies delivered
    pub copies_delivered: u64,

    /// Copies lost to link loss or partitions
    pub copies_dropped: u64,

    /// Objects copied by anti-entropy
    pub objects_repaired: u64,

    /// Successful creations across players
    pub creations: u64,

    /// Successful collapses across players
    pub interactions: u64,

    /// Reality-shatter broadcasts
    pub reality_shatters: u64,
}

type Check = Result<(), String>;

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of players
    num_players: usize,

    /// Virtual milliseconds per tick
    tick_ms: u64,

    /// Active phase length in seconds
    max_duration_secs: f64,

    /// Record a frame every this many ticks
    export_every_ticks: Option<u64>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_players: usize) -> Self {
        Self {
            seed,
            num_players: num_players.max(2),
            tick_ms: 100,
            max_duration_secs: 10.0,
            export_every_ticks: None,
        }
    }

    /// Sets the tick length.
    pub fn with_tick_ms(mut self, ms: u64) -> Self {
        self.tick_ms = ms.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs.max(0.0);
        self
    }

    /// Records frames into `ScenarioResult::export`.
    pub fn with_export(mut self, every_ticks: u64) -> Self {
        self.export_every_ticks = Some(every_ticks.max(1));
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        if scenario.is_fault_injection() {
            warn!("Fault injection active for {}", scenario.name());
        }

        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => return self.aborted(scenario, format!("runtime unavailable: {}", e)),
        };
        runtime.block_on(self.run_async(scenario))
    }

    async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        let mut world = match scenario {
            ScenarioId::DebtDrain => self.world(SessionConfig::default().with_decay_interval_ms(1_000)),
            ScenarioId::RealityShatter => self.world(SessionConfig::default().with_prophecy_threshold(3)),
            ScenarioId::OfflineStart => {
                let mut session = SessionConfig::default();
                session.reconnect_interval_ms = 2_000;
                self.world(session)
            }
            _ => self.world(SessionConfig::default()),
        };
        if let Some(every) = self.export_every_ticks {
            world.start_recording(scenario.name(), every);
        }

        let check = match scenario {
            ScenarioId::Convergence => self.run_convergence(&mut world).await,
            ScenarioId::EchoStorm => self.run_echo_storm(&mut world).await,
            ScenarioId::LateJoin => self.run_late_join(&mut world).await,
            ScenarioId::SplitBrain => self.run_split_brain(&mut world).await,
            ScenarioId::LossyLink => self.run_lossy_link(&mut world).await,
            ScenarioId::RealityShatter => self.run_reality_shatter(&mut world).await,
            ScenarioId::DebtDrain => self.run_debt_drain(&mut world).await,
            ScenarioId::Prophecy => self.run_prophecy(&mut world).await,
            ScenarioId::OfflineStart => self.run_offline_start(&mut world).await,
        };
        self.finish(scenario, world, check)
    }

    fn world(&self, session: SessionConfig) -> SimWorld {
        SimWorld::new(SimConfig {
            seed: self.seed,
            num_players: self.num_players,
            tick_ms: self.tick_ms,
            session,
            ..Default::default()
        })
    }

    fn active_ms(&self) -> u64 {
        (self.max_duration_secs * 1_000.0) as u64
    }

    /// Alternating Dreamers and Collapsers, starting with a Dreamer.
    fn mixed_scripts(&self) -> Vec<PlayerScript> {
        (0..self.num_players)
            .map(|i| {
                if i % 2 == 0 {
                    PlayerScript::dreamer(0.3)
                } else {
                    PlayerScript::collapser(0.2)
                }
            })
            .collect()
    }

    fn dreamer_scripts(&self, count: usize) -> Vec<PlayerScript> {
        vec![PlayerScript::dreamer(0.3); count]
    }

    async fn settle(world: &mut SimWorld) -> Check {
        ensure(world.settle().await, || "copies still in flight at settle limit".to_string())
    }

    fn converged(world: &SimWorld, phase: &str) -> Check {
        ensure(world.converged(), || {
            let sizes: Vec<usize> = world.object_sets().iter().map(|s| s.len()).collect();
            format!("scenes diverged {}: object counts {:?}", phase, sizes)
        })
    }

    /// QR-001: Convergence on a clean mesh.
    ///
    /// **Assertion**: After quiescence every player holds the same objects
    /// in the same states.
    async fn run_convergence(&self, world: &mut SimWorld) -> Check {
        info!("QR-001: Convergence");
        world.spawn_players(&self.mixed_scripts()).await;
        world.run_for(self.active_ms()).await;
        Self::settle(world).await?;

        let creations: u64 = world.players().iter().map(|p| p.creations()).sum();
        ensure(creations > 0, || "no objects were created".to_string())?;
        Self::converged(world, "after quiescence")
    }

    /// QR-002: Echo storm.
    ///
    /// **Assertion**: Scenes and render counts are unchanged by replaying
    /// everything three more times.
    async fn run_echo_storm(&self, world: &mut SimWorld) -> Check {
        info!("QR-002: EchoStorm");
        world.spawn_players(&self.mixed_scripts()).await;
        world.run_for(self.active_ms()).await;
        Self::settle(world).await?;

        let before = world.object_states();
        let renders_before = render_counts(world);
        let replayed = world.echo_storm(3);
        debug!(replayed, "echo storm replayed");

        ensure(world.object_states() == before, || "echo storm changed a scene".to_string())?;
        ensure(render_counts(world) == renders_before, || {
            "echo storm produced extra create or restyle calls".to_string()
        })?;
        Self::converged(world, "after echo storm")
    }

    /// QR-003: Late join.
    ///
    /// **Assertion**: A player joining after the first half catches up on
    /// every object.
    async fn run_late_join(&self, world: &mut SimWorld) -> Check {
        info!("QR-003: LateJoin");
        world.spawn_players(&self.dreamer_scripts(self.num_players - 1)).await;
        world.run_for(self.active_ms() / 2).await;
        Self::settle(world).await?;

        let late = world.player_count();
        world.add_player(PlayerScript::idle()).await;
        world.note(SimEvent::info("late player joined"));
        Self::settle(world).await?;

        let sets = world.object_sets();
        ensure(!sets[0].is_empty(), || "no objects before late join".to_string())?;
        ensure(sets[late] == sets[0], || {
            format!("late player holds {} of {} objects", sets[late].len(), sets[0].len())
        })?;
        Self::converged(world, "after late join")
    }

    /// QR-004: SplitBrain.
    ///
    /// **Assertion**: The halves diverge while partitioned and converge
    /// after healing plus anti-entropy.
    async fn run_split_brain(&self, world: &mut SimWorld) -> Check {
        info!("QR-004: SplitBrain");
        let ids = world.spawn_players(&self.dreamer_scripts(self.num_players)).await;
        let (left, right) = ids.split_at(ids.len() / 2);
        world.partition(left, right);

        // One creation on each side guarantees divergence.
        for index in [0, ids.len() - 1] {
            if let Some(player) = world.player_mut(index) {
                player.session_mut().create_local(Default::default()).await;
            }
        }
        world.run_for(self.active_ms()).await;
        Self::settle(world).await?;

        let sets = world.object_sets();
        ensure(sets[0] != sets[ids.len() - 1], || "halves did not diverge while partitioned".to_string())?;

        world.heal();
        world.anti_entropy();
        Self::settle(world).await?;
        Self::converged(world, "after heal and anti-entropy")
    }

    /// QR-005: LossyLink.
    ///
    /// **Assertion**: Anti-entropy restores the object set lost to 30%
    /// link loss.
    async fn run_lossy_link(&self, world: &mut SimWorld) -> Check {
        info!("QR-005: LossyLink");
        world.spawn_players(&self.dreamer_scripts(self.num_players)).await;
        world.set_uniform_loss(0.3);
        world.run_for(self.active_ms()).await;
        Self::settle(world).await?;

        if world.converged() {
            debug!("converged before repair");
        }
        world.set_uniform_loss(0.0);
        world.anti_entropy();
        Self::settle(world).await?;
        Self::converged(world, "after anti-entropy")
    }

    /// QR-006: RealityShatter.
    ///
    /// **Assertion**: Reaching the threshold clears every registry and
    /// broadcasts exactly one reality-shatter.
    async fn run_reality_shatter(&self, world: &mut SimWorld) -> Check {
        info!("QR-006: RealityShatter");
        world.spawn_players(&self.dreamer_scripts(self.num_players)).await;
        world.run_for(self.active_ms()).await;
        Self::settle(world).await?;
        ensure(world.object_sets().iter().all(|s| !s.is_empty()), || {
            "no objects to shatter".to_string()
        })?;

        let threshold = world.config.session.prophecy_threshold;
        for _ in 0..threshold {
            if let Some(player) = world.player_mut(0) {
                player.session_mut().fulfil_prophecy().await;
            }
            Self::settle(world).await?;
        }
        world.note(SimEvent::warn("reality shattered"));

        ensure(world.object_sets().iter().all(|s| s.is_empty()), || {
            "objects survived the reality-shatter".to_string()
        })?;
        let broadcasts = world.count_published("reality-shatter");
        ensure(broadcasts == 1, || format!("expected 1 reality-shatter broadcast, saw {}", broadcasts))
    }

    /// QR-007: DebtDrain.
    ///
    /// **Assertion**: Collapser debt stays within bounds and never exceeds
    /// the start minus penalties; Dreamer debt is untouched.
    async fn run_debt_drain(&self, world: &mut SimWorld) -> Check {
        info!("QR-007: DebtDrain");
        let scripts: Vec<PlayerScript> = (0..self.num_players)
            .map(|i| {
                if i % 2 == 0 {
                    PlayerScript::dreamer(0.5)
                } else {
                    PlayerScript::collapser(0.5)
                }
            })
            .collect();
        world.spawn_players(&scripts).await;
        world.run_for(self.active_ms()).await;
        Self::settle(world).await?;

        let penalty = world.config.session.interaction_penalty;
        for player in world.players() {
            let debt = player.session().debt();
            ensure((DEBT_MIN..=DEBT_MAX).contains(&debt), || {
                format!("{} debt {} out of bounds", player.peer_id(), debt)
            })?;
            match player.session().role() {
                Role::Dreamer => ensure(debt == DEBT_MAX, || {
                    format!("dreamer {} paid debt: {}", player.peer_id(), debt)
                })?,
                Role::Collapser => {
                    let ceiling = (DEBT_MAX - penalty * player.interactions() as f64).max(DEBT_MIN);
                    ensure(debt <= ceiling + 1e-9, || {
                        format!("collapser {} debt {} above {}", player.peer_id(), debt, ceiling)
                    })?;
                    ensure(debt < DEBT_MAX, || format!("collapser {} never paid", player.peer_id()))?;
                }
            }
        }
        Ok(())
    }

    /// QR-008: Prophecy.
    ///
    /// **Assertion**: 25 fulfilments spread across players with threshold
    /// 10 lead to exactly 2 reality-shatter broadcasts, and every player
    /// counts all 25.
    async fn run_prophecy(&self, world: &mut SimWorld) -> Check {
        info!("QR-008: Prophecy");
        world.spawn_players(&vec![PlayerScript::idle(); self.num_players]).await;

        for round in 0..25 {
            if let Some(player) = world.player_mut(round % self.num_players) {
                player.session_mut().fulfil_prophecy().await;
            }
            Self::settle(world).await?;
        }

        for player in world.players() {
            let counted = player.session().prophecy().fulfilled();
            ensure(counted == 25, || format!("{} counted {} fulfilments", player.peer_id(), counted))?;
        }
        let broadcasts = world.count_published("reality-shatter");
        ensure(broadcasts == 2, || format!("expected 2 reality-shatter broadcasts, saw {}", broadcasts))
    }

    /// QR-009: OfflineStart.
    ///
    /// **Assertion**: A player that boots offline keeps its local creation,
    /// republishes it on reconnect and converges with the mesh.
    async fn run_offline_start(&self, world: &mut SimWorld) -> Check {
        info!("QR-009: OfflineStart");
        let offline = world.add_player_with(PlayerScript::dreamer(0.3), false).await;
        world.spawn_players(&self.dreamer_scripts(self.num_players - 1)).await;

        let local = match world.player_mut(0) {
            Some(player) => player.session_mut().create_local(Default::default()).await,
            None => None,
        };
        ensure(local.is_some(), || "offline player could not create".to_string())?;

        world.run_for(1_000).await;
        world.hub.set_reachable(&offline, true);
        world.note(SimEvent::info("offline player reachable"));
        world.run_for(self.active_ms().max(3_000)).await;
        Self::settle(world).await?;

        ensure(world.player(0).is_some_and(|p| p.session().is_online()), || {
            "offline player never reconnected".to_string()
        })?;
        let seen_everywhere = local
            .as_ref()
            .is_some_and(|id| world.object_sets().iter().all(|s| s.contains(id)));
        ensure(seen_everywhere, || "offline creation was not republished".to_string())?;
        Self::converged(world, "after reconnect")
    }

    fn finish(&self, scenario: ScenarioId, mut world: SimWorld, check: Check) -> ScenarioResult {
        let stats = world.hub.stats();
        let metrics = ScenarioMetrics {
            envelopes_published: stats.published,
            copies_delivered: stats.delivered,
            copies_dropped: stats.dropped_loss + stats.dropped_partition,
            objects_repaired: stats.repaired,
            creations: world.players().iter().map(|p| p.creations()).sum(),
            interactions: world.players().iter().map(|p| p.interactions()).sum(),
            reality_shatters: world.count_published("reality-shatter") as u64,
        };

        let passed = check.is_ok();
        let failure_reason = check.err();
        let export = world.take_export().map(|mut export| {
            export.finalize(passed, failure_reason.clone());
            export
        });

        info!(
            "Scenario {} complete: {} published, {} delivered, {} dropped, {} repaired",
            scenario.name(),
            metrics.envelopes_published,
            metrics.copies_delivered,
            metrics.copies_dropped,
            metrics.objects_repaired
        );

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            final_object_count: world.object_sets().first().map_or(0, |s| s.len()),
            failure_reason,
            metrics,
            export,
        }
    }

    fn aborted(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_object_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
            export: None,
        }
    }
}

/// Create and restyle calls per player.
fn render_counts(world: &SimWorld) -> Vec<BTreeMap<&'static str, usize>> {
    world
        .players()
        .iter()
        .map(|p| {
            let mut counts = BTreeMap::new();
            for event in p.renderer().events() {
                let kind = match event {
                    RenderEvent::Created(..) => "created",
                    RenderEvent::Restyled(..) => "restyled",
                    _ => continue,
                };
                *counts.entry(kind).or_insert(0) += 1;
            }
            counts
        })
        .collect()
}
