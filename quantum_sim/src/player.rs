//! SimPlayer - a scripted player driving a real `PeerSession` in simulation.
//!
//! The player stands in for the device layer: it produces tilt readings and
//! taps from its own seeded RNG and drains its inbox when the world tells it
//! to.

use quantum_core::{
    Collaborators, InputEvent, MemoryDebtStore, ObjectId, ObjectState, PeerSession, RecordingDisplay,
    RecordingRenderer, Role, SessionConfig, SessionInbox,
};
use quantum_env::PeerId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::context::SimContext;
use crate::network::SimChannel;

/// Spread of simulated device tilt, in degrees.
const TILT_STD_DEG: f64 = 30.0;

/// How a simulated player behaves each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerScript {
    /// Role the player switches to when it joins
    pub role: Role,

    /// Chance per tick of tilting to create (Dreamer)
    pub create_rate: f64,

    /// Chance per tick of tapping a live object (Collapser)
    pub tap_rate: f64,
}

impl PlayerScript {
    pub fn dreamer(create_rate: f64) -> Self {
        Self {
            role: Role::Dreamer,
            create_rate: create_rate.clamp(0.0, 1.0),
            tap_rate: 0.0,
        }
    }

    pub fn collapser(tap_rate: f64) -> Self {
        Self {
            role: Role::Collapser,
            create_rate: 0.0,
            tap_rate: tap_rate.clamp(0.0, 1.0),
        }
    }

    /// Joins and watches; never acts on its own.
    pub fn idle() -> Self {
        Self {
            role: Role::Dreamer,
            create_rate: 0.0,
            tap_rate: 0.0,
        }
    }
}

/// A simulated player.
pub struct SimPlayer {
    session: PeerSession<SimContext, SimChannel>,
    inbox: SessionInbox,
    renderer: Arc<RecordingRenderer>,
    display: Arc<RecordingDisplay>,
    script: PlayerScript,
    rng: ChaCha8Rng,
    creations: u64,
    interactions: u64,
}

impl SimPlayer {
    /// Creates a player. Nothing is connected until `start()`.
    ///
    /// # Arguments
    /// * `context` - Player's fork of the simulation context
    /// * `channel` - Endpoint on the world's hub
    /// * `config` - Session tuning
    /// * `script` - Per-tick behaviour
    /// * `seed` - Seed for the player's input RNG
    pub fn new(
        context: Arc<SimContext>,
        channel: SimChannel,
        config: SessionConfig,
        script: PlayerScript,
        seed: u64,
    ) -> Self {
        let renderer = Arc::new(RecordingRenderer::new());
        let display = Arc::new(RecordingDisplay::new());
        let session = PeerSession::new(
            context,
            Arc::new(channel),
            Arc::new(MemoryDebtStore::new()),
            Collaborators::new(renderer.clone(), display.clone()),
            config,
        );

        Self {
            session,
            inbox: SessionInbox::default(),
            renderer,
            display,
            script,
            rng: ChaCha8Rng::seed_from_u64(seed),
            creations: 0,
            interactions: 0,
        }
    }

    /// Starts the session and takes up the scripted role.
    pub async fn start(&mut self) {
        self.inbox = self.session.start().await;
        if self.script.role != self.session.role() {
            self.session.switch_role();
        }
    }

    /// Retries the channel if offline. Returns true when newly connected.
    pub async fn reconnect(&mut self) -> bool {
        match self.session.reconnect().await {
            Some(inbox) => {
                self.inbox = inbox;
                true
            }
            None => false,
        }
    }

    /// Applies everything queued for this player. Returns the number of
    /// envelopes handled.
    pub fn pump(&mut self) -> usize {
        let mut pending = Vec::new();
        for rx in [self.inbox.objects.as_mut(), self.inbox.events.as_mut()]
            .into_iter()
            .flatten()
        {
            while let Ok(envelope) = rx.try_recv() {
                pending.push(envelope);
            }
        }
        for envelope in &pending {
            self.session.handle_envelope(envelope);
        }
        pending.len()
    }

    /// One tick of scripted behaviour.
    pub async fn act(&mut self) {
        match self.session.role() {
            Role::Dreamer => {
                if self.script.create_rate <= 0.0 || !self.rng.gen_bool(self.script.create_rate) {
                    return;
                }
                let beta: f64 = self.rng.sample::<f64, _>(StandardNormal) * TILT_STD_DEG;
                let gamma: f64 = self.rng.sample::<f64, _>(StandardNormal) * TILT_STD_DEG;
                let before = self.session.registry().len();
                self.session
                    .handle_input(InputEvent::TiltReading {
                        beta: beta.clamp(-180.0, 180.0),
                        gamma: gamma.clamp(-90.0, 90.0),
                    })
                    .await;
                if self.session.registry().len() > before {
                    self.creations += 1;
                }
            }
            Role::Collapser => {
                if self.script.tap_rate <= 0.0 || !self.rng.gen_bool(self.script.tap_rate) {
                    return;
                }
                let targets: Vec<ObjectId> = self
                    .session
                    .registry()
                    .iter()
                    .filter(|o| o.is_active())
                    .map(|o| o.id.clone())
                    .collect();
                if targets.is_empty() {
                    return;
                }
                let target = &targets[self.rng.gen_range(0..targets.len())];
                if self.session.handle_object_interaction(target).await.is_some() {
                    self.interactions += 1;
                }
            }
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        self.session.peer_id()
    }

    pub fn session(&self) -> &PeerSession<SimContext, SimChannel> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PeerSession<SimContext, SimChannel> {
        &mut self.session
    }

    pub fn script(&self) -> PlayerScript {
        self.script
    }

    pub fn renderer(&self) -> &RecordingRenderer {
        &self.renderer
    }

    pub fn display(&self) -> &RecordingDisplay {
        &self.display
    }

    /// Successful local creations.
    pub fn creations(&self) -> u64 {
        self.creations
    }

    /// Successful collapses (each cost debt).
    pub fn interactions(&self) -> u64 {
        self.interactions
    }

    /// Live object ids in this player's registry.
    pub fn object_ids(&self) -> BTreeSet<ObjectId> {
        self.session.registry().ids().into_iter().collect()
    }

    /// Live objects and their states.
    pub fn object_states(&self) -> BTreeMap<ObjectId, ObjectState> {
        self.session
            .registry()
            .iter()
            .map(|o| (o.id.clone(), o.state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::SimHub;
    use quantum_core::RenderEvent;
    use std::time::Duration;

    fn setup() -> (Arc<SimContext>, SimHub) {
        let ctx = SimContext::shared(5);
        (ctx.clone(), SimHub::new(ctx, 5, 0))
    }

    #[test]
    fn test_script_rates_are_clamped() {
        assert_eq!(PlayerScript::dreamer(3.0).create_rate, 1.0);
        assert_eq!(PlayerScript::collapser(-1.0).tap_rate, 0.0);
        assert_eq!(PlayerScript::idle().role, Role::Dreamer);
    }

    #[tokio::test]
    async fn test_dreamer_creates_and_collapser_taps() {
        let (ctx, hub) = setup();
        let dreamer_id = PeerId::from_seed(0);
        let collapser_id = PeerId::from_seed(1);

        let mut dreamer = SimPlayer::new(
            Arc::new(ctx.fork(0)),
            hub.channel(dreamer_id.clone()),
            SessionConfig::default(),
            PlayerScript::dreamer(1.0),
            10,
        );
        let mut collapser = SimPlayer::new(
            Arc::new(ctx.fork(1)),
            hub.channel(collapser_id),
            SessionConfig::default(),
            PlayerScript::collapser(1.0),
            11,
        );
        dreamer.start().await;
        collapser.start().await;
        assert_eq!(collapser.session().role(), Role::Collapser);

        dreamer.act().await;
        assert_eq!(dreamer.creations(), 1);
        // Cooldown blocks the next attempt.
        dreamer.act().await;
        assert_eq!(dreamer.creations(), 1);

        hub.deliver_due();
        assert_eq!(collapser.pump(), 1);
        assert_eq!(collapser.object_ids(), dreamer.object_ids());

        collapser.act().await;
        assert_eq!(collapser.interactions(), 1);
        assert!(collapser.session().debt() < 100.0);

        hub.deliver_due();
        dreamer.pump();
        ctx.advance_time(Duration::from_millis(10));
        assert_eq!(dreamer.object_states(), collapser.object_states());
        assert!(dreamer
            .renderer()
            .events()
            .iter()
            .any(|e| matches!(e, RenderEvent::Created(..))));
    }
}
