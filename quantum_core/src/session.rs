//! Peer Session - the per-process context object tying the engines together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PeerSession                           │
//! │  Context: QuantumContext     Channel: SyncChannel            │
//! │   • now_millis() → ids        • objects topic (keyed)        │
//! │   • random_unit() → outcome   • events topic (append-only)   │
//! │                                                              │
//! │  ┌───────────┐ ┌──────────┐ ┌────────────┐ ┌─────────────┐   │
//! │  │ Registry  │ │  Roles   │ │ DebtLedger │ │ Interpreter │   │
//! │  └───────────┘ └──────────┘ └────────────┘ └─────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Local actions mutate state first, then publish. Inbound envelopes go
//! through the same registry and interpreter paths, so a peer's own echo is
//! harmless. All methods take `&mut self`; the runtime loop is the only
//! caller in production.

use quantum_env::{Envelope, PeerId, QuantumContext, SyncChannel, Topic};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::collaborators::Collaborators;
use crate::config::SessionConfig;
use crate::debt_ledger::{debt_percent, DebtLedger};
use crate::error::CoreError;
use crate::input::{tilt_to_position, InputEvent};
use crate::interpreter::{Applied, EventInterpreter};
use crate::message::{ObjectId, Position, SyncEvent, SyncMessage};
use crate::prophecy::{FulfilmentOutcome, ProphecyBoard};
use crate::registry::{ObjectRegistry, Observation};
use crate::role::{InputHandler, Role, RoleMachine};
use crate::store::DebtStore;

pub const STATUS_CONNECTED: &str = "Connected to the quantum mesh";
pub const STATUS_OFFLINE: &str = "Mesh unreachable, playing locally";
pub const STATUS_REALITY_SHATTERED: &str = "The prophecies are complete. Reality shatters!";

/// Subscriptions handed to the runtime loop.
///
/// Both are `None` while the session is offline.
#[derive(Debug, Default)]
pub struct SessionInbox {
    pub objects: Option<UnboundedReceiver<Envelope>>,
    pub events: Option<UnboundedReceiver<Envelope>>,
}

impl SessionInbox {
    pub fn is_connected(&self) -> bool {
        self.objects.is_some() && self.events.is_some()
    }
}

/// One player's session.
pub struct PeerSession<Ctx, Chan>
where
    Ctx: QuantumContext,
    Chan: SyncChannel,
{
    peer_id: PeerId,
    context: Arc<Ctx>,
    channel: Arc<Chan>,
    config: SessionConfig,
    registry: ObjectRegistry,
    roles: RoleMachine,
    ledger: DebtLedger,
    interpreter: EventInterpreter,
    prophecy: ProphecyBoard,
    collaborators: Collaborators,
    online: bool,
}

impl<Ctx, Chan> PeerSession<Ctx, Chan>
where
    Ctx: QuantumContext,
    Chan: SyncChannel,
{
    /// Creates a session. Nothing is connected until `start()`.
    pub fn new(
        context: Arc<Ctx>,
        channel: Arc<Chan>,
        store: Arc<dyn DebtStore>,
        collaborators: Collaborators,
        config: SessionConfig,
    ) -> Self {
        let peer_id = channel.local_id();
        let prophecy = ProphecyBoard::new(config.prophecy_threshold, context.random_unit());

        Self {
            registry: ObjectRegistry::new(peer_id.clone()),
            roles: RoleMachine::new(config.role_switch_debounce_ms, config.creation_cooldown_ms),
            ledger: DebtLedger::new(store, collaborators.clone()),
            interpreter: EventInterpreter::new(config.fade_duration_ms),
            peer_id,
            context,
            channel,
            config,
            prophecy,
            collaborators,
            online: false,
        }
    }

    /// Reports the initial state and connects to the channel.
    ///
    /// A connect failure leaves the session in local-only mode; the returned
    /// inbox is then empty and `reconnect()` should be retried.
    pub async fn start(&mut self) -> SessionInbox {
        let debt = self.ledger.current();
        let display = &self.collaborators.display;
        display.role_changed(self.roles.role());
        display.debt_changed(debt_percent(debt));
        display.prophecy(self.prophecy.current());
        self.collaborators.renderer.debt_opacity_changed(debt / 100.0);

        info!(peer = %self.peer_id, debt, "session starting");
        self.connect().await
    }

    /// Retries the connection while offline.
    ///
    /// Returns the fresh inbox on success, `None` if already online or the
    /// channel is still unreachable.
    pub async fn reconnect(&mut self) -> Option<SessionInbox> {
        if self.online {
            return None;
        }
        let inbox = self.connect().await;
        if !self.online {
            return None;
        }

        // Objects created while offline never reached the channel.
        let own: Vec<_> = self
            .registry
            .iter()
            .filter(|o| o.creator_id == self.peer_id)
            .map(|o| o.announcement())
            .collect();
        for announcement in own {
            self.publish(SyncMessage::Announce(announcement)).await;
        }
        Some(inbox)
    }

    async fn connect(&mut self) -> SessionInbox {
        match self.try_connect().await {
            Ok(inbox) => {
                self.online = true;
                info!(peer = %self.peer_id, "channel connected");
                self.collaborators.display.status(STATUS_CONNECTED);
                inbox
            }
            Err(e) => {
                self.online = false;
                warn!(peer = %self.peer_id, "channel unavailable, local-only mode: {}", e);
                self.collaborators.display.status(STATUS_OFFLINE);
                SessionInbox::default()
            }
        }
    }

    async fn try_connect(&self) -> Result<SessionInbox, CoreError> {
        self.channel.connect().await?;
        let objects = self.channel.subscribe(Topic::Objects).await?;
        let events = self.channel.subscribe(Topic::Events).await?;
        Ok(SessionInbox {
            objects: Some(objects),
            events: Some(events),
        })
    }

    /// Drops back to local-only mode after the transport closed the inbox.
    pub fn mark_offline(&mut self) {
        if self.online {
            warn!(peer = %self.peer_id, "channel closed, local-only mode");
            self.online = false;
            self.collaborators.display.status(STATUS_OFFLINE);
        }
    }

    /// Dispatches a device input to whichever handler is armed.
    pub async fn handle_input(&mut self, input: InputEvent) {
        if let Some(required) = input.required_handler() {
            if required != self.roles.armed_handler() {
                debug!(?input, armed = ?self.roles.armed_handler(), "input ignored, handler not armed");
                return;
            }
        }

        match input {
            InputEvent::TiltCreateRequested(position) => {
                self.create_local(position).await;
            }
            InputEvent::TiltReading { beta, gamma } => {
                self.create_local(tilt_to_position(beta, gamma)).await;
            }
            InputEvent::TapInteractionRequested(target) => {
                self.handle_object_interaction(&target).await;
            }
            InputEvent::RoleSwitchRequested => {
                self.switch_role();
            }
            InputEvent::ProphecyFulfilled => {
                self.fulfil_prophecy().await;
            }
            InputEvent::VolcanoRequested(location) => {
                self.trigger_volcano(location).await;
            }
        }
    }

    /// Dreamer creation: insert, materialize, announce.
    pub async fn create_local(&mut self, position: Position) -> Option<ObjectId> {
        let now = self.context.now_millis();
        let object = self.registry.create_local(position, now, &mut self.roles)?;

        self.collaborators.renderer.object_created(&object.id, object.position);
        info!(id = %object.id, "object dreamt");
        self.publish(SyncMessage::Announce(object.announcement())).await;
        Some(object.id)
    }

    /// Collapser interaction with a live, active object.
    ///
    /// Returns the event that was applied and published.
    pub async fn handle_object_interaction(&mut self, target: &ObjectId) -> Option<SyncEvent> {
        if self.roles.armed_handler() != InputHandler::Tap {
            debug!(%target, "interaction ignored, tap handler not armed");
            return None;
        }
        match self.registry.get(target) {
            Some(object) if object.is_active() => {}
            Some(_) => {
                debug!(%target, "interaction ignored, object is frozen");
                return None;
            }
            None => {
                debug!(%target, "interaction ignored, object not found");
                return None;
            }
        }

        let draw = self.context.random_unit();
        let event = if draw < self.config.freeze_probability {
            SyncEvent::freeze(target.clone(), self.peer_id.clone())
        } else {
            SyncEvent::shatter(target.clone(), self.peer_id.clone())
        };
        debug!(%target, draw, kind = event.kind(), "collapse");

        self.apply_event(&event);
        self.publish(SyncMessage::Event(event.clone())).await;
        self.ledger.apply(-self.config.interaction_penalty);
        Some(event)
    }

    /// Flips the role, subject to the debounce window.
    pub fn switch_role(&mut self) -> Option<Role> {
        let now = self.context.now_millis();
        let transition = self.roles.switch_role(now)?;
        info!(from = %transition.from, to = %transition.to, "role switched");
        self.collaborators.display.role_changed(transition.to);
        Some(transition.to)
    }

    /// Counts a local prophecy fulfilment and shares it.
    ///
    /// The peer whose fulfilment crosses the threshold broadcasts the
    /// reality-shatter.
    pub async fn fulfil_prophecy(&mut self) -> FulfilmentOutcome {
        let event = SyncEvent::ProphecyFulfilled {
            creator_id: self.peer_id.clone(),
            fulfilled_at: self.context.now_millis(),
        };
        let outcome = match self.apply_event(&event) {
            Applied::Prophecy(outcome) => outcome,
            _ => FulfilmentOutcome::Duplicate,
        };
        if outcome == FulfilmentOutcome::Duplicate {
            return outcome;
        }
        self.publish(SyncMessage::Event(event)).await;

        if let FulfilmentOutcome::ThresholdReached(count) = outcome {
            info!(count, "prophecy threshold reached");
            self.collaborators.display.status(STATUS_REALITY_SHATTERED);
            let shatter = SyncEvent::reality_shatter(self.peer_id.clone());
            self.apply_event(&shatter);
            self.publish(SyncMessage::Event(shatter)).await;
        }
        outcome
    }

    pub async fn trigger_volcano(&mut self, location: Position) {
        let event = SyncEvent::Volcano {
            location,
            creator_id: Some(self.peer_id.clone()),
        };
        self.apply_event(&event);
        self.publish(SyncMessage::Event(event)).await;
    }

    /// Folds one inbound envelope into local state.
    ///
    /// Malformed envelopes are dropped. Events this peer published were
    /// applied before publishing and are skipped on echo.
    pub fn handle_envelope(&mut self, envelope: &Envelope) {
        let message = match SyncMessage::from_envelope(envelope) {
            Ok(message) => message,
            Err(e) => {
                debug!(origin = %envelope.origin, topic = %envelope.topic, "dropping envelope: {}", e);
                return;
            }
        };

        match message {
            SyncMessage::Announce(announcement) => match self.registry.observe_remote(&announcement) {
                Observation::Inserted(object) => {
                    debug!(id = %object.id, creator = %object.creator_id, "remote object");
                    self.collaborators.renderer.object_created(&object.id, object.position);
                }
                Observation::OwnOrigin | Observation::Duplicate => {}
            },
            SyncMessage::Event(event) => {
                if envelope.origin == self.peer_id {
                    return;
                }
                let applied = self.apply_event(&event);
                if let Applied::Prophecy(FulfilmentOutcome::ThresholdReached(count)) = applied {
                    // Cleared here too; only the fulfilling peer broadcasts.
                    debug!(count, origin = %envelope.origin, "remote fulfilment reached threshold");
                    self.collaborators.display.status(STATUS_REALITY_SHATTERED);
                    self.apply_event(&SyncEvent::RealityShatter {
                        creator_id: Some(envelope.origin.clone()),
                    });
                }
            }
        }
    }

    /// Debt decay step; only Collapsers pay.
    pub fn decay_tick(&mut self) -> Option<f64> {
        self.ledger.tick(self.roles.role(), self.config.decay_amount)
    }

    /// Picks a new prophecy and shows it.
    pub fn rotate_prophecy(&mut self) -> &'static str {
        let text = self.prophecy.rotate(self.context.random_unit());
        self.collaborators.display.prophecy(text);
        text
    }

    fn apply_event(&mut self, event: &SyncEvent) -> Applied {
        self.interpreter.apply(
            event,
            &mut self.registry,
            &mut self.prophecy,
            self.collaborators.renderer.as_ref(),
        )
    }

    async fn publish(&self, message: SyncMessage) {
        if !self.online {
            debug!("offline, not publishing");
            return;
        }
        let envelope = match message.to_envelope(self.peer_id.clone(), self.context.now_millis()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("failed to encode message: {}", e);
                return;
            }
        };
        if let Err(e) = self.channel.publish(envelope).await {
            warn!("publish failed: {}", e);
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.roles.role()
    }

    pub fn roles(&self) -> &RoleMachine {
        &self.roles
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn prophecy(&self) -> &ProphecyBoard {
        &self.prophecy
    }

    pub fn debt(&self) -> f64 {
        self.ledger.current()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{DisplayEvent, RecordingDisplay, RecordingRenderer, RenderEvent, StyleHint};
    use crate::message::ObjectState;
    use crate::store::MemoryDebtStore;
    use async_trait::async_trait;
    use quantum_env::{EnvError, MemoryChannel, MemoryHub};
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    /// Context with a hand-driven clock and scripted random draws.
    pub struct ScriptedContext {
        millis: AtomicU64,
        draws: Mutex<VecDeque<f64>>,
    }

    impl ScriptedContext {
        pub fn new(start_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                millis: AtomicU64::new(start_ms),
                draws: Mutex::new(VecDeque::new()),
            })
        }

        pub fn advance(&self, ms: u64) {
            self.millis.fetch_add(ms, Ordering::SeqCst);
        }

        pub fn push_draw(&self, draw: f64) {
            self.draws.lock().unwrap().push_back(draw);
        }
    }

    #[async_trait]
    impl QuantumContext for ScriptedContext {
        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::SeqCst))
        }

        fn system_time(&self) -> SystemTime {
            UNIX_EPOCH + self.now()
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }

        fn spawn<F>(&self, _name: &str, future: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            tokio::spawn(future);
        }

        fn random_unit(&self) -> f64 {
            self.draws.lock().unwrap().pop_front().unwrap_or(0.0)
        }

        fn seed(&self) -> u64 {
            0
        }
    }

    /// Memory channel whose connect can be made to fail.
    pub struct FlakyChannel {
        inner: MemoryChannel,
        reachable: AtomicBool,
    }

    impl FlakyChannel {
        pub fn new(inner: MemoryChannel, reachable: bool) -> Self {
            Self {
                inner,
                reachable: AtomicBool::new(reachable),
            }
        }

        pub fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SyncChannel for FlakyChannel {
        async fn connect(&self) -> Result<(), EnvError> {
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(EnvError::transport_init("relay unreachable"));
            }
            self.inner.connect().await
        }

        async fn publish(&self, envelope: Envelope) -> Result<(), EnvError> {
            self.inner.publish(envelope).await
        }

        async fn subscribe(&self, topic: Topic) -> Result<UnboundedReceiver<Envelope>, EnvError> {
            self.inner.subscribe(topic).await
        }

        fn local_id(&self) -> PeerId {
            self.inner.local_id()
        }
    }

    pub struct Player<Chan: SyncChannel> {
        pub session: PeerSession<ScriptedContext, Chan>,
        pub inbox: SessionInbox,
        pub renderer: Arc<RecordingRenderer>,
        pub display: Arc<RecordingDisplay>,
    }

    impl<Chan: SyncChannel> Player<Chan> {
        pub async fn join(ctx: &Arc<ScriptedContext>, channel: Chan, config: SessionConfig) -> Self {
            let renderer = Arc::new(RecordingRenderer::new());
            let display = Arc::new(RecordingDisplay::new());
            let mut session = PeerSession::new(
                ctx.clone(),
                Arc::new(channel),
                Arc::new(MemoryDebtStore::new()),
                Collaborators::new(renderer.clone(), display.clone()),
                config,
            );
            let inbox = session.start().await;
            Self { session, inbox, renderer, display }
        }

        /// Applies everything queued in the inbox.
        pub fn pump(&mut self) {
            let mut pending = Vec::new();
            for rx in [self.inbox.objects.as_mut(), self.inbox.events.as_mut()].into_iter().flatten() {
                while let Ok(envelope) = rx.try_recv() {
                    pending.push(envelope);
                }
            }
            for envelope in pending {
                self.session.handle_envelope(&envelope);
            }
        }
    }

    async fn pair(ctx: &Arc<ScriptedContext>, config: SessionConfig) -> (MemoryHub, Player<MemoryChannel>, Player<MemoryChannel>) {
        let hub = MemoryHub::new();
        let a = Player::join(ctx, hub.channel(PeerId::from("player_a")), config.clone()).await;
        let b = Player::join(ctx, hub.channel(PeerId::from("player_b")), config).await;
        (hub, a, b)
    }

    #[tokio::test]
    async fn test_start_reports_initial_state() {
        let ctx = ScriptedContext::new(1_000);
        let (_hub, a, _b) = pair(&ctx, SessionConfig::default()).await;

        let events = a.display.events();
        assert_eq!(events[0], DisplayEvent::Role(Role::Dreamer));
        assert_eq!(events[1], DisplayEvent::Debt(100));
        assert!(matches!(events[2], DisplayEvent::Prophecy(_)));
        assert_eq!(a.display.statuses(), vec![STATUS_CONNECTED.to_string()]);
        assert!(a.session.is_online());
        assert!(a.inbox.is_connected());
    }

    #[tokio::test]
    async fn test_creation_propagates_and_echo_is_harmless() {
        let ctx = ScriptedContext::new(10_000);
        let (hub, mut a, mut b) = pair(&ctx, SessionConfig::default()).await;

        let id = a.session.create_local(Position::new(1.0, 0.0, -2.0)).await.unwrap();
        assert_eq!(hub.object_count(), 1);

        a.pump();
        b.pump();
        assert_eq!(a.session.registry().len(), 1);
        assert_eq!(b.session.registry().len(), 1);
        assert_eq!(b.session.registry().get(&id).unwrap().creator_id, PeerId::from("player_a"));

        let created = |r: &RecordingRenderer| {
            r.events().iter().filter(|e| matches!(e, RenderEvent::Created(..))).count()
        };
        assert_eq!(created(a.renderer.as_ref()), 1);
        assert_eq!(created(b.renderer.as_ref()), 1);
    }

    #[tokio::test]
    async fn test_tilt_reading_is_mapped_and_cooled_down() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, _b) = pair(&ctx, SessionConfig::default()).await;

        a.session.handle_input(InputEvent::TiltReading { beta: 90.0, gamma: 45.0 }).await;
        ctx.advance(500);
        a.session.handle_input(InputEvent::TiltReading { beta: 0.0, gamma: 0.0 }).await;

        let objects: Vec<_> = a.session.registry().iter().cloned().collect();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].position, Position::new(1.0, 2.0, -2.0));
    }

    #[tokio::test]
    async fn test_interaction_outcome_follows_draw() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, mut b) = pair(&ctx, SessionConfig::default()).await;

        let first = a.session.create_local(Position::default()).await.unwrap();
        ctx.advance(2_000);
        let second = a.session.create_local(Position::default()).await.unwrap();
        b.pump();
        assert_eq!(b.session.switch_role(), Some(Role::Collapser));

        ctx.push_draw(0.2);
        let event = b.session.handle_object_interaction(&first).await.unwrap();
        assert_eq!(event.kind(), "freeze");
        assert_eq!(b.session.registry().get(&first).unwrap().state, ObjectState::Frozen);
        assert!((b.session.debt() - 95.0).abs() < 1e-9);

        ctx.push_draw(0.7);
        let event = b.session.handle_object_interaction(&second).await.unwrap();
        assert_eq!(event.kind(), "shatter");
        assert!(!b.session.registry().contains(&second));
        assert!((b.session.debt() - 90.0).abs() < 1e-9);

        a.pump();
        assert_eq!(a.session.registry().get(&first).unwrap().state, ObjectState::Frozen);
        assert!(!a.session.registry().contains(&second));
        assert!(a.renderer.events().contains(&RenderEvent::Restyled(first, StyleHint::Frozen)));
        // Debt is local to the collapser.
        assert_eq!(a.session.debt(), 100.0);
    }

    #[tokio::test]
    async fn test_interaction_requires_tap_and_active_object() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, mut b) = pair(&ctx, SessionConfig::default()).await;

        let id = a.session.create_local(Position::default()).await.unwrap();
        b.pump();

        // Dreamer: tap handler disarmed.
        assert!(b.session.handle_object_interaction(&id).await.is_none());
        b.session.handle_input(InputEvent::TapInteractionRequested(id.clone())).await;
        assert!(b.session.registry().get(&id).unwrap().is_active());

        b.session.switch_role();
        ctx.push_draw(0.0);
        assert!(b.session.handle_object_interaction(&id).await.is_some());
        // Frozen objects cannot be interacted with again.
        assert!(b.session.handle_object_interaction(&id).await.is_none());
        assert!(b.session.handle_object_interaction(&ObjectId::from("obj_x_1")).await.is_none());
        assert!((b.session.debt() - 95.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_collapser_tilt_is_ignored() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, _b) = pair(&ctx, SessionConfig::default()).await;
        a.session.handle_input(InputEvent::RoleSwitchRequested).await;
        a.session.handle_input(InputEvent::TiltCreateRequested(Position::default())).await;
        assert!(a.session.registry().is_empty());
    }

    #[tokio::test]
    async fn test_role_switch_debounce() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, _b) = pair(&ctx, SessionConfig::default()).await;

        assert_eq!(a.session.switch_role(), Some(Role::Collapser));
        ctx.advance(100);
        assert_eq!(a.session.switch_role(), None);
        ctx.advance(200);
        assert_eq!(a.session.switch_role(), Some(Role::Dreamer));

        let roles: Vec<_> = a
            .display
            .events()
            .into_iter()
            .filter(|e| matches!(e, DisplayEvent::Role(_)))
            .collect();
        assert_eq!(roles.len(), 3);
    }

    #[tokio::test]
    async fn test_decay_tick_only_for_collapser() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, _b) = pair(&ctx, SessionConfig::default()).await;

        assert_eq!(a.session.decay_tick(), None);
        a.session.switch_role();
        let after = a.session.decay_tick().unwrap();
        assert!((after - 99.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_connect_failure_degrades_to_local_only() {
        let ctx = ScriptedContext::new(10_000);
        let hub = MemoryHub::new();
        let channel = FlakyChannel::new(hub.channel(PeerId::from("player_a")), false);
        let mut a = Player::join(&ctx, channel, SessionConfig::default()).await;

        assert!(!a.session.is_online());
        assert!(!a.inbox.is_connected());
        assert_eq!(a.display.statuses(), vec![STATUS_OFFLINE.to_string()]);

        // Local play continues.
        let id = a.session.create_local(Position::default()).await.unwrap();
        assert!(a.session.registry().contains(&id));
        assert_eq!(hub.object_count(), 0);

        assert!(a.session.reconnect().await.is_none());

        a.session.channel.set_reachable(true);
        let inbox = a.session.reconnect().await.unwrap();
        assert!(inbox.is_connected());
        assert!(a.session.is_online());
        // The offline creation is announced after reconnecting.
        assert_eq!(hub.object_count(), 1);
        assert!(a.session.reconnect().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_envelopes_are_dropped() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, _b) = pair(&ctx, SessionConfig::default()).await;

        a.session.handle_envelope(&Envelope::event(PeerId::from("player_b"), b"not json".to_vec(), 0));
        a.session.handle_envelope(&Envelope::event(
            PeerId::from("player_b"),
            br#"{"type":"meteor-shower"}"#.to_vec(),
            0,
        ));
        a.session.handle_envelope(&Envelope::object("obj_b_1", PeerId::from("player_b"), b"{}".to_vec(), 0));
        assert!(a.session.registry().is_empty());
        assert!(a.renderer.events().iter().all(|e| matches!(e, RenderEvent::Opacity(_))));
    }

    #[tokio::test]
    async fn test_volcano_renders_once_per_peer() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, mut b) = pair(&ctx, SessionConfig::default()).await;

        let location = Position::new(0.0, -1.0, -4.0);
        a.session.trigger_volcano(location).await;
        a.pump();
        b.pump();

        let volcanoes = |r: &RecordingRenderer| {
            r.events().iter().filter(|e| matches!(e, RenderEvent::Volcano(_))).count()
        };
        assert_eq!(volcanoes(a.renderer.as_ref()), 1);
        assert_eq!(volcanoes(b.renderer.as_ref()), 1);
    }

    #[tokio::test]
    async fn test_concurrent_fulfilments_clear_without_broadcast() {
        let ctx = ScriptedContext::new(10_000);
        let config = SessionConfig::default().with_prophecy_threshold(2);
        let (hub, mut a, mut b) = pair(&ctx, config).await;

        b.session.create_local(Position::default()).await.unwrap();
        a.pump();
        assert_eq!(a.session.registry().len(), 1);

        assert_eq!(a.session.fulfil_prophecy().await, FulfilmentOutcome::Counted(1));
        ctx.advance(10);
        assert_eq!(b.session.fulfil_prophecy().await, FulfilmentOutcome::Counted(1));
        // Both crossed the threshold on a remote fulfilment: each clears
        // locally and nobody publishes.
        a.pump();
        assert_eq!(a.session.prophecy().fulfilled(), 2);
        assert!(a.session.registry().is_empty());

        b.pump();
        assert_eq!(b.session.prophecy().fulfilled(), 2);
        assert!(b.session.registry().is_empty());
        assert_eq!(hub.event_count(), 2);
    }

    #[tokio::test]
    async fn test_local_threshold_crossing_broadcasts_reality_shatter() {
        let ctx = ScriptedContext::new(10_000);
        let config = SessionConfig::default().with_prophecy_threshold(2);
        let (hub, mut a, mut b) = pair(&ctx, config).await;

        a.session.create_local(Position::default()).await.unwrap();
        b.pump();
        assert_eq!(b.session.registry().len(), 1);

        a.session.fulfil_prophecy().await;
        ctx.advance(10);
        assert_eq!(a.session.fulfil_prophecy().await, FulfilmentOutcome::ThresholdReached(2));
        assert!(a.session.registry().is_empty());
        assert!(a.display.statuses().contains(&STATUS_REALITY_SHATTERED.to_string()));
        assert_eq!(hub.event_count(), 3);

        b.pump();
        assert!(b.session.registry().is_empty());
        assert_eq!(b.session.prophecy().fulfilled(), 2);
        assert_eq!(hub.event_count(), 3);
    }

    #[tokio::test]
    async fn test_rotate_prophecy_reports_to_display() {
        let ctx = ScriptedContext::new(10_000);
        let (_hub, mut a, _b) = pair(&ctx, SessionConfig::default()).await;
        ctx.push_draw(0.99);
        let text = a.session.rotate_prophecy();
        assert_eq!(text, crate::prophecy::ROTATING_PROPHECIES[3]);
        assert_eq!(a.display.events().last(), Some(&DisplayEvent::Prophecy(text.to_string())));
    }
}
