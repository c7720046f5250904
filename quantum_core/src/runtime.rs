//! Session runtime - the single writer of session state.
//!
//! ```text
//!   inputs ──┐
//!  objects ──┤
//!   events ──┼──▶ select! ──▶ PeerSession
//!   timers ──┤     (decay, prophecy, reconnect)
//! shutdown ──┘
//! ```

use quantum_env::{EnvError, Envelope, QuantumContext, SyncChannel};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::input::InputEvent;
use crate::session::PeerSession;

/// Sender side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<InputEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Creates a handle plus the receivers `run_session` consumes.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<InputEvent>, watch::Receiver<bool>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Self {
            inputs: input_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (handle, input_rx, shutdown_rx)
    }

    /// Queues an input for the session.
    pub fn send(&self, input: InputEvent) -> Result<(), CoreError> {
        self.inputs
            .send(input)
            .map_err(|_| CoreError::Env(EnvError::Closed))
    }

    /// Asks the loop to stop after the current step.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawns `run_session` on the tokio runtime.
///
/// The join handle yields the session back once the loop ends.
pub fn spawn_session<Ctx, Chan>(session: PeerSession<Ctx, Chan>) -> (SessionHandle, JoinHandle<PeerSession<Ctx, Chan>>)
where
    Ctx: QuantumContext,
    Chan: SyncChannel,
{
    let (handle, inputs, shutdown) = SessionHandle::pair();
    let task = tokio::spawn(run_session(session, inputs, shutdown));
    (handle, task)
}

fn periodic(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Waits on an optional receiver; pends forever while it is absent.
async fn recv_or_pending(rx: &mut Option<mpsc::UnboundedReceiver<Envelope>>) -> Option<Envelope> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drives a session until shutdown, the input queue closing, or the
/// shutdown sender being dropped.
pub async fn run_session<Ctx, Chan>(
    mut session: PeerSession<Ctx, Chan>,
    mut inputs: mpsc::UnboundedReceiver<InputEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> PeerSession<Ctx, Chan>
where
    Ctx: QuantumContext,
    Chan: SyncChannel,
{
    let mut inbox = session.start().await;

    let config = session.config().clone();
    let mut decay = periodic(config.decay_interval());
    let mut prophecy = periodic(config.prophecy_interval());
    let mut reconnect = periodic(config.reconnect_interval());

    info!(peer = %session.peer_id(), "session loop running");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            input = inputs.recv() => match input {
                Some(input) => session.handle_input(input).await,
                None => break,
            },

            envelope = recv_or_pending(&mut inbox.objects) => match envelope {
                Some(envelope) => session.handle_envelope(&envelope),
                None => {
                    inbox.objects = None;
                    inbox.events = None;
                    session.mark_offline();
                }
            },

            envelope = recv_or_pending(&mut inbox.events) => match envelope {
                Some(envelope) => session.handle_envelope(&envelope),
                None => {
                    inbox.objects = None;
                    inbox.events = None;
                    session.mark_offline();
                }
            },

            _ = decay.tick() => {
                if let Some(debt) = session.decay_tick() {
                    debug!(debt, "debt decayed");
                }
            }

            _ = prophecy.tick() => {
                session.rotate_prophecy();
            }

            _ = reconnect.tick() => {
                if let Some(fresh) = session.reconnect().await {
                    inbox = fresh;
                }
            }
        }
    }

    info!(peer = %session.peer_id(), "session loop stopped");
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborators, DisplayEvent, RecordingDisplay, RecordingRenderer};
    use crate::config::SessionConfig;
    use crate::message::Position;
    use crate::role::Role;
    use crate::session::tests::{FlakyChannel, ScriptedContext};
    use crate::store::MemoryDebtStore;
    use quantum_env::{MemoryHub, PeerId};
    use std::time::Duration;

    fn session_on<Chan: SyncChannel>(
        ctx: &Arc<ScriptedContext>,
        channel: Chan,
        display: Arc<RecordingDisplay>,
    ) -> PeerSession<ScriptedContext, Chan> {
        PeerSession::new(
            ctx.clone(),
            Arc::new(channel),
            Arc::new(MemoryDebtStore::new()),
            Collaborators::new(Arc::new(RecordingRenderer::new()), display),
            SessionConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_inputs_and_remote_envelopes_are_applied() {
        let ctx = ScriptedContext::new(50_000);
        let hub = MemoryHub::new();

        let a = session_on(&ctx, hub.channel(PeerId::from("player_a")), Arc::new(RecordingDisplay::new()));
        let b = session_on(&ctx, hub.channel(PeerId::from("player_b")), Arc::new(RecordingDisplay::new()));
        let (a_handle, a_task) = spawn_session(a);
        let (b_handle, b_task) = spawn_session(b);

        a_handle.send(InputEvent::TiltCreateRequested(Position::default())).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        a_handle.shutdown();
        b_handle.shutdown();
        let a = a_task.await.unwrap();
        let b = b_task.await.unwrap();

        assert_eq!(a.registry().len(), 1);
        assert_eq!(b.registry().len(), 1);
        assert_eq!(hub.object_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_timer_drains_collapser() {
        let ctx = ScriptedContext::new(50_000);
        let hub = MemoryHub::new();
        let display = Arc::new(RecordingDisplay::new());
        let (handle, task) = spawn_session(session_on(&ctx, hub.channel(PeerId::from("player_a")), display.clone()));

        handle.send(InputEvent::RoleSwitchRequested).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.shutdown();
        let session = task.await.unwrap();

        assert_eq!(session.role(), Role::Collapser);
        assert!((session.debt() - 99.9).abs() < 1e-9);
        assert!(display.events().contains(&DisplayEvent::Role(Role::Collapser)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prophecy_timer_rotates_text() {
        let ctx = ScriptedContext::new(50_000);
        let hub = MemoryHub::new();
        let display = Arc::new(RecordingDisplay::new());
        let (handle, task) = spawn_session(session_on(&ctx, hub.channel(PeerId::from("player_a")), display.clone()));

        tokio::time::sleep(Duration::from_secs(181)).await;
        handle.shutdown();
        task.await.unwrap();

        let prophecies = display
            .events()
            .into_iter()
            .filter(|e| matches!(e, DisplayEvent::Prophecy(_)))
            .count();
        assert_eq!(prophecies, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_timer_recovers_from_startup_failure() {
        let ctx = ScriptedContext::new(50_000);
        let hub = MemoryHub::new();
        let channel = Arc::new(FlakyChannel::new(hub.channel(PeerId::from("player_a")), false));
        let display = Arc::new(RecordingDisplay::new());
        let peer = PeerSession::new(
            ctx.clone(),
            channel.clone(),
            Arc::new(MemoryDebtStore::new()),
            Collaborators::new(Arc::new(RecordingRenderer::new()), display.clone()),
            SessionConfig::default(),
        );
        let (handle, task) = spawn_session(peer);

        handle.send(InputEvent::TiltCreateRequested(Position::default())).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(hub.object_count(), 0);

        channel.set_reachable(true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        handle.shutdown();
        let session = task.await.unwrap();

        assert!(session.is_online());
        assert_eq!(session.registry().len(), 1);
        assert_eq!(hub.object_count(), 1);
        assert_eq!(
            display.statuses(),
            vec![crate::session::STATUS_OFFLINE.to_string(), crate::session::STATUS_CONNECTED.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_loop() {
        let ctx = ScriptedContext::new(50_000);
        let hub = MemoryHub::new();
        let (handle, task) = spawn_session(session_on(
            &ctx,
            hub.channel(PeerId::from("player_a")),
            Arc::new(RecordingDisplay::new()),
        ));
        drop(handle);
        let session = task.await.unwrap();
        assert!(session.registry().is_empty());
    }
}
