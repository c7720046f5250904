//! UDP gossip transport for production peers.
//!
//! Every peer keeps its own `TopicLog` replica. Publications are appended
//! locally (so they echo to the publisher's subscribers) and sent as JSON
//! frames to each known peer. A joining peer announces itself with `hello`
//! and receives the object backlog in batches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::SyncChannel;
use crate::error::EnvError;
use crate::fanout::TopicLog;
use crate::types::{Envelope, PeerId, Topic};

const MAX_DATAGRAM: usize = 65_507;

/// Configuration for a `UdpGossipChannel`.
#[derive(Debug, Clone)]
pub struct UdpGossipConfig {
    /// Local socket address to bind
    pub bind_addr: SocketAddr,

    /// Statically known peers
    pub peers: Vec<SocketAddr>,

    /// Envelopes per backlog frame
    pub backlog_batch: usize,
}

impl UdpGossipConfig {
    /// Creates a config bound to `bind_addr` with no known peers.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            peers: Vec::new(),
            backlog_batch: 16,
        }
    }

    /// Adds statically known peers.
    pub fn with_peers(mut self, peers: Vec<SocketAddr>) -> Self {
        self.peers = peers;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum GossipFrame {
    Hello { from: PeerId },
    Publish { envelope: Envelope },
    Backlog { envelopes: Vec<Envelope> },
}

#[derive(Debug)]
struct GossipShared {
    local_id: PeerId,
    log: Mutex<TopicLog>,
    peers: Mutex<Vec<SocketAddr>>,
    backlog_batch: usize,
}

impl GossipShared {
    fn log(&self) -> MutexGuard<'_, TopicLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peers(&self) -> MutexGuard<'_, Vec<SocketAddr>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn learn_peer(&self, addr: SocketAddr) {
        let mut peers = self.peers();
        if !peers.contains(&addr) {
            peers.push(addr);
        }
    }
}

/// Sync Channel over UDP to a static (and learned) peer list.
pub struct UdpGossipChannel {
    bind_addr: SocketAddr,
    shared: Arc<GossipShared>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl UdpGossipChannel {
    /// Creates an unconnected channel.
    pub fn new(local_id: PeerId, config: UdpGossipConfig) -> Self {
        Self {
            bind_addr: config.bind_addr,
            shared: Arc::new(GossipShared {
                local_id,
                log: Mutex::new(TopicLog::new()),
                peers: Mutex::new(config.peers),
                backlog_batch: config.backlog_batch.max(1),
            }),
            socket: Mutex::new(None),
            receiver: Mutex::new(None),
        }
    }

    /// Returns the bound address once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.current_socket().and_then(|s| s.local_addr().ok())
    }

    /// Adds a peer at runtime.
    pub fn add_peer(&self, addr: SocketAddr) {
        self.shared.learn_peer(addr);
    }

    /// Currently known peers.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.shared.peers().clone()
    }

    fn current_socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for UdpGossipChannel {
    fn drop(&mut self) {
        if let Some(handle) = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn send_frame(socket: &UdpSocket, frame: &GossipFrame, addr: SocketAddr) -> Result<(), EnvError> {
    let bytes = serde_json::to_vec(frame)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(EnvError::network(format!("frame of {} bytes exceeds datagram limit", bytes.len())));
    }
    socket
        .send_to(&bytes, addr)
        .await
        .map(|_| ())
        .map_err(|e| EnvError::network(format!("send to {} failed: {}", addr, e)))
}

async fn receive_loop(socket: Arc<UdpSocket>, shared: Arc<GossipShared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            // ICMP unreachable from a departed peer surfaces here on some platforms.
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused) => continue,
            Err(e) => {
                warn!("gossip receive loop stopped: {}", e);
                break;
            }
        };

        let frame: GossipFrame = match serde_json::from_slice(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%from, "dropping malformed gossip frame: {}", e);
                continue;
            }
        };

        match frame {
            GossipFrame::Hello { from: peer } => {
                if peer == shared.local_id {
                    continue;
                }
                shared.learn_peer(from);
                let backlog = shared.log().objects().to_vec();
                debug!(%peer, objects = backlog.len(), "answering hello with backlog");
                for chunk in backlog.chunks(shared.backlog_batch) {
                    let frame = GossipFrame::Backlog { envelopes: chunk.to_vec() };
                    if let Err(e) = send_frame(&socket, &frame, from).await {
                        warn!("backlog send failed: {}", e);
                    }
                }
            }
            GossipFrame::Publish { envelope } => {
                shared.learn_peer(from);
                shared.log().append(envelope);
            }
            GossipFrame::Backlog { envelopes } => {
                let mut log = shared.log();
                for envelope in envelopes {
                    log.append(envelope);
                }
            }
        }
    }
}

#[async_trait]
impl SyncChannel for UdpGossipChannel {
    async fn connect(&self) -> Result<(), EnvError> {
        if self.current_socket().is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind(self.bind_addr)
            .await
            .map_err(|e| EnvError::transport_init(format!("bind {} failed: {}", self.bind_addr, e)))?;
        let socket = Arc::new(socket);

        let handle = tokio::spawn(receive_loop(Arc::clone(&socket), Arc::clone(&self.shared)));
        *self.receiver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&socket));

        let hello = GossipFrame::Hello { from: self.shared.local_id.clone() };
        let peers = self.peers();
        for addr in &peers {
            if let Err(e) = send_frame(&socket, &hello, *addr).await {
                warn!("hello to {} failed: {}", addr, e);
            }
        }

        info!(addr = %self.bind_addr, peers = peers.len(), "gossip channel connected");
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), EnvError> {
        let socket = self.current_socket().ok_or(EnvError::Closed)?;

        let frame = GossipFrame::Publish { envelope: envelope.clone() };
        self.shared.log().append(envelope);

        let peers = self.peers();
        let mut failures = 0;
        for addr in &peers {
            if let Err(e) = send_frame(&socket, &frame, *addr).await {
                debug!("publish to {} failed: {}", addr, e);
                failures += 1;
            }
        }

        if !peers.is_empty() && failures == peers.len() {
            return Err(EnvError::network("publish reached no peers"));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<UnboundedReceiver<Envelope>, EnvError> {
        if self.current_socket().is_none() {
            return Err(EnvError::Closed);
        }
        Ok(self.shared.log().subscribe(topic))
    }

    fn local_id(&self) -> PeerId {
        self.shared.local_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_closed() {
        let chan = UdpGossipChannel::new(PeerId::from_seed(1), UdpGossipConfig::new(loopback()));
        assert!(matches!(chan.subscribe(Topic::Events).await, Err(EnvError::Closed)));
    }

    #[tokio::test]
    async fn test_bind_failure_is_transport_init() {
        let first = UdpGossipChannel::new(PeerId::from_seed(1), UdpGossipConfig::new(loopback()));
        first.connect().await.unwrap();
        let taken = first.local_addr().unwrap();

        let second = UdpGossipChannel::new(PeerId::from_seed(2), UdpGossipConfig::new(taken));
        assert!(matches!(second.connect().await, Err(EnvError::TransportInit(_))));
    }

    #[tokio::test]
    async fn test_publish_echoes_locally_and_reaches_peer() {
        let a = UdpGossipChannel::new(PeerId::from_seed(1), UdpGossipConfig::new(loopback()));
        a.connect().await.unwrap();
        let a_addr = a.local_addr().unwrap();

        let b = UdpGossipChannel::new(
            PeerId::from_seed(2),
            UdpGossipConfig::new(loopback()).with_peers(vec![a_addr]),
        );
        b.connect().await.unwrap();

        let mut a_events = a.subscribe(Topic::Events).await.unwrap();
        let mut b_events = b.subscribe(Topic::Events).await.unwrap();

        // a learns b's address from the hello.
        timeout(Duration::from_secs(2), async {
            while a.peers().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        a.publish(Envelope::event(a.local_id(), b"ping".to_vec(), 1)).await.unwrap();

        let echoed = timeout(Duration::from_secs(2), a_events.recv()).await.unwrap().unwrap();
        assert_eq!(echoed.payload, b"ping".to_vec());

        let remote = timeout(Duration::from_secs(2), b_events.recv()).await.unwrap().unwrap();
        assert_eq!(remote.origin, PeerId::from_seed(1));
    }

    #[tokio::test]
    async fn test_joiner_receives_object_backlog() {
        let a = UdpGossipChannel::new(PeerId::from_seed(1), UdpGossipConfig::new(loopback()));
        a.connect().await.unwrap();
        a.publish(Envelope::object("obj_player_1_5", a.local_id(), b"{}".to_vec(), 5))
            .await
            .unwrap();

        let b = UdpGossipChannel::new(
            PeerId::from_seed(2),
            UdpGossipConfig::new(loopback()).with_peers(vec![a.local_addr().unwrap()]),
        );
        b.connect().await.unwrap();
        let mut objects = b.subscribe(Topic::Objects).await.unwrap();

        let first = timeout(Duration::from_secs(2), objects.recv()).await.unwrap().unwrap();
        assert_eq!(first.key.as_deref(), Some("obj_player_1_5"));
    }
}
