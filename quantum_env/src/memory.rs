//! In-process Sync Channel backed by one shared log.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::channel::SyncChannel;
use crate::error::EnvError;
use crate::fanout::TopicLog;
use crate::types::{Envelope, PeerId, Topic};

/// A store-and-forward hub shared by every `MemoryChannel` created from it.
///
/// Delivery is instant and lossless, publications echo back to the
/// publisher, and late subscribers catch up on the object backlog.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    log: Arc<Mutex<TopicLog>>,
}

impl MemoryHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel endpoint for `local_id`.
    pub fn channel(&self, local_id: PeerId) -> MemoryChannel {
        MemoryChannel {
            local_id,
            hub: self.clone(),
            connected: AtomicBool::new(false),
        }
    }

    /// Number of distinct objects published so far.
    pub fn object_count(&self) -> usize {
        self.lock().objects().len()
    }

    /// Number of events published so far.
    pub fn event_count(&self) -> usize {
        self.lock().events().len()
    }

    fn lock(&self) -> MutexGuard<'_, TopicLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One peer's endpoint on a `MemoryHub`.
#[derive(Debug)]
pub struct MemoryChannel {
    local_id: PeerId,
    hub: MemoryHub,
    connected: AtomicBool,
}

impl MemoryChannel {
    /// Returns true once `connect()` has succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncChannel for MemoryChannel {
    async fn connect(&self) -> Result<(), EnvError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), EnvError> {
        if !self.is_connected() {
            return Err(EnvError::Closed);
        }
        self.hub.lock().append(envelope);
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<UnboundedReceiver<Envelope>, EnvError> {
        if !self.is_connected() {
            return Err(EnvError::Closed);
        }
        Ok(self.hub.lock().subscribe(topic))
    }

    fn local_id(&self) -> PeerId {
        self.local_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_connect() {
        let hub = MemoryHub::new();
        let chan = hub.channel(PeerId::from_seed(1));
        let envelope = Envelope::event(chan.local_id(), vec![], 0);

        assert!(matches!(chan.publish(envelope.clone()).await, Err(EnvError::Closed)));

        chan.connect().await.unwrap();
        chan.publish(envelope).await.unwrap();
        assert_eq!(hub.event_count(), 1);
    }

    #[tokio::test]
    async fn test_publication_echoes_to_publisher_and_peers() {
        let hub = MemoryHub::new();
        let a = hub.channel(PeerId::from_seed(1));
        let b = hub.channel(PeerId::from_seed(2));
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut a_rx = a.subscribe(Topic::Objects).await.unwrap();
        let mut b_rx = b.subscribe(Topic::Objects).await.unwrap();

        a.publish(Envelope::object("obj_1", a.local_id(), vec![1], 0)).await.unwrap();

        assert_eq!(a_rx.recv().await.unwrap().key.as_deref(), Some("obj_1"));
        assert_eq!(b_rx.recv().await.unwrap().origin, PeerId::from_seed(1));
    }

    #[tokio::test]
    async fn test_late_joiner_catches_up_on_objects() {
        let hub = MemoryHub::new();
        let a = hub.channel(PeerId::from_seed(1));
        a.connect().await.unwrap();
        a.publish(Envelope::object("obj_1", a.local_id(), vec![], 0)).await.unwrap();
        a.publish(Envelope::object("obj_1", a.local_id(), vec![], 0)).await.unwrap();

        let late = hub.channel(PeerId::from_seed(3));
        late.connect().await.unwrap();
        let mut rx = late.subscribe(Topic::Objects).await.unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.object_count(), 1);
    }
}
