//! Per-replica topic log with subscriber fan-out.

use std::collections::HashSet;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::types::{Envelope, Topic};

/// The local replica of both topics plus the live subscribers.
///
/// Objects are keyed; a key is accepted once and every later envelope with
/// the same key is discarded, which turns the keyed map into a set union.
/// Events are appended unconditionally.
#[derive(Debug, Default)]
pub struct TopicLog {
    objects: Vec<Envelope>,
    object_keys: HashSet<String>,
    events: Vec<Envelope>,
    object_subscribers: Vec<UnboundedSender<Envelope>>,
    event_subscribers: Vec<UnboundedSender<Envelope>>,
}

impl TopicLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an envelope and fans it out to subscribers of its topic.
    ///
    /// Returns `false` when the envelope was discarded (a known object key,
    /// or an objects envelope without a key).
    pub fn append(&mut self, envelope: Envelope) -> bool {
        match envelope.topic {
            Topic::Objects => {
                let Some(key) = envelope.key.as_ref() else {
                    return false;
                };
                if !self.object_keys.insert(key.clone()) {
                    return false;
                }
                Self::fan_out(&mut self.object_subscribers, &envelope);
                self.objects.push(envelope);
                true
            }
            Topic::Events => {
                Self::fan_out(&mut self.event_subscribers, &envelope);
                self.events.push(envelope);
                true
            }
        }
    }

    /// Registers a subscriber.
    ///
    /// Objects subscribers are first handed the full backlog.
    pub fn subscribe(&mut self, topic: Topic) -> UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        match topic {
            Topic::Objects => {
                for envelope in &self.objects {
                    let _ = tx.send(envelope.clone());
                }
                self.object_subscribers.push(tx);
            }
            Topic::Events => self.event_subscribers.push(tx),
        }
        rx
    }

    /// Drops every subscriber (receivers observe channel closure).
    pub fn close_subscribers(&mut self) {
        self.object_subscribers.clear();
        self.event_subscribers.clear();
    }

    /// Returns true if an object with this key has been observed.
    pub fn contains_key(&self, key: &str) -> bool {
        self.object_keys.contains(key)
    }

    /// All object envelopes, in first-observed order.
    pub fn objects(&self) -> &[Envelope] {
        &self.objects
    }

    /// All event envelopes, in receipt order.
    pub fn events(&self) -> &[Envelope] {
        &self.events
    }

    /// Number of live subscribers across both topics.
    pub fn subscriber_count(&self) -> usize {
        self.object_subscribers.len() + self.event_subscribers.len()
    }

    fn fan_out(subscribers: &mut Vec<UnboundedSender<Envelope>>, envelope: &Envelope) {
        // Closed receivers are pruned on the way.
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
    }
}
