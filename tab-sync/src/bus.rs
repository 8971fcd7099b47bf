// tab-sync/src/bus.rs
use common::SyncMessage;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("nobody is listening on {0}")]
    NoListeners(String),
    #[error("sync channel {0} is closed")]
    Closed(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Same-origin publish/subscribe transport shared by every tab in the process.
///
/// Every subscriber receives every message on its topic, including the
/// publisher's own; tabs filter self-messages on receipt.
#[derive(Debug)]
pub struct LocalBus {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<SyncMessage>>,
    closed: AtomicBool,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<SyncMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<SyncMessage> {
        self.sender_for(topic).subscribe()
    }

    /// Deliver `message` to every receiver on `topic`, returning how many got it
    pub fn publish(&self, topic: &str, message: SyncMessage) -> BusResult<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed(topic.to_string()));
        }
        self.sender_for(topic)
            .send(message)
            .map_err(|_| BusError::NoListeners(topic.to_string()))
    }

    /// Drop every topic; receivers observe end of stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
