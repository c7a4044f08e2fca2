// events/mod.rs
use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames a subscriber may have queued before it is considered slow.
pub const CLIENT_QUEUE_DEPTH: usize = 32;

/// Fan-out of encoded status frames to every connected websocket client.
///
/// Delivery is best-effort: a subscriber whose queue is full misses the
/// frame, and one whose receiver is gone is dropped from the hub.
pub struct ClientHub {
    subscribers: DashMap<Uuid, mpsc::Sender<Utf8Bytes>>,
    depth: usize,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::with_depth(CLIENT_QUEUE_DEPTH)
    }

    pub fn with_depth(depth: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            depth: depth.max(1),
        }
    }

    /// Registers a subscriber. `first` is queued before the subscriber becomes
    /// visible to [`ClientHub::publish`].
    pub fn subscribe(&self, first: Utf8Bytes) -> (Uuid, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(self.depth);
        // Fresh channel with depth >= 1, so this cannot fail.
        let _ = tx.try_send(first);

        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        debug!(%id, subscribers = self.subscribers.len(), "Subscriber registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Sends `frame` to every subscriber without waiting on any of them.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, frame: &Utf8Bytes) -> usize {
        let mut delivered = 0;
        self.subscribers
            .retain(|id, tx| match tx.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(%id, "Subscriber lagging, frame skipped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%id, "Subscriber gone, removing");
                    false
                }
            });
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}
