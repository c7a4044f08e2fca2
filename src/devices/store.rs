// store.rs
use axum::extract::ws::Utf8Bytes;
use metrics::counter;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    events::ClientHub,
    metrics::BROADCASTS_TOTAL,
    models::{DeviceState, WsMessage},
};

/// Single owner of [`DeviceState`].
///
/// Every mutation is followed by a broadcast while the state lock is still
/// held, and new subscribers take their snapshot under the same lock, so an
/// observer never sees updates out of order or a snapshot older than a frame
/// it already received.
pub struct DeviceStore {
    state: Mutex<DeviceState>,
    hub: ClientHub,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::with_hub(ClientHub::new())
    }

    pub fn with_hub(hub: ClientHub) -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
            hub,
        }
    }

    pub async fn snapshot(&self) -> DeviceState {
        self.state.lock().await.clone()
    }

    /// Applies `mutate` and broadcasts the resulting state once.
    pub async fn update<F>(&self, mutate: F) -> DeviceState
    where
        F: FnOnce(&mut DeviceState),
    {
        let mut state = self.state.lock().await;
        mutate(&mut state);
        let snapshot = state.clone();

        match WsMessage::Status(snapshot.clone()).encode() {
            Ok(frame) => {
                let delivered = self.hub.publish(&frame);
                counter!(BROADCASTS_TOTAL).increment(1);
                debug!(delivered, ?snapshot, "State broadcast");
            }
            Err(e) => error!("Failed to encode state: {}", e),
        }

        snapshot
    }

    pub async fn set_connected(&self, connected: bool) {
        info!(connected, "Serial connection state changed");
        self.update(|state| state.connected = connected).await;
    }

    /// Registers a push subscriber whose first frame is the current state.
    pub async fn subscribe(&self) -> anyhow::Result<(Uuid, mpsc::Receiver<Utf8Bytes>)> {
        let state = self.state.lock().await;
        let snapshot = WsMessage::Status(state.clone()).encode()?;
        Ok(self.hub.subscribe(snapshot))
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn subscribers(&self) -> usize {
        self.hub.len()
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Switch;

    fn decode(frame: Utf8Bytes) -> DeviceState {
        match serde_json::from_str::<WsMessage>(frame.as_str()).unwrap() {
            WsMessage::Status(state) => state,
        }
    }

    #[tokio::test]
    async fn starts_disconnected_and_off() {
        let store = DeviceStore::new();
        assert_eq!(store.snapshot().await, DeviceState::default());
    }

    #[tokio::test]
    async fn subscriber_gets_snapshot_then_updates() {
        let store = DeviceStore::new();
        store.set_connected(true).await;

        let (_, mut rx) = store.subscribe().await.unwrap();
        let snapshot = decode(rx.recv().await.unwrap());
        assert!(snapshot.connected);
        assert_eq!(snapshot.motor, Switch::Off);

        store.update(|s| s.motor = Switch::On).await;
        let update = decode(rx.recv().await.unwrap());
        assert_eq!(update.motor, Switch::On);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn each_update_broadcasts_exactly_once() {
        let store = DeviceStore::new();
        let (_, mut a) = store.subscribe().await.unwrap();
        let (_, mut b) = store.subscribe().await.unwrap();
        a.recv().await.unwrap();
        b.recv().await.unwrap();

        store.update(|s| s.led = Switch::On).await;

        for rx in [&mut a, &mut b] {
            assert_eq!(decode(rx.recv().await.unwrap()).led, Switch::On);
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let store = DeviceStore::new();
        let (id, _rx) = store.subscribe().await.unwrap();
        assert_eq!(store.subscribers(), 1);
        assert!(store.unsubscribe(&id));
        assert_eq!(store.subscribers(), 0);
    }
}
