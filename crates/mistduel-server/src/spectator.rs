//! Best-effort fan-out to spectators. Ticks that a slow spectator misses are
//! dropped; none of this feeds back into round state.

use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, broadcast};

#[derive(Default)]
pub struct SpectatorRelay {
    channels: RwLock<HashMap<String, broadcast::Sender<Utf8Bytes>>>,
}

impl SpectatorRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a lobby's spectator stream, creating it on first use.
    pub async fn subscribe(&self, code: &str, capacity: usize) -> broadcast::Receiver<Utf8Bytes> {
        let mut channels = self.channels.write().await;
        channels
            .entry(code.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// Publish a frame. A lobby nobody watches has no channel and the frame
    /// is discarded.
    pub async fn publish(&self, code: &str, frame: Utf8Bytes) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(code) {
            // Err only means every spectator has gone.
            let _ = tx.send(frame);
        }
    }

    /// Drop a lobby's stream. Subscribers see the channel close.
    pub async fn close(&self, code: &str) {
        self.channels.write().await.remove(code);
    }

    pub async fn spectator_count(&self, code: &str) -> usize {
        self.channels
            .read()
            .await
            .get(code)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub async fn total_spectators(&self) -> usize {
        self.channels
            .read()
            .await
            .values()
            .map(broadcast::Sender::receiver_count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn frame(s: &str) -> Utf8Bytes {
        Utf8Bytes::from(s.to_string())
    }

    #[tokio::test]
    async fn subscribers_receive_published_frames() {
        let relay = SpectatorRelay::new();
        let mut a = relay.subscribe("LOBBY001", 8).await;
        let mut b = relay.subscribe("LOBBY001", 8).await;
        assert_eq!(relay.spectator_count("LOBBY001").await, 2);

        relay.publish("LOBBY001", frame("tick")).await;
        assert_eq!(a.recv().await.unwrap().as_str(), "tick");
        assert_eq!(b.recv().await.unwrap().as_str(), "tick");
    }

    #[tokio::test]
    async fn publish_without_spectators_is_a_noop() {
        let relay = SpectatorRelay::new();
        relay.publish("LOBBY001", frame("tick")).await;
        assert_eq!(relay.total_spectators().await, 0);
    }

    #[tokio::test]
    async fn slow_spectator_lags_instead_of_blocking() {
        let relay = SpectatorRelay::new();
        let mut rx = relay.subscribe("LOBBY001", 2).await;
        for i in 0..5 {
            relay.publish("LOBBY001", frame(&format!("t{i}"))).await;
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().as_str(), "t3");
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let relay = SpectatorRelay::new();
        let mut rx = relay.subscribe("LOBBY001", 4).await;
        relay.close("LOBBY001").await;
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }
}
