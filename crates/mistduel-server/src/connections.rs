use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use mistduel_core::player::UserId;

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Utf8Bytes),
    Close { code: u16, reason: String },
}

/// Per-connection sender. Bounded so a slow client cannot exhaust memory.
pub type OutboundSender = mpsc::Sender<Outbound>;

pub type ConnectionId = Uuid;

struct PlayerConnection {
    id: ConnectionId,
    sender: OutboundSender,
}

/// Live channels keyed by (lobby, user). At most one per pair.
#[derive(Default)]
pub struct ConnectionRegistry {
    lobbies: RwLock<HashMap<String, HashMap<UserId, PlayerConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `sender` to (`code`, `user_id`). Returns the new connection id and
    /// the sender it replaced, if any. The caller closes the old one.
    pub async fn register(
        &self,
        code: &str,
        user_id: UserId,
        sender: OutboundSender,
    ) -> (ConnectionId, Option<OutboundSender>) {
        let id = Uuid::new_v4();
        let mut lobbies = self.lobbies.write().await;
        let previous = lobbies
            .entry(code.to_string())
            .or_default()
            .insert(user_id, PlayerConnection { id, sender });
        (id, previous.map(|p| p.sender))
    }

    /// Remove the binding only if it still belongs to connection `id`.
    /// Returns false when a newer connection has taken over.
    pub async fn unregister(&self, code: &str, user_id: UserId, id: ConnectionId) -> bool {
        let mut lobbies = self.lobbies.write().await;
        let Some(conns) = lobbies.get_mut(code) else {
            return false;
        };
        if conns.get(&user_id).is_none_or(|c| c.id != id) {
            return false;
        }
        conns.remove(&user_id);
        if conns.is_empty() {
            lobbies.remove(code);
        }
        true
    }

    pub async fn is_connected(&self, code: &str, user_id: UserId) -> bool {
        self.lobbies
            .read()
            .await
            .get(code)
            .is_some_and(|c| c.contains_key(&user_id))
    }

    /// Queue `frame` for one user. Returns false if not connected or the
    /// queue is full.
    pub async fn send_to(&self, code: &str, user_id: UserId, frame: Outbound) -> bool {
        let lobbies = self.lobbies.read().await;
        let Some(conn) = lobbies.get(code).and_then(|c| c.get(&user_id)) else {
            return false;
        };
        match conn.sender.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(lobby = code, user_id, error = %e, "Failed to queue frame");
                false
            },
        }
    }

    /// Queue `text` for every connection in the lobby except `except`.
    pub async fn broadcast(&self, code: &str, text: &Utf8Bytes, except: Option<UserId>) {
        let lobbies = self.lobbies.read().await;
        let Some(conns) = lobbies.get(code) else {
            return;
        };
        for (&user_id, conn) in conns {
            if Some(user_id) == except {
                continue;
            }
            if let Err(e) = conn.sender.try_send(Outbound::Text(text.clone())) {
                tracing::debug!(lobby = code, user_id, error = %e, "Failed to queue broadcast");
            }
        }
    }

    /// Close and drop every connection of a lobby.
    pub async fn close_lobby(&self, code: &str, close_code: u16, reason: &str) -> usize {
        let Some(conns) = self.lobbies.write().await.remove(code) else {
            return 0;
        };
        for (user_id, conn) in &conns {
            let frame = Outbound::Close {
                code: close_code,
                reason: reason.to_string(),
            };
            if let Err(e) = conn.sender.try_send(frame) {
                tracing::debug!(lobby = code, user_id, error = %e, "Failed to queue close");
            }
        }
        conns.len()
    }

    /// Total live player connections.
    pub async fn count(&self) -> usize {
        self.lobbies.read().await.values().map(HashMap::len).sum()
    }
}
