use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;

use mistduel_core::net::messages::ServerMessage;
use mistduel_core::net::protocol::encode_server_message;
use mistduel_core::player::UserId;

use crate::connections::{ConnectionRegistry, Outbound};
use crate::spectator::SpectatorRelay;

/// Serializes events once and pushes them to members and spectators.
/// Fire-and-forget: nothing is acknowledged or replayed.
#[derive(Clone)]
pub struct Broadcaster {
    connections: Arc<ConnectionRegistry>,
    spectators: Arc<SpectatorRelay>,
}

pub fn encode(msg: &ServerMessage) -> Option<Utf8Bytes> {
    match encode_server_message(msg) {
        Ok(text) => Some(Utf8Bytes::from(text)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server message");
            None
        },
    }
}

impl Broadcaster {
    pub fn new(connections: Arc<ConnectionRegistry>, spectators: Arc<SpectatorRelay>) -> Self {
        Self {
            connections,
            spectators,
        }
    }

    /// Send to every connected member; milestones also go to spectators.
    pub async fn to_lobby(&self, code: &str, msg: &ServerMessage) {
        self.to_lobby_except(code, None, msg).await;
    }

    pub async fn to_lobby_except(&self, code: &str, except: Option<UserId>, msg: &ServerMessage) {
        let Some(text) = encode(msg) else {
            return;
        };
        self.connections.broadcast(code, &text, except).await;
        if msg.is_spectator_milestone() {
            self.spectators.publish(code, text).await;
        }
    }

    pub async fn to_lobby_all(&self, code: &str, msgs: &[ServerMessage]) {
        for msg in msgs {
            self.to_lobby(code, msg).await;
        }
    }

    /// Send to one member only.
    pub async fn to_user(&self, code: &str, user_id: UserId, msg: &ServerMessage) -> bool {
        let Some(text) = encode(msg) else {
            return false;
        };
        self.connections
            .send_to(code, user_id, Outbound::Text(text))
            .await
    }

    /// Spectator-only tick.
    pub async fn to_spectators(&self, code: &str, msg: &ServerMessage) {
        if let Some(text) = encode(msg) {
            self.spectators.publish(code, text).await;
        }
    }
}
