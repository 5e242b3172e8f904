use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use mistduel_core::lobby::is_valid_invite_code;
use mistduel_core::net::messages::ServerMessage;
use mistduel_core::net::protocol::{
    CLOSE_LOBBY_CLOSED, CLOSE_POLICY_VIOLATION, MAX_MESSAGE_SIZE, decode_client_message,
};
use mistduel_core::player::UserId;

use crate::broadcaster::encode;
use crate::connections::Outbound;
use crate::engine;
use crate::error::LobbyError;
use crate::rate_limit::TokenBucket;
use crate::state::{AppState, ConnectionGuard};

type WsSink = SplitSink<WebSocket, Message>;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws/{code}?token=...
pub async fn player_ws(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(guard) = acquire_slot(&state) else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_player(socket, state, code, params.token, guard))
}

/// GET /ws/{code}/spectate?token=...
pub async fn spectator_ws(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(guard) = acquire_slot(&state) else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_spectator(socket, state, code, params.token, guard))
}

fn acquire_slot(state: &AppState) -> Option<ConnectionGuard> {
    let max = state.config.limits.max_ws_connections;
    let guard = ConnectionGuard::try_acquire(&state.ws_connection_count, max);
    if guard.is_none() {
        tracing::warn!(max, "WS connection limit reached");
    }
    guard
}

/// Token check and lobby code shape check shared by both endpoints. The
/// reason string is sent in the close frame.
fn authenticate(
    state: &AppState,
    code: &str,
    token: Option<&str>,
) -> Result<UserId, &'static str> {
    let user_id = token
        .and_then(|t| state.auth.verify(t))
        .ok_or("invalid token")?;
    if !is_valid_invite_code(code) {
        return Err("lobby not found");
    }
    Ok(user_id)
}

/// Close with the non-retryable policy code.
async fn reject(mut sink: WsSink, reason: &str) {
    let frame = CloseFrame {
        code: CLOSE_POLICY_VIOLATION,
        reason: Utf8Bytes::from(reason.to_string()),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

fn lobby_error_reason(e: &LobbyError) -> String {
    e.to_string()
}

async fn handle_player(
    socket: WebSocket,
    state: AppState,
    code: String,
    token: Option<String>,
    _guard: ConnectionGuard,
) {
    let (sink, mut stream) = socket.split();
    let user_id = match authenticate(&state, &code, token.as_deref()) {
        Ok(id) => id,
        Err(reason) => {
            tracing::warn!(lobby = %code, reason, "Rejected player connection");
            reject(sink, reason).await;
            return;
        },
    };

    let (tx, rx) = mpsc::channel(state.config.limits.player_message_buffer);
    let conn_id = match engine::connect(&state, &code, user_id, tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(lobby = %code, user_id, error = %e, "Rejected player connection");
            reject(sink, &lobby_error_reason(&e)).await;
            return;
        },
    };

    spawn_writer(sink, rx);
    read_loop(&mut stream, &state, &code, user_id).await;
    engine::disconnect(&state, &code, user_id, conn_id).await;
}

/// Drain the connection's queue into the socket. Stops after a close frame
/// or once every sender is gone.
fn spawn_writer(mut sink: WsSink, mut rx: mpsc::Receiver<Outbound>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (msg, last) = match frame {
                Outbound::Text(text) => (Message::Text(text), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: Utf8Bytes::from(reason),
                    })),
                    true,
                ),
            };
            if sink.send(msg).await.is_err() || last {
                break;
            }
        }
    });
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    state: &AppState,
    code: &str,
    user_id: UserId,
) {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut limiter = TokenBucket::new(rate, rate);

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        if !limiter.try_take() {
            tracing::warn!(lobby = code, user_id, "Rate limited");
            continue;
        }

        match decode_client_message(text.as_str()) {
            Ok(msg) => engine::handle_message(state, code, user_id, msg).await,
            Err(e) => {
                tracing::debug!(lobby = code, user_id, error = %e, "Undecodable client frame");
                state
                    .broadcaster
                    .to_user(code, user_id, &ServerMessage::error(e.to_string()))
                    .await;
            },
        }
    }
}

async fn handle_spectator(
    socket: WebSocket,
    state: AppState,
    code: String,
    token: Option<String>,
    _guard: ConnectionGuard,
) {
    let (mut sink, mut stream) = socket.split();
    if let Err(reason) = authenticate(&state, &code, token.as_deref()) {
        tracing::warn!(lobby = %code, reason, "Rejected spectator");
        reject(sink, reason).await;
        return;
    }

    let (snapshot, rx) = match engine::watch(&state, &code).await {
        Ok(watching) => watching,
        Err(e) => {
            reject(sink, &lobby_error_reason(&e)).await;
            return;
        },
    };
    let Some(first) = encode(&ServerMessage::ReconnectSuccess(Box::new(snapshot))) else {
        return;
    };
    if sink.send(Message::Text(first)).await.is_err() {
        return;
    }
    tracing::debug!(lobby = %code, "Spectator attached");

    let mut frames = BroadcastStream::new(rx);
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                },
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    tracing::debug!(lobby = %code, skipped = n, "Spectator lagged");
                },
                None => {
                    let frame = CloseFrame {
                        code: CLOSE_LOBBY_CLOSED,
                        reason: Utf8Bytes::from_static("lobby closed"),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "Failed to close spectator");
                    }
                    break;
                },
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                // Spectators are read-only.
                Some(Ok(_)) => {},
            },
        }
    }
}
