use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use mistduel_core::net::messages::{ClientMessage, ServerMessage};
use mistduel_core::net::protocol::{decode_server_message, encode_client_message};
use mistduel_core::player::UserId;

use mistduel_server::config::{GameConfig, ServerConfig};
use mistduel_server::state::AppState;
use mistduel_server::build_app;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

/// Rules tuned so a whole game fits in a test: a short round timer and
/// near-instant transitions.
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        game: GameConfig {
            round_timer_secs: 2,
            all_guessed_grace_ms: 100,
            between_rounds_ms: 300,
            ..GameConfig::default()
        },
        ..ServerConfig::default()
    }
}

impl TestServer {
    /// Start a server in development auth mode (bare user ids as tokens).
    pub async fn new() -> Self {
        Self::from_config(fast_config()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, code: &str, token: &str) -> String {
        format!("ws://{}/ws/{code}?token={token}", self.addr)
    }

    pub fn spectate_url(&self, code: &str, token: &str) -> String {
        format!("ws://{}/ws/{code}/spectate?token={token}", self.addr)
    }

    /// Create a lobby over HTTP as `host` and return its invite code.
    pub async fn create_lobby(&self, host: UserId, body: Option<serde_json::Value>) -> String {
        let client = reqwest::Client::new();
        let mut req = client
            .post(format!("{}/api/v1/lobbies", self.base_url()))
            .bearer_auth(host.to_string());
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        assert_eq!(resp.status(), 201);
        let json: serde_json::Value = resp.json().await.unwrap();
        json["invite_code"].as_str().unwrap().to_string()
    }

    /// Join over HTTP and return the status code.
    pub async fn join_lobby(&self, code: &str, user: UserId) -> u16 {
        reqwest::Client::new()
            .put(format!("{}/api/v1/lobbies/{code}/members", self.base_url()))
            .bearer_auth(user.to_string())
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    }

    /// Open a player channel using the bare user id as token.
    pub async fn connect(&self, code: &str, user: UserId) -> WsStream {
        ws_connect(&self.ws_url(code, &user.to_string())).await
    }
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

/// Read the next server event (5s timeout). Panics on close.
pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return decode_server_message(&text).unwrap(),
                Some(Ok(Message::Close(frame))) => panic!("WebSocket closed: {frame:?}"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Skip events until one matches `pred`.
pub async fn ws_read_until(
    stream: &mut WsStream,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = ws_read_server_msg(stream).await;
        if pred(&msg) {
            return msg;
        }
    }
}

/// Wait for the close frame and return its code and reason, skipping any
/// events before it.
pub async fn ws_read_close(stream: &mut WsStream) -> (u16, String) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    return (u16::from(frame.code), frame.reason.to_string());
                },
                Some(Ok(Message::Close(None))) => panic!("Close frame without a code"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended without a close frame"),
            }
        }
    })
    .await
    .expect("Timed out waiting for close frame")
}

/// True if nothing but pings arrives within `ms`.
pub async fn ws_silent_for(stream: &mut WsStream, ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(_))) | Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    return;
                },
                _ => continue,
            }
        }
    })
    .await
    .is_err()
}

/// Host and guest both connected to a fresh two-player lobby, with the
/// join chatter drained.
pub async fn two_player_lobby(server: &TestServer) -> (String, WsStream, WsStream) {
    let code = server.create_lobby(1, None).await;
    assert_eq!(server.join_lobby(&code, 2).await, 201);

    let mut host = server.connect(&code, 1).await;
    ws_read_until(&mut host, |m| matches!(m, ServerMessage::PlayerJoined { .. })).await;
    let mut guest = server.connect(&code, 2).await;
    ws_read_until(&mut guest, |m| matches!(m, ServerMessage::PlayerJoined { .. })).await;
    ws_read_until(&mut host, |m| matches!(m, ServerMessage::PlayerJoined { .. })).await;
    (code, host, guest)
}

/// Start the game from the host and return the first round's target as
/// seen by both players.
pub async fn start_game(host: &mut WsStream, guest: &mut WsStream) -> (f64, f64) {
    ws_send(host, &ClientMessage::GameStart).await;
    let mut target = (0.0, 0.0);
    for stream in [host, guest] {
        ws_read_until(stream, |m| matches!(m, ServerMessage::GameStarted { .. })).await;
        match ws_read_until(stream, |m| matches!(m, ServerMessage::RoundStarted { .. })).await {
            ServerMessage::RoundStarted { lat, lon, .. } => target = (lat, lon),
            other => panic!("Expected RoundStarted, got {other:?}"),
        }
    }
    target
}
