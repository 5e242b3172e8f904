use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::messages::{ClientMessage, ServerMessage};

/// Maximum size of a single JSON frame in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024; // 16 KiB

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Bad token, unknown lobby, full or finished lobby. Clients must not retry.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// The same user opened a newer connection to this lobby.
pub const CLOSE_REPLACED: u16 = 4000;
/// The lobby was deleted or evicted. Its code is gone for good.
pub const CLOSE_LOBBY_CLOSED: u16 = 4001;

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
    /// Well-formed JSON whose `type` tag names no known message.
    UnknownType(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
            Self::UnknownType(kind) => write!(f, "unknown message type: {kind}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    Ok(text)
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(|e| classify_decode_error(text, &e))
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: String,
}

/// Tell an unrecognised `type` tag apart from other malformed payloads.
fn classify_decode_error(text: &str, err: &serde_json::Error) -> ProtocolError {
    let detail = err.to_string();
    if err.is_data()
        && let Ok(TypeTag { kind }) = serde_json::from_str::<TypeTag>(text)
        && detail.starts_with(&format!("unknown variant `{kind}`"))
    {
        return ProtocolError::UnknownType(kind);
    }
    ProtocolError::DeserializeError(detail)
}

pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    encode(msg)
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    encode(msg)
}

/// Decode one text frame into a `ClientMessage`.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    decode(text)
}

/// Decode one text frame into a `ServerMessage`.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    decode(text)
}

/// Whether a client should try to reconnect after the server closed with `code`.
pub fn is_retryable_close(code: u16) -> bool {
    !matches!(
        code,
        CLOSE_NORMAL | CLOSE_POLICY_VIOLATION | CLOSE_REPLACED | CLOSE_LOBBY_CLOSED
    )
}

/// Bounded, fixed-delay reconnect schedule for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(3000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based) after a close with
    /// `code`, or `None` when the client should give up.
    pub fn next_delay(&self, code: u16, attempt: u32) -> Option<Duration> {
        (is_retryable_close(code) && attempt >= 1 && attempt <= self.max_attempts)
            .then_some(self.delay)
    }
}
