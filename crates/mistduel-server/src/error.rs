use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::location::LocationError;

/// Failures of lobby membership operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    NotFound,
    Full,
    GameAlreadyEnded,
    GameInProgress,
    NotMember,
}

impl std::fmt::Display for LobbyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "lobby not found"),
            Self::Full => write!(f, "lobby is full"),
            Self::GameAlreadyEnded => write!(f, "game already ended"),
            Self::GameInProgress => write!(f, "game already in progress"),
            Self::NotMember => write!(f, "not a member of this lobby"),
        }
    }
}

impl std::error::Error for LobbyError {}

/// Rejections of in-game actions. These go back to the caller only.
#[derive(Debug)]
pub enum ActionError {
    NotHost,
    WrongPhase,
    NotEnoughPlayers,
    RoundAlreadyActive,
    NoActiveRound,
    AlreadyGuessed,
    InvalidCoordinates,
    RoundsExhausted,
    InvalidMessage(String),
    Lobby(LobbyError),
    Location(LocationError),
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotHost => write!(f, "only the host can do that"),
            Self::WrongPhase => write!(f, "not allowed in the current phase"),
            Self::NotEnoughPlayers => write!(f, "need at least two players"),
            Self::RoundAlreadyActive => write!(f, "a round is already active"),
            Self::NoActiveRound => write!(f, "no active round"),
            Self::AlreadyGuessed => write!(f, "already guessed this round"),
            Self::InvalidCoordinates => write!(f, "invalid coordinates"),
            Self::RoundsExhausted => write!(f, "all rounds have been played"),
            Self::InvalidMessage(m) => write!(f, "invalid message: {m}"),
            Self::Lobby(e) => write!(f, "{e}"),
            Self::Location(e) => write!(f, "could not start round: {e}"),
        }
    }
}

impl std::error::Error for ActionError {}

impl From<LobbyError> for ActionError {
    fn from(e: LobbyError) -> Self {
        Self::Lobby(e)
    }
}

impl From<LocationError> for ActionError {
    fn from(e: LocationError) -> Self {
        Self::Location(e)
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    TooManyRequests(String),
    #[allow(dead_code)]
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Gone(m)
            | Self::TooManyRequests(m)
            | Self::Internal(m) => write!(f, "{m}"),
        }
    }
}

impl From<LobbyError> for AppError {
    fn from(e: LobbyError) -> Self {
        let message = e.to_string();
        match e {
            LobbyError::NotFound | LobbyError::NotMember => Self::NotFound(message),
            LobbyError::Full | LobbyError::GameInProgress => Self::Conflict(message),
            LobbyError::GameAlreadyEnded => Self::Gone(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            Self::Gone(m) => (StatusCode::GONE, m.clone()),
            Self::TooManyRequests(m) => (StatusCode::TOO_MANY_REQUESTS, m.clone()),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
