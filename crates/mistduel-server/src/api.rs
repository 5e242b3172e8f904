use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use mistduel_core::lobby::{LobbySettings, is_valid_invite_code};
use mistduel_core::net::messages::LobbySnapshot;

use crate::auth::AuthUser;
use crate::engine;
use crate::error::{AppError, LobbyError};
use crate::lobby::JoinOutcome;
use crate::state::AppState;

const PLAYERS_RANGE: std::ops::RangeInclusive<u8> = 2..=8;
const TIMER_RANGE: std::ops::RangeInclusive<u32> = 10..=3600;
const ROUNDS_RANGE: std::ops::RangeInclusive<u32> = 1..=50;

/// Optional overrides for a new lobby. Missing fields take the server
/// defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateLobbyBody {
    pub max_players: Option<u8>,
    pub total_rounds: Option<u32>,
    pub round_timer_secs: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateLobbyResponse {
    pub invite_code: String,
}

/// Remote address of the caller. Falls back to localhost when the router is
/// served without connect info (in-process tests).
pub struct ClientIp(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        Ok(Self(ip))
    }
}

/// Apply the caller's overrides on top of the server defaults. Only values
/// supplied by the caller are range-checked.
fn settings_from(body: CreateLobbyBody, defaults: LobbySettings) -> Result<LobbySettings, AppError> {
    if let Some(players) = body.max_players
        && !PLAYERS_RANGE.contains(&players)
    {
        return Err(AppError::BadRequest(format!(
            "max_players must be between {} and {}",
            PLAYERS_RANGE.start(),
            PLAYERS_RANGE.end()
        )));
    }
    if let Some(secs) = body.round_timer_secs
        && !TIMER_RANGE.contains(&secs)
    {
        return Err(AppError::BadRequest(format!(
            "round_timer_secs must be between {} and {}",
            TIMER_RANGE.start(),
            TIMER_RANGE.end()
        )));
    }
    if let Some(rounds) = body.total_rounds
        && !ROUNDS_RANGE.contains(&rounds)
    {
        return Err(AppError::BadRequest(format!(
            "total_rounds must be between {} and {}",
            ROUNDS_RANGE.start(),
            ROUNDS_RANGE.end()
        )));
    }
    Ok(LobbySettings {
        max_players: body.max_players.unwrap_or(defaults.max_players),
        total_rounds: body.total_rounds.or(defaults.total_rounds),
        round_timer_secs: body.round_timer_secs.unwrap_or(defaults.round_timer_secs),
    })
}

async fn check_rate(state: &AppState, ip: IpAddr) -> Result<(), AppError> {
    if state.api_limiter.check(ip).await {
        Ok(())
    } else {
        tracing::warn!(%ip, "API rate limit exceeded");
        Err(AppError::TooManyRequests("rate limit exceeded".to_string()))
    }
}

/// Reject malformed codes before touching the store.
fn checked_code(code: &str) -> Result<&str, AppError> {
    if is_valid_invite_code(code) {
        Ok(code)
    } else {
        Err(LobbyError::NotFound.into())
    }
}

/// POST /api/v1/lobbies
pub async fn create_lobby(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateLobbyResponse>), AppError> {
    check_rate(&state, ip).await?;

    let body: CreateLobbyBody = if body.iter().all(u8::is_ascii_whitespace) {
        CreateLobbyBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid body: {e}")))?
    };
    let settings = settings_from(body, state.config.game.default_settings())?;

    let invite_code = engine::create_lobby(&state, user_id, settings).await;
    Ok((StatusCode::CREATED, Json(CreateLobbyResponse { invite_code })))
}

/// PUT /api/v1/lobbies/{code}/members
///
/// 201 on a fresh join, 200 when the caller was already a member.
pub async fn join_lobby(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ClientIp(ip): ClientIp,
    Path(code): Path<String>,
) -> Result<(StatusCode, Json<LobbySnapshot>), AppError> {
    check_rate(&state, ip).await?;
    let code = checked_code(&code)?;
    let (outcome, snapshot) = engine::join_lobby(&state, code, user_id).await?;
    let status = match outcome {
        JoinOutcome::Joined => StatusCode::CREATED,
        JoinOutcome::AlreadyMember => StatusCode::OK,
    };
    Ok((status, Json(snapshot)))
}

/// DELETE /api/v1/lobbies/{code}/members
pub async fn leave_lobby(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(code): Path<String>,
) -> Result<StatusCode, AppError> {
    let code = checked_code(&code)?;
    engine::leave_lobby(&state, code, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/lobbies/{code}
pub async fn get_lobby(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(code): Path<String>,
) -> Result<Json<LobbySnapshot>, AppError> {
    let code = checked_code(&code)?;
    let snapshot = engine::lobby_snapshot(&state, code, Some(user_id)).await?;
    Ok(Json(snapshot))
}
