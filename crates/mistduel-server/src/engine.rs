//! Lobby orchestration.
//!
//! Every operation locks one lobby, applies a transition from
//! [`crate::lobby`] or [`crate::round`], and queues the resulting events
//! before the lock is released, so each member sees events in the order they
//! were applied. Timers re-lock the lobby when they fire and re-check that the
//! round or disconnect they were armed for is still current.

use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use futures::future::BoxFuture;
use tokio::sync::{OwnedMutexGuard, broadcast};
use tokio_util::sync::CancellationToken;

use mistduel_core::geo::Coordinates;
use mistduel_core::lobby::{LobbyPhase, LobbySettings};
use mistduel_core::net::messages::{ClientMessage, LobbySnapshot, RankUp, ServerMessage};
use mistduel_core::net::protocol::{CLOSE_LOBBY_CLOSED, CLOSE_NORMAL, CLOSE_REPLACED};
use mistduel_core::player::UserId;
use mistduel_core::time::now_millis;

use crate::connections::{ConnectionId, Outbound, OutboundSender};
use crate::error::{ActionError, LobbyError};
use crate::location::LocationError;
use crate::lobby::{GameRules, JoinOutcome, Lobby, Presence};
use crate::lobby_store::LobbyEntry;
use crate::round::RoundOutcome;
use crate::state::AppState;

/// Look up and lock a lobby. A lobby retired while this caller waited for
/// the lock reads as not found.
async fn lock_lobby(state: &AppState, code: &str) -> Result<OwnedMutexGuard<LobbyEntry>, LobbyError> {
    let shared = state.lobbies.get(code).await.ok_or(LobbyError::NotFound)?;
    let entry = shared.lock_owned().await;
    if entry.removed {
        return Err(LobbyError::NotFound);
    }
    Ok(entry)
}

fn snapshot_message(lobby: &Lobby, viewer: UserId) -> ServerMessage {
    ServerMessage::ReconnectSuccess(Box::new(lobby.snapshot(Some(viewer), now_millis())))
}

// Membership

pub async fn create_lobby(state: &AppState, host: UserId, settings: LobbySettings) -> String {
    let info = state.profiles.profile(host).await;
    let rules = GameRules::from(&state.config.game);
    let code = state.lobbies.create(info, settings, rules).await;
    tracing::info!(lobby = %code, host, "Lobby created");
    code
}

/// Join over HTTP. The caller gets the snapshot; connected members get
/// `player_joined`.
pub async fn join_lobby(
    state: &AppState,
    code: &str,
    user_id: UserId,
) -> Result<(JoinOutcome, LobbySnapshot), LobbyError> {
    let info = state.profiles.profile(user_id).await;
    let mut entry = lock_lobby(state, code).await?;
    let outcome = entry.lobby.join(info)?;
    if outcome == JoinOutcome::Joined {
        entry.touch();
        tracing::info!(lobby = code, user_id, "Player joined lobby");
        state
            .broadcaster
            .to_lobby(code, &entry.lobby.player_joined_message())
            .await;
    }
    Ok((outcome, entry.lobby.snapshot(Some(user_id), now_millis())))
}

pub async fn lobby_snapshot(
    state: &AppState,
    code: &str,
    viewer: Option<UserId>,
) -> Result<LobbySnapshot, LobbyError> {
    let entry = lock_lobby(state, code).await?;
    Ok(entry.lobby.snapshot(viewer, now_millis()))
}

pub async fn leave_lobby(state: &AppState, code: &str, user_id: UserId) -> Result<(), LobbyError> {
    let mut entry = lock_lobby(state, code).await?;
    remove_member(state, code, &mut entry, user_id).await?;
    state
        .connections
        .send_to(
            code,
            user_id,
            Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "left lobby".to_string(),
            },
        )
        .await;
    Ok(())
}

async fn remove_member(
    state: &AppState,
    code: &str,
    entry: &mut LobbyEntry,
    user_id: UserId,
) -> Result<(), LobbyError> {
    let outcome = entry.lobby.leave(user_id)?;
    entry.touch();
    tracing::info!(
        lobby = code,
        user_id,
        host_changed = outcome.host_changed,
        "Player left lobby"
    );

    match entry.lobby.phase() {
        LobbyPhase::Waiting if outcome.now_empty => {
            entry.retire();
            state.lobbies.remove(code).await;
            close_channels(state, code, CLOSE_LOBBY_CLOSED, "lobby closed").await;
            tracing::info!(lobby = code, "Empty lobby removed");
        },
        LobbyPhase::InGame => {
            state
                .broadcaster
                .to_lobby(code, &entry.lobby.player_left_message())
                .await;
            if entry.lobby.active_count() < 2 {
                finish(state, code, entry).await;
            } else if entry.lobby.round_complete() {
                schedule_grace(state, code, entry);
            }
        },
        _ => {
            state
                .broadcaster
                .to_lobby(code, &entry.lobby.player_left_message())
                .await;
        },
    }
    Ok(())
}

async fn close_channels(state: &AppState, code: &str, close_code: u16, reason: &str) {
    let closed = state.connections.close_lobby(code, close_code, reason).await;
    state.spectators.close(code).await;
    tracing::debug!(lobby = code, closed, "Closed lobby channels");
}

// Channel lifecycle

/// Bind a player's channel to a lobby, joining first if the user is not a
/// member yet. Any previous channel of the same user is closed with
/// `CLOSE_REPLACED`.
pub async fn connect(
    state: &AppState,
    code: &str,
    user_id: UserId,
    sender: OutboundSender,
) -> Result<ConnectionId, LobbyError> {
    let mut entry = lock_lobby(state, code).await?;
    if !entry.lobby.is_member(user_id) {
        let info = state.profiles.profile(user_id).await;
        entry.lobby.join(info)?;
        tracing::info!(lobby = code, user_id, "Player joined on connect");
    }

    let (conn_id, replaced) = state.connections.register(code, user_id, sender).await;
    if let Some(old) = replaced {
        let frame = Outbound::Close {
            code: CLOSE_REPLACED,
            reason: "replaced".to_string(),
        };
        if let Err(e) = old.try_send(frame) {
            tracing::debug!(lobby = code, user_id, error = %e, "Failed to close replaced connection");
        }
    }

    let previous = entry
        .lobby
        .set_presence(user_id, Presence::Online)
        .map(|(p, _)| p);
    entry.touch();

    match previous {
        Some(Presence::Offline) => {
            tracing::info!(lobby = code, user_id, "Player reconnected");
            state
                .broadcaster
                .to_user(code, user_id, &snapshot_message(&entry.lobby, user_id))
                .await;
            state
                .broadcaster
                .to_lobby_except(
                    code,
                    Some(user_id),
                    &ServerMessage::PlayerReconnected { player: user_id },
                )
                .await;
        },
        Some(Presence::Online) => {
            tracing::debug!(lobby = code, user_id, "Connection taken over");
            state
                .broadcaster
                .to_user(code, user_id, &snapshot_message(&entry.lobby, user_id))
                .await;
        },
        _ => {
            tracing::info!(lobby = code, user_id, "Player connected");
            state
                .broadcaster
                .to_lobby(code, &entry.lobby.player_joined_message())
                .await;
            if entry.lobby.phase() != LobbyPhase::Waiting {
                state
                    .broadcaster
                    .to_user(code, user_id, &snapshot_message(&entry.lobby, user_id))
                    .await;
            }
        },
    }
    Ok(conn_id)
}

/// Channel `conn_id` closed. Ignored when a newer channel already took over.
pub async fn disconnect(state: &AppState, code: &str, user_id: UserId, conn_id: ConnectionId) {
    let Ok(mut entry) = lock_lobby(state, code).await else {
        state.connections.unregister(code, user_id, conn_id).await;
        return;
    };
    if !state.connections.unregister(code, user_id, conn_id).await {
        return;
    }
    let Some((_, epoch)) = entry.lobby.set_presence(user_id, Presence::Offline) else {
        return;
    };
    entry.touch();
    tracing::info!(lobby = code, user_id, "Player disconnected");
    state
        .broadcaster
        .to_lobby(code, &ServerMessage::PlayerDisconnected { player: user_id })
        .await;

    match entry.lobby.phase() {
        LobbyPhase::Waiting => schedule_seat_release(state, code, user_id, epoch),
        LobbyPhase::InGame if entry.lobby.round_complete() => {
            schedule_grace(state, code, &mut entry);
        },
        _ => {},
    }
}

/// Subscribe a spectator. The snapshot and the subscription are taken under
/// the lobby lock so no milestone falls between them.
pub async fn watch(
    state: &AppState,
    code: &str,
) -> Result<(LobbySnapshot, broadcast::Receiver<Utf8Bytes>), LobbyError> {
    let entry = lock_lobby(state, code).await?;
    let rx = state
        .spectators
        .subscribe(code, state.config.limits.spectator_buffer)
        .await;
    Ok((entry.lobby.snapshot(None, now_millis()), rx))
}

// Client actions

/// Apply one client message. Rejections go back to the sender only.
pub async fn handle_message(state: &AppState, code: &str, user_id: UserId, msg: ClientMessage) {
    let result = match msg {
        ClientMessage::GameStart => start_game(state, code, user_id).await,
        ClientMessage::RoundStart => start_round(state, code, user_id).await,
        ClientMessage::SubmitGuess { lat, lon } => {
            submit_guess(state, code, user_id, Coordinates::new(lat, lon)).await
        },
        ClientMessage::RoundEnd => end_round(state, code, user_id).await,
        ClientMessage::GameEnd => end_game(state, code, user_id).await,
        ClientMessage::Broadcast { message } => chat(state, code, user_id, message).await,
        ClientMessage::PlayerReconnect => resend_snapshot(state, code, user_id).await,
        ClientMessage::Spectate {
            heading,
            pitch,
            zoom,
            num_player,
            lat,
            lng,
        } => {
            let tick = ServerMessage::Spectate {
                player: user_id,
                num_player,
                heading,
                pitch,
                zoom,
                lat,
                lng,
            };
            relay_tick(state, code, user_id, tick).await
        },
        ClientMessage::GuessPreview {
            num_player,
            lat,
            lng,
        } => {
            let tick = ServerMessage::GuessPreview {
                player: user_id,
                num_player,
                lat,
                lng,
            };
            relay_tick(state, code, user_id, tick).await
        },
    };

    if let Err(e) = result {
        tracing::warn!(lobby = code, user_id, error = %e, "Rejected client action");
        state
            .broadcaster
            .to_user(code, user_id, &ServerMessage::error(e.to_string()))
            .await;
    }
}

async fn start_game(state: &AppState, code: &str, user_id: UserId) -> Result<(), ActionError> {
    let mut entry = lock_lobby(state, code).await?;
    entry.lobby.check_start_game(user_id)?;
    let location = state
        .locations
        .next_location(entry.lobby.used_locations())
        .await?;
    let events = entry.lobby.start_game(user_id, location, now_millis())?;
    entry.touch();
    arm_round_timer(state, code, &mut entry);
    tracing::info!(
        lobby = code,
        players = entry.lobby.active_count(),
        "Game started"
    );
    state.broadcaster.to_lobby_all(code, &events).await;
    Ok(())
}

async fn start_round(state: &AppState, code: &str, user_id: UserId) -> Result<(), ActionError> {
    let mut entry = lock_lobby(state, code).await?;
    next_round(state, code, &mut entry, Some(user_id)).await
}

/// Start the next round. `by` is `None` when the server advances on its own.
async fn next_round(
    state: &AppState,
    code: &str,
    entry: &mut LobbyEntry,
    by: Option<UserId>,
) -> Result<(), ActionError> {
    entry.lobby.check_start_round(by)?;
    let location = match state
        .locations
        .next_location(entry.lobby.used_locations())
        .await
    {
        Ok(location) => location,
        // Every location was used, so no later attempt can succeed.
        Err(LocationError::Exhausted) => {
            tracing::info!(
                lobby = code,
                rounds = entry.lobby.round_count(),
                "Location pool exhausted, ending game"
            );
            finish(state, code, entry).await;
            return Ok(());
        },
        Err(e) => return Err(e.into()),
    };
    let event = entry.lobby.start_round(by, location, now_millis())?;
    if let Some(token) = entry.advance_cancel.take() {
        token.cancel();
    }
    entry.touch();
    arm_round_timer(state, code, entry);
    tracing::info!(lobby = code, round = entry.lobby.round_count(), "Round started");
    state.broadcaster.to_lobby(code, &event).await;
    Ok(())
}

async fn submit_guess(
    state: &AppState,
    code: &str,
    user_id: UserId,
    guess: Coordinates,
) -> Result<(), ActionError> {
    let mut entry = lock_lobby(state, code).await?;
    let accepted = entry.lobby.submit_guess(user_id, guess, now_millis())?;
    entry.touch();
    tracing::debug!(lobby = code, user_id, "Guess recorded");
    state.broadcaster.to_lobby(code, &accepted.event).await;
    if accepted.round_complete {
        schedule_grace(state, code, &mut entry);
    }
    Ok(())
}

async fn end_round(state: &AppState, code: &str, user_id: UserId) -> Result<(), ActionError> {
    let mut entry = lock_lobby(state, code).await?;
    let outcome = entry.lobby.force_end_round(user_id)?;
    after_round(state, code, &mut entry, outcome).await;
    Ok(())
}

async fn end_game(state: &AppState, code: &str, user_id: UserId) -> Result<(), ActionError> {
    let mut entry = lock_lobby(state, code).await?;
    entry.lobby.check_end_game(user_id)?;
    tracing::info!(lobby = code, user_id, "Host ended the game");
    finish(state, code, &mut entry).await;
    Ok(())
}

fn validate_chat(message: &str, max_len: usize) -> Result<(), ActionError> {
    if message.trim().is_empty() {
        return Err(ActionError::InvalidMessage("empty message".to_string()));
    }
    if message.chars().count() > max_len {
        return Err(ActionError::InvalidMessage(format!(
            "message exceeds {max_len} characters"
        )));
    }
    if message.chars().any(|c| c.is_control() && c != '\n') {
        return Err(ActionError::InvalidMessage(
            "message contains control characters".to_string(),
        ));
    }
    Ok(())
}

async fn chat(
    state: &AppState,
    code: &str,
    user_id: UserId,
    message: String,
) -> Result<(), ActionError> {
    validate_chat(&message, state.config.limits.max_chat_len)?;
    let mut entry = lock_lobby(state, code).await?;
    if !entry.lobby.is_member(user_id) {
        return Err(LobbyError::NotMember.into());
    }
    entry.touch();
    state
        .broadcaster
        .to_lobby(
            code,
            &ServerMessage::Broadcast {
                player: user_id,
                message,
            },
        )
        .await;
    Ok(())
}

/// Read-only: never touches presence or round state.
async fn resend_snapshot(state: &AppState, code: &str, user_id: UserId) -> Result<(), ActionError> {
    let entry = lock_lobby(state, code).await?;
    if !entry.lobby.is_member(user_id) {
        return Err(LobbyError::NotMember.into());
    }
    state
        .broadcaster
        .to_user(code, user_id, &snapshot_message(&entry.lobby, user_id))
        .await;
    Ok(())
}

async fn relay_tick(
    state: &AppState,
    code: &str,
    user_id: UserId,
    tick: ServerMessage,
) -> Result<(), ActionError> {
    if !state.connections.is_connected(code, user_id).await {
        return Err(LobbyError::NotMember.into());
    }
    state.broadcaster.to_spectators(code, &tick).await;
    Ok(())
}

// Resolution

async fn resolve_round(state: &AppState, code: &str, number: u32) {
    let Ok(mut entry) = lock_lobby(state, code).await else {
        return;
    };
    if let Some(outcome) = entry.lobby.end_round(number) {
        after_round(state, code, &mut entry, outcome).await;
    }
}

async fn after_round(state: &AppState, code: &str, entry: &mut LobbyEntry, outcome: RoundOutcome) {
    if let Some(token) = entry.round_cancel.take() {
        token.cancel();
    }
    entry.grace_scheduled = None;
    entry.touch();
    tracing::info!(
        lobby = code,
        round = entry.lobby.round_count(),
        game_over = outcome.game_over,
        "Round resolved"
    );
    state.broadcaster.to_lobby(code, &outcome.event).await;
    if outcome.game_over {
        finish(state, code, entry).await;
    } else {
        schedule_advance(state, code, entry);
    }
}

/// End the game: decide the winner, write XP, announce the result and any
/// rank changes. No-op unless the game is running.
async fn finish(state: &AppState, code: &str, entry: &mut LobbyEntry) {
    let Some(summary) = entry.lobby.finish_game() else {
        return;
    };
    entry.cancel_timers();
    entry.ended_at = Some(Instant::now());
    entry.touch();

    let mut rank_ups = Vec::new();
    for &(user_id, xp) in &summary.xp_awards {
        let award = state.profiles.award_xp(user_id, xp).await;
        entry.lobby.record_xp(user_id, award.new_xp);
        if let Some((old_rank, new_rank)) = award.rank_change() {
            rank_ups.push(RankUp {
                user_id,
                old_rank,
                new_rank,
            });
        }
    }

    tracing::info!(
        lobby = code,
        winner = ?summary.winner,
        rounds = entry.lobby.round_count(),
        rank_ups = rank_ups.len(),
        "Game ended"
    );
    state
        .broadcaster
        .to_lobby(code, &entry.lobby.game_ended_message(&summary))
        .await;
    if !rank_ups.is_empty() {
        state
            .broadcaster
            .to_lobby(code, &ServerMessage::RankUp { rank_ups })
            .await;
    }
}

async fn auto_advance(state: &AppState, code: &str, after_round: u32) {
    let Ok(mut entry) = lock_lobby(state, code).await else {
        return;
    };
    if entry.lobby.phase() != LobbyPhase::InGame
        || entry.lobby.active_round().is_some()
        || entry.lobby.round_count() != after_round
    {
        return;
    }
    entry.advance_cancel = None;
    if let Err(e) = next_round(state, code, &mut entry, None).await {
        tracing::warn!(lobby = code, error = %e, "Automatic round start failed");
        if let Some(host) = entry.lobby.host() {
            state
                .broadcaster
                .to_user(code, host, &ServerMessage::error(e.to_string()))
                .await;
        }
    }
}

async fn release_seat(state: &AppState, code: &str, user_id: UserId, epoch: u64) {
    let Ok(mut entry) = lock_lobby(state, code).await else {
        return;
    };
    let still_away = entry.lobby.phase() == LobbyPhase::Waiting
        && entry
            .lobby
            .member(user_id)
            .is_some_and(|m| m.presence == Presence::Offline && m.presence_epoch == epoch);
    if !still_away {
        return;
    }
    tracing::info!(lobby = code, user_id, "Releasing seat after disconnect grace");
    if let Err(e) = remove_member(state, code, &mut entry, user_id).await {
        tracing::debug!(lobby = code, user_id, error = %e, "Seat already released");
    }
}

// Timers. Spawned futures are boxed in plain functions so the async functions
// above can schedule each other.

/// Run `task` after `delay` unless `token` is cancelled first.
fn spawn_delayed(delay: Duration, token: CancellationToken, task: BoxFuture<'static, ()>) {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {},
            () = tokio::time::sleep(delay) => task.await,
        }
    });
}

fn resolve_task(state: &AppState, code: &str, number: u32) -> BoxFuture<'static, ()> {
    let state = state.clone();
    let code = code.to_string();
    Box::pin(async move { resolve_round(&state, &code, number).await })
}

/// Arm the timeout of the active round, replacing any previous round timer.
fn arm_round_timer(state: &AppState, code: &str, entry: &mut LobbyEntry) {
    let Some(number) = entry.lobby.active_round() else {
        return;
    };
    if let Some(old) = entry.round_cancel.take() {
        old.cancel();
    }
    entry.grace_scheduled = None;
    let token = CancellationToken::new();
    entry.round_cancel = Some(token.clone());
    let timer = Duration::from_secs(u64::from(entry.lobby.settings().round_timer_secs));
    spawn_delayed(timer, token, resolve_task(state, code, number));
}

/// Resolve the active round after the all-guessed grace delay, once per round.
fn schedule_grace(state: &AppState, code: &str, entry: &mut LobbyEntry) {
    let Some(number) = entry.lobby.active_round() else {
        return;
    };
    if entry.grace_scheduled == Some(number) {
        return;
    }
    entry.grace_scheduled = Some(number);
    let token = entry
        .round_cancel
        .get_or_insert_with(CancellationToken::new)
        .child_token();
    let grace = Duration::from_millis(state.config.game.all_guessed_grace_ms);
    tracing::debug!(lobby = code, round = number, "All guesses in");
    spawn_delayed(grace, token, resolve_task(state, code, number));
}

fn schedule_advance(state: &AppState, code: &str, entry: &mut LobbyEntry) {
    let after_round = entry.lobby.round_count();
    let token = CancellationToken::new();
    if let Some(old) = entry.advance_cancel.replace(token.clone()) {
        old.cancel();
    }
    let delay = Duration::from_millis(state.config.game.between_rounds_ms);
    let task_state = state.clone();
    let task_code = code.to_string();
    spawn_delayed(
        delay,
        token,
        Box::pin(async move { auto_advance(&task_state, &task_code, after_round).await }),
    );
}

fn schedule_seat_release(state: &AppState, code: &str, user_id: UserId, epoch: u64) {
    let delay = Duration::from_secs(state.config.lobbies.disconnect_grace_secs);
    let state = state.clone();
    let code = code.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        release_seat(&state, &code, user_id, epoch).await;
    });
}

// Eviction

/// Drop ended lobbies past their retention and lobbies idle too long.
/// Returns how many were evicted.
pub async fn evict_expired(state: &AppState) -> usize {
    let now = Instant::now();
    let idle = Duration::from_secs(state.config.lobbies.idle_timeout_secs);
    let retention = Duration::from_secs(state.config.lobbies.ended_retention_secs);
    let mut evicted = 0;

    for (code, shared) in state.lobbies.entries().await {
        let mut entry = shared.lock().await;
        if entry.removed || !entry.is_expired(now, idle, retention) {
            continue;
        }
        entry.retire();
        state.lobbies.remove(&code).await;
        close_channels(state, &code, CLOSE_LOBBY_CLOSED, "lobby closed").await;
        tracing::info!(lobby = %code, phase = ?entry.lobby.phase(), "Lobby evicted");
        evicted += 1;
    }
    evicted
}
