pub mod api;
pub mod auth;
pub mod broadcaster;
pub mod config;
pub mod connections;
pub mod engine;
pub mod error;
pub mod health;
pub mod location;
pub mod lobby;
pub mod lobby_store;
pub mod profile;
pub mod rate_limit;
pub mod round;
pub mod spectator;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post, put};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::ServerConfig;
use location::{LocationSource, StaticLocationPool};
use profile::{InMemoryProfiles, ProfileStore};
use state::AppState;

/// Rate limiter entries untouched this long are dropped by the janitor.
const LIMITER_MAX_AGE: Duration = Duration::from_secs(600);

/// Build the router with the built-in location pool and in-memory profiles.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    build_app_with(
        config,
        Arc::new(StaticLocationPool::builtin()),
        Arc::new(InMemoryProfiles::new()),
    )
}

/// Build the router around caller-supplied location and profile stores.
pub fn build_app_with(
    config: ServerConfig,
    locations: Arc<dyn LocationSource>,
    profiles: Arc<dyn ProfileStore>,
) -> (Router<()>, AppState) {
    let state = AppState::new(config, locations, profiles);

    let api_routes = Router::new()
        .route("/lobbies", post(api::create_lobby))
        .route("/lobbies/{code}", get(api::get_lobby))
        .route(
            "/lobbies/{code}/members",
            put(api::join_lobby).delete(api::leave_lobby),
        );

    let app = Router::new()
        .route("/ws/{code}", get(ws::player_ws))
        .route("/ws/{code}/spectate", get(ws::spectator_ws))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Periodic sweep that evicts ended and idle lobbies and prunes the API
/// rate limiter.
pub fn spawn_janitor(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.lobbies.idle_check_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = engine::evict_expired(&state).await;
            state.api_limiter.cleanup(LIMITER_MAX_AGE).await;
            if evicted > 0 {
                let remaining = state.lobbies.len().await;
                tracing::info!(evicted, remaining, "Janitor sweep");
            } else {
                tracing::debug!("Janitor sweep found nothing to evict");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use mistduel_core::lobby::LobbySettings;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn janitor_sweeps_idle_lobbies() {
        let mut config = ServerConfig::default();
        config.lobbies.idle_timeout_secs = 0;
        config.lobbies.idle_check_interval_secs = 1;
        let (_app, state) = build_app(config);
        engine::create_lobby(&state, 1, LobbySettings::default()).await;
        assert_eq!(state.lobbies.len().await, 1);

        let janitor = spawn_janitor(state.clone());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(state.lobbies.is_empty().await);
        janitor.abort();
    }
}
