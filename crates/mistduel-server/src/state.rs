use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::auth::TokenVerifier;
use crate::broadcaster::Broadcaster;
use crate::config::ServerConfig;
use crate::connections::ConnectionRegistry;
use crate::location::LocationSource;
use crate::lobby_store::LobbyStore;
use crate::profile::ProfileStore;
use crate::rate_limit::IpRateLimiter;
use crate::spectator::SpectatorRelay;

#[derive(Clone)]
pub struct AppState {
    pub lobbies: Arc<LobbyStore>,
    pub connections: Arc<ConnectionRegistry>,
    pub spectators: Arc<SpectatorRelay>,
    pub broadcaster: Broadcaster,
    pub locations: Arc<dyn LocationSource>,
    pub profiles: Arc<dyn ProfileStore>,
    pub auth: TokenVerifier,
    pub api_limiter: Arc<IpRateLimiter>,
    /// Open WebSocket connections, players and spectators alike.
    pub ws_connection_count: Arc<AtomicUsize>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        locations: Arc<dyn LocationSource>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let spectators = Arc::new(SpectatorRelay::new());
        let broadcaster = Broadcaster::new(Arc::clone(&connections), Arc::clone(&spectators));
        let api_limiter = Arc::new(IpRateLimiter::new(
            config.limits.api_rate_limit_burst as f64,
            config.limits.api_rate_limit_per_sec,
        ));
        Self {
            lobbies: Arc::new(LobbyStore::new()),
            connections,
            spectators,
            broadcaster,
            locations,
            profiles,
            auth: TokenVerifier::new(config.auth.token_secret.clone()),
            api_limiter,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            config: Arc::new(config),
        }
    }
}

/// Holds one slot of the global WebSocket cap; released on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    /// Take a slot unless `max` connections are already open.
    pub fn try_acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            counter: Arc::clone(counter),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
