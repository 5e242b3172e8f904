use serde::Deserialize;

use mistduel_core::lobby::LobbySettings;
use mistduel_core::scoring::DamageRule;

/// Top-level server configuration, loaded from `mistduel.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub game: GameConfig,
    pub limits: LimitsConfig,
    pub lobbies: LobbiesConfig,
    pub locations: LocationsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            game: GameConfig::default(),
            limits: LimitsConfig::default(),
            lobbies: LobbiesConfig::default(),
            locations: LocationsConfig::default(),
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// HMAC key for player tokens. None = development mode, the token is the
    /// bare user id.
    pub token_secret: Option<String>,
}

/// Duel rules and lobby defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub max_players: u8,
    /// None = play until someone's HP reaches zero.
    pub total_rounds: Option<u32>,
    pub round_timer_secs: u32,
    pub initial_hp: u32,
    pub max_damage: u32,
    pub damage_multiplier: f64,
    /// Delay between the last guess and the round resolving.
    pub all_guessed_grace_ms: u64,
    /// Delay before the next round starts automatically.
    pub between_rounds_ms: u64,
    /// HP lost by every member when a round times out with no guesses.
    pub no_guess_penalty: u32,
    pub xp_participation: u64,
    pub xp_win: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players: 2,
            total_rounds: None,
            round_timer_secs: 240,
            initial_hp: 6000,
            max_damage: 6000,
            damage_multiplier: 1.0,
            all_guessed_grace_ms: 2000,
            between_rounds_ms: 5000,
            no_guess_penalty: 500,
            xp_participation: 10,
            xp_win: 50,
        }
    }
}

impl GameConfig {
    pub fn default_settings(&self) -> LobbySettings {
        LobbySettings {
            max_players: self.max_players,
            total_rounds: self.total_rounds,
            round_timer_secs: self.round_timer_secs,
        }
    }

    pub fn damage_rule(&self) -> DamageRule {
        DamageRule {
            max_damage: self.max_damage,
            multiplier: self.damage_multiplier,
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub ws_rate_limit_per_sec: f64,
    pub player_message_buffer: usize,
    /// Capacity of each lobby's spectator broadcast channel.
    pub spectator_buffer: usize,
    pub max_chat_len: usize,
    /// API endpoint rate limit: max burst tokens per IP.
    pub api_rate_limit_burst: usize,
    /// API endpoint rate limit: token refill rate (requests per second) per IP.
    pub api_rate_limit_per_sec: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 1000,
            ws_rate_limit_per_sec: 30.0,
            player_message_buffer: 256,
            spectator_buffer: 64,
            max_chat_len: 500,
            api_rate_limit_burst: 10,
            api_rate_limit_per_sec: 10.0 / 60.0, // 10 per minute
        }
    }
}

/// Lobby lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LobbiesConfig {
    /// How long a disconnected member of a waiting lobby keeps their seat.
    pub disconnect_grace_secs: u64,
    /// How long an ended lobby stays readable before eviction.
    pub ended_retention_secs: u64,
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
}

impl Default for LobbiesConfig {
    fn default() -> Self {
        Self {
            disconnect_grace_secs: 180,
            ended_retention_secs: 30,
            idle_timeout_secs: 3600,
            idle_check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocationsConfig {
    /// TOML file with a `[[locations]]` list. None = built-in pool.
    pub file: Option<String>,
}

impl ServerConfig {
    /// Validate configuration, logging warnings for issues.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }

        if self.auth.token_secret.is_none() {
            tracing::warn!("No token_secret configured, accepting bare user ids as tokens");
        } else if std::env::var("MISTDUEL_TOKEN_SECRET").is_err() {
            tracing::warn!(
                "token_secret is set in config file, use MISTDUEL_TOKEN_SECRET env var in production"
            );
        }

        if let Err(reason) = self.check() {
            tracing::error!("{reason}");
            std::process::exit(1);
        }
    }

    /// The hard validation rules, separated from `validate` so they can be
    /// tested without exiting the process.
    pub fn check(&self) -> Result<(), String> {
        let g = &self.game;
        if g.max_players < 2 {
            return Err("game.max_players must be >= 2".to_string());
        }
        if g.round_timer_secs == 0 {
            return Err("game.round_timer_secs must be > 0".to_string());
        }
        if g.total_rounds == Some(0) {
            return Err("game.total_rounds must be > 0 when set".to_string());
        }
        if g.initial_hp == 0 {
            return Err("game.initial_hp must be > 0".to_string());
        }
        if !g.damage_multiplier.is_finite() || g.damage_multiplier < 0.0 {
            return Err("game.damage_multiplier must be a non-negative number".to_string());
        }

        let l = &self.limits;
        if l.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".to_string());
        }
        if l.ws_rate_limit_per_sec <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be > 0".to_string());
        }
        if l.player_message_buffer == 0 {
            return Err("limits.player_message_buffer must be > 0".to_string());
        }
        if l.spectator_buffer == 0 {
            return Err("limits.spectator_buffer must be > 0".to_string());
        }
        if l.api_rate_limit_burst == 0 {
            return Err("limits.api_rate_limit_burst must be > 0".to_string());
        }

        if self.lobbies.idle_timeout_secs == 0 {
            return Err("lobbies.idle_timeout_secs must be > 0".to_string());
        }
        if self.lobbies.idle_check_interval_secs == 0 {
            return Err("lobbies.idle_check_interval_secs must be > 0".to_string());
        }
        Ok(())
    }

    /// Load config from `mistduel.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let path =
            std::env::var("MISTDUEL_CONFIG").unwrap_or_else(|_| "mistduel.toml".to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path = %path, "Failed to parse config: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path, "No config file found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("MISTDUEL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(secret) = std::env::var("MISTDUEL_TOKEN_SECRET")
            && !secret.is_empty()
        {
            config.auth.token_secret = Some(secret);
        }
        if let Ok(file) = std::env::var("MISTDUEL_LOCATIONS_FILE")
            && !file.is_empty()
        {
            config.locations.file = Some(file);
        }

        // Game overrides
        if let Ok(val) = std::env::var("MISTDUEL_ROUND_TIMER_SECS")
            && let Ok(n) = val.parse::<u32>()
        {
            config.game.round_timer_secs = n;
        }
        if let Ok(val) = std::env::var("MISTDUEL_INITIAL_HP")
            && let Ok(n) = val.parse::<u32>()
        {
            config.game.initial_hp = n;
        }
        if let Ok(val) = std::env::var("MISTDUEL_TOTAL_ROUNDS")
            && let Ok(n) = val.parse::<u32>()
        {
            config.game.total_rounds = Some(n);
        }

        // Limits overrides
        if let Ok(val) = std::env::var("MISTDUEL_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("MISTDUEL_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            config.limits.ws_rate_limit_per_sec = n;
        }

        if let Ok(val) = std::env::var("MISTDUEL_DISCONNECT_GRACE_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.lobbies.disconnect_grace_secs = n;
        }

        config
    }
}
