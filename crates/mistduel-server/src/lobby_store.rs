use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use mistduel_core::lobby::{LobbyPhase, LobbySettings, generate_invite_code};
use mistduel_core::player::PlayerInfo;

use crate::lobby::{GameRules, Lobby};

/// A lobby plus the scheduling state that lives next to it.
pub struct LobbyEntry {
    pub lobby: Lobby,
    pub last_activity: Instant,
    pub ended_at: Option<Instant>,
    /// Cancels the active round's timeout and all-guessed grace tasks.
    pub round_cancel: Option<CancellationToken>,
    /// Cancels a pending automatic start of the next round.
    pub advance_cancel: Option<CancellationToken>,
    /// Round whose all-guessed grace end is already scheduled.
    pub grace_scheduled: Option<u32>,
    /// Set under the lock right before the entry leaves the store. Callers
    /// that were queued on the lock must treat the lobby as gone.
    pub removed: bool,
}

impl LobbyEntry {
    fn new(lobby: Lobby) -> Self {
        Self {
            lobby,
            last_activity: Instant::now(),
            ended_at: None,
            round_cancel: None,
            advance_cancel: None,
            grace_scheduled: None,
            removed: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Cancel every pending timer of this lobby.
    pub fn cancel_timers(&mut self) {
        if let Some(token) = self.round_cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.advance_cancel.take() {
            token.cancel();
        }
        self.grace_scheduled = None;
    }

    /// Stop every timer and mark the entry dead. The caller removes it from
    /// the store while still holding the lock.
    pub fn retire(&mut self) {
        self.cancel_timers();
        self.removed = true;
    }

    /// Whether the janitor should evict this lobby at `now`.
    pub fn is_expired(&self, now: Instant, idle_timeout: Duration, ended_retention: Duration) -> bool {
        if self.lobby.phase() == LobbyPhase::Ended
            && let Some(ended_at) = self.ended_at
        {
            return now.duration_since(ended_at) >= ended_retention;
        }
        now.duration_since(self.last_activity) >= idle_timeout
    }
}

/// One lock per lobby; mutations of a lobby happen only under its lock.
pub type SharedLobby = Arc<Mutex<LobbyEntry>>;

/// All live lobbies keyed by invite code.
///
/// The map lock is never held while waiting for a lobby lock.
#[derive(Default)]
pub struct LobbyStore {
    lobbies: RwLock<HashMap<String, SharedLobby>>,
}

impl LobbyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lobby owned by `host` and return its invite code.
    pub async fn create(&self, host: PlayerInfo, settings: LobbySettings, rules: GameRules) -> String {
        let mut lobbies = self.lobbies.write().await;
        let code = generate_unique_code(&lobbies);
        let lobby = Lobby::new(code.clone(), host, settings, rules);
        lobbies.insert(code.clone(), Arc::new(Mutex::new(LobbyEntry::new(lobby))));
        code
    }

    pub async fn get(&self, code: &str) -> Option<SharedLobby> {
        self.lobbies.read().await.get(code).cloned()
    }

    pub async fn remove(&self, code: &str) -> Option<SharedLobby> {
        self.lobbies.write().await.remove(code)
    }

    pub async fn len(&self) -> usize {
        self.lobbies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lobbies.read().await.is_empty()
    }

    /// Clone out every entry so callers can lock them without the map lock.
    pub async fn entries(&self) -> Vec<(String, SharedLobby)> {
        self.lobbies
            .read()
            .await
            .iter()
            .map(|(code, entry)| (code.clone(), Arc::clone(entry)))
            .collect()
    }
}

fn generate_unique_code(existing: &HashMap<String, SharedLobby>) -> String {
    loop {
        let code = generate_invite_code();
        if !existing.contains_key(&code) {
            return code;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mistduel_core::lobby::is_valid_invite_code;

    async fn store_with_lobby(max_players: u8) -> (LobbyStore, String) {
        let store = LobbyStore::new();
        let settings = LobbySettings {
            max_players,
            ..LobbySettings::default()
        };
        let code = store
            .create(PlayerInfo::placeholder(1), settings, GameRules::default())
            .await;
        (store, code)
    }

    #[tokio::test]
    async fn create_and_get() {
        let (store, code) = store_with_lobby(2).await;
        assert!(is_valid_invite_code(&code));
        let entry = store.get(&code).await.unwrap();
        let entry = entry.lock().await;
        assert_eq!(entry.lobby.code(), code);
        assert_eq!(entry.lobby.host(), Some(1));
        assert!(store.get("NOPE0000").await.is_none());
    }

    #[tokio::test]
    async fn codes_are_unique() {
        let store = LobbyStore::new();
        for i in 0..200 {
            store
                .create(
                    PlayerInfo::placeholder(i),
                    LobbySettings::default(),
                    GameRules::default(),
                )
                .await;
        }
        assert_eq!(store.len().await, 200);
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let (store, code) = store_with_lobby(2).await;
        assert!(store.remove(&code).await.is_some());
        assert!(store.is_empty().await);
        assert!(store.remove(&code).await.is_none());
    }

    #[tokio::test]
    async fn expiry_rules() {
        let (store, code) = store_with_lobby(2).await;
        let shared = store.get(&code).await.unwrap();
        let mut entry = shared.lock().await;
        let now = Instant::now();
        let hour = Duration::from_secs(3600);
        let half_minute = Duration::from_secs(30);
        assert!(!entry.is_expired(now, hour, half_minute));
        assert!(entry.is_expired(now + hour, hour, half_minute));

        entry.lobby.phase = LobbyPhase::Ended;
        entry.ended_at = Some(now);
        assert!(!entry.is_expired(now + Duration::from_secs(10), hour, half_minute));
        assert!(entry.is_expired(now + half_minute, hour, half_minute));
    }

    #[tokio::test]
    async fn cancel_timers_cancels_tokens() {
        let (store, code) = store_with_lobby(2).await;
        let shared = store.get(&code).await.unwrap();
        let mut entry = shared.lock().await;
        let round = CancellationToken::new();
        let advance = CancellationToken::new();
        entry.round_cancel = Some(round.clone());
        entry.advance_cancel = Some(advance.clone());
        entry.grace_scheduled = Some(1);
        entry.cancel_timers();
        assert!(round.is_cancelled());
        assert!(advance.is_cancelled());
        assert!(entry.round_cancel.is_none());
        assert!(entry.grace_scheduled.is_none());
    }

    #[tokio::test]
    async fn retire_marks_the_entry_dead() {
        let (store, code) = store_with_lobby(2).await;
        let shared = store.get(&code).await.unwrap();
        let mut entry = shared.lock().await;
        let round = CancellationToken::new();
        entry.round_cancel = Some(round.clone());
        assert!(!entry.removed);
        entry.retire();
        assert!(entry.removed);
        assert!(round.is_cancelled());
    }
}
