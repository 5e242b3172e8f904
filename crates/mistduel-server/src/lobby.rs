//! The authoritative lobby record and its membership rules.
//!
//! A `Lobby` is plain data with synchronous methods. Callers serialize access
//! through the per-lobby mutex in [`crate::lobby_store`]; nothing here locks,
//! awaits or sends.

use std::collections::HashSet;

use mistduel_core::lobby::{LobbyPhase, LobbySettings};
use mistduel_core::net::messages::{
    GameStateSnapshot, HpMap, LobbySnapshot, RoundResult, ServerMessage,
};
use mistduel_core::player::{PlayerInfo, UserId};
use mistduel_core::scoring::DamageRule;
use mistduel_core::time::remaining_secs;

use crate::config::GameConfig;
use crate::error::LobbyError;
use crate::round::RoundState;

/// Rules copied from the server config when a lobby is created.
#[derive(Debug, Clone)]
pub struct GameRules {
    pub initial_hp: u32,
    pub damage: DamageRule,
    pub no_guess_penalty: u32,
    pub xp_participation: u64,
    pub xp_win: u64,
}

impl From<&GameConfig> for GameRules {
    fn from(cfg: &GameConfig) -> Self {
        Self {
            initial_hp: cfg.initial_hp,
            damage: cfg.damage_rule(),
            no_guess_penalty: cfg.no_guess_penalty,
            xp_participation: cfg.xp_participation,
            xp_win: cfg.xp_win,
        }
    }
}

impl Default for GameRules {
    fn default() -> Self {
        Self::from(&GameConfig::default())
    }
}

/// Connection state of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Joined over HTTP, has not opened a channel yet.
    Pending,
    Online,
    /// Channel closed; seat, HP and guesses are kept.
    Offline,
    /// Left an in-game lobby for good. Kept only for HP and history.
    Left,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub info: PlayerInfo,
    pub presence: Presence,
    /// Bumped on every presence change so delayed kicks can tell whether the
    /// disconnect they were scheduled for is still current.
    pub presence_epoch: u64,
}

impl Member {
    fn new(info: PlayerInfo) -> Self {
        Self {
            info,
            presence: Presence::Pending,
            presence_epoch: 0,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.info.user_id
    }

    /// Still takes part in the lobby.
    pub fn is_active(&self) -> bool {
        self.presence != Presence::Left
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub host_changed: bool,
    /// No active members remain.
    pub now_empty: bool,
}

#[derive(Debug)]
pub struct Lobby {
    code: String,
    settings: LobbySettings,
    pub(crate) rules: GameRules,
    pub(crate) host: Option<UserId>,
    /// Join order.
    pub(crate) members: Vec<Member>,
    pub(crate) phase: LobbyPhase,
    /// Rounds started so far.
    pub(crate) round_count: u32,
    pub(crate) round: Option<RoundState>,
    pub(crate) hp: HpMap,
    pub(crate) results: Vec<RoundResult>,
    pub(crate) used_locations: HashSet<String>,
    pub(crate) winner: Option<UserId>,
}

impl Lobby {
    pub fn new(code: String, host: PlayerInfo, settings: LobbySettings, rules: GameRules) -> Self {
        let host_id = host.user_id;
        Self {
            code,
            settings,
            rules,
            host: Some(host_id),
            members: vec![Member::new(host)],
            phase: LobbyPhase::Waiting,
            round_count: 0,
            round: None,
            hp: HpMap::new(),
            results: Vec::new(),
            used_locations: HashSet::new(),
            winner: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn settings(&self) -> &LobbySettings {
        &self.settings
    }

    pub fn phase(&self) -> LobbyPhase {
        self.phase
    }

    pub fn host(&self) -> Option<UserId> {
        self.host
    }

    pub fn hp(&self) -> &HpMap {
        &self.hp
    }

    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    pub fn winner(&self) -> Option<UserId> {
        self.winner
    }

    /// Rounds started so far, including the active one.
    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    /// Ids of every location this lobby has already played.
    pub fn used_locations(&self) -> &HashSet<String> {
        &self.used_locations
    }

    pub fn member(&self, user_id: UserId) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id() == user_id)
    }

    fn member_mut(&mut self, user_id: UserId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.user_id() == user_id)
    }

    /// Whether `user_id` is an active (not left) member.
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.member(user_id).is_some_and(Member::is_active)
    }

    pub(crate) fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active_members().count()
    }

    /// Public profiles of active members in join order.
    pub fn players(&self) -> Vec<PlayerInfo> {
        self.active_members().map(|m| m.info.clone()).collect()
    }

    /// Active members with a live channel.
    pub fn online_members(&self) -> Vec<UserId> {
        self.active_members()
            .filter(|m| m.presence == Presence::Online)
            .map(Member::user_id)
            .collect()
    }

    pub fn disconnected(&self) -> Vec<UserId> {
        self.active_members()
            .filter(|m| m.presence == Presence::Offline)
            .map(Member::user_id)
            .collect()
    }

    /// Add `info` to the lobby. Re-joining is not an error.
    pub fn join(&mut self, info: PlayerInfo) -> Result<JoinOutcome, LobbyError> {
        if self.is_member(info.user_id) {
            return Ok(JoinOutcome::AlreadyMember);
        }
        match self.phase {
            LobbyPhase::Ended => return Err(LobbyError::GameAlreadyEnded),
            LobbyPhase::InGame => return Err(LobbyError::GameInProgress),
            LobbyPhase::Waiting => {},
        }
        if self.active_count() >= usize::from(self.settings.max_players) {
            return Err(LobbyError::Full);
        }
        // A waiting lobby never keeps left members, so this is a fresh seat.
        self.members.push(Member::new(info));
        Ok(JoinOutcome::Joined)
    }

    /// Remove `user_id`. In a waiting lobby the seat is freed; once a game
    /// has started the member is only marked as left.
    pub fn leave(&mut self, user_id: UserId) -> Result<LeaveOutcome, LobbyError> {
        if !self.is_member(user_id) {
            return Err(LobbyError::NotMember);
        }
        if self.phase == LobbyPhase::Waiting {
            self.members.retain(|m| m.user_id() != user_id);
        } else if let Some(m) = self.member_mut(user_id) {
            m.presence = Presence::Left;
            m.presence_epoch += 1;
        }

        let mut host_changed = false;
        if self.host == Some(user_id) {
            let next = self.active_members().next().map(Member::user_id);
            self.host = next;
            host_changed = true;
        }
        Ok(LeaveOutcome {
            host_changed,
            now_empty: self.active_count() == 0,
        })
    }

    /// Record a presence change. Returns the previous presence and the new
    /// epoch, or `None` for unknown or left members.
    pub fn set_presence(&mut self, user_id: UserId, presence: Presence) -> Option<(Presence, u64)> {
        let m = self.member_mut(user_id)?;
        if !m.is_active() {
            return None;
        }
        let previous = m.presence;
        m.presence = presence;
        m.presence_epoch += 1;
        Some((previous, m.presence_epoch))
    }

    /// Replace the stored XP (and derived rank) of a member after an award.
    pub fn record_xp(&mut self, user_id: UserId, xp: u64) {
        if let Some(m) = self.member_mut(user_id) {
            m.info.xp = xp;
            m.info.rank = mistduel_core::rank::Rank::for_xp(xp);
        }
    }

    pub fn player_joined_message(&self) -> ServerMessage {
        ServerMessage::PlayerJoined {
            players: self.players(),
            host: self.host,
        }
    }

    pub fn player_left_message(&self) -> ServerMessage {
        ServerMessage::PlayerLeft {
            players: self.players(),
            host: self.host,
        }
    }

    /// Read-only view of the lobby. `viewer` selects whose own guess is
    /// included.
    pub fn snapshot(&self, viewer: Option<UserId>, now_ms: u64) -> LobbySnapshot {
        let game_state = (self.phase != LobbyPhase::Waiting).then(|| {
            let round = self.round.as_ref();
            let round_active = round.is_some_and(|r| !r.resolved);
            let mut guessed: Vec<UserId> = round
                .map(|r| r.guesses.keys().copied().collect())
                .unwrap_or_default();
            guessed.sort_unstable();
            GameStateSnapshot {
                current_round: self.round_count,
                location: round.map(|r| r.location.view()),
                round_start_time: round.map(|r| r.started_at_ms),
                timer: match round {
                    Some(r) if round_active => {
                        remaining_secs(r.started_at_ms, self.settings.round_timer_secs, now_ms)
                    },
                    _ => 0,
                },
                round_active,
                hp: self.hp.clone(),
                guessed,
                player_guess: viewer
                    .and_then(|v| round.and_then(|r| r.guesses.get(&v).copied())),
            }
        });

        LobbySnapshot {
            invite_code: self.code.clone(),
            host: self.host,
            players: self.players(),
            phase: self.phase,
            max_players: self.settings.max_players,
            total_rounds: self.settings.total_rounds,
            round_timer_secs: self.settings.round_timer_secs,
            disconnected: self.disconnected(),
            game_state,
        }
    }
}
