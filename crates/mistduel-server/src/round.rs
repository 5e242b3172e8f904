//! Round state machine: game start, rounds, guesses, resolution and game end.
//!
//! Every transition validates its preconditions before touching the lobby, so
//! a rejected action leaves the record exactly as it was. Transitions return
//! the events to broadcast; delivery and timers are the engine's job.

use std::collections::{BTreeMap, HashMap};

use mistduel_core::geo::{Coordinates, NO_GUESS_DISTANCE_KM, distance_km};
use mistduel_core::lobby::LobbyPhase;
use mistduel_core::net::messages::{GuessResult, RoundResult, ServerMessage};
use mistduel_core::player::UserId;
use mistduel_core::scoring::points_for_distance;

use crate::error::{ActionError, LobbyError};
use crate::location::Location;
use crate::lobby::{Lobby, Presence};

/// The current (or most recently resolved) round.
#[derive(Debug, Clone)]
pub struct RoundState {
    /// 1-based.
    pub number: u32,
    pub location: Location,
    pub started_at_ms: u64,
    pub guesses: HashMap<UserId, Coordinates>,
    pub resolved: bool,
}

/// Result of an accepted guess.
#[derive(Debug)]
pub struct GuessAccepted {
    pub event: ServerMessage,
    /// Every online member has now guessed.
    pub round_complete: bool,
}

/// Result of resolving a round.
#[derive(Debug)]
pub struct RoundOutcome {
    pub event: ServerMessage,
    /// The game must end now (HP depleted, rounds exhausted or too few players).
    pub game_over: bool,
}

/// Everything decided when a game ends, before XP is written.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSummary {
    pub winner: Option<UserId>,
    pub total_distances: BTreeMap<UserId, f64>,
    /// XP each participant earns, in join order.
    pub xp_awards: Vec<(UserId, u64)>,
}

impl Lobby {
    fn require_host(&self, by: UserId) -> Result<(), ActionError> {
        if !self.is_member(by) {
            return Err(LobbyError::NotMember.into());
        }
        if self.host != Some(by) {
            return Err(ActionError::NotHost);
        }
        Ok(())
    }

    pub fn round(&self) -> Option<&RoundState> {
        self.round.as_ref()
    }

    /// Number of the round currently accepting guesses.
    pub fn active_round(&self) -> Option<u32> {
        self.round.as_ref().filter(|r| !r.resolved).map(|r| r.number)
    }

    /// Preconditions of `start_game`, checked before a location is fetched.
    pub fn check_start_game(&self, by: UserId) -> Result<(), ActionError> {
        self.require_host(by)?;
        if self.phase != LobbyPhase::Waiting {
            return Err(ActionError::WrongPhase);
        }
        if self.active_count() < 2 {
            return Err(ActionError::NotEnoughPlayers);
        }
        Ok(())
    }

    /// Waiting -> InGame, immediately followed by the first round.
    pub fn start_game(
        &mut self,
        by: UserId,
        location: Location,
        now_ms: u64,
    ) -> Result<Vec<ServerMessage>, ActionError> {
        self.check_start_game(by)?;

        let initial = self.rules.initial_hp;
        let hp: BTreeMap<UserId, u32> = self
            .active_members()
            .map(|m| (m.user_id(), initial))
            .collect();
        self.hp = hp;
        self.phase = LobbyPhase::InGame;
        self.round_count = 0;
        self.round = None;
        self.results.clear();
        self.winner = None;

        let started = ServerMessage::GameStarted {
            hp: self.hp.clone(),
            timer: self.settings().round_timer_secs,
        };
        let round = self.begin_round(location, now_ms);
        Ok(vec![started, round])
    }

    /// Preconditions of a new round. `by` is `None` for system-triggered starts.
    pub fn check_start_round(&self, by: Option<UserId>) -> Result<(), ActionError> {
        if let Some(by) = by {
            self.require_host(by)?;
        }
        if self.phase != LobbyPhase::InGame {
            return Err(ActionError::WrongPhase);
        }
        if self.active_round().is_some() {
            return Err(ActionError::RoundAlreadyActive);
        }
        if self
            .settings()
            .total_rounds
            .is_some_and(|total| self.round_count >= total)
        {
            return Err(ActionError::RoundsExhausted);
        }
        Ok(())
    }

    pub fn start_round(
        &mut self,
        by: Option<UserId>,
        location: Location,
        now_ms: u64,
    ) -> Result<ServerMessage, ActionError> {
        self.check_start_round(by)?;
        Ok(self.begin_round(location, now_ms))
    }

    fn begin_round(&mut self, location: Location, now_ms: u64) -> ServerMessage {
        self.round_count += 1;
        self.used_locations.insert(location.id.clone());
        let event = ServerMessage::RoundStarted {
            round: self.round_count,
            lat: location.coords.lat,
            lon: location.coords.lon,
            url: location.imagery_ref.clone(),
            timer: self.settings().round_timer_secs,
            round_start_time: now_ms,
        };
        self.round = Some(RoundState {
            number: self.round_count,
            location,
            started_at_ms: now_ms,
            guesses: HashMap::new(),
            resolved: false,
        });
        event
    }

    pub fn submit_guess(
        &mut self,
        user_id: UserId,
        guess: Coordinates,
        now_ms: u64,
    ) -> Result<GuessAccepted, ActionError> {
        if self.phase != LobbyPhase::InGame {
            return Err(ActionError::WrongPhase);
        }
        if !self.is_member(user_id) {
            return Err(LobbyError::NotMember.into());
        }
        if !guess.is_valid() {
            return Err(ActionError::InvalidCoordinates);
        }
        let timer_ms = u64::from(self.settings().round_timer_secs) * 1000;
        let round = self
            .round
            .as_mut()
            .filter(|r| !r.resolved)
            .ok_or(ActionError::NoActiveRound)?;
        if now_ms >= round.started_at_ms.saturating_add(timer_ms) {
            return Err(ActionError::NoActiveRound);
        }
        if round.guesses.contains_key(&user_id) {
            return Err(ActionError::AlreadyGuessed);
        }
        round.guesses.insert(user_id, guess);

        Ok(GuessAccepted {
            event: ServerMessage::PlayerGuessed { player: user_id },
            round_complete: self.round_complete(),
        })
    }

    /// The active round has at least one guess and every online member has
    /// guessed.
    pub fn round_complete(&self) -> bool {
        let Some(round) = self.round.as_ref().filter(|r| !r.resolved) else {
            return false;
        };
        !round.guesses.is_empty()
            && self
                .active_members()
                .filter(|m| m.presence == Presence::Online)
                .all(|m| round.guesses.contains_key(&m.user_id()))
    }

    /// Resolve round `number`. Returns `None` if that round is not the active
    /// one, so a late timer and an early full submission resolve it once.
    pub fn end_round(&mut self, number: u32) -> Option<RoundOutcome> {
        if self.phase != LobbyPhase::InGame {
            return None;
        }
        let scored: Vec<UserId> = self.active_members().map(|m| m.user_id()).collect();
        let round = self.round.as_mut()?;
        if round.number != number || round.resolved {
            return None;
        }
        round.resolved = true;
        let target = round.location.coords;
        let guesses = round.guesses.clone();

        let num_guesses = scored.iter().filter(|u| guesses.contains_key(u)).count();
        let (result, event) = if num_guesses == 0 {
            self.resolve_empty_round(number, target, &scored)
        } else {
            self.resolve_scored_round(number, target, &scored, &guesses)
        };
        self.results.push(result);

        let hp_depleted = scored
            .iter()
            .any(|u| self.hp.get(u).copied().unwrap_or(0) == 0);
        let rounds_done = self
            .settings()
            .total_rounds
            .is_some_and(|total| self.round_count >= total);
        let game_over = hp_depleted || rounds_done || scored.len() < 2;

        Some(RoundOutcome { event, game_over })
    }

    fn resolve_empty_round(
        &mut self,
        number: u32,
        target: Coordinates,
        scored: &[UserId],
    ) -> (RoundResult, ServerMessage) {
        let penalty = self.rules.no_guess_penalty;
        let mut guesses = Vec::with_capacity(scored.len());
        for &user_id in scored {
            let hp = self.hp.entry(user_id).or_insert(0);
            *hp = hp.saturating_sub(penalty);
            guesses.push(GuessResult {
                user_id,
                guess: None,
                distance_km: NO_GUESS_DISTANCE_KM,
                points: 0,
                damage: penalty,
            });
        }
        let result = RoundResult {
            round: number,
            target,
            guesses,
            winner: None,
            damage: penalty,
            hp_after: self.hp.clone(),
            timed_out: true,
        };
        let event = ServerMessage::RoundTimedout {
            round: number,
            hp: self.hp.clone(),
            num_guesses: 0,
        };
        (result, event)
    }

    fn resolve_scored_round(
        &mut self,
        number: u32,
        target: Coordinates,
        scored: &[UserId],
        guesses: &HashMap<UserId, Coordinates>,
    ) -> (RoundResult, ServerMessage) {
        let mut results: Vec<GuessResult> = scored
            .iter()
            .map(|&user_id| {
                let guess = guesses.get(&user_id).copied();
                let distance = guess.map_or(NO_GUESS_DISTANCE_KM, |g| distance_km(target, g));
                GuessResult {
                    user_id,
                    guess,
                    distance_km: distance,
                    points: points_for_distance(distance),
                    damage: 0,
                }
            })
            .collect();

        // Strictly-less keeps the earliest joiner on ties.
        let mut best = 0;
        for (i, r) in results.iter().enumerate().skip(1) {
            if r.distance_km < results[best].distance_km {
                best = i;
            }
        }
        let winner = results[best].user_id;
        let winner_points = results[best].points;

        let mut max_hit = 0;
        for r in results.iter_mut().filter(|r| r.user_id != winner) {
            let hit = self.rules.damage.damage(winner_points, r.points);
            let hp = self.hp.entry(r.user_id).or_insert(0);
            *hp = hp.saturating_sub(hit);
            r.damage = hit;
            max_hit = max_hit.max(hit);
        }

        let event = ServerMessage::RoundEnded {
            round: number,
            winner: Some(winner),
            damage: max_hit,
            hp: self.hp.clone(),
            results: results.clone(),
            lat: target.lat,
            lon: target.lon,
        };
        let result = RoundResult {
            round: number,
            target,
            guesses: results,
            winner: Some(winner),
            damage: max_hit,
            hp_after: self.hp.clone(),
            timed_out: false,
        };
        (result, event)
    }

    /// Host action: resolve the active round now.
    pub fn force_end_round(&mut self, by: UserId) -> Result<RoundOutcome, ActionError> {
        self.require_host(by)?;
        if self.phase != LobbyPhase::InGame {
            return Err(ActionError::WrongPhase);
        }
        let number = self.active_round().ok_or(ActionError::NoActiveRound)?;
        self.end_round(number).ok_or(ActionError::NoActiveRound)
    }

    /// Host action: precondition of ending the game early.
    pub fn check_end_game(&self, by: UserId) -> Result<(), ActionError> {
        self.require_host(by)?;
        if self.phase != LobbyPhase::InGame {
            return Err(ActionError::WrongPhase);
        }
        Ok(())
    }

    /// InGame -> Ended. Picks the winner (highest HP, earliest joiner on
    /// ties), totals submitted guess distances and plans XP. Returns `None`
    /// if the game is not running.
    pub fn finish_game(&mut self) -> Option<GameSummary> {
        if self.phase != LobbyPhase::InGame {
            return None;
        }
        if let Some(round) = self.round.as_mut() {
            round.resolved = true;
        }
        self.phase = LobbyPhase::Ended;

        let participants: Vec<UserId> = self.active_members().map(|m| m.user_id()).collect();
        let mut winner: Option<(UserId, u32)> = None;
        for &user_id in &participants {
            let hp = self.hp.get(&user_id).copied().unwrap_or(0);
            if winner.is_none_or(|(_, best)| hp > best) {
                winner = Some((user_id, hp));
            }
        }
        let winner = winner.map(|(id, _)| id);
        self.winner = winner;

        let mut total_distances: BTreeMap<UserId, f64> = BTreeMap::new();
        for m in &self.members {
            total_distances.insert(m.user_id(), 0.0);
        }
        for result in &self.results {
            for g in result.guesses.iter().filter(|g| g.guess.is_some()) {
                *total_distances.entry(g.user_id).or_insert(0.0) += g.distance_km;
            }
        }

        let xp_awards = participants
            .iter()
            .map(|&user_id| {
                let mut xp = self.rules.xp_participation;
                if Some(user_id) == winner {
                    xp += self.rules.xp_win;
                }
                (user_id, xp)
            })
            .collect();

        Some(GameSummary {
            winner,
            total_distances,
            xp_awards,
        })
    }

    pub fn game_ended_message(&self, summary: &GameSummary) -> ServerMessage {
        ServerMessage::GameEnded {
            winner: summary.winner,
            total_distances: summary.total_distances.clone(),
            players: self.players(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mistduel_core::lobby::LobbySettings;
    use mistduel_core::player::PlayerInfo;
    use mistduel_core::test_helpers::{make_players, point_at_distance, sample_locations};

    use crate::lobby::GameRules;

    const T0: u64 = 1_000_000;

    fn lobby_with(n: usize, settings: LobbySettings) -> Lobby {
        let players = make_players(n);
        let mut lobby = Lobby::new(
            "ROUNDTST".to_string(),
            players[0].clone(),
            settings,
            GameRules::default(),
        );
        for p in players.into_iter().skip(1) {
            lobby.join(p).unwrap();
        }
        for id in 1..=n as UserId {
            lobby.set_presence(id, Presence::Online);
        }
        lobby
    }

    fn duel() -> Lobby {
        lobby_with(2, LobbySettings::default())
    }

    fn loc(i: usize) -> Location {
        Location::at(sample_locations()[i])
    }

    fn started_duel() -> Lobby {
        let mut lobby = duel();
        lobby.start_game(1, loc(0), T0).unwrap();
        lobby
    }

    fn target(lobby: &Lobby) -> Coordinates {
        lobby.round().unwrap().location.coords
    }

    #[test]
    fn start_game_initializes_hp_and_first_round() {
        let mut lobby = duel();
        let events = lobby.start_game(1, loc(0), T0).unwrap();
        assert_eq!(lobby.phase(), LobbyPhase::InGame);
        assert_eq!(lobby.hp().get(&1), Some(&6000));
        assert_eq!(lobby.hp().get(&2), Some(&6000));
        assert!(matches!(events[0], ServerMessage::GameStarted { timer: 240, .. }));
        match &events[1] {
            ServerMessage::RoundStarted {
                round,
                round_start_time,
                ..
            } => {
                assert_eq!(*round, 1);
                assert_eq!(*round_start_time, T0);
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(lobby.active_round(), Some(1));
        assert!(lobby.used_locations.contains(&loc(0).id));
    }

    #[test]
    fn start_game_preconditions() {
        let mut lobby = duel();
        assert!(matches!(
            lobby.start_game(2, loc(0), T0),
            Err(ActionError::NotHost)
        ));
        assert_eq!(lobby.phase(), LobbyPhase::Waiting);

        let mut solo = lobby_with(1, LobbySettings::default());
        assert!(matches!(
            solo.start_game(1, loc(0), T0),
            Err(ActionError::NotEnoughPlayers)
        ));

        let mut lobby = started_duel();
        assert!(matches!(
            lobby.start_game(1, loc(1), T0),
            Err(ActionError::WrongPhase)
        ));
    }

    #[test]
    fn second_guess_is_rejected() {
        let mut lobby = started_duel();
        let t = target(&lobby);
        let first = lobby.submit_guess(1, point_at_distance(t, 10.0), T0 + 1).unwrap();
        assert!(!first.round_complete);
        assert!(matches!(
            lobby.submit_guess(1, t, T0 + 2),
            Err(ActionError::AlreadyGuessed)
        ));
        assert_eq!(lobby.round().unwrap().guesses.len(), 1);
    }

    #[test]
    fn guess_validation() {
        let mut lobby = started_duel();
        assert!(matches!(
            lobby.submit_guess(1, Coordinates::new(120.0, 0.0), T0),
            Err(ActionError::InvalidCoordinates)
        ));
        assert!(matches!(
            lobby.submit_guess(9, Coordinates::new(0.0, 0.0), T0),
            Err(ActionError::Lobby(LobbyError::NotMember))
        ));
        assert!(matches!(
            lobby.submit_guess(1, Coordinates::new(0.0, 0.0), T0 + 240_000),
            Err(ActionError::NoActiveRound)
        ));
    }

    #[test]
    fn closer_guess_wins_and_deals_damage() {
        let mut lobby = started_duel();
        let t = target(&lobby);
        lobby.submit_guess(1, point_at_distance(t, 10.0), T0 + 1).unwrap();
        let second = lobby.submit_guess(2, point_at_distance(t, 300.0), T0 + 2).unwrap();
        assert!(second.round_complete);

        let outcome = lobby.end_round(1).unwrap();
        assert!(!outcome.game_over);
        match outcome.event {
            ServerMessage::RoundEnded {
                winner, damage, hp, ..
            } => {
                assert_eq!(winner, Some(1));
                assert!(damage > 0);
                assert_eq!(hp[&1], 6000);
                assert_eq!(hp[&2], 6000 - damage);
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(lobby.results().len(), 1);
        assert_eq!(lobby.active_round(), None);
    }

    #[test]
    fn end_round_is_idempotent() {
        let mut lobby = started_duel();
        let t = target(&lobby);
        lobby.submit_guess(1, t, T0 + 1).unwrap();
        assert!(lobby.end_round(1).is_some());
        assert!(lobby.end_round(1).is_none());
        assert!(lobby.end_round(2).is_none());
        assert_eq!(lobby.results().len(), 1);
    }

    #[test]
    fn missing_guess_scores_zero() {
        let mut lobby = started_duel();
        let t = target(&lobby);
        lobby.submit_guess(1, point_at_distance(t, 50.0), T0 + 1).unwrap();
        let outcome = lobby.end_round(1).unwrap();
        match outcome.event {
            ServerMessage::RoundEnded {
                winner,
                damage,
                results,
                ..
            } => {
                assert_eq!(winner, Some(1));
                assert_eq!(damage, 4000);
                let b = results.iter().find(|r| r.user_id == 2).unwrap();
                assert!(b.guess.is_none());
                assert_eq!(b.points, 0);
                assert!(b.distance_km >= 20_000.0);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_round_applies_flat_penalty() {
        let mut lobby = started_duel();
        let outcome = lobby.end_round(1).unwrap();
        match outcome.event {
            ServerMessage::RoundTimedout {
                hp, num_guesses, ..
            } => {
                assert_eq!(num_guesses, 0);
                assert_eq!(hp[&1], 5500);
                assert_eq!(hp[&2], 5500);
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(lobby.results()[0].timed_out);
    }

    #[test]
    fn tie_goes_to_first_joined() {
        let mut lobby = started_duel();
        let t = target(&lobby);
        let same = point_at_distance(t, 120.0);
        lobby.submit_guess(2, same, T0 + 1).unwrap();
        lobby.submit_guess(1, same, T0 + 2).unwrap();
        match lobby.end_round(1).unwrap().event {
            ServerMessage::RoundEnded { winner, damage, .. } => {
                assert_eq!(winner, Some(1));
                assert_eq!(damage, 0);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn depleted_hp_ends_game() {
        let mut lobby = started_duel();
        lobby.hp.insert(2, 100);
        let t = target(&lobby);
        lobby.submit_guess(1, t, T0 + 1).unwrap();
        let outcome = lobby.end_round(1).unwrap();
        assert!(outcome.game_over);
        assert_eq!(lobby.hp()[&2], 0);

        let summary = lobby.finish_game().unwrap();
        assert_eq!(lobby.phase(), LobbyPhase::Ended);
        assert_eq!(summary.winner, Some(1));
        assert_eq!(summary.xp_awards, vec![(1, 60), (2, 10)]);
        assert!(summary.total_distances[&1] < 1e-6);
        assert_eq!(summary.total_distances[&2], 0.0);
        assert!(lobby.finish_game().is_none());
    }

    #[test]
    fn capped_rounds_end_game() {
        let mut lobby = lobby_with(
            2,
            LobbySettings {
                total_rounds: Some(2),
                ..LobbySettings::default()
            },
        );
        lobby.start_game(1, loc(0), T0).unwrap();
        lobby.submit_guess(1, target(&lobby), T0 + 1).unwrap();
        lobby.submit_guess(2, target(&lobby), T0 + 1).unwrap();
        assert!(!lobby.end_round(1).unwrap().game_over);

        lobby.start_round(Some(1), loc(1), T0 + 10_000).unwrap();
        assert!(lobby.end_round(2).unwrap().game_over);
        assert!(matches!(
            lobby.check_start_round(None),
            Err(ActionError::RoundsExhausted)
        ));
    }

    #[test]
    fn round_start_preconditions() {
        let mut lobby = started_duel();
        assert!(matches!(
            lobby.start_round(Some(1), loc(1), T0),
            Err(ActionError::RoundAlreadyActive)
        ));
        lobby.end_round(1);
        assert!(matches!(
            lobby.start_round(Some(2), loc(1), T0),
            Err(ActionError::NotHost)
        ));
        let ev = lobby.start_round(None, loc(1), T0 + 5).unwrap();
        assert!(matches!(ev, ServerMessage::RoundStarted { round: 2, .. }));
    }

    #[test]
    fn offline_members_do_not_block_completion() {
        let mut lobby = started_duel();
        lobby.set_presence(2, Presence::Offline);
        let accepted = lobby.submit_guess(1, target(&lobby), T0 + 1).unwrap();
        assert!(accepted.round_complete);
    }

    #[test]
    fn left_member_is_not_scored() {
        let mut lobby = lobby_with(
            3,
            LobbySettings {
                max_players: 3,
                ..LobbySettings::default()
            },
        );
        lobby.start_game(1, loc(0), T0).unwrap();
        lobby.leave(3).unwrap();
        lobby.submit_guess(1, target(&lobby), T0 + 1).unwrap();
        let outcome = lobby.end_round(1).unwrap();
        match outcome.event {
            ServerMessage::RoundEnded { results, hp, .. } => {
                assert_eq!(results.len(), 2);
                assert_eq!(hp[&3], 6000);
            },
            other => panic!("unexpected {other:?}"),
        }
        let summary = lobby.finish_game().unwrap();
        assert!(summary.xp_awards.iter().all(|(id, _)| *id != 3));
    }

    #[test]
    fn snapshot_during_round() {
        let mut lobby = started_duel();
        lobby.submit_guess(2, Coordinates::new(1.0, 2.0), T0 + 1).unwrap();
        lobby.set_presence(2, Presence::Offline);
        let snap = lobby.snapshot(Some(2), T0 + 40_000);
        let gs = snap.game_state.unwrap();
        assert_eq!(gs.current_round, 1);
        assert_eq!(gs.timer, 200);
        assert!(gs.round_active);
        assert_eq!(gs.guessed, vec![2]);
        assert_eq!(gs.player_guess, Some(Coordinates::new(1.0, 2.0)));
        assert_eq!(gs.hp[&1], 6000);
        assert_eq!(snap.disconnected, vec![2]);

        let late = lobby.snapshot(Some(1), T0 + 999_000).game_state.unwrap();
        assert_eq!(late.timer, 0);
        assert!(late.player_guess.is_none());
    }

    #[test]
    fn game_ended_lists_players_after_xp() {
        let mut lobby = started_duel();
        let summary = lobby.finish_game().unwrap();
        lobby.record_xp(1, 160);
        match lobby.game_ended_message(&summary) {
            ServerMessage::GameEnded { players, .. } => {
                let p1: &PlayerInfo = players.iter().find(|p| p.user_id == 1).unwrap();
                assert_eq!(p1.xp, 160);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn hp_never_increases_and_winner_is_closest(
                d1 in 0.0f64..6000.0,
                d2 in 0.0f64..6000.0,
            ) {
                let mut lobby = started_duel();
                let t = target(&lobby);
                lobby.submit_guess(1, point_at_distance(t, d1), T0 + 1).unwrap();
                lobby.submit_guess(2, point_at_distance(t, d2), T0 + 1).unwrap();
                let outcome = lobby.end_round(1).unwrap();
                let ServerMessage::RoundEnded { winner, hp, .. } = outcome.event else {
                    panic!("expected round_ended");
                };
                prop_assert!(hp[&1] <= 6000 && hp[&2] <= 6000);
                let w = winner.unwrap();
                let results = &lobby.results()[0].guesses;
                let wd = results.iter().find(|g| g.user_id == w).unwrap().distance_km;
                prop_assert!(results.iter().all(|g| g.distance_km >= wd));
            }
        }
    }
}
