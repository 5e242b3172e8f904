use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;
use crate::lobby::LobbyPhase;
use crate::player::{PlayerInfo, UserId};
use crate::rank::Rank;

/// HP per member, keyed by user id. Ordered so snapshots serialize stably.
pub type HpMap = BTreeMap<UserId, u32>;

/// Serde adapter for maps keyed by `UserId`.
///
/// JSON object keys are strings, and inside a tagged enum they reach the
/// deserializer as plain strings. Keys are read as strings and parsed.
pub mod user_keyed {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::player::UserId;

    pub fn serialize<S, V>(map: &BTreeMap<UserId, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<UserId, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        BTreeMap::<String, V>::deserialize(deserializer)?
            .into_iter()
            .map(|(key, value)| {
                key.parse::<UserId>()
                    .map(|id| (id, value))
                    .map_err(|_| D::Error::custom(format!("invalid user id key: {key}")))
            })
            .collect()
    }
}

/// Messages a client sends over the lobby channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    GameStart,
    SubmitGuess {
        lat: f64,
        lon: f64,
    },
    RoundStart,
    RoundEnd,
    GameEnd,
    Broadcast {
        message: String,
    },
    PlayerReconnect,
    Spectate {
        heading: f64,
        pitch: f64,
        zoom: f64,
        num_player: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lat: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lng: Option<f64>,
    },
    GuessPreview {
        num_player: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lat: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lng: Option<f64>,
    },
}

impl ClientMessage {
    /// Whether this is a spectator tick rather than a game action.
    pub fn is_spectator_tick(&self) -> bool {
        matches!(self, Self::Spectate { .. } | Self::GuessPreview { .. })
    }
}

/// One member's outcome in a resolved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuessResult {
    pub user_id: UserId,
    /// `None` when the member did not guess before the round ended.
    pub guess: Option<Coordinates>,
    pub distance_km: f64,
    pub points: u32,
    pub damage: u32,
}

/// A resolved round. Never changes once appended to a lobby's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    /// 1-based.
    pub round: u32,
    pub target: Coordinates,
    pub guesses: Vec<GuessResult>,
    pub winner: Option<UserId>,
    /// Largest single hit dealt this round.
    pub damage: u32,
    #[serde(with = "user_keyed")]
    pub hp_after: HpMap,
    /// Set when the round timed out with no guesses and the flat penalty applied.
    #[serde(default)]
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankUp {
    pub user_id: UserId,
    pub old_rank: Rank,
    pub new_rank: Rank,
}

/// Public view of the active round's target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationView {
    pub lat: f64,
    pub lon: f64,
    pub url: String,
}

/// In-game part of a lobby snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    /// 1-based index of the current (or last) round; 0 before the first.
    pub current_round: u32,
    pub location: Option<LocationView>,
    pub round_start_time: Option<u64>,
    /// Seconds left on the round timer, clamped at zero.
    pub timer: u32,
    pub round_active: bool,
    #[serde(with = "user_keyed")]
    pub hp: HpMap,
    /// Members who already guessed in the current round.
    pub guessed: Vec<UserId>,
    /// The recipient's own guess this round, if any.
    pub player_guess: Option<Coordinates>,
}

/// Full, read-only view of a lobby. Sent on reconnect and served by the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub invite_code: String,
    pub host: Option<UserId>,
    pub players: Vec<PlayerInfo>,
    pub phase: LobbyPhase,
    pub max_players: u8,
    pub total_rounds: Option<u32>,
    pub round_timer_secs: u32,
    pub disconnected: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<GameStateSnapshot>,
}

/// Events the server pushes to members and spectators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PlayerJoined {
        players: Vec<PlayerInfo>,
        host: Option<UserId>,
    },
    PlayerLeft {
        players: Vec<PlayerInfo>,
        host: Option<UserId>,
    },
    GameStarted {
        #[serde(with = "user_keyed")]
        hp: HpMap,
        timer: u32,
    },
    RoundStarted {
        round: u32,
        lat: f64,
        lon: f64,
        url: String,
        timer: u32,
        round_start_time: u64,
    },
    PlayerGuessed {
        player: UserId,
    },
    RoundEnded {
        round: u32,
        winner: Option<UserId>,
        damage: u32,
        #[serde(with = "user_keyed")]
        hp: HpMap,
        results: Vec<GuessResult>,
        lat: f64,
        lon: f64,
    },
    RoundTimedout {
        round: u32,
        #[serde(with = "user_keyed")]
        hp: HpMap,
        num_guesses: u32,
    },
    GameEnded {
        winner: Option<UserId>,
        #[serde(with = "user_keyed")]
        total_distances: BTreeMap<UserId, f64>,
        players: Vec<PlayerInfo>,
    },
    Broadcast {
        player: UserId,
        message: String,
    },
    RankUp {
        rank_ups: Vec<RankUp>,
    },
    PlayerDisconnected {
        player: UserId,
    },
    PlayerReconnected {
        player: UserId,
    },
    /// Spelling matches what deployed clients listen for.
    #[serde(rename = "reconnect_succes")]
    ReconnectSuccess(Box<LobbySnapshot>),
    Error {
        message: String,
    },
    Spectate {
        player: UserId,
        num_player: u8,
        heading: f64,
        pitch: f64,
        zoom: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lat: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lng: Option<f64>,
    },
    GuessPreview {
        player: UserId,
        num_player: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lat: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lng: Option<f64>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Milestones mirrored to spectators alongside the tick stream.
    pub fn is_spectator_milestone(&self) -> bool {
        matches!(
            self,
            Self::GameStarted { .. }
                | Self::RoundStarted { .. }
                | Self::RoundEnded { .. }
                | Self::RoundTimedout { .. }
                | Self::GameEnded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_parse_from_tagged_json() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "submit_guess", "lat": 1.5, "lon": -2.0}))
                .unwrap();
        assert_eq!(msg, ClientMessage::SubmitGuess { lat: 1.5, lon: -2.0 });

        let msg: ClientMessage = serde_json::from_value(json!({"type": "game_start"})).unwrap();
        assert_eq!(msg, ClientMessage::GameStart);

        let msg: ClientMessage = serde_json::from_value(
            json!({"type": "spectate", "heading": 90.0, "pitch": 0.0, "zoom": 1.0, "num_player": 1}),
        )
        .unwrap();
        assert!(msg.is_spectator_tick());
        match msg {
            ClientMessage::Spectate { lat, lng, .. } => {
                assert!(lat.is_none());
                assert!(lng.is_none());
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_value::<ClientMessage>(json!({"type": "self_destruct"}));
        assert!(err.is_err());
    }

    #[test]
    fn hp_map_serializes_with_string_keys() {
        let mut hp = HpMap::new();
        hp.insert(1, 6000);
        hp.insert(2, 3900);
        let v = serde_json::to_value(ServerMessage::GameStarted { hp, timer: 240 }).unwrap();
        assert_eq!(v["type"], "game_started");
        assert_eq!(v["hp"]["1"], 6000);
        assert_eq!(v["hp"]["2"], 3900);
    }

    #[test]
    fn reconnect_uses_legacy_tag() {
        let snap = LobbySnapshot {
            invite_code: "AbCdEfGh".into(),
            host: Some(1),
            players: vec![PlayerInfo::placeholder(1)],
            phase: LobbyPhase::Waiting,
            max_players: 2,
            total_rounds: None,
            round_timer_secs: 240,
            disconnected: vec![],
            game_state: None,
        };
        let v = serde_json::to_value(ServerMessage::ReconnectSuccess(Box::new(snap))).unwrap();
        assert_eq!(v["type"], "reconnect_succes");
        assert_eq!(v["host"], 1);
        assert_eq!(v["phase"], "waiting");
        assert!(v.get("game_state").is_none());
    }

    #[test]
    fn milestones_are_classified() {
        assert!(ServerMessage::GameStarted { hp: HpMap::new(), timer: 1 }.is_spectator_milestone());
        assert!(!ServerMessage::PlayerGuessed { player: 1 }.is_spectator_milestone());
        assert!(!ServerMessage::error("x").is_spectator_milestone());
    }
}
