use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a generated invite code.
pub const INVITE_CODE_LEN: usize = 8;

const INVITE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Per-lobby settings, fixed when the lobby is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySettings {
    pub max_players: u8,
    /// `None` plays until a member's HP reaches zero.
    pub total_rounds: Option<u32>,
    pub round_timer_secs: u32,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            max_players: 2,
            total_rounds: None,
            round_timer_secs: 240,
        }
    }
}

/// Lifecycle phase of a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyPhase {
    Waiting,
    InGame,
    Ended,
}

/// Generate a random URL-safe invite code. Uniqueness is the caller's job.
pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Whether `code` has the shape of an invite code.
pub fn is_valid_invite_code(code: &str) -> bool {
    code.len() == INVITE_CODE_LEN && code.bytes().all(|b| INVITE_ALPHABET.contains(&b))
}
