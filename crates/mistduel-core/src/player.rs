use serde::{Deserialize, Serialize};

use crate::rank::Rank;

/// Unique identifier for an authenticated user, issued by the auth service.
pub type UserId = u64;

/// Public profile of a lobby member as shown to every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub user_id: UserId,
    pub name: String,
    pub avatar: Option<String>,
    pub xp: u64,
    pub rank: Rank,
}

impl PlayerInfo {
    /// Profile used when the profile store has no record for a user.
    pub fn placeholder(user_id: UserId) -> Self {
        Self {
            user_id,
            name: format!("Player{user_id}"),
            avatar: None,
            xp: 0,
            rank: Rank::for_xp(0),
        }
    }
}
