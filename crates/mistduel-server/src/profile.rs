use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use mistduel_core::player::{PlayerInfo, UserId};
use mistduel_core::rank::Rank;

/// XP totals before and after an award.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpAward {
    pub old_xp: u64,
    pub new_xp: u64,
}

impl XpAward {
    pub fn rank_change(&self) -> Option<(Rank, Rank)> {
        mistduel_core::rank::rank_change(self.old_xp, self.new_xp)
    }
}

/// Profile and XP storage owned by another service.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The user's public profile, or a placeholder if none is stored.
    async fn profile(&self, user_id: UserId) -> PlayerInfo;

    /// Add `delta` XP to the user and persist the recomputed rank.
    async fn award_xp(&self, user_id: UserId, delta: u64) -> XpAward;
}

/// Process-local profile store.
#[derive(Default)]
pub struct InMemoryProfiles {
    profiles: RwLock<HashMap<UserId, PlayerInfo>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a profile.
    pub async fn insert(&self, info: PlayerInfo) {
        self.profiles.write().await.insert(info.user_id, info);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfiles {
    async fn profile(&self, user_id: UserId) -> PlayerInfo {
        self.profiles
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| PlayerInfo::placeholder(user_id))
    }

    async fn award_xp(&self, user_id: UserId, delta: u64) -> XpAward {
        let mut profiles = self.profiles.write().await;
        let info = profiles
            .entry(user_id)
            .or_insert_with(|| PlayerInfo::placeholder(user_id));
        let old_xp = info.xp;
        info.xp = old_xp.saturating_add(delta);
        info.rank = Rank::for_xp(info.xp);
        XpAward {
            old_xp,
            new_xp: info.xp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_user_gets_placeholder() {
        let store = InMemoryProfiles::new();
        let p = store.profile(9).await;
        assert_eq!(p, PlayerInfo::placeholder(9));
    }

    #[tokio::test]
    async fn award_updates_xp_and_rank() {
        let store = InMemoryProfiles::new();
        let mut seeded = PlayerInfo::placeholder(1);
        seeded.xp = 80;
        store.insert(seeded).await;

        let award = store.award_xp(1, 60).await;
        assert_eq!(award, XpAward { old_xp: 80, new_xp: 140 });
        assert_eq!(award.rank_change(), Some((Rank::Ashborn, Rank::FogRunner)));

        let p = store.profile(1).await;
        assert_eq!(p.xp, 140);
        assert_eq!(p.rank, Rank::FogRunner);

        let award = store.award_xp(1, 10).await;
        assert_eq!(award.rank_change(), None);
    }
}
