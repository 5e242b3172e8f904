use serde::{Deserialize, Serialize};

/// Player rank, derived from accumulated XP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    Ashborn,
    #[serde(rename = "Fog Runner")]
    FogRunner,
    #[serde(rename = "Tin Sight")]
    TinSight,
    #[serde(rename = "Brass Deceiver")]
    BrassDeceiver,
    #[serde(rename = "Steel Pusher")]
    SteelPusher,
    #[serde(rename = "Iron Puller")]
    IronPuller,
    #[serde(rename = "Atium Shadow")]
    AtiumShadow,
    Mistborn,
    #[serde(rename = "Lord Mistborn")]
    LordMistborn,
}

/// Lower XP bound of each rank, ascending. Each band is `[min, next_min)`;
/// the last band is unbounded.
pub const RANK_THRESHOLDS: &[(u64, Rank)] = &[
    (0, Rank::Ashborn),
    (100, Rank::FogRunner),
    (300, Rank::TinSight),
    (600, Rank::BrassDeceiver),
    (1000, Rank::SteelPusher),
    (1600, Rank::IronPuller),
    (2500, Rank::AtiumShadow),
    (4000, Rank::Mistborn),
    (6500, Rank::LordMistborn),
];

impl Rank {
    /// The rank whose XP band contains `xp`.
    pub fn for_xp(xp: u64) -> Self {
        RANK_THRESHOLDS
            .iter()
            .rev()
            .find(|(min, _)| xp >= *min)
            .map(|&(_, rank)| rank)
            .unwrap_or(Rank::Ashborn)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Ashborn => "Ashborn",
            Self::FogRunner => "Fog Runner",
            Self::TinSight => "Tin Sight",
            Self::BrassDeceiver => "Brass Deceiver",
            Self::SteelPusher => "Steel Pusher",
            Self::IronPuller => "Iron Puller",
            Self::AtiumShadow => "Atium Shadow",
            Self::Mistborn => "Mistborn",
            Self::LordMistborn => "Lord Mistborn",
        }
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Returns `Some((old, new))` when moving from `old_xp` to `new_xp` crosses a
/// rank boundary.
pub fn rank_change(old_xp: u64, new_xp: u64) -> Option<(Rank, Rank)> {
    let old = Rank::for_xp(old_xp);
    let new = Rank::for_xp(new_xp);
    (old != new).then_some((old, new))
}
