//! Distance-to-points curve and the points-gap-to-damage mapping.
//!
//! Everything here is pure: the same inputs always give the same outputs.

use serde::{Deserialize, Serialize};

/// Points awarded for a perfect guess.
pub const MAX_POINTS: u32 = 5000;

/// Knots of the piecewise-linear points curve as `(distance_km, points)`.
/// Beyond the last knot a guess is worth nothing.
const CURVE: &[(f64, f64)] = &[
    (0.0, 5000.0),
    (10.0, 4800.0),
    (50.0, 4000.0),
    (200.0, 3000.0),
    (500.0, 2000.0),
    (5000.0, 0.0),
];

/// Points for a guess `distance_km` away from the target.
///
/// Monotonically non-increasing in distance, `MAX_POINTS` at zero and zero
/// for anything at or beyond 5000 km. Negative or NaN distances are treated
/// as a miss.
pub fn points_for_distance(distance_km: f64) -> u32 {
    if distance_km.is_nan() {
        return 0;
    }
    let d = distance_km.max(0.0);
    for pair in CURVE.windows(2) {
        let (d0, p0) = pair[0];
        let (d1, p1) = pair[1];
        if d <= d1 {
            let t = (d - d0) / (d1 - d0);
            let p = p0 + (p1 - p0) * t;
            return p.round().clamp(0.0, MAX_POINTS as f64) as u32;
        }
    }
    0
}

/// How a round's points gap becomes HP damage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageRule {
    /// Upper bound on damage dealt by a single round.
    pub max_damage: u32,
    /// Scale applied to the points gap before capping.
    pub multiplier: f64,
}

impl Default for DamageRule {
    fn default() -> Self {
        Self {
            max_damage: 6000,
            multiplier: 1.0,
        }
    }
}

impl DamageRule {
    /// Damage dealt to a member who scored `points_loser` against a winner
    /// who scored `points_winner`. Zero when the loser did at least as well.
    pub fn damage(&self, points_winner: u32, points_loser: u32) -> u32 {
        if points_winner <= points_loser {
            return 0;
        }
        let gap = f64::from(points_winner - points_loser);
        let scaled = (gap * self.multiplier.max(0.0)).round();
        if scaled >= f64::from(self.max_damage) {
            self.max_damage
        } else {
            scaled as u32
        }
    }
}
