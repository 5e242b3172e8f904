pub mod geo;
pub mod lobby;
pub mod net;
pub mod player;
pub mod rank;
pub mod scoring;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::geo::{Coordinates, EARTH_RADIUS_KM};
    use crate::player::{PlayerInfo, UserId};

    /// Create `n` placeholder players with sequential IDs starting at 1.
    pub fn make_players(n: usize) -> Vec<PlayerInfo> {
        (0..n)
            .map(|i| PlayerInfo::placeholder(i as UserId + 1))
            .collect()
    }

    /// A point `km` due north of `target` (or due south near the north pole),
    /// so `distance_km(target, result)` is `km` up to float error.
    pub fn point_at_distance(target: Coordinates, km: f64) -> Coordinates {
        let dlat = (km / EARTH_RADIUS_KM).to_degrees();
        let lat = if target.lat + dlat <= 90.0 {
            target.lat + dlat
        } else {
            target.lat - dlat
        };
        Coordinates::new(lat, target.lon)
    }

    /// A fixed, well-spread set of targets for deterministic location pools.
    pub fn sample_locations() -> Vec<Coordinates> {
        vec![
            Coordinates::new(48.8584, 2.2945),
            Coordinates::new(40.6892, -74.0445),
            Coordinates::new(-33.8568, 151.2153),
            Coordinates::new(35.6586, 139.7454),
            Coordinates::new(-22.9519, -43.2105),
        ]
    }

}
