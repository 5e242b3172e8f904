//! Round targets. The imagery provider itself is external; a location only
//! carries a reference the client can resolve.

use std::collections::HashSet;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::Deserialize;

use mistduel_core::geo::Coordinates;
use mistduel_core::net::messages::LocationView;

/// A round target plus the opaque imagery reference clients open.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Stable key used to avoid repeating a target within one lobby.
    pub id: String,
    pub coords: Coordinates,
    pub imagery_ref: String,
}

impl Location {
    pub fn at(coords: Coordinates) -> Self {
        Self {
            id: format!("{:.5},{:.5}", coords.lat, coords.lon),
            coords,
            imagery_ref: format!(
                "https://www.google.com/maps/@{},{},17z",
                coords.lat, coords.lon
            ),
        }
    }

    pub fn view(&self) -> LocationView {
        LocationView {
            lat: self.coords.lat,
            lon: self.coords.lon,
            url: self.imagery_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// Every location in the pool was already used by this lobby.
    Exhausted,
    Unavailable(String),
}

impl std::fmt::Display for LocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => write!(f, "no unused locations left"),
            Self::Unavailable(m) => write!(f, "location source unavailable: {m}"),
        }
    }
}

impl std::error::Error for LocationError {}

/// Supplies round targets. Implementations must never return a location whose
/// id is in `exclude`.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn next_location(&self, exclude: &HashSet<String>) -> Result<Location, LocationError>;
}

/// A fixed pool of locations, picked uniformly at random.
pub struct StaticLocationPool {
    locations: Vec<Location>,
}

#[derive(Deserialize)]
struct LocationFile {
    locations: Vec<LocationEntry>,
}

#[derive(Deserialize)]
struct LocationEntry {
    lat: f64,
    lon: f64,
    #[serde(default)]
    url: Option<String>,
}

const BUILTIN: &[(f64, f64)] = &[
    (48.858_37, 2.294_48),
    (40.689_25, -74.044_50),
    (-33.856_78, 151.215_30),
    (35.658_58, 139.745_43),
    (-22.951_92, -43.210_49),
    (51.500_73, -0.124_62),
    (41.890_21, 12.492_23),
    (27.175_02, 78.042_16),
    (29.979_24, 31.134_20),
    (-13.163_14, -72.545_00),
    (37.819_93, -122.478_25),
    (55.752_02, 37.617_49),
    (39.916_67, 116.397_22),
    (-33.962_86, 18.409_90),
    (64.146_58, -21.942_66),
    (1.283_81, 103.860_56),
    (19.432_61, -99.133_21),
    (-34.603_72, -58.381_59),
    (60.169_86, 24.938_38),
    (-41.286_46, 174.776_24),
];

impl StaticLocationPool {
    pub fn new(locations: Vec<Location>) -> Self {
        Self { locations }
    }

    /// The default pool of well-known landmarks.
    pub fn builtin() -> Self {
        Self::new(
            BUILTIN
                .iter()
                .map(|&(lat, lon)| Location::at(Coordinates::new(lat, lon)))
                .collect(),
        )
    }

    /// Parse a TOML document with a `[[locations]]` array of `lat`/`lon`
    /// (and optional `url`) entries. Invalid coordinates are rejected.
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let file: LocationFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut locations = Vec::with_capacity(file.locations.len());
        for (i, entry) in file.locations.into_iter().enumerate() {
            let coords = Coordinates::new(entry.lat, entry.lon);
            if !coords.is_valid() {
                return Err(format!("location #{i} has invalid coordinates"));
            }
            let mut location = Location::at(coords);
            if let Some(url) = entry.url {
                location.imagery_ref = url;
            }
            locations.push(location);
        }
        if locations.is_empty() {
            return Err("location file is empty".to_string());
        }
        Ok(Self::new(locations))
    }

    /// Load the pool from `path`, or the built-in pool when `path` is None.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        match path {
            None => Ok(Self::builtin()),
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read {path}: {e}"))?;
                let pool = Self::from_toml_str(&content)?;
                tracing::info!(path, count = pool.len(), "Loaded location pool");
                Ok(pool)
            },
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    fn pick(&self, exclude: &HashSet<String>) -> Option<Location> {
        let candidates: Vec<&Location> = self
            .locations
            .iter()
            .filter(|l| !exclude.contains(&l.id))
            .collect();
        candidates.choose(&mut rand::rng()).map(|l| (*l).clone())
    }
}

#[async_trait]
impl LocationSource for StaticLocationPool {
    async fn next_location(&self, exclude: &HashSet<String>) -> Result<Location, LocationError> {
        self.pick(exclude).ok_or(LocationError::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_repeats_excluded_locations() {
        let pool = StaticLocationPool::builtin();
        let mut used = HashSet::new();
        for _ in 0..pool.len() {
            let loc = pool.next_location(&used).await.unwrap();
            assert!(used.insert(loc.id));
        }
        assert_eq!(
            pool.next_location(&used).await,
            Err(LocationError::Exhausted)
        );
    }

    #[test]
    fn builtin_locations_are_valid_and_distinct() {
        let pool = StaticLocationPool::builtin();
        let ids: HashSet<_> = pool.locations.iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids.len(), pool.len());
        assert!(pool.locations.iter().all(|l| l.coords.is_valid()));
    }

    #[test]
    fn imagery_ref_points_at_coordinates() {
        let loc = Location::at(Coordinates::new(12.5, -3.25));
        assert_eq!(loc.imagery_ref, "https://www.google.com/maps/@12.5,-3.25,17z");
        let view = loc.view();
        assert_eq!(view.lat, 12.5);
        assert_eq!(view.url, loc.imagery_ref);
    }

    #[test]
    fn parses_location_file() {
        let pool = StaticLocationPool::from_toml_str(
            r#"
[[locations]]
lat = 10.0
lon = 20.0

[[locations]]
lat = -5.5
lon = 100.25
url = "pano://abc"
"#,
        )
        .unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.locations[1].imagery_ref, "pano://abc");
    }

    #[test]
    fn rejects_bad_location_files() {
        assert!(StaticLocationPool::from_toml_str("locations = []").is_err());
        assert!(
            StaticLocationPool::from_toml_str("[[locations]]\nlat = 95.0\nlon = 0.0\n").is_err()
        );
        assert!(StaticLocationPool::from_toml_str("not toml [").is_err());
    }
}
