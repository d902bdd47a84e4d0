//! Zone and location models with weather provider addressing

use serde::{Deserialize, Serialize};

/// Geographic coordinates in decimal degrees
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Format as the `lat,lon` point used in provider URLs
    #[must_use]
    pub fn point(&self) -> String {
        format!("{:.4},{:.4}", self.latitude, self.longitude)
    }

    /// Round coordinates for cache key generation
    #[must_use]
    pub fn rounded(&self, precision: u32) -> (f64, f64) {
        let multiplier = 10_f64.powi(i32::try_from(precision).unwrap_or(4));
        let lat = (self.latitude * multiplier).round() / multiplier;
        let lon = (self.longitude * multiplier).round() / multiplier;
        (lat, lon)
    }

    /// Key used to memoize grid discovery within a run
    #[must_use]
    pub fn cache_key(&self) -> String {
        let (lat, lon) = self.rounded(4);
        format!("points:{lat:.4}:{lon:.4}")
    }
}

/// Provider grid reference (forecast office plus grid cell)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct GridRef {
    pub office: String,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl GridRef {
    #[must_use]
    pub fn new(office: impl Into<String>, grid_x: u32, grid_y: u32) -> Self {
        Self {
            office: office.into(),
            grid_x,
            grid_y,
        }
    }

    /// Path segment below `/gridpoints`
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{},{}", self.office, self.grid_x, self.grid_y)
    }
}

/// How a location is addressed at the weather provider
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Addressing {
    /// Both coordinates and a pre-resolved grid
    Full { coordinates: Coordinates, grid: GridRef },
    /// Grid only; alerts cannot be queried
    Grid { grid: GridRef },
    /// Coordinates only; the grid is discovered at fetch time
    Coordinates { coordinates: Coordinates },
}

impl Addressing {
    #[must_use]
    pub fn grid(&self) -> Option<&GridRef> {
        match self {
            Addressing::Full { grid, .. } | Addressing::Grid { grid } => Some(grid),
            Addressing::Coordinates { .. } => None,
        }
    }

    #[must_use]
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            Addressing::Full { coordinates, .. } | Addressing::Coordinates { coordinates } => {
                Some(*coordinates)
            }
            Addressing::Grid { .. } => None,
        }
    }

    /// Attach a resolved grid, keeping the coordinates
    #[must_use]
    pub fn with_grid(&self, grid: GridRef) -> Self {
        match self.coordinates() {
            Some(coordinates) => Addressing::Full { coordinates, grid },
            None => Addressing::Grid { grid },
        }
    }
}

/// A single place whose forecast goes into a zone's post
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    /// Display name (e.g. "Boston, MA")
    pub display_name: String,
    pub addressing: Addressing,
}

impl Location {
    #[must_use]
    pub fn new(display_name: impl Into<String>, addressing: Addressing) -> Self {
        Self {
            display_name: display_name.into(),
            addressing,
        }
    }
}

/// A named group of locations processed together as one rotation unit
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Zone {
    pub name: String,
    /// Short identifier used in compact summaries
    pub id: String,
    pub locations: Vec<Location>,
}
