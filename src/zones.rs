//! Zone catalog
//!
//! Static mapping of rotation zones to their US cities. Every built-in city
//! carries coordinates and a pre-resolved NWS grid reference; catalogs
//! loaded from a file may omit the grid and have it discovered at fetch time.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::models::{Addressing, Coordinates, GridRef, Location, Zone};

/// Zone lookup errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Unknown zone: {name}")]
    UnknownZone { name: String },

    #[error("Invalid zone catalog: {message}")]
    Invalid { message: String },
}

/// (city, latitude, longitude, office, grid x, grid y)
type CityRow = (&'static str, f64, f64, &'static str, u32, u32);

const EASTERN: &[CityRow] = &[
    ("Boston, MA", 42.3601, -71.0589, "BOX", 71, 90),
    ("Worcester, MA", 42.2626, -71.8023, "BOX", 47, 81),
    ("Springfield, MA", 42.1015, -72.5898, "BOX", 22, 69),
    ("Providence, RI", 41.8240, -71.4128, "BOX", 64, 64),
    ("Hartford, CT", 41.7658, -72.6734, "BOX", 22, 54),
    ("New Haven, CT", 41.3083, -72.9279, "OKX", 66, 68),
    ("Bridgeport, CT", 41.1792, -73.1894, "OKX", 58, 60),
    ("Portland, ME", 43.6591, -70.2568, "GYX", 72, 58),
    ("Bangor, ME", 44.8012, -68.7778, "CAR", 66, 62),
    ("Baltimore, MD", 39.2904, -76.6122, "LWX", 109, 91),
    ("Wilmington, DE", 39.7391, -75.5398, "PHI", 38, 64),
    ("Newark, NJ", 40.7357, -74.1724, "OKX", 27, 35),
    ("Jersey City, NJ", 40.7178, -74.0431, "OKX", 32, 35),
    ("New York, NY", 40.7128, -74.0060, "OKX", 33, 35),
    ("Buffalo, NY", 42.8864, -78.8784, "BUF", 36, 47),
];

const SOUTHERN: &[CityRow] = &[
    ("Birmingham, AL", 33.5186, -86.8104, "BMX", 59, 84),
    ("Little Rock, AR", 34.7465, -92.2896, "LZK", 82, 73),
    ("Miami, FL", 25.7617, -80.1918, "MFL", 110, 50),
    ("Jacksonville, FL", 30.3322, -81.6557, "JAX", 66, 65),
    ("Tampa, FL", 27.9506, -82.4572, "TBW", 71, 98),
    ("Orlando, FL", 28.5383, -81.3792, "MLB", 26, 68),
    ("Atlanta, GA", 33.7490, -84.3880, "FFC", 51, 87),
    ("New Orleans, LA", 29.9511, -90.0715, "LIX", 68, 88),
    ("Baton Rouge, LA", 30.4515, -91.1871, "LIX", 25, 109),
    ("Jackson, MS", 32.2988, -90.1848, "JAN", 76, 63),
    ("Albuquerque, NM", 35.0844, -106.6504, "ABQ", 98, 121),
    ("Oklahoma City, OK", 35.4676, -97.5164, "OUN", 97, 94),
    ("Nashville, TN", 36.1627, -86.7816, "OHX", 50, 57),
    ("Houston, TX", 29.7604, -95.3698, "HGX", 63, 95),
    ("Dallas, TX", 32.7767, -96.7970, "FWD", 89, 104),
];

const CENTRAL: &[CityRow] = &[
    ("Denver, CO", 39.7392, -104.9903, "BOU", 63, 62),
    ("Colorado Springs, CO", 38.8339, -104.8214, "PUB", 90, 91),
    ("Chicago, IL", 41.8781, -87.6298, "LOT", 76, 73),
    ("Indianapolis, IN", 39.7684, -86.1581, "IND", 58, 69),
    ("Des Moines, IA", 41.5868, -93.6250, "DMX", 73, 49),
    ("Wichita, KS", 37.6872, -97.3301, "ICT", 62, 34),
    ("Louisville, KY", 38.2527, -85.7585, "LMK", 50, 78),
    ("Detroit, MI", 42.3314, -83.0458, "DTX", 66, 34),
    ("Minneapolis, MN", 44.9778, -93.2650, "MPX", 108, 72),
    ("Kansas City, MO", 39.0997, -94.5786, "EAX", 44, 51),
    ("St. Louis, MO", 38.6270, -90.1994, "LSX", 95, 74),
    ("Omaha, NE", 41.2565, -95.9345, "OAX", 83, 60),
    ("Fargo, ND", 46.8772, -96.7898, "FGF", 100, 57),
    ("Sioux Falls, SD", 43.5446, -96.7311, "FSD", 98, 64),
    ("Milwaukee, WI", 43.0389, -87.9065, "MKX", 88, 65),
];

const WESTERN: &[CityRow] = &[
    ("Phoenix, AZ", 33.4484, -112.0740, "PSR", 159, 58),
    ("Tucson, AZ", 32.2226, -110.9747, "TWC", 91, 49),
    ("Mesa, AZ", 33.4152, -111.8315, "PSR", 168, 55),
    ("Los Angeles, CA", 34.0522, -118.2437, "LOX", 155, 45),
    ("San Diego, CA", 32.7157, -117.1611, "SGX", 57, 14),
    ("San Jose, CA", 37.3382, -121.8863, "MTR", 99, 82),
    ("San Francisco, CA", 37.7749, -122.4194, "MTR", 85, 105),
    ("Sacramento, CA", 38.5816, -121.4944, "STO", 41, 68),
    ("Fresno, CA", 36.7378, -119.7871, "HNX", 52, 100),
    ("Portland, OR", 45.5152, -122.6784, "PQR", 113, 104),
    ("Eugene, OR", 44.0521, -123.0868, "PQR", 85, 39),
    ("Las Vegas, NV", 36.1699, -115.1398, "VEF", 123, 98),
    ("Reno, NV", 39.5296, -119.8138, "REV", 45, 106),
    ("Salt Lake City, UT", 40.7608, -111.8910, "SLC", 100, 175),
    ("Seattle, WA", 47.6062, -122.3321, "SEW", 125, 68),
];

fn builtin_zone(name: &str, id: &str, rows: &[CityRow]) -> Zone {
    let locations = rows
        .iter()
        .map(|&(city, lat, lon, office, x, y)| {
            Location::new(
                city,
                Addressing::Full {
                    coordinates: Coordinates::new(lat, lon),
                    grid: GridRef::new(office, x, y),
                },
            )
        })
        .collect();

    Zone {
        name: name.to_string(),
        id: id.to_string(),
        locations,
    }
}

/// Read-only lookup of zones by name
#[derive(Debug, Clone)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
}

impl ZoneCatalog {
    /// Build a catalog, rejecting duplicate names and empty zones
    pub fn new(zones: Vec<Zone>) -> std::result::Result<Self, CatalogError> {
        if zones.is_empty() {
            return Err(CatalogError::Invalid {
                message: "catalog has no zones".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for zone in &zones {
            if !seen.insert(zone.name.as_str()) {
                return Err(CatalogError::Invalid {
                    message: format!("duplicate zone name '{}'", zone.name),
                });
            }
            if zone.locations.is_empty() {
                return Err(CatalogError::Invalid {
                    message: format!("zone '{}' has no locations", zone.name),
                });
            }
        }

        Ok(Self { zones })
    }

    /// The four US zones shipped with the binary
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            zones: vec![
                builtin_zone("Eastern Zone", "eastern", EASTERN),
                builtin_zone("Southern Zone", "southern", SOUTHERN),
                builtin_zone("Central Zone", "central", CENTRAL),
                builtin_zone("Western Zone", "western", WESTERN),
            ],
        }
    }

    /// Load a catalog previously written by [`ZoneCatalog::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read zone catalog {}", path.display()))?;
        let zones: Vec<Zone> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse zone catalog {}", path.display()))?;
        Ok(Self::new(zones)?)
    }

    /// Write the catalog as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.zones)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write zone catalog {}", path.display()))?;
        Ok(())
    }

    pub fn zone(&self, name: &str) -> std::result::Result<&Zone, CatalogError> {
        self.zones
            .iter()
            .find(|z| z.name == name)
            .ok_or_else(|| CatalogError::UnknownZone {
                name: name.to_string(),
            })
    }

    pub fn locations_for_zone(&self, name: &str) -> std::result::Result<&[Location], CatalogError> {
        self.zone(name).map(|z| z.locations.as_slice())
    }

    /// Zone names in processing order
    #[must_use]
    pub fn rotation_order(&self) -> Vec<String> {
        self.zones.iter().map(|z| z.name.clone()).collect()
    }

    #[must_use]
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut [Zone] {
        &mut self.zones
    }
}
