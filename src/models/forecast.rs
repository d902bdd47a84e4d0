//! Forecast results per location and the aggregate handed to synthesis

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::Zone;

/// One forecast period (an hour for hourly data, half a day for daily data)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Period {
    pub start_time: DateTime<FixedOffset>,
    pub temperature: Option<f64>,
    /// Unit of `temperature` ("F" or "C")
    pub temperature_unit: Option<String>,
    /// Provider text such as "10 mph" or "5 to 10 mph"
    pub wind_speed: Option<String>,
    pub short_text: String,
}

impl Period {
    /// Leading numeric part of the wind speed text
    #[must_use]
    pub fn wind_speed_value(&self) -> Option<f64> {
        let text = self.wind_speed.as_deref()?;
        text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .filter(|part| !part.is_empty())
            .filter_map(|part| part.parse::<f64>().ok())
            .reduce(f64::max)
    }

    /// Format temperature with unit
    #[must_use]
    pub fn format_temperature(&self) -> String {
        match (self.temperature, self.temperature_unit.as_deref()) {
            (Some(t), Some(unit)) => format!("{t:.0}{unit}"),
            (Some(t), None) => format!("{t:.0}"),
            _ => "N/A".to_string(),
        }
    }
}

/// Which endpoint produced a forecast
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForecastSource {
    /// Fine grained (hourly) forecast
    Primary,
    /// Coarser multi-day forecast used after the primary returned 404
    Fallback,
}

/// Active weather alert at a location
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Alert {
    pub event: String,
    pub headline: Option<String>,
    pub severity: Option<String>,
}

impl Alert {
    /// Headline if present, otherwise the event name
    #[must_use]
    pub fn summary(&self) -> &str {
        self.headline.as_deref().unwrap_or(&self.event)
    }
}

/// Successful forecast fetch for a single location
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ForecastResult {
    pub location_name: String,
    /// Time-ascending, never empty
    pub periods: Vec<Period>,
    pub source: ForecastSource,
    pub alerts: Vec<Alert>,
}

/// Forecast data for a zone as passed to content synthesis
#[derive(Debug, Clone)]
pub struct ZoneForecastBundle {
    pub zone: Zone,
    /// Successful results in catalog order; may omit failed locations
    pub results: Vec<ForecastResult>,
}

impl ZoneForecastBundle {
    #[must_use]
    pub fn total_alerts(&self) -> usize {
        self.results.iter().map(|r| r.alerts.len()).sum()
    }

    /// Number of catalog locations that did not make it into the bundle
    #[must_use]
    pub fn missing_locations(&self) -> usize {
        self.zone.locations.len().saturating_sub(self.results.len())
    }
}
