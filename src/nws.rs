//! National Weather Service API client
//!
//! Grid discovery (`/points`), hourly and daily gridpoint forecasts and
//! active alerts. The NWS rejects requests without an identifying
//! `User-Agent`, so the client cannot be built without one.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::ZonecastError;
use crate::config::WeatherConfig;
use crate::models::{Alert, Coordinates, GridRef, Period};

/// Forecast granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastKind {
    Hourly,
    Daily,
}

impl ForecastKind {
    fn endpoint(self) -> &'static str {
        match self {
            ForecastKind::Hourly => "forecast/hourly",
            ForecastKind::Daily => "forecast",
        }
    }
}

/// Weather provider call errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("malformed response: {message}")]
    Malformed { message: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::Malformed {
                message: e.to_string(),
            }
        } else {
            ProviderError::Transport {
                message: e.to_string(),
            }
        }
    }
}

/// Source of gridded forecasts and alerts
pub trait WeatherProvider {
    /// Map coordinates onto the provider's forecast grid
    async fn resolve_grid(&self, coordinates: Coordinates) -> Result<GridRef, ProviderError>;

    /// Forecast periods for a grid cell, sorted by start time
    async fn forecast(&self, grid: &GridRef, kind: ForecastKind)
    -> Result<Vec<Period>, ProviderError>;

    async fn active_alerts(&self, coordinates: Coordinates) -> Result<Vec<Alert>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    properties: PointsProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointsProperties {
    grid_id: Option<String>,
    grid_x: Option<u32>,
    grid_y: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: ForecastProperties,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<WirePeriod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePeriod {
    start_time: DateTime<FixedOffset>,
    temperature: Option<WireQuantity>,
    temperature_unit: Option<String>,
    wind_speed: Option<WireWindSpeed>,
    #[serde(default)]
    short_forecast: String,
}

/// Bare number (`"temperature": 41`) or a unit-coded quantity
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireQuantity {
    Number(f64),
    Quantity {
        value: Option<f64>,
        #[serde(rename = "unitCode")]
        unit_code: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireWindSpeed {
    Text(String),
    Quantity {
        value: Option<f64>,
        #[serde(rename = "unitCode")]
        unit_code: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
struct AlertProperties {
    event: Option<String>,
    headline: Option<String>,
    severity: Option<String>,
}

/// `wmoUnit:degC` -> `C`
fn unit_suffix(unit_code: &str) -> &str {
    match unit_code.rsplit(':').next().unwrap_or(unit_code) {
        "degC" => "C",
        "degF" => "F",
        other => other,
    }
}

impl WirePeriod {
    fn into_period(self) -> Period {
        let (temperature, temperature_unit) = match self.temperature {
            Some(WireQuantity::Number(value)) => (Some(value), self.temperature_unit),
            Some(WireQuantity::Quantity { value, unit_code }) => (
                value,
                unit_code
                    .as_deref()
                    .map(|u| unit_suffix(u).to_string())
                    .or(self.temperature_unit),
            ),
            None => (None, self.temperature_unit),
        };

        let wind_speed = match self.wind_speed {
            Some(WireWindSpeed::Text(text)) => Some(text),
            Some(WireWindSpeed::Quantity {
                value: Some(value),
                unit_code,
            }) => {
                let unit = match unit_code.as_deref().map(unit_suffix) {
                    Some("km_h-1") => "km/h",
                    Some("m_s-1") => "m/s",
                    _ => "mph",
                };
                Some(format!("{value:.0} {unit}"))
            }
            Some(WireWindSpeed::Quantity { value: None, .. }) | None => None,
        };

        Period {
            start_time: self.start_time,
            temperature,
            temperature_unit,
            wind_speed,
            short_text: self.short_forecast,
        }
    }
}

/// NWS REST client
pub struct NwsClient {
    client: Client,
    base_url: String,
}

impl NwsClient {
    /// Create a new client; fails without a contact `User-Agent`
    pub fn new(config: &WeatherConfig) -> Result<Self, ZonecastError> {
        let user_agent = config
            .user_agent
            .as_deref()
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .ok_or_else(|| ZonecastError::config("NWS_USER_AGENT is required by the NWS API"))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/geo+json"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| ZonecastError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        debug!(url = %url, "NWS request");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed {
            message: format!("{url}: {e}"),
        })
    }
}

impl WeatherProvider for NwsClient {
    #[tracing::instrument(skip(self), fields(point = %coordinates.point()))]
    async fn resolve_grid(&self, coordinates: Coordinates) -> Result<GridRef, ProviderError> {
        let url = format!("{}/points/{}", self.base_url, coordinates.point());
        let points: PointsResponse = self.get_json(&url).await?;

        match points.properties {
            PointsProperties {
                grid_id: Some(office),
                grid_x: Some(x),
                grid_y: Some(y),
            } => Ok(GridRef::new(office, x, y)),
            _ => Err(ProviderError::Malformed {
                message: format!("{url}: missing gridId/gridX/gridY"),
            }),
        }
    }

    #[tracing::instrument(skip(self), fields(grid = %grid.path()))]
    async fn forecast(
        &self,
        grid: &GridRef,
        kind: ForecastKind,
    ) -> Result<Vec<Period>, ProviderError> {
        let url = format!(
            "{}/gridpoints/{}/{}",
            self.base_url,
            grid.path(),
            kind.endpoint()
        );
        let forecast: ForecastResponse = self.get_json(&url).await?;

        let mut periods: Vec<Period> = forecast
            .properties
            .periods
            .into_iter()
            .map(WirePeriod::into_period)
            .collect();
        periods.sort_by_key(|p| p.start_time);
        Ok(periods)
    }

    #[tracing::instrument(skip(self), fields(point = %coordinates.point()))]
    async fn active_alerts(&self, coordinates: Coordinates) -> Result<Vec<Alert>, ProviderError> {
        let url = format!(
            "{}/alerts/active?point={}",
            self.base_url,
            urlencoding::encode(&coordinates.point())
        );
        let alerts: AlertsResponse = self.get_json(&url).await?;

        Ok(alerts
            .features
            .into_iter()
            .filter_map(|f| {
                let AlertProperties {
                    event,
                    headline,
                    severity,
                } = f.properties;
                event.map(|event| Alert {
                    event,
                    headline,
                    severity,
                })
            })
            .collect())
    }
}
