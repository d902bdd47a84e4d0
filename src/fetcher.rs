//! Concurrent per-zone forecast fetching
//!
//! Every location of a zone is fetched in one structured batch: all
//! location futures are created together, bounded by a semaphore, and
//! awaited together. Each provider call carries its own timeout, so the
//! zone's wall clock is bounded by its slowest location.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::future::{self, join_all};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::ZonecastError;
use crate::config::WeatherConfig;
use crate::models::{
    Alert, Coordinates, ForecastResult, ForecastSource, GridRef, Location, Zone,
    ZoneForecastBundle,
};
use crate::nws::{ForecastKind, ProviderError, WeatherProvider};

/// Step of a location fetch, reported with failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Grid,
    Forecast,
    Fallback,
    Alerts,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchStage::Grid => "grid",
            FetchStage::Forecast => "forecast",
            FetchStage::Fallback => "fallback",
            FetchStage::Alerts => "alerts",
        };
        f.write_str(name)
    }
}

/// Per-location fetch failure; never aborts the zone on its own
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{stage} request failed: {source}")]
    Provider {
        stage: FetchStage,
        #[source]
        source: ProviderError,
    },

    #[error("{stage} request timed out after {}s", .after.as_secs())]
    Timeout { stage: FetchStage, after: Duration },

    #[error("forecast contained no periods")]
    EmptyForecast,
}

impl FetchError {
    #[must_use]
    pub fn stage(&self) -> FetchStage {
        match self {
            FetchError::Provider { stage, .. } | FetchError::Timeout { stage, .. } => *stage,
            FetchError::EmptyForecast => FetchStage::Forecast,
        }
    }
}

/// Fetches zone forecasts through a [`WeatherProvider`]
///
/// One instance lives for one run; discovered grid references are cached
/// for its lifetime.
pub struct ForecastFetcher<P> {
    provider: P,
    limiter: Semaphore,
    call_timeout: Duration,
    fetch_alerts: bool,
    grid_cache: Mutex<HashMap<String, GridRef>>,
}

impl<P: WeatherProvider> ForecastFetcher<P> {
    pub fn new(provider: P, config: &WeatherConfig) -> Self {
        Self {
            provider,
            limiter: Semaphore::new(config.max_concurrency.max(1)),
            call_timeout: config.timeout(),
            fetch_alerts: config.fetch_alerts,
            grid_cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run a provider call under the concurrency ceiling and timeout
    async fn bounded<T>(
        &self,
        stage: FetchStage,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, FetchError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| FetchError::Provider {
                stage,
                source: ProviderError::Transport {
                    message: e.to_string(),
                },
            })?;

        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ProviderError::Timeout)) | Err(_) => Err(FetchError::Timeout {
                stage,
                after: self.call_timeout,
            }),
            Ok(Err(source)) => Err(FetchError::Provider { stage, source }),
        }
    }

    fn cached_grid(&self, coordinates: &Coordinates) -> Option<GridRef> {
        self.grid_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&coordinates.cache_key())
            .cloned()
    }

    /// Grid for a location, discovering and caching it when only coordinates are known
    pub async fn grid_for(&self, location: &Location) -> Result<GridRef, FetchError> {
        if let Some(grid) = location.addressing.grid() {
            return Ok(grid.clone());
        }

        // Addressing always carries either a grid or coordinates
        let Some(coordinates) = location.addressing.coordinates() else {
            return Err(FetchError::Provider {
                stage: FetchStage::Grid,
                source: ProviderError::Malformed {
                    message: "location has no addressing".to_string(),
                },
            });
        };

        if let Some(grid) = self.cached_grid(&coordinates) {
            debug!(location = %location.display_name, "Grid cache hit");
            return Ok(grid);
        }

        let grid = self
            .bounded(FetchStage::Grid, self.provider.resolve_grid(coordinates))
            .await?;
        self.grid_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(coordinates.cache_key(), grid.clone());
        Ok(grid)
    }

    async fn fetch_periods(
        &self,
        location: &Location,
    ) -> Result<(Vec<crate::models::Period>, ForecastSource), FetchError> {
        let grid = self.grid_for(location).await?;

        let primary = self
            .bounded(
                FetchStage::Forecast,
                self.provider.forecast(&grid, ForecastKind::Hourly),
            )
            .await;

        let (periods, source) = match primary {
            Ok(periods) => (periods, ForecastSource::Primary),
            Err(FetchError::Provider {
                source: ProviderError::NotFound { .. },
                ..
            }) => {
                debug!(location = %location.display_name, "Hourly forecast missing, using daily forecast");
                let periods = self
                    .bounded(
                        FetchStage::Fallback,
                        self.provider.forecast(&grid, ForecastKind::Daily),
                    )
                    .await?;
                (periods, ForecastSource::Fallback)
            }
            Err(e) => return Err(e),
        };

        if periods.is_empty() {
            return Err(FetchError::EmptyForecast);
        }
        Ok((periods, source))
    }

    async fn fetch_alerts(&self, location: &Location) -> Vec<Alert> {
        let Some(coordinates) = location.addressing.coordinates() else {
            return Vec::new();
        };
        if !self.fetch_alerts {
            return Vec::new();
        }

        match self
            .bounded(FetchStage::Alerts, self.provider.active_alerts(coordinates))
            .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(location = %location.display_name, stage = %e.stage(), error = %e, "Alert lookup failed, continuing without alerts");
                Vec::new()
            }
        }
    }

    /// Forecast and alerts for one location
    pub async fn fetch_location(&self, location: &Location) -> Result<ForecastResult, FetchError> {
        let (forecast, alerts) =
            future::join(self.fetch_periods(location), self.fetch_alerts(location)).await;
        let (periods, source) = forecast?;

        Ok(ForecastResult {
            location_name: location.display_name.clone(),
            periods,
            source,
            alerts,
        })
    }

    /// Fetch every location of `zone`; fails only when none succeeded
    #[tracing::instrument(skip(self, zone), fields(zone = %zone.name))]
    pub async fn fetch_zone(&self, zone: &Zone) -> Result<ZoneForecastBundle, ZonecastError> {
        let outcomes = join_all(zone.locations.iter().map(|l| self.fetch_location(l))).await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (location, outcome) in zone.locations.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => warn!(
                    zone = %zone.name,
                    location = %location.display_name,
                    stage = %e.stage(),
                    error = %e,
                    "Location fetch failed"
                ),
            }
        }

        if results.is_empty() {
            return Err(ZonecastError::ZoneDataExhausted {
                zone: zone.name.clone(),
                attempted: zone.locations.len(),
            });
        }

        info!(
            zone = %zone.name,
            succeeded = results.len(),
            attempted = zone.locations.len(),
            "Zone forecasts fetched"
        );
        Ok(ZoneForecastBundle {
            zone: zone.clone(),
            results,
        })
    }

    /// Resolve and store grid references for coordinate-only locations
    ///
    /// Returns `(resolved, failed)` counts.
    pub async fn fill_grids(&self, zones: &mut [Zone]) -> (usize, usize) {
        let mut resolved = 0;
        let mut failed = 0;

        for zone in zones.iter_mut() {
            let pending: Vec<usize> = zone
                .locations
                .iter()
                .enumerate()
                .filter(|(_, l)| l.addressing.grid().is_none())
                .map(|(i, _)| i)
                .collect();

            let grids = join_all(
                pending
                    .iter()
                    .map(|&i| self.grid_for(&zone.locations[i])),
            )
            .await;

            for (i, grid) in pending.into_iter().zip(grids) {
                let location = &mut zone.locations[i];
                match grid {
                    Ok(grid) => {
                        location.addressing = location.addressing.with_grid(grid);
                        resolved += 1;
                    }
                    Err(e) => {
                        warn!(zone = %zone.name, location = %location.display_name, error = %e, "Grid lookup failed");
                        failed += 1;
                    }
                }
            }
        }

        (resolved, failed)
    }
}
