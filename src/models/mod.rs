//! Data models for the zonecast pipeline
//!
//! This module contains the core domain models organized by concern:
//! - Zone: named groups of locations and their provider addressing
//! - Forecast: per-location forecast results and the per-zone bundle
//! - Post: generated, archived and remote blog posts

pub mod forecast;
pub mod post;
pub mod zone;

// Re-export all public types for convenient access
pub use forecast::{Alert, ForecastResult, ForecastSource, Period, ZoneForecastBundle};
pub use post::{GeneratedPost, PostMeta, RemotePost};
pub use zone::{Addressing, Coordinates, GridRef, Location, Zone};
