//! `zonecast` - rotating US weather zone forecasts turned into blog posts
//!
//! Each run picks the next zone in a fixed rotation, fetches NWS forecasts
//! for its cities, has Gemini write a post, archives it locally and
//! publishes it to Blogger.

pub mod archive;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gemini;
pub mod html;
pub mod logging;
pub mod models;
pub mod nws;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod rotation;
pub mod synthesizer;
pub mod zones;

// Re-export core types for public API
pub use archive::LocalArchive;
pub use config::ZonecastConfig;
pub use error::ZonecastError;
pub use fetcher::ForecastFetcher;
pub use gemini::{GeminiClient, TextGenerator};
pub use models::{GeneratedPost, Location, Zone, ZoneForecastBundle};
pub use nws::{NwsClient, WeatherProvider};
pub use pipeline::{LivePipeline, Pipeline, RunOptions, RunReport, Stage};
pub use publisher::{BloggerApi, BloggerClient, Publisher};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use rotation::Rotation;
pub use synthesizer::ContentSynthesizer;
pub use zones::ZoneCatalog;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, ZonecastError>;
