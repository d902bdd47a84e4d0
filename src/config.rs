//! Configuration management for `zonecast`
//!
//! Handles loading configuration from an optional TOML file, `ZONECAST_*`
//! environment overrides and the plain deployment variables
//! (`GEMINI_API_KEY`, `NWS_USER_AGENT`, `BLOG_ID`, ...), and provides
//! validation for all configuration settings.

use crate::ZonecastError;
use ::config::{Config, Environment, File};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZonecastConfig {
    /// Weather provider (NWS) settings
    #[serde(default)]
    pub weather: WeatherConfig,
    /// Text generation (Gemini) settings
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Blogger publishing settings
    #[serde(default)]
    pub publishing: PublishingConfig,
    /// Per-run behaviour and rotation state
    #[serde(default)]
    pub run: RunConfig,
    /// Local archive settings
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Weather API configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Contact string sent as `User-Agent`, required by the NWS
    pub user_agent: Option<String>,
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,
    /// Timeout for a single provider call
    #[serde(default = "default_weather_timeout")]
    pub timeout_seconds: u64,
    /// Maximum number of in-flight provider calls per zone
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_true")]
    pub fetch_alerts: bool,
}

/// Generation API configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Attempts including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_generation_timeout")]
    pub timeout_seconds: u64,
}

/// Blogger configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingConfig {
    pub blog_id: Option<String>,
    /// Google OAuth client secrets JSON
    pub client_secrets_file: Option<PathBuf>,
    /// Stored OAuth token, refreshed in place
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_blogger_base_url")]
    pub base_url: String,
    /// `false` keeps posts local (dry run)
    #[serde(default = "default_true")]
    pub publish: bool,
    #[serde(default)]
    pub as_draft: bool,
    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,
    #[serde(default = "default_search_pages")]
    pub search_pages: u32,
    /// Title of the auxiliary archive page; `None` disables it
    #[serde(default = "default_archive_page_title")]
    pub archive_page_title: Option<String>,
    /// Public blog URL used for internal links and the sitemap
    pub blog_base_url: Option<String>,
}

/// Where the rotation token lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    File,
    Keyspace,
}

/// Run configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_posts_per_run")]
    pub posts_per_run: u32,
    #[serde(default = "default_state_backend")]
    pub state_backend: StateBackend,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_keyspace_path")]
    pub keyspace_path: PathBuf,
    /// JSON zone catalog replacing the built-in one
    pub zones_file: Option<PathBuf>,
}

/// Local archive configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_dir")]
    pub output_dir: PathBuf,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_weather_base_url() -> String {
    "https://api.weather.gov".to_string()
}

fn default_weather_timeout() -> u64 {
    12
}

fn default_max_concurrency() -> usize {
    8
}

fn default_generation_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_temperature() -> f32 {
    0.6
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    5
}

fn default_max_jitter() -> u64 {
    1000
}

fn default_generation_timeout() -> u64 {
    120
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_blogger_base_url() -> String {
    "https://www.googleapis.com/blogger/v3".to_string()
}

fn default_search_page_size() -> u32 {
    50
}

fn default_search_pages() -> u32 {
    1
}

fn default_archive_page_title() -> Option<String> {
    Some("Weather Blog Archive".to_string())
}

fn default_posts_per_run() -> u32 {
    1
}

fn default_state_backend() -> StateBackend {
    StateBackend::File
}

fn default_state_file() -> PathBuf {
    PathBuf::from("last_zone.txt")
}

fn default_keyspace_path() -> PathBuf {
    PathBuf::from(".zonecast-state")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("output_posts")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            base_url: default_weather_base_url(),
            timeout_seconds: default_weather_timeout(),
            max_concurrency: default_max_concurrency(),
            fetch_alerts: true,
        }
    }
}

impl WeatherConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_generation_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_attempts: default_max_attempts(),
            base_delay_seconds: default_base_delay(),
            max_jitter_ms: default_max_jitter(),
            timeout_seconds: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.base_delay_seconds),
            Duration::from_millis(self.max_jitter_ms),
        )
    }
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            blog_id: None,
            client_secrets_file: None,
            token_file: default_token_file(),
            base_url: default_blogger_base_url(),
            publish: true,
            as_draft: false,
            search_page_size: default_search_page_size(),
            search_pages: default_search_pages(),
            archive_page_title: default_archive_page_title(),
            blog_base_url: None,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            posts_per_run: default_posts_per_run(),
            state_backend: default_state_backend(),
            state_file: default_state_file(),
            keyspace_path: default_keyspace_path(),
            zones_file: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: default_archive_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Plain deployment variables and the keys they override
const PLAIN_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("GEMINI_API_KEY", "generation.api_key"),
    ("NWS_USER_AGENT", "weather.user_agent"),
    ("BLOG_ID", "publishing.blog_id"),
    ("CLIENT_SECRETS_FILE", "publishing.client_secrets_file"),
    ("TOKEN_FILE", "publishing.token_file"),
    ("BLOG_BASE_URL", "publishing.blog_base_url"),
    ("PUBLISH", "publishing.publish"),
    ("POSTS_PER_RUN", "run.posts_per_run"),
];

impl ZonecastConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let explicit = config_path.is_some();
        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if explicit && !config_file.exists() {
            return Err(ZonecastError::config(format!(
                "Config file {} does not exist",
                config_file.display()
            ))
            .into());
        }

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(::config::FileFormat::Toml),
            );
        }

        // ZONECAST_<SECTION>__<KEY> overrides
        builder = builder.add_source(
            Environment::with_prefix("ZONECAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in PLAIN_ENV_OVERRIDES {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder
                .set_override_option(*key, value)
                .with_context(|| format!("Failed to apply {var}"))?;
        }

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config: ZonecastConfig = settings
            .try_deserialize()
            .map_err(|e| ZonecastError::config(format!("Failed to deserialize configuration: {e}")))?;

        // Apply defaults for missing values
        config.apply_defaults();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("zonecast").join("config.toml"))
    }

    /// Apply default values to missing configuration fields
    pub fn apply_defaults(&mut self) {
        if self.weather.base_url.is_empty() {
            self.weather.base_url = default_weather_base_url();
        }
        if self.weather.timeout_seconds == 0 {
            self.weather.timeout_seconds = default_weather_timeout();
        }
        if self.weather.max_concurrency == 0 {
            self.weather.max_concurrency = default_max_concurrency();
        }
        if self.generation.base_url.is_empty() {
            self.generation.base_url = default_generation_base_url();
        }
        if self.generation.model.is_empty() {
            self.generation.model = default_model();
        }
        if self.generation.max_attempts == 0 {
            self.generation.max_attempts = default_max_attempts();
        }
        if self.publishing.base_url.is_empty() {
            self.publishing.base_url = default_blogger_base_url();
        }
        if self.publishing.search_page_size == 0 {
            self.publishing.search_page_size = default_search_page_size();
        }
        if self.publishing.search_pages == 0 {
            self.publishing.search_pages = default_search_pages();
        }
        if self.run.posts_per_run == 0 {
            self.run.posts_per_run = default_posts_per_run();
        }
        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
        if let Some(url) = self.publishing.blog_base_url.as_mut() {
            *url = url.trim_end_matches('/').to_string();
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    /// Validate the values a full run cannot start without
    ///
    /// Remote publishing credentials are required even for dry runs so a
    /// misconfigured deployment is caught before anything is generated.
    pub fn validate_for_run(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("GEMINI_API_KEY", is_blank(self.generation.api_key.as_deref())),
            ("NWS_USER_AGENT", is_blank(self.weather.user_agent.as_deref())),
            ("BLOG_ID", is_blank(self.publishing.blog_id.as_deref())),
            (
                "CLIENT_SECRETS_FILE",
                self.publishing
                    .client_secrets_file
                    .as_ref()
                    .is_none_or(|p| p.as_os_str().is_empty()),
            ),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(ZonecastError::config(format!(
                "Required configuration missing: {}",
                missing.join(", ")
            ))
            .into());
        }
        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.weather.timeout_seconds > 300 {
            return Err(ZonecastError::config("Weather API timeout cannot exceed 300 seconds").into());
        }

        if self.weather.max_concurrency > 64 {
            return Err(ZonecastError::config("Weather fetch concurrency cannot exceed 64").into());
        }

        if self.generation.max_attempts > 10 {
            return Err(ZonecastError::config("Generation max attempts cannot exceed 10").into());
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(
                ZonecastError::config("Generation temperature must be between 0.0 and 2.0").into(),
            );
        }

        if self.publishing.search_page_size > 500 {
            return Err(ZonecastError::config("Search page size cannot exceed 500").into());
        }

        if self.run.posts_per_run > 16 {
            return Err(ZonecastError::config("Posts per run cannot exceed 16").into());
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(ZonecastError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(ZonecastError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        for (name, url) in [
            ("Weather API base URL", &self.weather.base_url),
            ("Generation API base URL", &self.generation.base_url),
            ("Blogger API base URL", &self.publishing.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ZonecastError::config(format!(
                    "{name} must be a valid HTTP or HTTPS URL"
                ))
                .into());
            }
        }

        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}
