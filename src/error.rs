//! Error types and handling for the `zonecast` pipeline

use thiserror::Error;

use crate::publisher::PublishError;
use crate::synthesizer::SynthesisError;
use crate::zones::CatalogError;

/// Main error type for the `zonecast` application
#[derive(Error, Debug)]
pub enum ZonecastError {
    /// Missing or invalid configuration, fatal before any work starts
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Zone lookup failures
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Every location of a zone failed to fetch
    #[error("No forecast data for {zone}: all {attempted} locations failed")]
    ZoneDataExhausted { zone: String, attempted: usize },

    /// Content generation failed for good
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// Remote publishing failed
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// General application errors
    #[error("Application error: {message}")]
    General { message: String },
}

impl ZonecastError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new general error
    pub fn general<S: Into<String>>(message: S) -> Self {
        Self::General {
            message: message.into(),
        }
    }

    /// Whether the error should stop the process before any zone is touched
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ZonecastError::Config { .. })
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ZonecastError::Config { message } => {
                format!("Configuration error: {message}. Check your environment and config file.")
            }
            ZonecastError::Catalog(err) => err.to_string(),
            ZonecastError::ZoneDataExhausted { zone, .. } => {
                format!("The weather service returned no usable data for {zone}. It will be retried next run.")
            }
            ZonecastError::Synthesis(_) => {
                "Post generation failed. The zone will be retried next run.".to_string()
            }
            ZonecastError::Publish(_) => {
                "Publishing to the blog failed. The local copy was kept and the zone will be retried next run."
                    .to_string()
            }
            ZonecastError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
            ZonecastError::General { message } => message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = ZonecastError::config("missing GEMINI_API_KEY");
        assert!(matches!(config_err, ZonecastError::Config { .. }));
        assert!(config_err.is_fatal());

        let exhausted = ZonecastError::ZoneDataExhausted {
            zone: "Eastern Zone".to_string(),
            attempted: 3,
        };
        assert!(!exhausted.is_fatal());
        assert!(exhausted.to_string().contains("all 3 locations"));
    }

    #[test]
    fn test_user_messages() {
        let config_err = ZonecastError::config("NWS_USER_AGENT is not set");
        assert!(config_err.user_message().contains("NWS_USER_AGENT"));

        let exhausted = ZonecastError::ZoneDataExhausted {
            zone: "Western Zone".to_string(),
            attempted: 15,
        };
        assert!(exhausted.user_message().contains("Western Zone"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ZonecastError = io_err.into();
        assert!(matches!(err, ZonecastError::Io { .. }));
    }
}
