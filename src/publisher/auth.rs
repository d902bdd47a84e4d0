//! OAuth bearer tokens for the Blogger API
//!
//! Tokens come from a stored token file produced by a prior consent flow.
//! A token is reused while it has more than five minutes left, otherwise
//! it is refreshed with the stored refresh token and written back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::PublishError;

const REFRESH_MARGIN_SECS: i64 = 5 * 60;
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Supplies bearer tokens for API calls
pub trait TokenProvider {
    async fn access_token(&self) -> Result<String, PublishError>;
}

/// Persisted token; also reads `token.json` files written by Google's
/// Python client (`token` field, RFC 3339 `expiry`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(alias = "token")]
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; `0` when unknown, which forces a refresh
    #[serde(default, deserialize_with = "expiry_from_any")]
    pub expiry: i64,
}

impl StoredToken {
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expiry - now.timestamp() > REFRESH_MARGIN_SECS
    }
}

fn expiry_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Expiry {
        Seconds(i64),
        Timestamp(String),
        Missing(Option<()>),
    }

    match Expiry::deserialize(deserializer)? {
        Expiry::Seconds(secs) => Ok(secs),
        Expiry::Timestamp(raw) => parse_expiry(&raw).map_err(serde::de::Error::custom),
        Expiry::Missing(_) => Ok(0),
    }
}

fn parse_expiry(raw: &str) -> Result<i64, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(&format!("{raw}Z")))
        .map(|dt| dt.timestamp())
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

/// Token provider backed by a client secrets file and a token file
pub struct OAuthTokenProvider {
    client: BasicClient,
    token_file: PathBuf,
    current: Mutex<Option<StoredToken>>,
}

impl OAuthTokenProvider {
    pub fn from_files(
        client_secrets_file: &Path,
        token_file: impl Into<PathBuf>,
    ) -> Result<Self, PublishError> {
        let raw = std::fs::read_to_string(client_secrets_file).map_err(|e| {
            PublishError::authentication(format!(
                "cannot read client secrets {}: {e}",
                client_secrets_file.display()
            ))
        })?;
        let file: ClientSecretsFile = serde_json::from_str(&raw).map_err(|e| {
            PublishError::authentication(format!("invalid client secrets file: {e}"))
        })?;
        let secrets = file.installed.or(file.web).ok_or_else(|| {
            PublishError::authentication("client secrets file has no 'installed' or 'web' section")
        })?;

        let auth_url = AuthUrl::new(secrets.auth_uri.unwrap_or_else(|| DEFAULT_AUTH_URI.to_string()))
            .map_err(|e| PublishError::authentication(format!("invalid auth URI: {e}")))?;
        let token_url =
            TokenUrl::new(secrets.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()))
                .map_err(|e| PublishError::authentication(format!("invalid token URI: {e}")))?;

        let client = BasicClient::new(
            ClientId::new(secrets.client_id),
            Some(ClientSecret::new(secrets.client_secret)),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            client,
            token_file: token_file.into(),
            current: Mutex::new(None),
        })
    }

    async fn load_stored(&self) -> Result<StoredToken, PublishError> {
        let raw = tokio::fs::read_to_string(&self.token_file).await.map_err(|e| {
            PublishError::authentication(format!(
                "no usable token at {} ({e}); complete the consent flow first",
                self.token_file.display()
            ))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| PublishError::authentication(format!("invalid token file: {e}")))
    }

    async fn persist(&self, token: &StoredToken) -> Result<(), PublishError> {
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| PublishError::authentication(e.to_string()))?;
        tokio::fs::write(&self.token_file, json).await.map_err(|e| {
            PublishError::authentication(format!(
                "failed to store refreshed token at {}: {e}",
                self.token_file.display()
            ))
        })
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<StoredToken, PublishError> {
        let token_response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| PublishError::authentication(format!("token refresh failed: {e}")))?;

        let access_token = token_response.access_token().secret().clone();
        let new_refresh_token = token_response
            .refresh_token()
            .map(|t| t.secret().clone())
            .unwrap_or_else(|| refresh_token.to_string());
        let expires_in = token_response
            .expires_in()
            .map_or(3600, |d| i64::try_from(d.as_secs()).unwrap_or(3600));

        Ok(StoredToken {
            access_token,
            refresh_token: Some(new_refresh_token),
            expiry: Utc::now().timestamp() + expires_in,
        })
    }
}

impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self) -> Result<String, PublishError> {
        let mut current = self.current.lock().await;

        let token = match current.take() {
            Some(token) => token,
            None => self.load_stored().await?,
        };

        if token.is_fresh(Utc::now()) {
            debug!("Reusing stored access token");
            let access = token.access_token.clone();
            *current = Some(token);
            return Ok(access);
        }

        let refresh = token.refresh_token.clone().ok_or_else(|| {
            PublishError::authentication("token expired and no refresh token is stored")
        })?;

        let refreshed = self.refresh_token(&refresh).await?;
        info!("Access token refreshed");
        if let Err(e) = self.persist(&refreshed).await {
            warn!(error = %e, "Refreshed token kept in memory only");
        }

        let access = refreshed.access_token.clone();
        *current = Some(refreshed);
        Ok(access)
    }
}
