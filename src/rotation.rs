//! Round-robin zone rotation persisted between runs
//!
//! The persisted token is the name of the last zone that completed. It is
//! read once at the start of a run and written once after a successful
//! publish. Concurrent runs are not supported.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use fjall::Keyspace;
use tokio::task;

const LAST_ZONE_KEY: &str = "last_zone";

/// Durable storage for the rotation token
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Last completed zone, `None` when nothing was stored yet
    async fn read(&self) -> Result<Option<String>>;
    async fn write(&self, zone: &str) -> Result<()>;
}

/// Plain UTF-8 text file holding the zone name
pub struct FileRotationStore {
    path: PathBuf,
}

impl FileRotationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RotationStore for FileRotationStore {
    async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read rotation state {}", self.path.display())),
        }
    }

    async fn write(&self, zone: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, zone)
            .await
            .with_context(|| format!("Failed to write rotation state {}", self.path.display()))
    }
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
    Ok(store.get(key)?.map(|v| v.to_vec()))
}

/// Rotation token kept in an embedded `fjall` keyspace
pub struct KeyspaceRotationStore {
    store: Keyspace,
}

impl KeyspaceRotationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = fjall::Database::builder(&path).open()?;
        let items = db.keyspace("rotation", fjall::KeyspaceCreateOptions::default)?;
        Ok(Self { store: items })
    }
}

#[async_trait]
impl RotationStore for KeyspaceRotationStore {
    #[tracing::instrument(name = "read_rotation", level = "debug", skip(self))]
    async fn read(&self) -> Result<Option<String>> {
        let store = self.store.clone();
        let key = LAST_ZONE_KEY.as_bytes().to_vec();

        let maybe_bytes = task::spawn_blocking(move || get_from_store(store, key)).await??;
        maybe_bytes
            .map(|bytes| String::from_utf8(bytes).map_err(|e| anyhow!("Stored zone is not UTF-8: {e}")))
            .transpose()
    }

    #[tracing::instrument(name = "write_rotation", level = "debug", skip(self))]
    async fn write(&self, zone: &str) -> Result<()> {
        let store = self.store.clone();
        let key = LAST_ZONE_KEY.as_bytes().to_vec();
        let value = zone.as_bytes().to_vec();

        task::spawn_blocking(move || store.insert(key, value)).await??;
        Ok(())
    }
}

/// Pure successor computation over the rotation order
///
/// Unknown or missing tokens restart at the first zone.
#[must_use]
pub fn successor<'a>(order: &'a [String], last: Option<&str>) -> Option<&'a str> {
    let first = order.first()?;
    let next = last
        .and_then(|last| order.iter().position(|z| z == last))
        .map_or(first, |idx| &order[(idx + 1) % order.len()]);
    Some(next.as_str())
}

/// Rotation over a fixed zone order backed by a [`RotationStore`]
pub struct Rotation {
    store: Box<dyn RotationStore>,
    order: Vec<String>,
}

impl Rotation {
    pub fn new(store: Box<dyn RotationStore>, order: Vec<String>) -> Result<Self> {
        if order.is_empty() {
            return Err(crate::ZonecastError::config("Rotation order is empty").into());
        }
        Ok(Self { store, order })
    }

    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Zone to process next; never fails, corrupt state degrades to the first zone
    pub async fn next_zone(&self) -> String {
        let last = match self.store.read().await {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!(error = %e, "Rotation state unreadable, starting from the first zone");
                None
            }
        };

        if let Some(last) = last.as_deref()
            && !self.order.iter().any(|z| z == last)
        {
            tracing::warn!(last_zone = %last, "Stored zone is not in the rotation, starting over");
        }

        // order is non-empty, checked in new()
        successor(&self.order, last.as_deref())
            .unwrap_or(self.order[0].as_str())
            .to_string()
    }

    /// Persist `zone` as completed; returns `false` when the write failed
    pub async fn record_completion(&self, zone: &str) -> bool {
        match self.store.write(zone).await {
            Ok(()) => {
                tracing::info!(zone = %zone, "Rotation advanced");
                true
            }
            Err(e) => {
                tracing::warn!(zone = %zone, error = %e, "Failed to persist rotation state; zone may be processed again next run");
                false
            }
        }
    }
}
