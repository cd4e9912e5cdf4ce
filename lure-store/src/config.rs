//! Persistence for [`StoredConfig`] records.
//!
//! There is at most one record per scope: a global record, plus one per
//! user. Records are created on first save and updated in place after that.

use std::{
    collections::HashMap,
    fmt::Debug,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use lure_common::{
    config::{StoredConfig, UserId},
    internal,
};
use parking_lot::RwLock;
use ron::ser::PrettyConfig;
use tokio::fs;

use crate::{
    error::{Result, SerializationError, StoreError},
    messages::validate_path,
};

#[async_trait]
pub trait ConfigStore: Send + Sync + Debug {
    /// Create the backing structure if it is absent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Load the record for exactly this scope.
    async fn load(&self, user: Option<&UserId>) -> Result<Option<StoredConfig>>;

    /// Create or replace the record for this scope. `updated_at` is stamped
    /// by the store.
    async fn save(&self, user: Option<&UserId>, config: &StoredConfig) -> Result<StoredConfig>;

    /// The user's record if they have one, otherwise the global record.
    async fn load_for(&self, user: Option<&UserId>) -> Result<Option<StoredConfig>> {
        if let Some(user) = user {
            if let Some(config) = self.load(Some(user)).await? {
                return Ok(Some(config));
            }
        }
        self.load(None).await
    }
}

/// One RON document per scope: `global.ron` and `user-{id}.ron`.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, user: Option<&UserId>) -> PathBuf {
        self.path.join(user.map_or_else(
            || "global.ron".to_string(),
            |user| format!("user-{user}.ron"),
        ))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn ensure_schema(&self) -> Result<()> {
        if !fs::try_exists(&self.path).await? {
            internal!(level = INFO, "{} does not exist, creating", self.path.display());
            fs::create_dir_all(&self.path).await?;
        } else if !fs::metadata(&self.path).await?.is_dir() {
            return Err(StoreError::InvalidPath {
                path: self.path.clone(),
                reason: "expected a directory".to_string(),
            });
        }
        Ok(())
    }

    async fn load(&self, user: Option<&UserId>) -> Result<Option<StoredConfig>> {
        let content = match fs::read_to_string(self.file_for(user)).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        ron::from_str(&content)
            .map(Some)
            .map_err(|err| SerializationError::Ron(err.to_string()).into())
    }

    #[tracing::instrument(level = "debug", skip(self, config), fields(user = ?user.map(UserId::as_str)), err)]
    async fn save(&self, user: Option<&UserId>, config: &StoredConfig) -> Result<StoredConfig> {
        let mut saved = config.clone();
        saved.updated_at = Some(Utc::now());

        let content = ron::ser::to_string_pretty(&saved, PrettyConfig::default())
            .map_err(|err| SerializationError::Ron(err.to_string()))?;

        let path = self.file_for(user);
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");

        fs::write(&temp, content).await?;
        fs::rename(&temp, &path).await?;

        internal!(level = DEBUG, "Saved stored configuration to {}", path.display());
        Ok(saved)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    records: Arc<RwLock<HashMap<Option<UserId>, StoredConfig>>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self, user: Option<&UserId>) -> Result<Option<StoredConfig>> {
        Ok(self.records.read().get(&user.cloned()).cloned())
    }

    async fn save(&self, user: Option<&UserId>, config: &StoredConfig) -> Result<StoredConfig> {
        let mut saved = config.clone();
        saved.updated_at = Some(Utc::now());
        self.records.write().insert(user.cloned(), saved.clone());
        Ok(saved)
    }
}
