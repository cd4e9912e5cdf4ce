use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use lure_common::{
    internal,
    message::{CapturedMessage, MessageId, ParsedMessage},
};
use tokio::fs;

use super::{validate_path, window};
use crate::{
    MessageStore, Page,
    error::{Result, StoreError},
};

const EXTENSION: &str = "bin";
const INDEX_EXTENSION: &str = "rcpt";
const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

/// Leftover temp, index and `.deleted` files younger than this may belong to
/// a write in progress in another process and are not swept.
pub const ORPHAN_GRACE: Duration = Duration::from_secs(60 * 60);

/// File-backed message store.
///
/// Each message is one bincode file named `{ulid}.bin`. Because ULIDs sort
/// by creation time, the sorted directory listing is the newest-first index
/// used for paging and recipient search.
///
/// Next to each message sits `{ulid}.rcpt`, its lowercased recipients one per
/// line. Recipient search reads only these and decodes just the requested
/// page.
///
/// Writes go to `.tmp_{ulid}.*` and are renamed into place, so a crash
/// never leaves a partially written message visible. Deletes rename to
/// `{ulid}.bin.deleted` before removing. [`MessageStore::ensure_schema`]
/// sweeps leftovers of both once they are older than [`ORPHAN_GRACE`], so
/// several processes can share one directory.
#[derive(Debug, Clone)]
pub struct FileMessageStore {
    path: PathBuf,
}

impl FileMessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.{EXTENSION}"))
    }

    fn index_for(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.{INDEX_EXTENSION}"))
    }

    /// Write `bytes` to a temp file and rename it over `path`.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = self.path.join(format!("{TEMP_PREFIX}{filename}"));

        fs::write(&temp_path, bytes).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    /// Whether `id` is addressed to `recipient`, answered from the index
    /// file. Messages without one are decoded instead.
    async fn matches_recipient(&self, id: &MessageId, recipient: &str) -> Result<bool> {
        match fs::read_to_string(self.index_for(id)).await {
            Ok(index) => Ok(index
                .lines()
                .any(|line| line.eq_ignore_ascii_case(recipient))),
            Err(err) if err.kind() == ErrorKind::NotFound => match self.read(id).await {
                Ok(message) => Ok(message.is_addressed_to(recipient)),
                Err(StoreError::NotFound(_)) => Ok(false),
                Err(err) => Err(err),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// All stored ids, newest first.
    async fn ids(&self) -> Result<Vec<MessageId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TEMP_PREFIX) {
                continue;
            }
            if let Some(id) = MessageId::from_filename(&filename, EXTENSION) {
                ids.push(id);
            }
        }

        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    async fn read(&self, id: &MessageId) -> Result<CapturedMessage> {
        let bytes = match fs::read(self.file_for(id)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        };

        let (message, _) = bincode::serde::decode_from_slice::<CapturedMessage, _>(
            &bytes,
            bincode::config::standard(),
        )?;
        Ok(message)
    }

    /// Load the given ids, skipping any that vanished since they were listed.
    async fn load(&self, ids: &[MessageId]) -> Result<Vec<CapturedMessage>> {
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read(id).await {
                Ok(message) => messages.push(message),
                Err(StoreError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(messages)
    }

    fn sweep_orphans(&self, grace: Duration) -> Result<usize> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            let orphaned = filename.starts_with(TEMP_PREFIX)
                || filename.ends_with(DELETED_SUFFIX)
                || MessageId::from_filename(&filename, INDEX_EXTENSION)
                    .is_some_and(|id| !self.file_for(&id).exists());

            if orphaned && is_stale(&entry, grace) {
                std::fs::remove_file(entry.path()).or_else(ignore_missing)?;
                cleaned += 1;
            }
        }

        Ok(cleaned)
    }
}

fn is_stale(entry: &std::fs::DirEntry, grace: Duration) -> bool {
    entry
        .metadata()
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= grace)
}

/// Treat a file that is already gone as removed.
fn ignore_missing(err: io::Error) -> io::Result<()> {
    if err.kind() == ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    #[tracing::instrument(level = "debug", skip(self), fields(path = %self.path.display()), err)]
    async fn ensure_schema(&self) -> Result<()> {
        let path = self.path.as_path();

        if !fs::try_exists(path).await? {
            internal!(level = INFO, "{} does not exist, creating", path.display());
            fs::create_dir_all(path).await?;
        } else if !fs::metadata(path).await?.is_dir() {
            return Err(StoreError::InvalidPath {
                path: path.to_path_buf(),
                reason: "expected a directory".to_string(),
            });
        }

        let cleaned = self.sweep_orphans(ORPHAN_GRACE)?;
        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from {}",
                path.display()
            );
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, err)]
    async fn insert(&self, message: ParsedMessage) -> Result<CapturedMessage> {
        let stored = CapturedMessage::from_parsed(MessageId::generate(), message, Utc::now());
        let bytes = bincode::serde::encode_to_vec(&stored, bincode::config::standard())?;

        let mut index = String::new();
        for to in &stored.to {
            index.push_str(&to.trim().to_ascii_lowercase());
            index.push('\n');
        }

        // Index first: a message file is never visible without its index.
        self.write_atomic(&self.index_for(&stored.id), index.as_bytes())
            .await?;

        let final_path = self.file_for(&stored.id);
        self.write_atomic(&final_path, &bytes).await?;

        internal!(
            level = DEBUG,
            "Stored message {} ({} bytes) at {}",
            stored.id,
            bytes.len(),
            final_path.display()
        );

        Ok(stored)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Page> {
        let ids = self.ids().await?;
        let messages = self.load(&window(&ids, limit, offset)).await?;

        Ok(Page {
            messages,
            total: ids.len(),
        })
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn get(&self, id: &MessageId) -> Result<CapturedMessage> {
        self.read(id).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id), err)]
    async fn delete(&self, id: &MessageId) -> Result<bool> {
        let path = self.file_for(id);
        let deleted = self.path.join(format!("{id}.{EXTENSION}{DELETED_SUFFIX}"));

        match fs::rename(&path, &deleted).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        }
        // A concurrent sweep may already have removed either file.
        for leftover in [deleted, self.index_for(id)] {
            fs::remove_file(&leftover).await.or_else(ignore_missing)?;
        }

        internal!(level = DEBUG, "Deleted message {id}");
        Ok(true)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for id in self.ids().await? {
            if self.delete(&id).await? {
                removed += 1;
            }
        }

        internal!(level = INFO, "Cleared {removed} captured messages");
        Ok(removed)
    }

    async fn find_by_recipient(
        &self,
        recipient: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page> {
        let recipient = recipient.trim();
        let mut matching = Vec::new();

        for id in self.ids().await? {
            if self.matches_recipient(&id, recipient).await? {
                matching.push(id);
            }
        }

        Ok(Page {
            total: matching.len(),
            messages: self.load(&window(&matching, limit, offset)).await?,
        })
    }
}
