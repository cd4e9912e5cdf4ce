//! Storage for the lure mail core.
//!
//! [`MessageStore`] holds captured messages and [`ConfigStore`] holds the
//! operator's stored outbound configuration. Both come in a file-backed
//! flavour for production and a memory-backed one for tests and ephemeral
//! runs.

pub mod config;
pub mod error;
mod messages;

use core::fmt::Debug;

use async_trait::async_trait;
use lure_common::message::{CapturedMessage, MessageId, ParsedMessage};
use serde::Serialize;

pub use config::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use error::{Result, StoreError};
pub use messages::{
    file::{FileMessageStore, ORPHAN_GRACE},
    memory::MemoryMessageStore,
};

/// One page of messages, newest first, plus the total number matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Page {
    pub messages: Vec<CapturedMessage>,
    pub total: usize,
}

/// Durable store of captured messages.
///
/// Inserts may run concurrently with each other and with reads; no
/// in-process lock is needed by callers.
#[async_trait]
pub trait MessageStore: Send + Sync + Debug {
    /// Create the backing structure if it is absent. Calling this on an
    /// existing store is a no-op.
    async fn ensure_schema(&self) -> Result<()>;

    /// Persist a parsed message, assigning its id and creation time.
    async fn insert(&self, message: ParsedMessage) -> Result<CapturedMessage>;

    /// List messages newest-first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Page>;

    /// Fetch a single message, or [`StoreError::NotFound`].
    async fn get(&self, id: &MessageId) -> Result<CapturedMessage>;

    /// Delete a message. Unknown ids are not an error; the return value says
    /// whether anything was removed.
    async fn delete(&self, id: &MessageId) -> Result<bool>;

    /// Remove every message, returning how many were removed.
    async fn clear(&self) -> Result<usize>;

    /// Messages addressed to `recipient` (case-insensitive), newest-first.
    async fn find_by_recipient(&self, recipient: &str, limit: usize, offset: usize)
    -> Result<Page>;
}
