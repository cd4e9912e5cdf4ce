use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use lure_common::message::{CapturedMessage, MessageId, ParsedMessage};
use parking_lot::RwLock;

use super::window;
use crate::{MessageStore, Page, error::Result, error::StoreError};

/// In-memory message store.
///
/// Intended for tests and for runs where captured mail does not need to
/// outlive the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageStore {
    messages: Arc<RwLock<BTreeMap<MessageId, CapturedMessage>>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn page(&self, filter: impl Fn(&CapturedMessage) -> bool, limit: usize, offset: usize) -> Page {
        let messages = self.messages.read();
        let matching: Vec<CapturedMessage> =
            messages.values().rev().filter(|m| filter(m)).cloned().collect();

        Page {
            total: matching.len(),
            messages: window(&matching, limit, offset),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, message: ParsedMessage) -> Result<CapturedMessage> {
        let stored = CapturedMessage::from_parsed(MessageId::generate(), message, Utc::now());
        self.messages.write().insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Page> {
        Ok(self.page(|_| true, limit, offset))
    }

    async fn get(&self, id: &MessageId) -> Result<CapturedMessage> {
        self.messages
            .read()
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    async fn delete(&self, id: &MessageId) -> Result<bool> {
        Ok(self.messages.write().remove(id).is_some())
    }

    async fn clear(&self) -> Result<usize> {
        let mut messages = self.messages.write();
        let count = messages.len();
        messages.clear();
        Ok(count)
    }

    async fn find_by_recipient(
        &self,
        recipient: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page> {
        Ok(self.page(|m| m.is_addressed_to(recipient), limit, offset))
    }
}
