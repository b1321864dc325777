// src/storage.rs
//! Storage collaborator interface. Real persistence lives outside this
//! service; the engine only needs ensure/lookup/pending operations. The
//! in-memory implementation backs the HTTP surface and tests.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::discovery::types::DiscoveredItem;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: u64,
    pub external_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSource {
    pub id: u64,
    pub external_id: String,
    pub name: String,
}

#[async_trait::async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Upsert by external ID; returns the stored row either way.
    async fn ensure_item_exists(&self, item: &DiscoveredItem) -> Result<StoredItem>;
    async fn ensure_source_exists(&self, source_id: &str, name: &str) -> Result<StoredSource>;
    async fn get_items_by_external_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, StoredItem>>;
    /// Whether the user already has this item waiting as a suggestion.
    async fn has_pending_candidate(&self, user_id: &str, external_id: &str) -> Result<bool>;
    async fn count_pending(&self, user_id: &str) -> Result<usize>;
}

/// In-memory store. Also records pending marks so tests can stage
/// "already suggested" state.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    items: HashMap<String, StoredItem>,
    sources: HashMap<String, StoredSource>,
    pending: HashMap<String, HashSet<String>>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_pending(&self, user_id: &str, external_id: &str) {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner
            .pending
            .entry(user_id.to_string())
            .or_default()
            .insert(external_id.to_string());
    }

    pub fn item_count(&self) -> usize {
        self.inner.lock().expect("memory store mutex poisoned").items.len()
    }
}

#[async_trait::async_trait]
impl SuggestionStore for MemoryStore {
    async fn ensure_item_exists(&self, item: &DiscoveredItem) -> Result<StoredItem> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        if let Some(existing) = inner.items.get(&item.external_id) {
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let stored = StoredItem {
            id: inner.next_id,
            external_id: item.external_id.clone(),
            title: item.title.clone(),
        };
        inner.items.insert(item.external_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn ensure_source_exists(&self, source_id: &str, name: &str) -> Result<StoredSource> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        if let Some(existing) = inner.sources.get(source_id) {
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let stored = StoredSource {
            id: inner.next_id,
            external_id: source_id.to_string(),
            name: name.to_string(),
        };
        inner.sources.insert(source_id.to_string(), stored.clone());
        Ok(stored)
    }

    async fn get_items_by_external_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, StoredItem>> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| inner.items.get(id).map(|it| (id.clone(), it.clone())))
            .collect())
    }

    async fn has_pending_candidate(&self, user_id: &str, external_id: &str) -> Result<bool> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner
            .pending
            .get(user_id)
            .is_some_and(|s| s.contains(external_id)))
    }

    async fn count_pending(&self, user_id: &str) -> Result<usize> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner.pending.get(user_id).map_or(0, |s| s.len()))
    }
}
