//! Cache Store Module
//!
//! The store contract used by the read-through cache and its in-memory
//! implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::cache::{CacheEntry, CacheStats};
use crate::error::Result;

// == Store Contract ==
/// Key/value store where every entry carries an optional absolute expiry.
///
/// Reads never return expired entries, whether or not they were swept yet.
#[async_trait]
pub trait TimedCacheStore: Send + Sync {
    /// Inserts or replaces the entry for `key`. Last writer wins.
    async fn upsert(
        &self,
        key: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CacheEntry>;

    /// Returns the entry for `key` only if it is live.
    async fn find_live(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Physically removes expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

// == Memory Store ==
/// In-process store backed by a HashMap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns current usage statistics.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        let mut stats = inner.stats.clone();
        stats.set_total_entries(inner.entries.len());
        stats
    }

    /// Number of entries held, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TimedCacheStore for MemoryStore {
    async fn upsert(
        &self,
        key: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CacheEntry> {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let entry = match inner.entries.get_mut(key) {
            Some(existing) => {
                existing.replace(value, expires_at, now);
                existing.clone()
            }
            None => {
                let entry = CacheEntry::new(key, value, expires_at, now);
                inner.entries.insert(key.to_string(), entry.clone());
                entry
            }
        };

        inner.stats.record_write();
        let count = inner.entries.len();
        inner.stats.set_total_entries(count);
        Ok(entry)
    }

    async fn find_live(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        // Write lock because reads update the counters
        let mut inner = self.inner.write().await;

        let found = inner
            .entries
            .get(key)
            .filter(|entry| entry.is_live_at(now))
            .cloned();

        match found {
            Some(_) => inner.stats.record_hit(),
            None => inner.stats.record_miss(),
        }
        Ok(found)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_live_at(now));
        let count = inner.entries.len();
        inner.stats.set_total_entries(count);

        Ok(before - count)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::expiry_after;
    use serde_json::json;
    use std::time::Duration;

    fn in_secs(secs: u64) -> Option<DateTime<Utc>> {
        Some(expiry_after(Utc::now(), Duration::from_secs(secs)))
    }

    #[tokio::test]
    async fn test_store_new() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_upsert_and_find() {
        let store = MemoryStore::new();

        let written = store.upsert("key1", json!({"text": "hi"}), in_secs(60)).await.unwrap();
        let found = store.find_live("key1").await.unwrap().unwrap();

        assert_eq!(found, written);
        assert_eq!(found.value, json!({"text": "hi"}));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_find_nonexistent() {
        let store = MemoryStore::new();
        assert!(store.find_live("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_upsert_replaces_in_place() {
        let store = MemoryStore::new();

        let first = store.upsert("key1", json!("value1"), in_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.upsert("key1", json!("value2"), None).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert!(second.expires_at.is_none());

        let found = store.find_live("key1").await.unwrap().unwrap();
        assert_eq!(found.value, json!("value2"));
    }

    #[tokio::test]
    async fn test_store_ttl_expiration() {
        let store = MemoryStore::new();

        store.upsert("key1", json!("value1"), in_secs(1)).await.unwrap();
        assert!(store.find_live("key1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Unreadable even though the sweep has not run
        assert!(store.find_live("key1").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_purge_expired() {
        let store = MemoryStore::new();

        store.upsert("short", json!(1), in_secs(1)).await.unwrap();
        store.upsert("long", json!(2), in_secs(10)).await.unwrap();
        store.upsert("forever", json!(3), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let removed = store.purge_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 2);
        assert!(store.find_live("long").await.unwrap().is_some());
        assert!(store.find_live("forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_stats() {
        let store = MemoryStore::new();

        store.upsert("key1", json!("v"), None).await.unwrap();
        store.find_live("key1").await.unwrap();
        store.find_live("missing").await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.total_entries, 1);
    }
}
