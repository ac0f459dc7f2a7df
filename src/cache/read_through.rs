//! Read-through Cache Module
//!
//! Memoizes the result of an async producer under a key, on top of any
//! [`TimedCacheStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::cache::{expiry_after, CacheEntry, TimedCacheStore, DEFAULT_TTL};
use crate::error::{CacheError, Result};

// == Expiry ==
/// How long a written value stays readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// The cache's configured default TTL
    #[default]
    Default,
    /// Readable for this long after the write
    After(Duration),
    /// Readable until overwritten
    Never,
}

impl From<Duration> for Expiry {
    fn from(ttl: Duration) -> Self {
        Expiry::After(ttl)
    }
}

impl From<Option<Duration>> for Expiry {
    fn from(ttl: Option<Duration>) -> Self {
        ttl.map_or(Expiry::Default, Expiry::After)
    }
}

// == Read-through Cache ==
/// Generic read-through cache over a shared store.
#[derive(Debug)]
pub struct ReadThroughCache<S> {
    store: Arc<S>,
    default_ttl: Duration,
}

impl<S> Clone for ReadThroughCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            default_ttl: self.default_ttl,
        }
    }
}

impl<S: TimedCacheStore> ReadThroughCache<S> {
    /// Creates a cache over `store` using the 7 day default TTL.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Overrides the TTL applied for [`Expiry::Default`].
    pub fn with_default_ttl(mut self, default_ttl: Duration) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn expires_at(&self, expiry: Expiry, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match expiry {
            Expiry::Default => Some(expiry_after(now, self.default_ttl)),
            Expiry::After(ttl) => Some(expiry_after(now, ttl)),
            Expiry::Never => None,
        }
    }

    // == Read ==
    /// Returns the live value under `key`, decoded as `T`.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.find_live(key).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    // == Write ==
    /// Stores `value` under `key`, replacing any previous entry.
    pub async fn write<T>(
        &self,
        key: &str,
        value: &T,
        expiry: impl Into<Expiry>,
    ) -> Result<CacheEntry>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(value)?;
        let expires_at = self.expires_at(expiry.into(), Utc::now());
        let entry = self.store.upsert(key, payload, expires_at).await?;
        debug!(key, expires_at = ?entry.expires_at, "Cache write");
        Ok(entry)
    }

    // == Fetch ==
    /// Returns the cached value for `key`, or runs `producer` and caches its
    /// result on a miss.
    ///
    /// The producer is never called on a hit. A failing producer writes
    /// nothing and its error is returned as is. Store failures are converted
    /// into `E` and returned too.
    pub async fn fetch<T, E, F, Fut>(
        &self,
        key: &str,
        producer: F,
        expiry: impl Into<Expiry>,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(cached) = self.read(key).await? {
            debug!(key, "Cache hit");
            return Ok(cached);
        }

        debug!(key, "Cache miss");
        let produced = producer().await?;
        self.write(key, &produced, expiry).await?;
        Ok(produced)
    }
}
