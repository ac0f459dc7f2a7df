//! Cache Entry Module
//!
//! Defines the stored record and the rules for when it is readable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// A single stored record with its expiry and bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unique key
    pub key: String,
    /// Opaque payload
    pub value: Value,
    /// Absolute expiry, None = never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Set on first write, never changed afterwards
    pub created_at: DateTime<Utc>,
    /// Refreshed on every write
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a fresh entry stamped with `now`.
    pub fn new(
        key: impl Into<String>,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    // == Replace ==
    /// Replaces value and expiry in place, keeping `created_at`.
    pub fn replace(&mut self, value: Value, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        self.value = value;
        self.expires_at = expires_at;
        self.updated_at = now;
    }

    // == Liveness ==
    /// An entry is live iff it never expires or its expiry is strictly after `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => expires > now,
            None => true,
        }
    }

    /// Liveness against the current wall clock.
    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }
}

// == Utility Functions ==
/// Absolute instant `ttl` after `now`, saturating far in the future.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
