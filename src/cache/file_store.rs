//! Disk-backed Store Module
//!
//! Persists each entry as a JSON document so cached completions survive
//! restarts.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::{CacheEntry, TimedCacheStore};
use crate::error::{CacheError, Result};
use crate::fingerprint::sha1_hex;

const ENTRY_EXTENSION: &str = "json";

// == File Store ==
/// Store keeping one `<sha1(key)>.json` file per entry inside a directory.
///
/// Every write lands in its own temporary file that is renamed over the
/// target, so readers see either the old or the new entry, also when
/// several processes share the directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles of upsert and purge in this process
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sha1_hex(key.as_bytes()), ENTRY_EXTENSION))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_entry(&self, path: &Path, entry: &CacheEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        let dir = self.dir.clone();
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.persist(&path)?;
            Ok(())
        })
        .await
        .map_err(|err| CacheError::Storage(format!("cache write task failed: {}", err)))??;

        Ok(())
    }
}

#[async_trait]
impl TimedCacheStore for FileStore {
    async fn upsert(
        &self,
        key: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CacheEntry> {
        let path = self.entry_path(key);
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let existing = match Self::read_entry(&path).await {
            Ok(existing) => existing,
            Err(CacheError::Serialization(err)) => {
                warn!(path = %path.display(), error = %err, "Replacing undecodable cache file");
                None
            }
            Err(err) => return Err(err),
        };

        let entry = match existing {
            Some(mut existing) if existing.key == key => {
                existing.replace(value, expires_at, now);
                existing
            }
            _ => CacheEntry::new(key, value, expires_at, now),
        };

        self.write_entry(&path, &entry).await?;
        Ok(entry)
    }

    async fn find_live(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        let entry = Self::read_entry(&self.entry_path(key)).await?;
        Ok(entry.filter(|entry| entry.key == key && entry.is_live_at(now)))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut removed = 0;

        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }

            let entry = match Self::read_entry(&path).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable cache file");
                    continue;
                }
            };

            if !entry.is_live_at(now) {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(removed)
    }
}
