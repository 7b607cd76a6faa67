//! Short-lived per-branch history cache.
//!
//! Stores the accumulated commit list of a branch so that a repeated lookup
//! touching the same branch can be answered without paging the host again.
//! - `MemoryHistoryCache`: process-local, for long-running callers and tests
//! - `FileHistoryCache`: JSON document on disk, survives between CLI runs
//!
//! Entries expire after a fixed TTL; an expired entry reads as empty. Reads
//! never fail, so a broken cache only ever costs a full pagination.
//!
//! Used by: `LastCommonCommitsFinder` in resolver.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::CacheError;
use crate::models::{CacheKey, CommitId, CommitSequence};

#[async_trait]
pub trait HistoryCache: Send + Sync {
    /// Cached commits for `key`, or an empty sequence if absent or expired.
    async fn get(&self, key: &CacheKey) -> CommitSequence;

    /// Replace the entry for `key` and restart its TTL.
    async fn put(&self, key: &CacheKey, commits: &[CommitId]) -> Result<(), CacheError>;

    /// Release held resources. Safe to call repeatedly; later calls to
    /// `get`/`put` reacquire what they need.
    async fn close(&self);
}

#[async_trait]
impl<T: HistoryCache + ?Sized> HistoryCache for std::sync::Arc<T> {
    async fn get(&self, key: &CacheKey) -> CommitSequence {
        (**self).get(key).await
    }

    async fn put(&self, key: &CacheKey, commits: &[CommitId]) -> Result<(), CacheError> {
        (**self).put(key, commits).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    commits: CommitSequence,
    expires_at: Instant,
}

pub struct MemoryHistoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    ttl: Duration,
}

impl MemoryHistoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryCache for MemoryHistoryCache {
    async fn get(&self, key: &CacheKey) -> CommitSequence {
        let Ok(entries) = self.entries.read() else {
            tracing::warn!("History cache lock poisoned, treating {} as uncached", key);
            return Vec::new();
        };
        match entries.get(&key.as_key()) {
            Some(entry) if entry.expires_at > Instant::now() => entry.commits.clone(),
            _ => Vec::new(),
        }
    }

    async fn put(&self, key: &CacheKey, commits: &[CommitId]) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(
            key.as_key(),
            MemoryEntry {
                commits: commits.to_vec(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn close(&self) {
        if let Ok(mut entries) = self.entries.write() {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires_at > now);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedHistory {
    commits: CommitSequence,
    expires_at: DateTime<Utc>,
}

impl CachedHistory {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    entries: HashMap<String, CachedHistory>,
}

pub struct FileHistoryCache {
    path: PathBuf,
    ttl: Duration,
    /// Loaded on first use, dropped by `close`.
    document: Mutex<Option<CacheDocument>>,
}

impl FileHistoryCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            document: Mutex::new(None),
        }
    }

    /// `$TMPDIR/last-common-commits/cache.json`
    pub fn default_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push("last-common-commits");
        path.push("cache.json");
        path
    }

    /// Current document on disk. A missing or unparsable file reads as
    /// empty; any other read error is returned.
    async fn read_document(&self) -> Result<CacheDocument, CacheError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheDocument::default());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(document) => Ok(document),
            Err(e) => {
                tracing::warn!("Ignoring unreadable history cache {}: {}", self.path.display(), e);
                Ok(CacheDocument::default())
            }
        }
    }

    async fn load(&self) -> CacheDocument {
        self.read_document().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to read history cache {}: {}", self.path.display(), e);
            CacheDocument::default()
        })
    }

    async fn persist(&self, document: &CacheDocument) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl HistoryCache for FileHistoryCache {
    async fn get(&self, key: &CacheKey) -> CommitSequence {
        let mut guard = self.document.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await);
        }
        let now = Utc::now();
        guard
            .as_ref()
            .and_then(|document| document.entries.get(&key.as_key()))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.commits.clone())
            .unwrap_or_default()
    }

    async fn put(&self, key: &CacheKey, commits: &[CommitId]) -> Result<(), CacheError> {
        let mut guard = self.document.lock().await;
        // Another process may have written since we loaded; start from disk.
        // Never overwrite a file we could not read.
        let mut document = self.read_document().await?;
        let now = Utc::now();
        document.entries.retain(|_, entry| entry.is_live(now));
        document.entries.insert(
            key.as_key(),
            CachedHistory {
                commits: commits.to_vec(),
                expires_at: self.expiry_from(now),
            },
        );
        self.persist(&document).await?;
        *guard = Some(document);
        Ok(())
    }

    async fn close(&self) {
        self.document.lock().await.take();
    }
}
