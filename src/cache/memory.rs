//! In-memory cache store
//!
//! Same contract as the MongoDB store: entries expire `ttl` after their last
//! write. Used by tests and by `--cache-backend memory` runs.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheStore, CachedValue, DEFAULT_TTL};
use crate::types::{EnrichError, Result};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// Process-local cache namespace
#[derive(Debug)]
pub struct MemoryCache {
    namespace: String,
    entries: DashMap<String, MemoryEntry>,
    ttl: RwLock<Duration>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: DashMap::new(),
            ttl: RwLock::new(DEFAULT_TTL),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `get` calls served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `set` calls served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Current value for a key without counting a read
    pub fn peek(&self, key: &str) -> Option<CachedValue> {
        self.entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    fn current_ttl(&self) -> Result<Duration> {
        self.ttl
            .read()
            .map(|ttl| *ttl)
            .map_err(|_| EnrichError::Cache("ttl lock poisoned".into()))
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn ensure_indexes(&self, ttl: Duration) -> Result<()> {
        let mut current = self
            .ttl
            .write()
            .map_err(|_| EnrichError::IndexVerification("ttl lock poisoned".into()))?;
        *current = ttl;
        debug!(namespace = %self.namespace, ttl_secs = ttl.as_secs(), "Memory cache ready");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &CachedValue) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let ttl = self.current_ttl()?;
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.clone(),
                expires_at: expiry(Instant::now(), ttl),
            },
        );
        Ok(())
    }
}

/// `now + ttl`, saturating at a far-future instant
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Roughly a century
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);
