//! A cache-fronted store.
//!
//! [`CachedStore`] puts an item cache in front of another [`Store`], the same way an in-memory
//! accelerator sits in front of a remote database. Reads are served from the cache while an entry
//! is fresh and go to the inner store otherwise. Misses are cached as well (negative caching), so
//! repeatedly reading an absent key does not hit the inner store on every call. Puts are
//! written through and deletes invalidate the entry once the inner store acknowledged them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use super::{BackendResult, Store, WorkRecord};

/// The default time an entry stays in the cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct CacheEntry {
    record: Option<WorkRecord>,
    expires_at: Instant,
}

/// Cache hit and miss counters of a [`CachedStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that went to the inner store.
    pub misses: u64,
}

/// A [`Store`] with a read-through, write-through item cache in front of another store.
#[derive(Debug)]
pub struct CachedStore {
    inner: Box<dyn Store>,
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedStore {
    /// Wraps `inner` with a cache using [`DEFAULT_CACHE_TTL`].
    pub fn new(inner: Box<dyn Store>) -> Self {
        Self::with_ttl(inner, DEFAULT_CACHE_TTL)
    }

    /// Wraps `inner` with a cache whose entries expire after `ttl`.
    pub fn with_ttl(inner: Box<dyn Store>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the hit and miss counters accumulated so far.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn cached(&self, table: &str, key: &str) -> Option<Option<WorkRecord>> {
        let cache_key = (table.to_owned(), key.to_owned());
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&cache_key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.record.clone()),
            Some(_) => {
                entries.remove(&cache_key);
                None
            }
            None => None,
        }
    }

    fn fill(&self, table: &str, key: &str, record: Option<WorkRecord>) {
        let entry = CacheEntry {
            record,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .lock()
            .unwrap()
            .insert((table.to_owned(), key.to_owned()), entry);
    }

    fn invalidate(&self, table: &str, key: &str) {
        self.entries
            .lock()
            .unwrap()
            .remove(&(table.to_owned(), key.to_owned()));
    }
}

#[async_trait::async_trait]
impl Store for CachedStore {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn get_record(&self, table: &str, key: &str) -> BackendResult<Option<WorkRecord>> {
        if let Some(record) = self.cached(table, key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(table, key, "cache hit");
            return Ok(record);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(table, key, inner = self.inner.name(), "cache miss");

        let record = self.inner.get_record(table, key).await?;
        self.fill(table, key, record.clone());
        Ok(record)
    }

    async fn put_record(&self, table: &str, record: &WorkRecord) -> BackendResult<()> {
        // A failed write leaves the inner store in an unknown state.
        if let Err(err) = self.inner.put_record(table, record).await {
            self.invalidate(table, &record.name);
            return Err(err);
        }

        self.fill(table, &record.name, Some(record.clone()));
        Ok(())
    }

    async fn delete_record(&self, table: &str, key: &str) -> BackendResult<()> {
        let result = self.inner.delete_record(table, key).await;
        self.invalidate(table, key);
        result
    }
}
