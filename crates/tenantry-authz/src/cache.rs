//! Time-bounded cache with coalesced refresh and explicit invalidation.
//!
//! # Purpose
//! Provides the single caching abstraction shared by the signing-key cache and
//! the tenant-domain lookup cache: entries expire after a fixed TTL, misses are
//! filled through a caller-supplied refresh future, and writers can drop an
//! entry with [`TtlCache::invalidate`] when the underlying data changes.
//!
//! # Concurrency model
//! Entries live in a `DashMap`, so lookups never block each other. Refreshes
//! for the same key are serialized through a per-key async mutex: the first
//! caller performs the fetch while later callers wait and then observe the
//! freshly inserted value instead of fetching again.
//!
//! # Key invariants
//! - [`TtlCache::get`] never returns an entry older than the TTL.
//! - A failed refresh leaves the previous entry untouched.
//! - A refresh that started before an [`TtlCache::invalidate`] or
//!   [`TtlCache::clear`] returns its value to the caller but never stores it.
//! - The cache never holds more than `capacity` entries; when full, expired
//!   entries are purged and, failing that, new values are returned uncached.
//!
//! # Examples
//! ```rust
//! use std::time::Duration;
//! use tenantry_authz::TtlCache;
//!
//! let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
//! cache.insert("a".to_string(), 1);
//! assert_eq!(cache.get(&"a".to_string()), Some(1));
//! cache.invalidate(&"a".to_string());
//! assert_eq!(cache.get(&"a".to_string()), None);
//! ```
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Concurrent TTL cache with get-or-refresh semantics.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    refresh_locks: DashMap<K, Arc<Mutex<()>>>,
    // Bumped before every invalidation; refreshes compare it before storing.
    invalidations: AtomicU64,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> fmt::Debug for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            refresh_locks: DashMap::new(),
            invalidations: AtomicU64::new(0),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value if it is still within its TTL.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.value.clone())
    }

    /// Insert or replace a value, restarting its TTL.
    ///
    /// # Returns
    /// - `true` if the value was stored, `false` if the cache is full of
    ///   unexpired entries and the value was dropped.
    pub fn insert(&self, key: K, value: V) -> bool {
        self.store(key, value, None)
    }

    /// Drop the entry for `key`. Returns whether an entry was present.
    ///
    /// Refreshes already in flight for `key` will not repopulate it.
    pub fn invalidate(&self, key: &K) -> bool {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry whose TTL has elapsed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_fresh(now));
    }

    /// Serve a fresh entry, or run `refresh` to fill it.
    ///
    /// # Overview
    /// Concurrent misses for the same key are coalesced: only one caller runs
    /// `refresh`, the others wait for it and reuse the stored value.
    ///
    /// # Errors
    /// - Propagates the error returned by `refresh`; the cache is unchanged.
    pub async fn get_or_refresh<F, Fut, E>(&self, key: &K, refresh: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let lock = self.refresh_lock(key);
        let guard = lock.lock().await;
        // Another caller may have filled the entry while we waited.
        let result = match self.get(key) {
            Some(value) => Ok(value),
            None => self.run_refresh(key, refresh).await,
        };
        drop(guard);
        drop(lock);
        self.release_refresh_lock(key);
        result
    }

    /// Refetch the entry even if it is still fresh.
    ///
    /// # Overview
    /// Used when the cached value is known to be incomplete, for example a key
    /// set that lacks a requested key id. If another caller already replaced
    /// the entry while this one waited for the lock, that replacement is
    /// returned instead of fetching a second time.
    ///
    /// # Errors
    /// - Propagates the error returned by `refresh`; the cache is unchanged.
    pub async fn force_refresh<F, Fut, E>(&self, key: &K, refresh: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let observed = self.fetched_at(key);
        let lock = self.refresh_lock(key);
        let guard = lock.lock().await;
        let now = Instant::now();
        let replaced = self
            .entries
            .get(key)
            .filter(|entry| Some(entry.fetched_at) != observed && entry.is_fresh(now))
            .map(|entry| entry.value.clone());
        let result = match replaced {
            Some(value) => Ok(value),
            None => self.run_refresh(key, refresh).await,
        };
        drop(guard);
        drop(lock);
        self.release_refresh_lock(key);
        result
    }

    /// Wait for any refresh in flight for `key`, then return the fresh entry.
    pub async fn settled(&self, key: &K) -> Option<V> {
        let lock = self.refresh_lock(key);
        drop(lock.lock().await);
        drop(lock);
        self.release_refresh_lock(key);
        self.get(key)
    }

    async fn run_refresh<F, Fut, E>(&self, key: &K, refresh: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let generation = self.invalidations.load(Ordering::SeqCst);
        let value = refresh().await?;
        self.store(key.clone(), value.clone(), Some(generation));
        Ok(value)
    }

    /// Store `value` unless the cache is full or, when `generation` is given,
    /// an invalidation happened since it was read.
    fn store(&self, key: K, value: V, generation: Option<u64>) -> bool {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                return false;
            }
        }
        // The generation is checked while the entry's shard is locked, so a
        // concurrent invalidation either wins before the check or removes the
        // value after it is written.
        let current = |generation: Option<u64>| {
            generation.is_none_or(|seen| seen == self.invalidations.load(Ordering::SeqCst))
        };
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            fetched_at: now,
            expires_at: now + self.ttl,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if !current(generation) {
                    return false;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                if !current(generation) {
                    return false;
                }
                vacant.insert(entry);
            }
        }
        true
    }

    fn fetched_at(&self, key: &K) -> Option<Instant> {
        self.entries.get(key).map(|entry| entry.fetched_at)
    }

    fn refresh_lock(&self, key: &K) -> Arc<Mutex<()>> {
        self.refresh_locks.entry(key.clone()).or_default().clone()
    }

    fn release_refresh_lock(&self, key: &K) {
        // Only the map holds the lock once no caller is waiting on it.
        self.refresh_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) <= 1);
    }
}
