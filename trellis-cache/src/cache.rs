//! Read-through cache with single-flight loading.
//!
//! [`Cache`] wraps an [`LruCache`] so that concurrent misses for the same
//! key share one loader invocation. Successful loads are stored; loader
//! errors are handed to every waiting caller and never stored.
//!
//! # Example
//!
//! ```
//! use trellis_cache::Cache;
//! use trellis_core::TrellisError;
//!
//! let cache: Cache<u64, String> = Cache::new(1024);
//! let name = cache.get_or_load(7, |id| Ok::<_, TrellisError>(format!("user-{id}")))?;
//! assert_eq!(name, "user-7");
//!
//! // Served from the LRU without calling the loader again.
//! assert_eq!(cache.get(&7)?, "user-7");
//! # Ok::<(), TrellisError>(())
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use trellis_core::{CacheError, TrellisError};

use crate::flight::SingleFlight;
use crate::lru::{LruCache, LruStats};

/// Capability for cached values that want to observe their own eviction.
///
/// Register it with [`Cache::with_evictor`]; the store then calls
/// `on_evicted` for every value that leaves it.
pub trait Evictor<K> {
    /// Called once the value has been removed from the cache.
    fn on_evicted(&self, key: &K);
}

/// LRU cache whose misses are loaded at most once per overlapping burst.
///
/// `E` is the loader error type; it must be `Clone` because one failure is
/// delivered to every waiter.
pub struct Cache<K, V, E = TrellisError> {
    lru: LruCache<K, V>,
    flight: SingleFlight<K, V, E>,
}

impl<K, V, E> Cache<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    /// Create a cache bounded to `max_entries` (zero disables the bound).
    pub fn new(max_entries: usize) -> Self {
        Self::from_lru(LruCache::new(max_entries))
    }

    /// Create a cache that reports evicted entries to `on_evicted`.
    pub fn with_eviction<F>(max_entries: usize, on_evicted: F) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        Self::from_lru(LruCache::with_eviction(max_entries, on_evicted))
    }

    /// Create a cache that notifies each evicted value through [`Evictor`].
    pub fn with_evictor(max_entries: usize) -> Self
    where
        V: Evictor<K>,
        K: 'static,
        V: 'static,
    {
        Self::with_eviction(max_entries, |key: K, value: V| value.on_evicted(&key))
    }

    fn from_lru(lru: LruCache<K, V>) -> Self {
        Self {
            lru,
            flight: SingleFlight::new(),
        }
    }

    /// Look up a cached value without loading.
    ///
    /// # Errors
    /// Returns [`CacheError::NotExist`] on a miss.
    pub fn get<Q>(&self, key: &Q) -> Result<V, CacheError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lru.get(key).ok_or(CacheError::NotExist)
    }

    /// Return the cached value for `key`, loading it on a miss.
    ///
    /// Concurrent callers missing the same key wait for a single `loader`
    /// call and all receive its result. The leader checks the store again
    /// before loading, so a value stored while it was acquiring the
    /// in-flight slot is not loaded twice.
    pub fn get_or_load<F>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        if let Some(value) = self.lru.get(&key) {
            return Ok(value);
        }

        self.flight.run(key.clone(), || {
            if let Some(value) = self.lru.get(&key) {
                return Ok(value);
            }
            match loader(&key) {
                Ok(value) => {
                    self.lru.add(key.clone(), value.clone());
                    Ok(value)
                }
                Err(err) => {
                    tracing::debug!("Cache loader failed; result not stored");
                    Err(err)
                }
            }
        })
    }

    /// Drop a key from the cache.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lru.remove(key)
    }

    /// Purge every cached entry.
    pub fn clear(&self) {
        self.lru.clear()
    }

    /// Usage counters of the underlying store.
    pub fn stats(&self) -> LruStats {
        self.lru.stats()
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Number of keys currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.flight.in_flight()
    }

    /// Number of callers blocked waiting for `key` to load.
    pub fn waiters<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.flight.waiters(key)
    }
}

impl<K, V, E> fmt::Debug for Cache<K, V, E>
where
    K: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("lru", &self.lru)
            .field("flight", &self.flight)
            .finish()
    }
}
