//! Bounded LRU store with eviction callbacks and statistics.
//!
//! Entries live in a slab of doubly linked nodes addressed by index, with a
//! `HashMap` from key to slot. Lookup, insert, promotion and eviction are
//! all O(1). The head of the list is the most recently used entry.
//!
//! A single `RwLock` guards the slab, the index and the counters. The
//! eviction callback is always invoked after the guard is released, so a
//! callback may call back into the same store.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Callback invoked with every entry that leaves the store.
pub type EvictionCallback<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

/// Usage counters for an [`LruCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LruStats {
    /// Number of entries currently stored.
    pub items: usize,
    /// Number of lookups, hits and misses alike.
    pub gets: u64,
    /// Number of lookups that found their key.
    pub hits: u64,
    /// Number of entries removed by capacity, `remove`, `remove_oldest` or `clear`.
    pub evictions: u64,
}

impl LruStats {
    /// Number of lookups that missed.
    pub fn misses(&self) -> u64 {
        self.gets.saturating_sub(self.hits)
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }
}

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    gets: u64,
    hits: u64,
    evictions: u64,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
{
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            gets: 0,
            hits: 0,
            evictions: 0,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, idx: usize) -> &Node<K, V> {
        match self.slots.get(idx) {
            Some(Some(node)) => node,
            _ => unreachable!("lru index points at vacant slot {idx}"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        match self.slots.get_mut(idx) {
            Some(Some(node)) => node,
            _ => unreachable!("lru index points at vacant slot {idx}"),
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn promote(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.detach(idx);
            self.attach_front(idx);
        }
    }

    fn take_slot(&mut self, idx: usize) -> (K, V) {
        self.detach(idx);
        let node = match self.slots.get_mut(idx).and_then(Option::take) {
            Some(node) => node,
            None => unreachable!("lru index points at vacant slot {idx}"),
        };
        self.free.push(idx);
        self.index.remove(&node.key);
        (node.key, node.value)
    }

    fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.gets += 1;
        let idx = *self.index.get(key)?;
        self.hits += 1;
        self.promote(idx);
        Some(&self.node(idx).value)
    }

    /// Insert or overwrite, returning the entry evicted for capacity.
    fn insert(&mut self, key: K, value: V, max_entries: usize) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.node_mut(idx).value = value;
            self.promote(idx);
            return None;
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.attach_front(idx);

        if max_entries != 0 && self.len() > max_entries {
            return self.evict_oldest();
        }
        None
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        let entry = self.take_slot(idx);
        self.evictions += 1;
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        let entry = self.take_slot(idx);
        self.evictions += 1;
        Some(entry)
    }

    /// Drain every entry, oldest first.
    fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.len());
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            match self.slots.get_mut(idx).and_then(Option::take) {
                Some(node) => {
                    cursor = node.prev;
                    drained.push((node.key, node.value));
                }
                None => unreachable!("lru list points at vacant slot {idx}"),
            }
        }
        self.evictions += drained.len() as u64;
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        drained
    }
}

/// Bounded key/value store ordered by recency of use.
///
/// `max_entries == 0` disables the size limit; eviction is then left to
/// the caller through [`remove`](Self::remove) and
/// [`remove_oldest`](Self::remove_oldest).
///
/// # Example
///
/// ```
/// use trellis_cache::LruCache;
///
/// let lru = LruCache::new(2);
/// lru.add("a", 1);
/// lru.add("b", 2);
/// assert_eq!(lru.get("a"), Some(1));
/// lru.add("c", 3); // evicts "b", the least recently used
/// assert!(!lru.contains("b"));
/// ```
pub struct LruCache<K, V> {
    max_entries: usize,
    on_evicted: Option<EvictionCallback<K, V>>,
    inner: RwLock<Inner<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a store holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            on_evicted: None,
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Create a store that reports every evicted entry to `on_evicted`.
    pub fn with_eviction<F>(max_entries: usize, on_evicted: F) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        Self {
            max_entries,
            on_evicted: Some(Box::new(on_evicted)),
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Configured capacity; zero means unbounded.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    // The slab is consistent between statements, so a poisoned lock is safe to reuse.
    fn read(&self) -> RwLockReadGuard<'_, Inner<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify<I>(&self, evicted: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        if let Some(callback) = &self.on_evicted {
            for (key, value) in evicted {
                callback(key, value);
            }
        }
    }

    /// Look up a key, promoting it to most recently used on a hit.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.write().get(key).cloned()
    }

    /// Check for a key without promoting it or touching the counters.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().index.contains_key(key)
    }

    /// Insert or overwrite a value and mark it most recently used.
    ///
    /// Overwriting does not invoke the eviction callback for the old value.
    pub fn add(&self, key: K, value: V) {
        let removed = self.write().insert(key, value, self.max_entries);
        self.notify(removed);
    }

    /// Return the stored value for `key`, creating it with `factory` on a miss.
    ///
    /// The factory runs while the write lock is held, so concurrent callers
    /// for the same key observe exactly one invocation. It must not call
    /// back into this store.
    pub fn getsert<F>(&self, key: K, factory: F) -> V
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        let (value, removed) = {
            let mut inner = self.write();
            if let Some(value) = inner.get(&key) {
                return value.clone();
            }
            let value = factory();
            let removed = inner.insert(key, value.clone(), self.max_entries);
            (value, removed)
        };
        self.notify(removed);
        value
    }

    /// Remove a key. Returns whether an entry was removed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.write().remove(key);
        let found = removed.is_some();
        self.notify(removed);
        found
    }

    /// Remove the least recently used entry. Returns whether one existed.
    pub fn remove_oldest(&self) -> bool {
        let removed = self.write().evict_oldest();
        let found = removed.is_some();
        self.notify(removed);
        found
    }

    /// Purge every entry, reporting each one to the eviction callback.
    pub fn clear(&self) {
        let drained = self.write().drain();
        if !drained.is_empty() {
            tracing::debug!(entries = drained.len(), "Cleared LRU store");
        }
        self.notify(drained);
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> LruStats {
        let inner = self.read();
        LruStats {
            items: inner.len(),
            gets: inner.gets,
            hits: inner.hits,
            evictions: inner.evictions,
        }
    }
}

impl<K, V> fmt::Debug for LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("max_entries", &self.max_entries)
            .field("has_eviction_callback", &self.on_evicted.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex, Weak};
    use std::thread;

    fn recording_store(
        max_entries: usize,
    ) -> (Arc<LruCache<u32, String>>, Arc<Mutex<Vec<(u32, String)>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let lru = LruCache::with_eviction(max_entries, move |k, v| {
            sink.lock().unwrap().push((k, v));
        });
        (Arc::new(lru), log)
    }

    #[test]
    fn test_get_hit_and_miss_counters() {
        let lru = LruCache::new(10);
        lru.add("alpha".to_string(), 1);

        assert_eq!(lru.get("alpha"), Some(1));
        assert_eq!(lru.get("beta"), None);

        let stats = lru.stats();
        assert_eq!(stats.items, 1);
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses(), 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_add_overwrites_without_eviction() {
        let (lru, log) = recording_store(2);
        lru.add(1, "one".to_string());
        lru.add(1, "uno".to_string());

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.get(&1), Some("uno".to_string()));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(lru.stats().evictions, 0);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let (lru, log) = recording_store(2);
        lru.add(1, "one".to_string());
        lru.add(2, "two".to_string());
        lru.add(3, "three".to_string());

        assert_eq!(lru.len(), 2);
        assert!(!lru.contains(&1));
        assert_eq!(*log.lock().unwrap(), vec![(1, "one".to_string())]);
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let max = 5;
        let lru = LruCache::new(max);
        for k in 0..max as u32 {
            lru.add(k, k);
        }
        assert_eq!(lru.get(&0), Some(0));
        for k in 100..100 + (max as u32 - 1) {
            lru.add(k, k);
        }
        assert!(lru.contains(&0));

        let untouched = LruCache::new(max);
        for k in 0..max as u32 {
            untouched.add(k, k);
        }
        for k in 100..100 + max as u32 {
            untouched.add(k, k);
        }
        assert!(!untouched.contains(&0));
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let lru = LruCache::new(0);
        for k in 0..10_000u32 {
            lru.add(k, ());
        }
        assert_eq!(lru.len(), 10_000);
        assert_eq!(lru.stats().evictions, 0);
    }

    #[test]
    fn test_remove_and_remove_oldest_report_evictions() {
        let (lru, log) = recording_store(0);
        lru.add(1, "one".to_string());
        lru.add(2, "two".to_string());
        lru.add(3, "three".to_string());

        assert!(lru.remove(&2));
        assert!(!lru.remove(&2));
        assert!(lru.remove_oldest());

        assert_eq!(
            *log.lock().unwrap(),
            vec![(2, "two".to_string()), (1, "one".to_string())]
        );
        assert_eq!(lru.stats().evictions, 2);
        assert_eq!(lru.len(), 1);

        assert!(lru.remove_oldest());
        assert!(!lru.remove_oldest());
        assert!(lru.is_empty());
    }

    #[test]
    fn test_clear_reports_every_entry_once() {
        let (lru, log) = recording_store(10);
        for k in 0..5u32 {
            lru.add(k, k.to_string());
        }
        lru.clear();

        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(
            seen,
            (0..5u32).map(|k| (k, k.to_string())).collect::<Vec<_>>()
        );
        assert_eq!(lru.stats().evictions, 5);
        assert!(lru.is_empty());

        lru.add(9, "nine".to_string());
        assert_eq!(lru.get(&9), Some("nine".to_string()));
    }

    #[test]
    fn test_callback_may_reenter_store() {
        let lru: Arc<LruCache<u32, u32>> = Arc::new_cyclic(|weak: &Weak<LruCache<u32, u32>>| {
            let weak = weak.clone();
            LruCache::with_eviction(1, move |k, _v| {
                if let Some(store) = weak.upgrade() {
                    // Would deadlock if the lock were still held.
                    let _ = store.len();
                    let _ = store.get(&k);
                    if k < 1000 {
                        store.add(k + 1000, 0);
                    }
                }
            })
        });
        lru.add(1, 1);
        lru.add(2, 2);
        assert!(lru.contains(&1002));
        assert!(!lru.remove(&1001));
        lru.clear();
        assert!(lru.is_empty());
    }

    #[test]
    fn test_eviction_order_capacity_one() {
        let (lru, log) = recording_store(1);
        for k in 0..1000u32 {
            lru.add(k, k.to_string());
            assert_eq!(lru.get(&k), Some(k.to_string()));
        }

        let evicted: Vec<u32> = log.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(evicted, (0..999).collect::<Vec<_>>());
        assert_eq!(lru.stats().evictions, 999);
    }

    #[test]
    fn test_getsert_runs_factory_once_across_threads() {
        let lru = Arc::new(LruCache::new(16));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(32));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let lru = Arc::clone(&lru);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    lru.getsert("client", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Arc::new(42u64)
                    })
                })
            })
            .collect();

        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        assert_eq!(lru.stats().gets, 32);
    }

    #[test]
    fn test_getsert_can_evict() {
        let (lru, log) = recording_store(1);
        lru.getsert(1, || "one".to_string());
        lru.getsert(2, || "two".to_string());
        assert_eq!(*log.lock().unwrap(), vec![(1, "one".to_string())]);
    }

    proptest! {
        #[test]
        fn prop_capacity_and_eviction_accounting(
            max in 1usize..16,
            keys in proptest::collection::vec(0u16..64, 0..256),
        ) {
            let lru = LruCache::new(max);
            let mut inserted_new = 0u64;
            for k in keys {
                if !lru.contains(&k) {
                    inserted_new += 1;
                }
                lru.add(k, k);
                prop_assert!(lru.len() <= max);
                let stats = lru.stats();
                prop_assert_eq!(stats.evictions, inserted_new - lru.len() as u64);
            }
        }

        #[test]
        fn prop_most_recent_survives(
            max in 1usize..16,
            keys in proptest::collection::vec(0u16..64, 1..128),
        ) {
            let lru = LruCache::new(max);
            for k in &keys {
                lru.add(*k, ());
            }
            let last = *keys.last().unwrap();
            prop_assert!(lru.contains(&last));
        }
    }
}
