//! Trellis Cache - Bounded LRU and Single-Flight Loading
//!
//! Two layers, leaves first:
//!
//! - [`LruCache`]: bounded, thread-safe key/value store ordered by recency,
//!   with an optional eviction callback and usage counters.
//! - [`Cache`]: an `LruCache` plus a [`SingleFlight`] group, so concurrent
//!   misses for one key run a single loader.
//!
//! The store is purely in memory. Values are handed out as clones; wrap
//! large values in `Arc` to share them.

pub mod cache;
pub mod flight;
pub mod lru;

pub use cache::{Cache, Evictor};
pub use flight::SingleFlight;
pub use lru::{EvictionCallback, LruCache, LruStats};
