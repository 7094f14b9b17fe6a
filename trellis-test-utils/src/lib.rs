//! Trellis Test Utilities
//!
//! Shared test infrastructure for the Trellis workspace:
//! - Proptest generators for keys, rules, metadata and user agents
//! - Request and clock fixtures for token tests
//! - Tracing and polling helpers for concurrency tests

use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderValue};
use tracing_subscriber::EnvFilter;

// Re-export core types for convenience
pub use trellis_core::{CacheError, ConfigError, RateLimitError, TokenError, TrellisError};
pub use trellis_token::{Auth, AuthOptions, FixedClock, ManualClock, WallClock};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `trellis=debug`. Output goes through the
/// test writer so it is captured per test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trellis=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// POLLING
// ============================================================================

/// Spin until `condition` holds, panicking after five seconds.
pub fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached within 5s");
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// 16-byte HMAC key selecting SHA-1.
    pub const HASH_KEY: &str = "1111111111111111";

    /// 16-byte AES-128 key.
    pub const BLOCK_KEY: &str = "2222222222222222";

    /// Default user agent used by request fixtures.
    pub const USER_AGENT: &str = "agent";

    /// Headers carrying only a user agent.
    pub fn request(user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(http::header::USER_AGENT, value);
        }
        headers
    }

    /// Headers carrying a user agent and one token header.
    pub fn request_with_token(user_agent: &str, header: &'static str, token: &str) -> HeaderMap {
        let mut headers = request(user_agent);
        if let Ok(value) = HeaderValue::from_str(token) {
            headers.insert(header, value);
        }
        headers
    }

    /// Auth with fixed keys and a manual clock starting at `now`.
    pub fn auth_at(now: i64, encrypted: bool) -> (Auth, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let block_key = if encrypted { BLOCK_KEY } else { "" };
        let auth = match Auth::new(AuthOptions::default().with_keys(HASH_KEY, block_key)) {
            Ok(auth) => auth.with_clock(clock.clone()),
            Err(err) => panic!("fixture keys must be valid: {err}"),
        };
        (auth, clock)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;
    use serde_json::Value;
    use std::time::Duration;
    use trellis_ratelimit::Rate;

    /// One step against an LRU store keyed by `u8`.
    #[derive(Debug, Clone)]
    pub enum CacheOp {
        Add(u8, u32),
        Get(u8),
        Remove(u8),
    }

    pub fn arb_cache_op() -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            4 => (any::<u8>(), any::<u32>()).prop_map(|(k, v)| CacheOp::Add(k, v)),
            3 => any::<u8>().prop_map(CacheOp::Get),
            1 => any::<u8>().prop_map(CacheOp::Remove),
        ]
    }

    pub fn arb_cache_ops(max_len: usize) -> impl Strategy<Value = Vec<CacheOp>> {
        vec(arb_cache_op(), 0..max_len)
    }

    /// One to four rules whose periods are long enough never to refill
    /// during a test.
    pub fn arb_long_rates() -> impl Strategy<Value = Vec<Rate>> {
        vec(
            (0u32..300, 3600u64..1_000_000)
                .prop_map(|(limit, secs)| Rate::new(limit, Duration::from_secs(secs))),
            1..4,
        )
    }

    /// Printable ASCII user agents, which are always valid header values.
    pub fn arb_user_agent() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9/ .;()_-]{1,64}"
    }

    /// JSON metadata without floats, so it survives a JSON round trip exactly.
    pub fn arb_metadata() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                vec(inner.clone(), 0..4).prop_map(Value::Array),
                btree_map("[a-z]{1,8}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    /// Valid HMAC key lengths across all four digests.
    pub fn arb_hash_key() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![Just(16usize), Just(32), Just(48), Just(64), Just(80)]
            .prop_flat_map(|len| vec(any::<u8>(), len))
    }

    /// Empty (no encryption) or a valid AES key.
    pub fn arb_block_key() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![Just(0usize), Just(16), Just(24), Just(32)]
            .prop_flat_map(|len| vec(any::<u8>(), len))
    }
}

pub use generators::CacheOp;
