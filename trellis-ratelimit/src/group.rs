//! Per-client limiter groups keyed by operation name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use trellis_cache::LruCache;
use trellis_core::RateLimitError;

use crate::limiter::Limiter;
use crate::rate::Rate;

/// Operation name whose rules apply to any operation without its own entry.
pub const ANY_OP: &str = "any";

/// Rules per operation name.
pub type RateMap = HashMap<String, Vec<Rate>>;

/// One client's limiters, one per configured operation.
type ClientLimiters = Arc<HashMap<String, Limiter>>;

/// Rate limits per `(client, operation)`.
///
/// Each client gets its own set of limiters the first time it is seen;
/// the sets live in a bounded LRU store, so idle clients are forgotten
/// once `client_capacity` newer clients have been seen.
///
/// Lookup for an operation uses its own rules, else the [`ANY_OP`] rules.
/// An operation with neither is **not limited**. Add an `"any"` entry to
/// make unknown operations deny-by-rule instead.
pub struct Limiters {
    rates: HashMap<String, Arc<[Rate]>>,
    clients: LruCache<String, ClientLimiters>,
}

impl Limiters {
    /// Create a group. `client_capacity == 0` keeps every client forever.
    pub fn new(rate_map: RateMap, client_capacity: usize) -> Self {
        let rates = rate_map
            .into_iter()
            .map(|(op, rates)| (op, Arc::from(rates)))
            .collect();
        Self {
            rates,
            clients: LruCache::new(client_capacity),
        }
    }

    fn client(&self, client: &str) -> ClientLimiters {
        self.clients.getsert(client.to_string(), || {
            Arc::new(
                self.rates
                    .iter()
                    .map(|(op, rates)| (op.clone(), Limiter::new(Arc::clone(rates))))
                    .collect(),
            )
        })
    }

    /// Record one `op` call by `client`. Returns `true` when it must be rejected.
    pub fn reached(&self, client: &str, op: &str) -> bool {
        let limiters = self.client(client);
        match limiters.get(op).or_else(|| limiters.get(ANY_OP)) {
            Some(limiter) => limiter.reached(),
            None => false,
        }
    }

    /// Record one `op` call after checking `rate_map` still agrees with
    /// this group's rules for `op`.
    ///
    /// An `op` missing from `rate_map` is not limited.
    ///
    /// # Errors
    /// Returns [`RateLimitError::RateMismatch`] when `op` has no limiter in
    /// this group or its rules differ from `rate_map`.
    pub fn reached_with_rates(
        &self,
        client: &str,
        op: &str,
        rate_map: &RateMap,
    ) -> Result<bool, RateLimitError> {
        let Some(rates) = rate_map.get(op) else {
            return Ok(false);
        };
        let limiters = self.client(client);
        let limiter = limiters.get(op).ok_or(RateLimitError::RateMismatch)?;
        limiter.reached_with_rates(rates)
    }

    /// Rules configured for `op`, without the `"any"` fallback.
    pub fn rates(&self, op: &str) -> Option<&[Rate]> {
        self.rates.get(op).map(|rates| &**rates)
    }

    /// Number of clients currently tracked.
    pub fn clients(&self) -> usize {
        self.clients.len()
    }
}

impl fmt::Debug for Limiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiters")
            .field("ops", &self.rates.keys().collect::<Vec<_>>())
            .field("clients", &self.clients.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_map(entries: &[(&str, Rate)]) -> RateMap {
        entries
            .iter()
            .map(|(op, rate)| (op.to_string(), vec![*rate]))
            .collect()
    }

    #[test]
    fn test_configured_op_without_any_fallback() {
        let group = Limiters::new(rate_map(&[("login", Rate::per_secs(5, 60))]), 100);

        for _ in 0..5 {
            assert!(!group.reached("K", "login"));
            assert!(!group.reached("K", "other"));
        }
        assert!(group.reached("K", "login"));
        for _ in 0..100 {
            assert!(!group.reached("K", "other"));
        }
    }

    #[test]
    fn test_any_rules_cover_unknown_ops() {
        let group = Limiters::new(
            rate_map(&[("login", Rate::per_secs(5, 60)), (ANY_OP, Rate::per_secs(2, 60))]),
            100,
        );

        assert!(!group.reached("K", "search"));
        assert!(!group.reached("K", "upload"));
        // Unknown ops share the "any" bucket.
        assert!(group.reached("K", "search"));
        assert!(!group.reached("K", "login"));
    }

    #[test]
    fn test_clients_are_limited_independently() {
        let group = Limiters::new(rate_map(&[("login", Rate::per_secs(1, 60))]), 100);
        assert!(!group.reached("alice", "login"));
        assert!(group.reached("alice", "login"));
        assert!(!group.reached("bob", "login"));
        assert_eq!(group.clients(), 2);
    }

    #[test]
    fn test_evicted_client_starts_fresh() {
        let group = Limiters::new(rate_map(&[("login", Rate::per_secs(1, 60))]), 1);
        assert!(!group.reached("alice", "login"));
        assert!(!group.reached("bob", "login"));
        assert_eq!(group.clients(), 1);
        assert!(!group.reached("alice", "login"));
    }

    #[test]
    fn test_reached_with_rates() {
        let configured = rate_map(&[("login", Rate::per_secs(5, 60))]);
        let group = Limiters::new(configured.clone(), 100);

        assert_eq!(group.reached_with_rates("K", "login", &configured), Ok(false));
        assert_eq!(group.reached_with_rates("K", "other", &configured), Ok(false));

        let changed = rate_map(&[
            ("login", Rate::per_secs(6, 60)),
            ("signup", Rate::per_secs(1, 60)),
        ]);
        assert_eq!(
            group.reached_with_rates("K", "login", &changed),
            Err(RateLimitError::RateMismatch)
        );
        assert_eq!(
            group.reached_with_rates("K", "signup", &changed),
            Err(RateLimitError::RateMismatch)
        );
        assert_eq!(group.rates("login"), Some(&[Rate::per_secs(5, 60)][..]));
    }
}
