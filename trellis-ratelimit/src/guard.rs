//! Per-client admission gate.

use std::fmt;
use std::sync::Arc;

use trellis_cache::LruCache;
use trellis_core::RateLimitError;

use crate::limiter::Limiter;
use crate::rate::Rate;

/// Applies one rule set independently to every client id, typically a
/// remote address resolved by the caller's transport layer.
///
/// ```
/// use trellis_core::RateLimitError;
/// use trellis_ratelimit::{sec_rates, ClientGuard};
///
/// let guard = ClientGuard::new(sec_rates(&[1, 60]).unwrap(), 1024);
/// assert_eq!(guard.check(Some("10.0.0.1")), Ok(()));
/// assert!(matches!(guard.check(Some("10.0.0.1")), Err(RateLimitError::Limited { .. })));
/// assert_eq!(guard.check(None), Err(RateLimitError::UnresolvedClient));
/// ```
pub struct ClientGuard {
    rates: Arc<[Rate]>,
    clients: LruCache<String, Arc<Limiter>>,
}

impl ClientGuard {
    /// Create a guard tracking at most `client_capacity` clients (zero for no bound).
    pub fn new(rates: impl Into<Arc<[Rate]>>, client_capacity: usize) -> Self {
        Self {
            rates: rates.into(),
            clients: LruCache::new(client_capacity),
        }
    }

    /// Admit or reject one call from `client`.
    ///
    /// # Errors
    /// - [`RateLimitError::UnresolvedClient`] when the client id is missing or blank
    /// - [`RateLimitError::Limited`] when the client's limiter denies the call
    pub fn check(&self, client: Option<&str>) -> Result<(), RateLimitError> {
        let client = client
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(RateLimitError::UnresolvedClient)?;

        let limiter = self.clients.getsert(client.to_string(), || {
            Arc::new(Limiter::new(Arc::clone(&self.rates)))
        });
        if limiter.reached() {
            return Err(RateLimitError::Limited {
                client: client.to_string(),
            });
        }
        Ok(())
    }

    pub fn rates(&self) -> &[Rate] {
        &self.rates
    }

    /// Number of clients currently tracked.
    pub fn clients(&self) -> usize {
        self.clients.len()
    }
}

impl fmt::Debug for ClientGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientGuard")
            .field("rates", &self.rates)
            .field("clients", &self.clients.len())
            .finish()
    }
}
