//! Compound token-bucket limiter.
//!
//! A [`Limiter`] keeps one bucket per [`Rate`]. Each bucket starts full and
//! is topped up by `limit` tokens once its window has elapsed, capped at
//! `limit`. An admission takes one token from every bucket in rule order;
//! the first empty bucket denies the call and later buckets are left
//! untouched.
//!
//! All state is atomic, so `reached` never blocks and parallel admissions
//! are counted exactly.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use trellis_core::RateLimitError;

use crate::rate::Rate;

static ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic nanoseconds since the first limiter was touched in this process.
pub(crate) fn monotonic_nanos() -> u64 {
    u64::try_from(ANCHOR.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

fn period_nanos(rate: &Rate) -> u64 {
    u64::try_from(rate.period.as_nanos()).unwrap_or(u64::MAX)
}

struct Bucket {
    remaining: AtomicI64,
    window_start: AtomicU64,
}

impl Bucket {
    fn full(rate: &Rate, now: u64) -> Self {
        Self {
            remaining: AtomicI64::new(i64::from(rate.limit)),
            window_start: AtomicU64::new(now),
        }
    }

    /// Try to take one token. Returns `false` when the rule denies.
    fn admit(&self, rate: &Rate, now: u64) -> bool {
        if rate.denies_all() {
            return false;
        }
        if rate.is_unlimited() {
            return true;
        }

        let limit = i64::from(rate.limit);
        let start = self.window_start.load(Ordering::Acquire);
        if now.saturating_sub(start) > period_nanos(rate)
            && self
                .window_start
                .compare_exchange(start, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let current = self.remaining.fetch_add(limit, Ordering::AcqRel) + limit;
            if current > limit {
                self.remaining.fetch_sub(current - limit, Ordering::AcqRel);
            }
        }

        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                (remaining >= 1).then(|| remaining - 1)
            })
            .is_ok()
    }
}

/// Thread-safe compound rate limiter.
///
/// ```
/// use trellis_ratelimit::{sec_rates, Limiter};
///
/// let limiter = Limiter::new(sec_rates(&[10, 60]).unwrap());
/// let mut admitted = 0;
/// while !limiter.reached() {
///     admitted += 1;
/// }
/// assert_eq!(admitted, 10);
/// ```
pub struct Limiter {
    rates: Arc<[Rate]>,
    buckets: Box<[Bucket]>,
}

impl Limiter {
    /// Create a limiter with every bucket full. An empty rule set never limits.
    pub fn new(rates: impl Into<Arc<[Rate]>>) -> Self {
        let rates = rates.into();
        let now = monotonic_nanos();
        let buckets = rates.iter().map(|rate| Bucket::full(rate, now)).collect();
        Self { rates, buckets }
    }

    /// The rules this limiter enforces.
    pub fn rates(&self) -> &[Rate] {
        &self.rates
    }

    /// Record one call. Returns `true` when the call must be rejected.
    pub fn reached(&self) -> bool {
        let now = monotonic_nanos();
        for (index, (rate, bucket)) in self.rates.iter().zip(self.buckets.iter()).enumerate() {
            if !bucket.admit(rate, now) {
                tracing::trace!(rule = index, rate = %rate, "Rate limit reached");
                return true;
            }
        }
        false
    }

    /// Like [`reached`](Self::reached), but first confirms the caller's
    /// view of the rules still matches this limiter.
    ///
    /// # Errors
    /// Returns [`RateLimitError::RateMismatch`] without recording the call
    /// when `rates` differs in length or in any rule. Rebuild the limiter
    /// with the new rules in that case.
    pub fn reached_with_rates(&self, rates: &[Rate]) -> Result<bool, RateLimitError> {
        if *self.rates != *rates {
            return Err(RateLimitError::RateMismatch);
        }
        Ok(self.reached())
    }

    /// Tokens left in each bucket, in rule order.
    pub fn remaining(&self) -> Vec<i64> {
        self.buckets
            .iter()
            .map(|bucket| bucket.remaining.load(Ordering::Acquire))
            .collect()
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("rates", &self.rates)
            .field("remaining", &self.remaining())
            .finish()
    }
}
