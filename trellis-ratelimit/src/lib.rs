//! Trellis Rate Limit - Compound Token Buckets
//!
//! - [`Rate`] rules and the [`rates_from_pairs`] / [`sec_rates`] builders
//! - [`Limiter`]: lock-free compound limiter over a rule vector
//! - [`Limiters`]: per-client limiters keyed by operation name, with an
//!   `"any"` fallback
//! - [`ClientGuard`]: one rule vector applied per client id
//! - [`RateLimitConfig`]: environment-driven configuration
//!
//! Limiters measure time on a process-local monotonic clock. A denied call
//! is reported as `true` from `reached()`; errors are reserved for
//! configuration problems and the client gate.

pub mod config;
pub mod group;
pub mod guard;
pub mod limiter;
pub mod rate;

pub use config::{parse_rules, RateLimitConfig};
pub use group::{Limiters, RateMap, ANY_OP};
pub use guard::ClientGuard;
pub use limiter::Limiter;
pub use rate::{rates_from_pairs, sec_rates, Rate};
