//! Trellis Core - Shared Errors and Configuration
//!
//! Every other Trellis crate depends on this one. It holds the error
//! taxonomy surfaced to callers and the environment parsing rules used by
//! the `from_env()` constructors. No runtime behavior lives here.

pub mod config;
pub mod error;

pub use error::{
    CacheError, ConfigError, RateLimitError, TokenError, TrellisError, TrellisResult,
};
