//! Rate limit configuration loaded from the environment.

use trellis_core::config::{env_parse, env_string};
use trellis_core::ConfigError;

use crate::group::{Limiters, RateMap};
use crate::guard::ClientGuard;
use crate::rate::Rate;

const CLIENTS_VAR: &str = "TRELLIS_RATE_LIMIT_CLIENTS";
const RULES_VAR: &str = "TRELLIS_RATE_LIMIT_RULES";

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of clients tracked at once (0 = unbounded).
    pub client_capacity: usize,

    /// Rules per operation name.
    pub rules: RateMap,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            client_capacity: 10_000,
            rules: RateMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TRELLIS_RATE_LIMIT_CLIENTS`: tracked client capacity (default 10000)
    /// - `TRELLIS_RATE_LIMIT_RULES`: `op=limit/secs[,limit/secs];op2=...`
    ///   e.g. `login=5/60,100/3600;any=1000/60`
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] when the rule list is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let rules = match env_string(RULES_VAR) {
            Some(raw) => parse_rules(&raw)?,
            None => defaults.rules,
        };
        Ok(Self {
            client_capacity: env_parse(CLIENTS_VAR, defaults.client_capacity),
            rules,
        })
    }

    /// Build a keyed limiter group from this configuration.
    pub fn limiters(&self) -> Limiters {
        Limiters::new(self.rules.clone(), self.client_capacity)
    }

    /// Build a per-client gate enforcing the rules configured for `op`.
    pub fn guard(&self, op: &str) -> Option<ClientGuard> {
        self.rules
            .get(op)
            .map(|rates| ClientGuard::new(rates.clone(), self.client_capacity))
    }
}

/// Parse `op=limit/secs[,limit/secs];op2=...` into a rule map.
///
/// Blank segments are skipped. A repeated op name keeps its last rules.
pub fn parse_rules(raw: &str) -> Result<RateMap, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: RULES_VAR.to_string(),
        value: raw.to_string(),
        reason,
    };

    let mut rules = RateMap::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (op, rates) = entry
            .split_once('=')
            .ok_or_else(|| invalid(format!("{entry:?} is not op=rules")))?;
        let op = op.trim();
        if op.is_empty() {
            return Err(invalid(format!("{entry:?} has no operation name")));
        }
        let rates = rates
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::parse::<Rate>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(e.to_string()))?;
        rules.insert(op.to_string(), rates);
    }
    Ok(rules)
}
