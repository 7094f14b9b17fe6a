//! Error types for Trellis operations

use thiserror::Error;

/// Cache lookup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The key is not cached and no loader was supplied.
    #[error("Cache: provided key does not exist")]
    NotExist,
}

/// Rate limiting errors.
///
/// A denied admission is reported as `true` from `reached()`, not as an
/// error. These variants cover configuration drift and the client-facing
/// admission gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate rules mismatched the limiter configuration")]
    RateMismatch,

    #[error("Invalid rate rules: {reason}")]
    InvalidRates { reason: String },

    #[error("Rate limited: {client}")]
    Limited { client: String },

    #[error("Client identity could not be resolved")]
    UnresolvedClient,
}

/// Token encoding and verification errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("No token present in request")]
    NoToken,

    #[error("Token is not valid")]
    MacInvalid,

    #[error("Token could not be decrypted")]
    DecryptFailed,

    #[error("Token timestamps not found")]
    NoTimestamp,

    #[error("Token used before issued")]
    Issued,

    #[error("Token is expired")]
    Expired,

    #[error("Grant type mismatched: expected {expected}, got {got}")]
    GrantMismatch { expected: String, got: String },

    #[error("User agent mismatched: {agent}")]
    AgentMismatch { agent: String },

    #[error("Malformed token: {reason}")]
    Malformed { reason: String },

    #[error("Token encoding failed: {reason}")]
    Encode { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Trellis errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrellisError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Failure reported by a caller-supplied loader.
    #[error("Load failed: {reason}")]
    Load { reason: String },
}

impl TrellisError {
    /// Build a loader failure from any displayable error.
    pub fn load(reason: impl std::fmt::Display) -> Self {
        Self::Load {
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for Trellis operations.
pub type TrellisResult<T> = Result<T, TrellisError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_not_exist() {
        let msg = format!("{}", CacheError::NotExist);
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_token_error_display_grant_mismatch() {
        let err = TokenError::GrantMismatch {
            expected: "refresh".to_string(),
            got: "access".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Grant type mismatched: expected refresh, got access"
        );
    }

    #[test]
    fn test_token_error_display_agent_mismatch() {
        let err = TokenError::AgentMismatch {
            agent: "wrong agent".to_string(),
        };
        assert_eq!(err.to_string(), "User agent mismatched: wrong agent");
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "block_key".to_string(),
            value: "7 bytes".to_string(),
            reason: "must be 16, 24 or 32 bytes".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("block_key"));
        assert!(msg.contains("7 bytes"));
        assert!(msg.contains("must be 16, 24 or 32 bytes"));
    }

    #[test]
    fn test_trellis_error_from_variants() {
        let cache = TrellisError::from(CacheError::NotExist);
        assert!(matches!(cache, TrellisError::Cache(_)));

        let rate = TrellisError::from(RateLimitError::RateMismatch);
        assert!(matches!(rate, TrellisError::RateLimit(_)));

        let token = TrellisError::from(TokenError::Expired);
        assert!(matches!(token, TrellisError::Token(TokenError::Expired)));

        let config = TrellisError::from(ConfigError::MissingRequired {
            field: "hash_key".to_string(),
        });
        assert!(matches!(config, TrellisError::Config(_)));
    }

    #[test]
    fn test_load_error_keeps_reason() {
        let err = TrellisError::load("connection refused");
        assert_eq!(
            err,
            TrellisError::Load {
                reason: "connection refused".to_string()
            }
        );
    }

    #[test]
    fn test_errors_compare_by_variant() {
        assert_eq!(TokenError::MacInvalid, TokenError::MacInvalid);
        assert_ne!(TokenError::MacInvalid, TokenError::DecryptFailed);
    }
}
