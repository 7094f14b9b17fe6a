//! Access/refresh authentication façade.
//!
//! [`Auth`] owns two [`GrantToken`]s that share one set of keys: a
//! short-lived access token presented on every request and a long-lived
//! refresh token exchanged for new access tokens.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use trellis_core::config::{env_list, env_parse, env_string};
use trellis_core::{ConfigError, TokenError};

use crate::clock::WallClock;
use crate::codec::TokenCodec;
use crate::crypto::{random_bytes, BlockKey};
use crate::getter::{HeaderGetter, RequestContext, TokenGetter};
use crate::grant::{GrantToken, GrantType};

/// Default access token lifetime: one hour.
pub const DEFAULT_ACCESS_MAX_AGE: i64 = 3600;
pub const DEFAULT_ACCESS_HEADER: &str = "ACCESS-TOKEN";
pub const DEFAULT_REFRESH_HEADER: &str = "REFRESH-TOKEN";

fn secret(value: impl Into<String>) -> SecretString {
    SecretString::new(value.into().into_boxed_str())
}

/// Authentication configuration.
pub struct AuthOptions {
    /// Access token lifetime in seconds (0 = never expires).
    pub access_max_age: i64,

    /// Refresh token lifetime in seconds (0 = never expires).
    pub refresh_max_age: i64,

    /// HMAC key. 16, 32, 48 or 64+ bytes select SHA-1, SHA-256, SHA-384 or
    /// SHA-512. Empty means a random key per process.
    pub hash_key: SecretString,

    /// AES key of 16, 24 or 32 bytes. Empty disables encryption.
    pub block_key: SecretString,

    /// Headers searched in order for the access token.
    pub access_headers: Vec<String>,

    /// Headers searched in order for the refresh token.
    pub refresh_headers: Vec<String>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            access_max_age: DEFAULT_ACCESS_MAX_AGE,
            refresh_max_age: 0,
            hash_key: secret(""),
            block_key: secret(""),
            access_headers: vec![DEFAULT_ACCESS_HEADER.to_string()],
            refresh_headers: vec![DEFAULT_REFRESH_HEADER.to_string()],
        }
    }
}

impl AuthOptions {
    /// Load options from environment variables.
    ///
    /// Environment variables:
    /// - `TRELLIS_AUTH_ACCESS_MAX_AGE`: access lifetime in seconds (default 3600)
    /// - `TRELLIS_AUTH_REFRESH_MAX_AGE`: refresh lifetime in seconds (default 0)
    /// - `TRELLIS_AUTH_HASH_KEY`: HMAC key (default random per process)
    /// - `TRELLIS_AUTH_BLOCK_KEY`: AES key (default no encryption)
    /// - `TRELLIS_AUTH_ACCESS_HEADERS`: comma-separated header names
    /// - `TRELLIS_AUTH_REFRESH_HEADERS`: comma-separated header names
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            access_max_age: env_parse("TRELLIS_AUTH_ACCESS_MAX_AGE", defaults.access_max_age),
            refresh_max_age: env_parse("TRELLIS_AUTH_REFRESH_MAX_AGE", defaults.refresh_max_age),
            hash_key: env_string("TRELLIS_AUTH_HASH_KEY")
                .map(secret)
                .unwrap_or(defaults.hash_key),
            block_key: env_string("TRELLIS_AUTH_BLOCK_KEY")
                .map(secret)
                .unwrap_or(defaults.block_key),
            access_headers: env_list("TRELLIS_AUTH_ACCESS_HEADERS")
                .unwrap_or(defaults.access_headers),
            refresh_headers: env_list("TRELLIS_AUTH_REFRESH_HEADERS")
                .unwrap_or(defaults.refresh_headers),
        }
    }

    /// Builder: set both keys.
    pub fn with_keys(mut self, hash_key: impl Into<String>, block_key: impl Into<String>) -> Self {
        self.hash_key = secret(hash_key);
        self.block_key = secret(block_key);
        self
    }

    /// Check the options for deployments where tokens must outlive the
    /// process.
    ///
    /// # Errors
    /// - [`ConfigError::MissingRequired`] when no hash key is configured
    /// - [`ConfigError::InvalidValue`] for an invalid block key length
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_key.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "hash_key".to_string(),
            });
        }
        match self.block_key.expose_secret().as_bytes() {
            [] => Ok(()),
            key => BlockKey::new(key).map(|_| ()),
        }
    }

    /// Builder: set both lifetimes in seconds.
    pub fn with_max_ages(mut self, access: i64, refresh: i64) -> Self {
        self.access_max_age = access;
        self.refresh_max_age = refresh;
        self
    }
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("access_max_age", &self.access_max_age)
            .field("refresh_max_age", &self.refresh_max_age)
            .field("hash_key", &"[REDACTED]")
            .field("block_key", &"[REDACTED]")
            .field("access_headers", &self.access_headers)
            .field("refresh_headers", &self.refresh_headers)
            .finish()
    }
}

/// A freshly issued token pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub max_age: i64,
}

/// Issues and verifies access/refresh token pairs.
#[derive(Debug, Clone)]
pub struct Auth {
    access: GrantToken,
    refresh: GrantToken,
}

impl Auth {
    /// Build both codecs from `opts`.
    ///
    /// An empty hash key is generated once and shared, so refresh tokens
    /// verify under the same key as access tokens.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for an invalid block key length.
    pub fn new(opts: AuthOptions) -> Result<Self, ConfigError> {
        let hash_key: Arc<[u8]> = match opts.hash_key.expose_secret().as_bytes() {
            [] => {
                tracing::warn!(
                    "No auth hash key configured; generated a random key, tokens will not survive restart"
                );
                random_bytes(16).into()
            }
            key => key.into(),
        };
        let block_key = match opts.block_key.expose_secret().as_bytes() {
            [] => None,
            key => Some(BlockKey::new(key)?),
        };

        let codec = |max_age| TokenCodec::from_parts(max_age, Arc::clone(&hash_key), block_key.clone());
        Ok(Self {
            access: GrantToken::new(
                Arc::new(HeaderGetter::new(opts.access_headers)),
                codec(opts.access_max_age),
                GrantType::Access,
            ),
            refresh: GrantToken::new(
                Arc::new(HeaderGetter::new(opts.refresh_headers)),
                codec(opts.refresh_max_age),
                GrantType::Refresh,
            ),
        })
    }

    /// Replace the wall clock of both codecs.
    pub fn with_clock(self, clock: Arc<dyn WallClock>) -> Self {
        Self {
            access: self.access.map_codec(|c| c.with_clock(Arc::clone(&clock))),
            refresh: self.refresh.map_codec(|c| c.with_clock(clock)),
        }
    }

    /// Replace how access and refresh tokens are located on requests.
    pub fn with_getters(self, access: Arc<dyn TokenGetter>, refresh: Arc<dyn TokenGetter>) -> Self {
        Self {
            access: self.access.with_getter(access),
            refresh: self.refresh.with_getter(refresh),
        }
    }

    /// Issue an access/refresh pair carrying `meta` for the caller of `req`.
    pub fn new_auth_token<M>(&self, req: &dyn RequestContext, meta: &M) -> Result<AuthToken, TokenError>
    where
        M: Serialize + ?Sized,
    {
        Ok(AuthToken {
            access_token: self.access.encode_values(req, meta)?,
            refresh_token: self.refresh.encode_values(req, meta)?,
            max_age: self.access.max_age(),
        })
    }

    /// Verify the access token on `req` and return its metadata.
    pub fn get_access_info<M>(&self, req: &dyn RequestContext) -> Result<M, TokenError>
    where
        M: DeserializeOwned,
    {
        self.access.decode_values(req)
    }

    /// Verify the refresh token on `req` and return its metadata.
    pub fn get_refresh_info<M>(&self, req: &dyn RequestContext) -> Result<M, TokenError>
    where
        M: DeserializeOwned,
    {
        self.refresh.decode_values(req)
    }

    pub fn access(&self) -> &GrantToken {
        &self.access
    }

    pub fn refresh(&self) -> &GrantToken {
        &self.refresh
    }
}
