//! Token codec.
//!
//! A token is `base64url(body || mac)` with padding, where `body` is the
//! JSON envelope, or `iv || AES-CTR(envelope)` when a block key is set.
//! The envelope is:
//!
//! ```text
//! {"TokenValues":<value>,"ExpiresAt":<unix secs>,"IssuedAt":<unix secs>}
//! ```
//!
//! `ExpiresAt` is only written when the codec has a positive max age.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use trellis_core::{ConfigError, TokenError};

use crate::clock::{SystemClock, WallClock};
use crate::crypto::{random_bytes, BlockKey, HashAlgorithm};

/// Length of a generated hash key.
const RANDOM_HASH_KEY_LEN: usize = 16;

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope<'a, T: ?Sized> {
    token_values: &'a T,
    #[serde(skip_serializing_if = "is_zero")]
    expires_at: i64,
    issued_at: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OpenedEnvelope<T> {
    token_values: T,
    #[serde(default)]
    expires_at: i64,
    #[serde(default)]
    issued_at: i64,
}

/// Encodes values into authenticated tokens and verifies them back.
///
/// Keys are fixed at construction; `encode` and `decode` take `&self`
/// and keep all per-call state on the stack.
///
/// ```
/// use std::collections::BTreeMap;
/// use trellis_token::TokenCodec;
///
/// let codec = TokenCodec::new(3600, b"0123456789abcdef", b"")?;
/// let values = BTreeMap::from([("user", "42")]);
/// let token = codec.encode(&values)?;
/// let decoded: BTreeMap<String, String> = codec.decode(&token)?;
/// assert_eq!(decoded["user"], "42");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct TokenCodec {
    max_age: i64,
    hash_key: Arc<[u8]>,
    algorithm: HashAlgorithm,
    block_key: Option<BlockKey>,
    clock: Arc<dyn WallClock>,
}

impl TokenCodec {
    /// Create a codec.
    ///
    /// - `max_age` in seconds; zero or less means tokens never expire.
    /// - An empty `hash_key` is replaced by random bytes, so tokens will
    ///   not survive a restart.
    /// - An empty `block_key` disables encryption.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] when `block_key` is not a
    /// valid AES key length.
    pub fn new(max_age: i64, hash_key: &[u8], block_key: &[u8]) -> Result<Self, ConfigError> {
        let hash_key = if hash_key.is_empty() {
            tracing::warn!(
                "No token hash key configured; generated a random key, tokens will not survive restart"
            );
            random_bytes(RANDOM_HASH_KEY_LEN)
        } else {
            hash_key.to_vec()
        };
        let block_key = if block_key.is_empty() {
            None
        } else {
            Some(BlockKey::new(block_key)?)
        };
        Ok(Self::from_parts(max_age, hash_key.into(), block_key))
    }

    pub(crate) fn from_parts(max_age: i64, hash_key: Arc<[u8]>, block_key: Option<BlockKey>) -> Self {
        Self {
            max_age: max_age.max(0),
            algorithm: HashAlgorithm::for_key_len(hash_key.len()),
            hash_key,
            block_key,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock used for issue and expiry times.
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Token lifetime in seconds; zero means tokens never expire.
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn is_encrypted(&self) -> bool {
        self.block_key.is_some()
    }

    /// Encode `values` into a token stamped with the current time.
    ///
    /// # Errors
    /// Returns [`TokenError::Encode`] when `values` cannot be serialized.
    pub fn encode<T>(&self, values: &T) -> Result<String, TokenError>
    where
        T: Serialize + ?Sized,
    {
        let issued_at = self.clock.now_unix();
        let envelope = Envelope {
            token_values: values,
            expires_at: if self.max_age > 0 {
                issued_at.saturating_add(self.max_age)
            } else {
                0
            },
            issued_at,
        };
        let json = serde_json::to_vec(&envelope).map_err(|e| TokenError::Encode {
            reason: e.to_string(),
        })?;

        let mut body = match &self.block_key {
            Some(key) => key.encrypt(&json)?,
            None => json,
        };
        let mac = self.algorithm.sign(&self.hash_key, &body)?;
        body.extend_from_slice(&mac);
        Ok(URL_SAFE.encode(body))
    }

    /// Verify `token` and return the values it carries.
    ///
    /// # Errors
    /// - [`TokenError::Malformed`] for bad base64 or a payload that does not deserialize into `T`
    /// - [`TokenError::MacInvalid`] when the token is truncated or its MAC does not verify
    /// - [`TokenError::DecryptFailed`] when the encrypted body is shorter than the IV or
    ///   does not decrypt to JSON
    /// - [`TokenError::NoTimestamp`], [`TokenError::Issued`], [`TokenError::Expired`]
    ///   when the timestamps are missing, in the future or past expiry
    pub fn decode<T>(&self, token: &str) -> Result<T, TokenError>
    where
        T: DeserializeOwned,
    {
        self.decode_with(token, |_| Ok(()))
    }

    /// Like [`decode`](Self::decode), but runs `check` on the verified
    /// values before the timestamps are examined.
    pub(crate) fn decode_with<T, F>(&self, token: &str, check: F) -> Result<T, TokenError>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> Result<(), TokenError>,
    {
        let result = self.open(token).and_then(|opened| {
            check(&opened.token_values)?;
            self.check_timestamps(&opened)?;
            Ok(opened.token_values)
        });
        if let Err(err) = &result {
            tracing::debug!(error = %err, "Token verification failed");
        }
        result
    }

    /// Decode, authenticate and decrypt `token` into its envelope.
    fn open<T>(&self, token: &str) -> Result<OpenedEnvelope<T>, TokenError>
    where
        T: DeserializeOwned,
    {
        let raw = URL_SAFE.decode(token).map_err(|e| TokenError::Malformed {
            reason: e.to_string(),
        })?;

        let mac_len = self.algorithm.output_size();
        if raw.len() <= mac_len {
            return Err(TokenError::MacInvalid);
        }
        let (body, mac) = raw.split_at(raw.len() - mac_len);
        if !self.algorithm.verify(&self.hash_key, body, mac) {
            return Err(TokenError::MacInvalid);
        }

        let plain = match &self.block_key {
            Some(key) => {
                let plain = key.decrypt(body)?;
                // A wrong block key yields bytes that are not JSON at all.
                if serde_json::from_slice::<IgnoredAny>(&plain).is_err() {
                    return Err(TokenError::DecryptFailed);
                }
                plain
            }
            None => body.to_vec(),
        };
        serde_json::from_slice(&plain).map_err(|e| TokenError::Malformed {
            reason: e.to_string(),
        })
    }

    fn check_timestamps<T>(&self, opened: &OpenedEnvelope<T>) -> Result<(), TokenError> {
        let now = self.clock.now_unix();
        if opened.issued_at == 0 {
            return Err(TokenError::NoTimestamp);
        }
        if opened.issued_at > now {
            return Err(TokenError::Issued);
        }
        if self.max_age > 0 {
            if opened.expires_at == 0 {
                return Err(TokenError::NoTimestamp);
            }
            if opened.expires_at < now {
                return Err(TokenError::Expired);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("max_age", &self.max_age)
            .field("algorithm", &self.algorithm)
            .field("hash_key", &format!("[REDACTED, {} bytes]", self.hash_key.len()))
            .field("block_key", &self.block_key)
            .field("clock", &"<WallClock>")
            .finish()
    }
}
