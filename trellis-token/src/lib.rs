//! Trellis Token - Signed Access and Refresh Tokens
//!
//! Layers, bottom up:
//!
//! - [`TokenCodec`]: JSON values authenticated with HMAC (SHA-1/256/384/512
//!   picked by key length), optionally AES-CTR encrypted, encoded as
//!   padded base64url, with issue/expiry checks against a [`WallClock`].
//! - [`GrantToken`]: a codec tagged with a [`GrantType`] whose payload is
//!   bound to the caller's user agent, read from requests through a
//!   [`TokenGetter`].
//! - [`Auth`]: the access/refresh pair built from [`AuthOptions`].
//!
//! Requests are anything implementing [`RequestContext`]; `http::Request`
//! and `http::HeaderMap` are supported out of the box.

pub mod auth;
pub mod clock;
pub mod codec;
pub mod crypto;
pub mod getter;
pub mod grant;

pub use auth::{Auth, AuthOptions, AuthToken};
pub use clock::{FixedClock, ManualClock, SystemClock, WallClock};
pub use codec::TokenCodec;
pub use crypto::{agent_hash, BlockKey, HashAlgorithm};
pub use getter::{HeaderGetter, RequestContext, TokenGetter};
pub use grant::{GrantToken, GrantType, TokenValue};
