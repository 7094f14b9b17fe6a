//! Grant-typed, agent-bound tokens.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trellis_core::TokenError;

use crate::codec::TokenCodec;
use crate::crypto::agent_hash;
use crate::getter::{RequestContext, TokenGetter};

/// Which credential a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantType {
    Access,
    Refresh,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values stamped into every grant token, wrapping the caller's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenValue<M> {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grant_type: String,
    pub metadata: M,
}

/// A codec bound to one grant type and one way of finding tokens.
#[derive(Clone)]
pub struct GrantToken {
    getter: Arc<dyn TokenGetter>,
    codec: TokenCodec,
    grant: GrantType,
}

impl GrantToken {
    pub fn new(getter: Arc<dyn TokenGetter>, codec: TokenCodec, grant: GrantType) -> Self {
        Self {
            getter,
            codec,
            grant,
        }
    }

    pub fn grant(&self) -> GrantType {
        self.grant
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Token lifetime in seconds; zero means no expiry.
    pub fn max_age(&self) -> i64 {
        self.codec.max_age()
    }

    pub(crate) fn with_getter(mut self, getter: Arc<dyn TokenGetter>) -> Self {
        self.getter = getter;
        self
    }

    pub(crate) fn map_codec(mut self, f: impl FnOnce(TokenCodec) -> TokenCodec) -> Self {
        self.codec = f(self.codec);
        self
    }

    /// Mint a token carrying `meta`, bound to the caller's user agent.
    pub fn encode_values<M>(&self, req: &dyn RequestContext, meta: &M) -> Result<String, TokenError>
    where
        M: Serialize + ?Sized,
    {
        self.codec.encode(&TokenValue {
            agent_hash: agent_hash(req.user_agent()),
            grant_type: self.grant.as_str().to_string(),
            metadata: meta,
        })
    }

    /// Find, verify and unwrap the token on `req`.
    ///
    /// # Errors
    /// Anything [`TokenGetter::get_token`] or [`TokenCodec::decode`]
    /// returns, except that [`TokenError::GrantMismatch`] for a token of
    /// another grant type is reported ahead of the timestamp checks.
    /// [`TokenError::AgentMismatch`] follows when the request's user agent
    /// differs from the one the token was minted for.
    pub fn decode_values<M>(&self, req: &dyn RequestContext) -> Result<M, TokenError>
    where
        M: DeserializeOwned,
    {
        let token = self.getter.get_token(req)?;
        let value: TokenValue<M> = self.codec.decode_with(&token, |value: &TokenValue<M>| {
            if value.grant_type == self.grant.as_str() {
                return Ok(());
            }
            tracing::debug!(expected = %self.grant, got = %value.grant_type, "Grant type mismatch");
            Err(TokenError::GrantMismatch {
                expected: self.grant.to_string(),
                got: value.grant_type.clone(),
            })
        })?;

        let agent = req.user_agent();
        if value.agent_hash != agent_hash(agent) {
            tracing::debug!(agent, "User agent mismatch");
            return Err(TokenError::AgentMismatch {
                agent: agent.to_string(),
            });
        }
        Ok(value.metadata)
    }
}

impl fmt::Debug for GrantToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantToken")
            .field("grant", &self.grant)
            .field("codec", &self.codec)
            .field("getter", &"<TokenGetter>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::getter::HeaderGetter;
    use http::{HeaderMap, HeaderValue};
    use serde_json::{json, Value};

    fn grant_token(grant: GrantType, header: &str) -> GrantToken {
        let codec = TokenCodec::new(0, b"1111111111111111", b"")
            .unwrap()
            .with_clock(Arc::new(FixedClock(1000)));
        GrantToken::new(Arc::new(HeaderGetter::new([header])), codec, grant)
    }

    fn request(agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_str(agent).unwrap());
        headers
    }

    #[test]
    fn test_wire_shape() {
        let access = grant_token(GrantType::Access, "access-token");
        let token = access.encode_values(&request("agent"), &json!({"id": 1})).unwrap();
        let envelope: Value = access.codec().decode(&token).unwrap();
        assert_eq!(
            envelope,
            json!({"AgentHash": "4a9517c57a44f02c", "GrantType": "access", "Metadata": {"id": 1}})
        );
    }

    #[test]
    fn test_round_trip() {
        let access = grant_token(GrantType::Access, "access-token");
        let mut req = request("agent");
        let token = access.encode_values(&req, &vec!["a", "b"]).unwrap();
        req.insert("access-token", HeaderValue::from_str(&token).unwrap());

        let meta: Vec<String> = access.decode_values(&req).unwrap();
        assert_eq!(meta, vec!["a", "b"]);
    }

    #[test]
    fn test_grant_mismatch() {
        let access = grant_token(GrantType::Access, "token");
        let refresh = grant_token(GrantType::Refresh, "token");
        let mut req = request("agent");
        let token = access.encode_values(&req, &()).unwrap();
        req.insert("token", HeaderValue::from_str(&token).unwrap());

        assert_eq!(
            refresh.decode_values::<()>(&req),
            Err(TokenError::GrantMismatch {
                expected: "refresh".to_string(),
                got: "access".to_string()
            })
        );
        assert_eq!(access.decode_values::<()>(&req), Ok(()));
    }

    #[test]
    fn test_grant_checked_before_expiry() {
        // Refresh tokens without a max age carry no ExpiresAt, which the
        // access codec would otherwise reject as NoTimestamp.
        let clock = Arc::new(FixedClock(1000));
        let codec = |max_age| {
            TokenCodec::new(max_age, b"1111111111111111", b"")
                .unwrap()
                .with_clock(clock.clone())
        };
        let getter: Arc<dyn TokenGetter> = Arc::new(HeaderGetter::new(["token"]));
        let access = GrantToken::new(Arc::clone(&getter), codec(3600), GrantType::Access);
        let refresh = GrantToken::new(getter, codec(0), GrantType::Refresh);

        let mut req = request("agent");
        let token = refresh.encode_values(&req, &1u8).unwrap();
        req.insert("token", HeaderValue::from_str(&token).unwrap());

        assert_eq!(
            access.decode_values::<u8>(&req),
            Err(TokenError::GrantMismatch {
                expected: "access".to_string(),
                got: "refresh".to_string()
            })
        );
        assert_eq!(refresh.decode_values::<u8>(&req), Ok(1));
    }

    #[test]
    fn test_agent_mismatch() {
        let access = grant_token(GrantType::Access, "token");
        let token = access.encode_values(&request("agent"), &()).unwrap();

        let mut req = request("wrong agent");
        req.insert("token", HeaderValue::from_str(&token).unwrap());
        let err = access.decode_values::<()>(&req).unwrap_err();
        assert_eq!(
            err,
            TokenError::AgentMismatch {
                agent: "wrong agent".to_string()
            }
        );
        assert_eq!(err.to_string(), "User agent mismatched: wrong agent");
    }

    #[test]
    fn test_grant_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&GrantType::Refresh).unwrap(), "\"refresh\"");
        assert_eq!(GrantType::Access.to_string(), "access");
    }
}
