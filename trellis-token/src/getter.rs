//! Locating tokens on incoming requests.

use http::header::USER_AGENT;
use http::{HeaderMap, Request};
use trellis_core::TokenError;

/// The parts of a request the token layer reads.
pub trait RequestContext {
    /// First value of header `name` as UTF-8, if present.
    fn header(&self, name: &str) -> Option<&str>;

    /// The caller's `User-Agent`, empty when absent.
    fn user_agent(&self) -> &str {
        self.header(USER_AGENT.as_str()).unwrap_or("")
    }
}

impl RequestContext for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }
}

impl<B> RequestContext for Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().header(name)
    }
}

/// Strategy for extracting a token string from a request.
pub trait TokenGetter: Send + Sync {
    /// # Errors
    /// Returns [`TokenError::NoToken`] when the request carries no token.
    fn get_token(&self, req: &dyn RequestContext) -> Result<String, TokenError>;
}

/// Reads the first non-empty header from an ordered list of names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderGetter {
    headers: Vec<String>,
}

impl HeaderGetter {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl TokenGetter for HeaderGetter {
    fn get_token(&self, req: &dyn RequestContext) -> Result<String, TokenError> {
        self.headers
            .iter()
            .filter_map(|name| req.header(name))
            .find(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(TokenError::NoToken)
    }
}
