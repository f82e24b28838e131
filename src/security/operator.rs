use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use std::fmt;
use subtle::ConstantTimeEq;

/// Shared secret guarding operator actions on the local API
/// (credential rotation, session invalidation).
#[derive(Clone)]
pub struct OperatorToken(String);

impl OperatorToken {
    /// Blank tokens are treated as unset.
    pub fn new(token: &str) -> Option<Self> {
        let token = token.trim();
        (!token.is_empty()).then(|| Self(token.to_string()))
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).unwrap_u8() == 1
    }

    /// Checks `Authorization: Bearer <token>`.
    pub fn authorizes(&self, headers: &HeaderMap) -> bool {
        bearer(headers).is_some_and(|t| self.matches(t))
    }
}

impl fmt::Debug for OperatorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OperatorToken([REDACTED])")
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}
