use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

use crate::security::rate_limit::{denial_message, WindowKind};
use crate::transport::TransportError;

/// Which authentication path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    ApiKey,
    Legacy,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey => write!(f, "api_key"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// Why an authentication attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureReason {
    InvalidCredentials,
    TwoFactorRequired,
    MissingCredentials,
    Rejected,
}

impl fmt::Display for AuthFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "invalid credentials"),
            Self::TwoFactorRequired => write!(f, "two-factor authentication required"),
            Self::MissingCredentials => write!(f, "credentials not configured"),
            Self::Rejected => write!(f, "rejected by controller"),
        }
    }
}

/// A parameter failed validation before any request was built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Every failure the gateway can hand back to a caller. All payloads are
/// sanitized before they are placed here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("{}", denial_message(*limit, *window, *retry_after))]
    RateLimited {
        retry_after: Duration,
        window: WindowKind,
        limit: usize,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{scheme} authentication failed ({reason}), status {status:?}")]
    AuthenticationFailed {
        scheme: AuthScheme,
        status: Option<u16>,
        reason: AuthFailureReason,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("request to controller timed out")]
    Timeout,

    #[error("connection to controller failed: {0}")]
    Connection(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl GatewayError {
    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Validation(_) => "validation_error",
            Self::AuthenticationFailed { .. } => "authentication_failed",
            Self::Configuration(_) => "configuration_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout => "timeout",
            Self::Connection(_) => "connection_error",
            Self::UnknownTool(_) => "unknown_tool",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        });
        match self {
            Self::RateLimited { retry_after, window, limit } => {
                body["retry_after_secs"] = json!(retry_after.as_secs().max(1));
                body["window"] = json!(window);
                body["limit"] = json!(limit);
            }
            Self::Validation(err) => {
                body["field"] = json!(err.field);
            }
            Self::AuthenticationFailed { scheme, status, reason } => {
                body["scheme"] = json!(scheme);
                body["status"] = json!(status);
                body["reason"] = json!(reason);
            }
            Self::Upstream { status, .. } => {
                body["status"] = json!(status);
            }
            _ => {}
        }
        body
    }
}

impl From<TransportError> for GatewayError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            TransportError::Connection(msg) => Self::Connection(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_reports_at_least_one_second() {
        let err = GatewayError::RateLimited {
            retry_after: Duration::from_millis(200),
            window: WindowKind::Hour,
            limit: 1000,
        };
        let body = err.to_json();
        assert_eq!(body["retry_after_secs"], 1);
        assert_eq!(body["window"], "hour");
        assert_eq!(body["limit"], 1000);
        assert_eq!(body["message"], "Rate limit exceeded: 1000 calls/hour. Retry in 1s");
    }

    #[test]
    fn validation_error_keeps_field() {
        let err: GatewayError = ValidationError::new("mac", "bad length").into();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(err.to_json()["field"], "mac");
        assert_eq!(err.to_string(), "invalid mac: bad length");
    }

    #[test]
    fn auth_failure_json_includes_scheme_and_reason() {
        let err = GatewayError::AuthenticationFailed {
            scheme: AuthScheme::Legacy,
            status: Some(401),
            reason: AuthFailureReason::InvalidCredentials,
        };
        let body = err.to_json();
        assert_eq!(body["scheme"], "legacy");
        assert_eq!(body["status"], 401);
        assert_eq!(body["reason"], "invalid_credentials");
    }
}
