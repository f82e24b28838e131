use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::gateway::error::{AuthFailureReason, AuthScheme, GatewayError};
use crate::security::audit_log::AuditLog;
use crate::security::credentials::{CredentialSet, CredentialStore};
use crate::security::rate_limit::{Admission, RateLimiter};
use crate::security::sanitizer::Sanitizer;
use crate::security::session::SessionManager;
use crate::transport::{OutboundRequest, Transport, UpstreamReply};

/// A controller call as the tool layer describes it. `endpoint_key` names the
/// rate-limit bucket.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub endpoint_key: String,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>, endpoint_key: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            endpoint_key: endpoint_key.into(),
        }
    }

    pub fn get(path: impl Into<String>, endpoint_key: impl Into<String>) -> Self {
        Self::new(Method::GET, path, endpoint_key)
    }

    pub fn post(path: impl Into<String>, endpoint_key: impl Into<String>) -> Self {
        Self::new(Method::POST, path, endpoint_key)
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn outbound(&self) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            headers: Vec::new(),
            body: self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Value,
    pub auth_scheme: AuthScheme,
}

/// Runs every controller call through admission, authentication fallback,
/// sanitization and audit.
#[derive(Debug)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    rate_limiter: RateLimiter,
    sessions: Arc<SessionManager>,
    credentials: CredentialStore,
    sanitizer: Arc<Sanitizer>,
    audit: AuditLog,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        rate_limiter: RateLimiter,
        sessions: Arc<SessionManager>,
        credentials: CredentialStore,
        sanitizer: Arc<Sanitizer>,
        audit: AuditLog,
    ) -> Self {
        Self {
            transport,
            rate_limiter,
            sessions,
            credentials,
            sanitizer,
            audit,
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let (outcome, scheme) = self.run(&request).await;
        let outcome = outcome.map_err(|e| self.sanitize_error(e));
        self.record(&request, scheme, &outcome);
        outcome
    }

    /// Swaps credentials and drops the session built from the old ones.
    pub async fn rotate_credentials(&self, next: CredentialSet) -> bool {
        let changed = self.credentials.rotate(next).await;
        self.audit.credentials_rotated(changed);
        if changed {
            self.sessions.invalidate("credentials rotated").await;
        }
        changed
    }

    async fn run(
        &self,
        request: &GatewayRequest,
    ) -> (Result<GatewayResponse, GatewayError>, Option<AuthScheme>) {
        let credentials = self.credentials.get().await;
        if credentials.is_empty() {
            return (
                Err(GatewayError::Configuration(
                    "no credentials configured: set an API key or a legacy username and password"
                        .into(),
                )),
                None,
            );
        }

        if let Admission::Denied { retry_after, window, limit } =
            self.rate_limiter.admit(&request.endpoint_key).await
        {
            return (
                Err(GatewayError::RateLimited { retry_after, window, limit }),
                None,
            );
        }

        if let Some(key) = credentials.api_key() {
            let outbound = request.outbound().header("X-API-Key", key);
            match self.transport.send(outbound).await {
                Err(err) => return (Err(err.into()), Some(AuthScheme::ApiKey)),
                Ok(reply) if reply.status == 401 => {
                    if credentials.legacy().is_none() {
                        return (
                            Err(GatewayError::AuthenticationFailed {
                                scheme: AuthScheme::ApiKey,
                                status: Some(401),
                                reason: AuthFailureReason::InvalidCredentials,
                            }),
                            Some(AuthScheme::ApiKey),
                        );
                    }
                    info!(endpoint = %request.endpoint_key, "API key rejected, falling back to session");
                    self.audit.auth_fallback(&request.endpoint_key, reply.status);
                }
                Ok(reply) => return (self.finish(reply, AuthScheme::ApiKey), Some(AuthScheme::ApiKey)),
            }
        }

        let handle = match self.sessions.ensure_valid().await {
            Ok(handle) => handle,
            Err(err) => return (Err(err), Some(AuthScheme::Legacy)),
        };
        let outbound = handle.apply(request.outbound());
        let outcome = match self.transport.send(outbound).await {
            Err(err) => Err(err.into()),
            Ok(reply) if reply.status == 401 => {
                warn!(endpoint = %request.endpoint_key, "session cookie rejected");
                self.sessions
                    .invalidate_handle(&handle, "controller rejected session cookie")
                    .await;
                Err(GatewayError::AuthenticationFailed {
                    scheme: AuthScheme::Legacy,
                    status: Some(401),
                    reason: AuthFailureReason::Rejected,
                })
            }
            Ok(reply) => self.finish(reply, AuthScheme::Legacy),
        };
        (outcome, Some(AuthScheme::Legacy))
    }

    fn finish(&self, reply: UpstreamReply, scheme: AuthScheme) -> Result<GatewayResponse, GatewayError> {
        if reply.is_success() {
            debug!(status = reply.status, %scheme, "controller call succeeded");
            Ok(GatewayResponse {
                status: reply.status,
                body: self.sanitizer.redact(&reply.json()),
                auth_scheme: scheme,
            })
        } else {
            Err(GatewayError::Upstream {
                status: reply.status,
                body: reply.body,
            })
        }
    }

    fn sanitize_error(&self, err: GatewayError) -> GatewayError {
        match err {
            GatewayError::Upstream { status, body } => {
                let body = match serde_json::from_str::<Value>(&body) {
                    Ok(json) => self.sanitizer.redact(&json).to_string(),
                    Err(_) => body,
                };
                GatewayError::Upstream {
                    status,
                    body: self.sanitizer.redact_text(&body),
                }
            }
            GatewayError::Connection(msg) => {
                GatewayError::Connection(self.sanitizer.redact_text(&msg))
            }
            GatewayError::Configuration(msg) => {
                GatewayError::Configuration(self.sanitizer.redact_text(&msg))
            }
            other => other,
        }
    }

    fn record(
        &self,
        request: &GatewayRequest,
        scheme: Option<AuthScheme>,
        outcome: &Result<GatewayResponse, GatewayError>,
    ) {
        let scheme = scheme.map(|s| s.to_string());
        match outcome {
            Ok(resp) => self.audit.request_completed(
                request.method.as_str(),
                &request.path,
                &request.endpoint_key,
                scheme.as_deref(),
                Some(resp.status),
                None,
            ),
            Err(err) => match err {
                GatewayError::RateLimited { retry_after, window, limit } => {
                    self.audit.rate_limited(
                        &request.endpoint_key,
                        *window,
                        *limit,
                        retry_after.as_secs().max(1),
                        &err.to_string(),
                    )
                }
                GatewayError::Configuration(reason) => {
                    self.audit.configuration_error(&request.endpoint_key, reason)
                }
                _ => {
                    let status = match err {
                        GatewayError::Upstream { status, .. } => Some(*status),
                        GatewayError::AuthenticationFailed { status, .. } => *status,
                        _ => None,
                    };
                    self.audit.request_completed(
                        request.method.as_str(),
                        &request.path,
                        &request.endpoint_key,
                        scheme.as_deref(),
                        status,
                        Some(&err.to_string()),
                    )
                }
            },
        }
    }
}
