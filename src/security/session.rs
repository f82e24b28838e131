use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::gateway::error::{AuthFailureReason, AuthScheme, GatewayError};
use crate::security::audit_log::AuditLog;
use crate::security::credentials::{CredentialStore, LegacyCredentials};
use crate::transport::{OutboundRequest, Transport, UpstreamReply};

pub const DEFAULT_LOGIN_PATH: &str = "/api/auth/login";

// Body markers the controller uses when a second factor is needed.
const TWO_FACTOR_MARKERS: &[&str] = &["2fa", "mfa", "two-factor", "two_factor"];

// Logins discarded because the session was invalidated mid-flight.
const MAX_LOGIN_ATTEMPTS: usize = 3;

fn default_timeout_secs() -> u64 {
    3600
}
fn default_refresh_ratio() -> f64 {
    0.8
}
fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fraction of the timeout after which the session is refreshed.
    #[serde(default = "default_refresh_ratio")]
    pub refresh_ratio: f64,
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            refresh_ratio: default_refresh_ratio(),
            login_path: default_login_path(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn refresh_after(&self) -> Duration {
        let ratio = if self.refresh_ratio.is_finite() {
            self.refresh_ratio.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.timeout().mul_f64(ratio)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Active,
    Stale,
    Expired,
    Invalidated,
}

/// What a caller needs to issue a cookie-authenticated request.
#[derive(Clone)]
pub struct SessionHandle {
    pub cookie_header: String,
    pub csrf_token: Option<String>,
    pub created_at: DateTime<Utc>,
    id: u64,
}

impl SessionHandle {
    pub fn apply(&self, mut request: OutboundRequest) -> OutboundRequest {
        request.headers.push(("Cookie".to_string(), self.cookie_header.clone()));
        if let Some(csrf) = &self.csrf_token {
            request.headers.push(("X-CSRF-Token".to_string(), csrf.clone()));
        }
        request
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("cookie_header", &"[REDACTED]")
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "[REDACTED]"))
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub active: bool,
    pub state: SessionState,
    pub age_seconds: Option<u64>,
    pub remaining_seconds: Option<u64>,
    pub should_refresh: bool,
    pub timeout_seconds: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

struct Session {
    handle: SessionHandle,
    started: Instant,
    last_refreshed_at: Option<DateTime<Utc>>,
}

impl Session {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    fn state(&self, now: Instant, config: &SessionConfig) -> SessionState {
        let age = self.age(now);
        if age >= config.timeout() {
            SessionState::Expired
        } else if age >= config.refresh_after() {
            SessionState::Stale
        } else {
            SessionState::Active
        }
    }
}

#[derive(Default)]
struct Slot {
    session: Option<Session>,
    invalidated: bool,
    /// Bumped by every `invalidate`; a login that straddles a bump is stale.
    generation: u64,
    issued: u64,
}

/// Owns the single legacy cookie session for a controller.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    config: SessionConfig,
    audit: AuditLog,
    slot: RwLock<Slot>,
    login_lock: Mutex<()>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialStore,
        config: SessionConfig,
        audit: AuditLog,
    ) -> Self {
        Self {
            transport,
            credentials,
            config,
            audit,
            slot: RwLock::new(Slot::default()),
            login_lock: Mutex::new(()),
        }
    }

    /// Returns a usable session, logging in or refreshing when needed.
    /// Concurrent callers share a single login.
    pub async fn ensure_valid(&self) -> Result<SessionHandle, GatewayError> {
        if let Some(handle) = self.active_handle().await {
            return Ok(handle);
        }

        let _login = self.login_lock.lock().await;

        // Another caller may have logged in while we waited.
        let (mut stale_age, mut generation) = {
            let mut slot = self.slot.write().await;
            let now = Instant::now();
            let current = slot
                .session
                .as_ref()
                .map(|s| (s.state(now, &self.config), s.age(now), s.handle.clone()));
            let stale_age = match current {
                Some((SessionState::Active, _, handle)) => return Ok(handle),
                Some((SessionState::Stale, age, _)) => Some(age),
                Some(_) => {
                    debug!("discarding expired session");
                    slot.session = None;
                    None
                }
                None => None,
            };
            (stale_age, slot.generation)
        };

        for _ in 0..MAX_LOGIN_ATTEMPTS {
            let credentials = self.credentials.get().await;
            let legacy = credentials.legacy().ok_or(GatewayError::AuthenticationFailed {
                scheme: AuthScheme::Legacy,
                status: None,
                reason: AuthFailureReason::MissingCredentials,
            })?;

            let mut session = match stale_age {
                Some(age) => self.refresh(legacy, age).await?,
                None => self.login(legacy).await?,
            };

            let mut slot = self.slot.write().await;
            if slot.generation != generation {
                debug!("session invalidated during login, discarding result");
                generation = slot.generation;
                stale_age = None;
                continue;
            }
            slot.issued += 1;
            session.handle.id = slot.issued;
            let handle = session.handle.clone();
            slot.session = Some(session);
            slot.invalidated = false;
            return Ok(handle);
        }

        warn!("session kept being invalidated during login");
        Err(GatewayError::AuthenticationFailed {
            scheme: AuthScheme::Legacy,
            status: None,
            reason: AuthFailureReason::Rejected,
        })
    }

    async fn refresh(
        &self,
        creds: &LegacyCredentials,
        age: Duration,
    ) -> Result<Session, GatewayError> {
        match self.login(creds).await {
            Ok(mut session) => {
                self.audit.session_refresh(true, age.as_secs());
                session.last_refreshed_at = Some(Utc::now());
                Ok(session)
            }
            Err(err) => {
                warn!(error = %err, "session refresh failed, retrying full login");
                self.audit.session_refresh(false, age.as_secs());
                self.slot.write().await.session = None;
                self.login(creds).await
            }
        }
    }

    async fn active_handle(&self) -> Option<SessionHandle> {
        let slot = self.slot.read().await;
        let session = slot.session.as_ref()?;
        (session.state(Instant::now(), &self.config) == SessionState::Active)
            .then(|| session.handle.clone())
    }

    async fn login(&self, creds: &LegacyCredentials) -> Result<Session, GatewayError> {
        let mut request = OutboundRequest::new(Method::POST, self.config.login_path.clone());
        request.body = Some(json!({
            "username": creds.username,
            "password": creds.password,
            "remember": false,
        }));

        let reply = match self.transport.send(request).await {
            Ok(reply) => reply,
            Err(err) => {
                self.audit.session_login(&creds.username, false, None);
                return Err(err.into());
            }
        };

        if !reply.is_success() {
            let reason = classify_failure(&reply);
            warn!(status = reply.status, %reason, "controller login refused");
            self.audit.session_login(&creds.username, false, Some(reply.status));
            return Err(GatewayError::AuthenticationFailed {
                scheme: AuthScheme::Legacy,
                status: Some(reply.status),
                reason,
            });
        }

        let cookie_header = cookie_header(&reply);
        if cookie_header.is_empty() {
            warn!(status = reply.status, "controller login returned no session cookie");
            self.audit.session_login(&creds.username, false, Some(reply.status));
            return Err(GatewayError::AuthenticationFailed {
                scheme: AuthScheme::Legacy,
                status: Some(reply.status),
                reason: AuthFailureReason::Rejected,
            });
        }

        let csrf_token = reply
            .header("x-csrf-token")
            .or_else(|| reply.header("x-updated-csrf-token"))
            .map(str::to_string);

        info!(username = %creds.username, "controller session established");
        self.audit.session_login(&creds.username, true, Some(reply.status));
        Ok(Session {
            handle: SessionHandle {
                cookie_header,
                csrf_token,
                created_at: Utc::now(),
                id: 0,
            },
            started: Instant::now(),
            last_refreshed_at: None,
        })
    }

    /// Drops the current session; the next `ensure_valid` logs in again.
    /// Logins already in flight are discarded rather than installed.
    pub async fn invalidate(&self, reason: &str) {
        let mut slot = self.slot.write().await;
        let had_session = slot.session.take().is_some();
        slot.invalidated = true;
        slot.generation += 1;
        drop(slot);
        debug!(had_session, reason, "session invalidated");
        self.audit.session_invalidated(reason);
    }

    /// Drops the session only if it is still the one `handle` came from.
    /// Returns false when another caller already replaced it.
    pub async fn invalidate_handle(&self, handle: &SessionHandle, reason: &str) -> bool {
        let mut slot = self.slot.write().await;
        let current = slot
            .session
            .as_ref()
            .is_some_and(|s| s.handle.id == handle.id);
        if !current {
            debug!(reason, "rejected session already replaced");
            return false;
        }
        slot.session = None;
        slot.invalidated = true;
        drop(slot);
        debug!(reason, "session invalidated");
        self.audit.session_invalidated(reason);
        true
    }

    pub async fn info(&self) -> SessionInfo {
        let slot = self.slot.read().await;
        let now = Instant::now();
        let timeout = self.config.timeout();
        match slot.session.as_ref() {
            Some(session) => {
                let state = session.state(now, &self.config);
                let age = session.age(now);
                let created_at = session.handle.created_at;
                SessionInfo {
                    active: matches!(state, SessionState::Active | SessionState::Stale),
                    state,
                    age_seconds: Some(age.as_secs()),
                    remaining_seconds: Some(timeout.saturating_sub(age).as_secs()),
                    should_refresh: state != SessionState::Active,
                    timeout_seconds: self.config.timeout_secs,
                    created_at: Some(created_at),
                    expires_at: chrono::Duration::from_std(timeout)
                        .ok()
                        .map(|t| created_at + t),
                    last_refreshed_at: session.last_refreshed_at,
                }
            }
            None => SessionInfo {
                active: false,
                state: if slot.invalidated {
                    SessionState::Invalidated
                } else {
                    SessionState::Absent
                },
                age_seconds: None,
                remaining_seconds: None,
                should_refresh: false,
                timeout_seconds: self.config.timeout_secs,
                created_at: None,
                expires_at: None,
                last_refreshed_at: None,
            },
        }
    }
}

fn classify_failure(reply: &UpstreamReply) -> AuthFailureReason {
    let body = reply.body.to_ascii_lowercase();
    if reply.status == 499 || TWO_FACTOR_MARKERS.iter().any(|m| body.contains(m)) {
        AuthFailureReason::TwoFactorRequired
    } else if matches!(reply.status, 401 | 403) {
        AuthFailureReason::InvalidCredentials
    } else {
        AuthFailureReason::Rejected
    }
}

// Keeps only the `name=value` part of each Set-Cookie header.
fn cookie_header(reply: &UpstreamReply) -> String {
    reply
        .header_values("set-cookie")
        .filter_map(|c| c.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect::<Vec<_>>()
        .join("; ")
}
