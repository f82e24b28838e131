use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::security::rate_limit::WindowKind;
use crate::security::sanitizer::Sanitizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Request,
    RateLimited,
    AuthFallback,
    SessionLogin,
    SessionRefresh,
    SessionInvalidated,
    CredentialsRotated,
    ConfigurationError,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::RateLimited => "rate_limited",
            Self::AuthFallback => "auth_fallback",
            Self::SessionLogin => "session_login",
            Self::SessionRefresh => "session_refresh",
            Self::SessionInvalidated => "session_invalidated",
            Self::CredentialsRotated => "credentials_rotated",
            Self::ConfigurationError => "configuration_error",
        };
        f.write_str(s)
    }
}

/// Immutable audit record. `details` is sanitized before the event exists.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub success: bool,
    pub details: Value,
}

/// Destination for audit events. Persistence format is up to the sink.
pub trait AuditSink: Send + Sync + fmt::Debug {
    fn record(&self, event: &AuditEvent);
}

/// Emits events on the `audit` tracing target.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        let details = event.details.to_string();
        if event.success {
            info!(target: "audit", event_id = %event.id, event = %event.action, success = true, details = %details);
        } else {
            warn!(target: "audit", event_id = %event.id, event = %event.action, success = false, details = %details);
        }
    }
}

/// Keeps the most recent events in memory for diagnostics.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEvent>> {
        match self.events.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    /// Newest last.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.lock();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: &AuditEvent) {
        let mut events = self.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Append-only audit log fanning out to its sinks.
#[derive(Debug, Clone)]
pub struct AuditLog {
    sanitizer: Arc<Sanitizer>,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(sanitizer: Arc<Sanitizer>) -> Self {
        Self {
            sanitizer,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn record(&self, action: AuditAction, success: bool, details: Value) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            success,
            details: self.sanitizer.redact(&details),
        };
        for sink in &self.sinks {
            sink.record(&event);
        }
    }

    pub fn request_completed(
        &self,
        method: &str,
        path: &str,
        endpoint: &str,
        auth: Option<&str>,
        status: Option<u16>,
        error: Option<&str>,
    ) {
        let error = error.map(|e| self.sanitizer.redact_text(e));
        self.record(
            AuditAction::Request,
            error.is_none(),
            json!({
                "method": method,
                "path": self.sanitizer.redact_text(path),
                "endpoint": endpoint,
                "auth": auth,
                "status": status,
                "error": error,
            }),
        );
    }

    pub fn rate_limited(
        &self,
        endpoint: &str,
        window: WindowKind,
        limit: usize,
        retry_after_secs: u64,
        message: &str,
    ) {
        self.record(
            AuditAction::RateLimited,
            false,
            json!({
                "endpoint": endpoint,
                "window": window,
                "limit": limit,
                "retry_after_secs": retry_after_secs,
                "message": message,
            }),
        );
    }

    pub fn auth_fallback(&self, endpoint: &str, status: u16) {
        self.record(
            AuditAction::AuthFallback,
            true,
            json!({"endpoint": endpoint, "first_attempt_status": status}),
        );
    }

    pub fn session_login(&self, username: &str, success: bool, status: Option<u16>) {
        self.record(
            AuditAction::SessionLogin,
            success,
            json!({"username": username, "status": status}),
        );
    }

    pub fn session_refresh(&self, success: bool, age_secs: u64) {
        self.record(
            AuditAction::SessionRefresh,
            success,
            json!({"age_secs": age_secs}),
        );
    }

    pub fn session_invalidated(&self, reason: &str) {
        self.record(
            AuditAction::SessionInvalidated,
            true,
            json!({"reason": reason}),
        );
    }

    pub fn credentials_rotated(&self, changed: bool) {
        self.record(
            AuditAction::CredentialsRotated,
            true,
            json!({"changed": changed}),
        );
    }

    pub fn configuration_error(&self, endpoint: &str, reason: &str) {
        self.record(
            AuditAction::ConfigurationError,
            false,
            json!({"endpoint": endpoint, "reason": reason}),
        );
    }
}
