use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One credential for one of the two supported schemes.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    Legacy { username: String, password: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Credential::Legacy { username, .. } => f
                .debug_struct("Legacy")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct LegacyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LegacyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// The credentials configured for both schemes. Either may be absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    api_key: Option<String>,
    legacy: Option<LegacyCredentials>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential, replacing any previous one for the same scheme.
    /// Empty values are ignored.
    pub fn with(mut self, credential: Credential) -> Self {
        match credential {
            Credential::ApiKey(key) if !key.is_empty() => self.api_key = Some(key),
            Credential::Legacy { username, password }
                if !username.is_empty() && !password.is_empty() =>
            {
                self.legacy = Some(LegacyCredentials { username, password })
            }
            _ => {}
        }
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn legacy(&self) -> Option<&LegacyCredentials> {
        self.legacy.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.legacy.is_none()
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("legacy", &self.legacy)
            .finish()
    }
}

/// Shared credential holder with atomic swap for zero-downtime rotation.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    current: Arc<RwLock<Arc<CredentialSet>>>,
    last_rotated: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl CredentialStore {
    pub fn new(initial: CredentialSet) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
            last_rotated: Arc::new(RwLock::new(None)),
        }
    }

    /// Snapshot of the current credentials. In-flight requests keep the
    /// snapshot they started with.
    pub async fn get(&self) -> Arc<CredentialSet> {
        self.current.read().await.clone()
    }

    /// Swap in new credentials. Returns false when nothing changed.
    pub async fn rotate(&self, next: CredentialSet) -> bool {
        let mut current = self.current.write().await;
        if **current == next {
            return false;
        }
        *current = Arc::new(next);
        drop(current);

        let mut last_rotated = self.last_rotated.write().await;
        *last_rotated = Some(Utc::now());
        debug!("credentials rotated at {:?}", last_rotated);
        true
    }

    pub async fn last_rotated(&self) -> Option<DateTime<Utc>> {
        *self.last_rotated.read().await
    }
}
