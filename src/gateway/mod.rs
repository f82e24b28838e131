pub mod config;
pub mod dispatcher;
pub mod error;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub use config::GatewayConfig;
pub use dispatcher::{Dispatcher, GatewayRequest, GatewayResponse};
pub use error::{AuthFailureReason, AuthScheme, GatewayError, ValidationError};

use crate::security::audit_log::{AuditLog, MemorySink, TracingSink};
use crate::security::credentials::CredentialStore;
use crate::security::operator::OperatorToken;
use crate::security::rate_limit::RateLimiter;
use crate::security::sanitizer::Sanitizer;
use crate::security::session::SessionManager;
use crate::transport::{ReqwestTransport, Transport};

/// A wired gateway: one dispatcher plus the in-memory audit trail it feeds.
#[derive(Debug, Clone)]
pub struct Gateway {
    pub dispatcher: Arc<Dispatcher>,
    pub audit_trail: Arc<MemorySink>,
    pub operator_token: Option<OperatorToken>,
}

impl Gateway {
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate().context("validating gateway config")?;
        let transport = ReqwestTransport::new(&config.base_url(), config.timeout(), config.verify_tls)
            .context("building controller transport")?;
        info!(
            base_url = transport.base_url(),
            verify_tls = config.verify_tls,
            "gateway configured"
        );
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: &GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let sanitizer = Arc::new(Sanitizer::new(&config.sanitization));
        let audit_trail = Arc::new(MemorySink::default());
        let audit = AuditLog::new(sanitizer.clone())
            .with_sink(Arc::new(TracingSink))
            .with_sink(audit_trail.clone());
        let credentials = CredentialStore::new(config.credentials());
        let sessions = Arc::new(SessionManager::new(
            transport.clone(),
            credentials.clone(),
            config.session.clone(),
            audit.clone(),
        ));
        let dispatcher = Dispatcher::new(
            transport,
            RateLimiter::new(config.rate_limit),
            sessions,
            credentials,
            sanitizer,
            audit,
        );
        Self {
            dispatcher: Arc::new(dispatcher),
            audit_trail,
            operator_token: config.operator_token.as_deref().and_then(OperatorToken::new),
        }
    }
}
