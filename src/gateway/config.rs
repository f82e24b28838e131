use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::time::Duration;

use crate::security::credentials::{Credential, CredentialSet};
use crate::security::rate_limit::RateLimitConfig;
use crate::security::sanitizer::SanitizationPolicy;
use crate::security::session::SessionConfig;

fn default_port() -> u16 {
    443
}
fn default_timeout_secs() -> u64 {
    15
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Controllers usually ship self-signed certificates.
    #[serde(default)]
    pub verify_tls: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Bearer token for operator routes on the local API. Unset disables them.
    #[serde(default)]
    pub operator_token: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sanitization: SanitizationPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            verify_tls: false,
            timeout_secs: default_timeout_secs(),
            api_key: None,
            username: None,
            password: None,
            operator_token: None,
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            sanitization: SanitizationPolicy::default(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("verify_tls", &self.verify_tls)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &hidden(&self.api_key))
            .field("username", &self.username)
            .field("password", &hidden(&self.password))
            .field("operator_token", &hidden(&self.operator_token))
            .field("rate_limit", &self.rate_limit)
            .field("session", &self.session)
            .finish()
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{name}: expected a boolean, got {other:?}"),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("parsing {name}"))
}

impl GatewayConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: GatewayConfig = serde_json::from_str(&raw).context("parsing JSON")?;
        Ok(cfg)
    }

    /// Defaults overridden by `UNIFI_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`. Empty values count as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("UNIFI_GATEWAY_HOST") {
            self.host = v.trim().to_string();
        }
        if let Some(v) = get("UNIFI_GATEWAY_PORT") {
            self.port = parse_num("UNIFI_GATEWAY_PORT", &v)?;
        }
        if let Some(v) = get("UNIFI_VERIFY_TLS") {
            self.verify_tls = parse_bool("UNIFI_VERIFY_TLS", &v)?;
        }
        if let Some(v) = get("UNIFI_TIMEOUT_S") {
            self.timeout_secs = parse_num("UNIFI_TIMEOUT_S", &v)?;
        }
        if let Some(v) = get("UNIFI_SESSION_TIMEOUT_S") {
            self.session.timeout_secs = parse_num("UNIFI_SESSION_TIMEOUT_S", &v)?;
        }
        if let Some(v) = get("UNIFI_RATE_LIMIT_PER_MINUTE") {
            self.rate_limit.per_minute = parse_num("UNIFI_RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("UNIFI_RATE_LIMIT_PER_HOUR") {
            self.rate_limit.per_hour = parse_num("UNIFI_RATE_LIMIT_PER_HOUR", &v)?;
        }
        if let Some(v) = get("UNIFI_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = get("UNIFI_USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = get("UNIFI_PASSWORD") {
            self.password = Some(v);
        }
        if let Some(v) = get("UNIFI_GATEWAY_OPERATOR_TOKEN") {
            self.operator_token = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("controller host is not configured (UNIFI_GATEWAY_HOST)");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.session.timeout_secs == 0 {
            bail!("session.timeout_secs must be greater than zero");
        }
        let ratio = self.session.refresh_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            bail!("session.refresh_ratio must be in (0, 1], got {ratio}");
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.host.trim(), self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn credentials(&self) -> CredentialSet {
        let mut set = CredentialSet::new();
        if let Some(key) = &self.api_key {
            set = set.with(Credential::ApiKey(key.clone()));
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            set = set.with(Credential::Legacy {
                username: username.clone(),
                password: password.clone(),
            });
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};
    use tempfile::NamedTempFile;

    static TEST_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    fn lock_tests() -> std::sync::MutexGuard<'static, ()> {
        match TEST_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_config_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "host": "192.168.1.1",
                "api_key": "sk_test",
                "username": "admin",
                "password": "pw",
                "rate_limit": {{"per_minute": 10}},
                "session": {{"timeout_secs": 600}}
            }}"#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.host, "192.168.1.1");
        assert_eq!(config.port, 443);
        assert!(!config.verify_tls);
        assert_eq!(config.timeout_secs, 15);
        assert_eq!(config.rate_limit.per_minute, 10);
        assert_eq!(config.rate_limit.per_hour, 1000);
        assert_eq!(config.session.timeout_secs, 600);
        assert_eq!(config.session.login_path, "/api/auth/login");
        assert_eq!(config.base_url(), "https://192.168.1.1:443");
        assert!(config.validate().is_ok());

        let creds = config.credentials();
        assert_eq!(creds.api_key(), Some("sk_test"));
        assert_eq!(creds.legacy().unwrap().username, "admin");
    }

    #[test]
    fn test_config_missing_file() {
        assert!(GatewayConfig::from_file("/nonexistent/path/config.json").is_err());
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json").unwrap();
        assert!(GatewayConfig::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn overrides_apply_and_empty_values_are_ignored() {
        let mut config = GatewayConfig {
            api_key: Some("from-file".into()),
            ..GatewayConfig::default()
        };
        config
            .apply_overrides(lookup(&[
                ("UNIFI_GATEWAY_HOST", "unifi.local"),
                ("UNIFI_GATEWAY_PORT", "8443"),
                ("UNIFI_VERIFY_TLS", "Yes"),
                ("UNIFI_TIMEOUT_S", "30"),
                ("UNIFI_SESSION_TIMEOUT_S", "1800"),
                ("UNIFI_RATE_LIMIT_PER_MINUTE", "5"),
                ("UNIFI_GATEWAY_OPERATOR_TOKEN", "op-secret"),
                ("UNIFI_API_KEY", ""),
                ("UNIFI_USERNAME", "  "),
            ]))
            .unwrap();

        assert_eq!(config.base_url(), "https://unifi.local:8443");
        assert!(config.verify_tls);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.session.timeout_secs, 1800);
        assert_eq!(config.rate_limit.per_minute, 5);
        assert_eq!(config.operator_token.as_deref(), Some("op-secret"));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
        assert!(config.username.is_none());
    }

    #[test]
    fn malformed_overrides_are_errors() {
        let mut config = GatewayConfig::default();
        assert!(config
            .apply_overrides(lookup(&[("UNIFI_GATEWAY_PORT", "https")]))
            .is_err());
        assert!(config
            .apply_overrides(lookup(&[("UNIFI_VERIFY_TLS", "maybe")]))
            .is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = GatewayConfig {
            host: "unifi.local".into(),
            ..GatewayConfig::default()
        };
        assert!(base.validate().is_ok());
        assert!(GatewayConfig::default().validate().is_err());

        let mut cfg = base.clone();
        cfg.timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.session.refresh_ratio = 0.0;
        assert!(cfg.validate().is_err());
        cfg.session.refresh_ratio = 1.5;
        assert!(cfg.validate().is_err());
        cfg.session.refresh_ratio = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn debug_hides_secrets() {
        let cfg = GatewayConfig {
            api_key: Some("sk_live_1".into()),
            password: Some("hunter2".into()),
            operator_token: Some("op-secret".into()),
            ..GatewayConfig::default()
        };
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("op-secret"));
        assert!(!printed.contains("sk_live_1"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn from_env_reads_process_environment() {
        let _g = lock_tests();
        std::env::set_var("UNIFI_GATEWAY_HOST", "env-host");
        std::env::set_var("UNIFI_USERNAME", "envuser");
        std::env::set_var("UNIFI_PASSWORD", "envpass");

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.host, "env-host");
        assert_eq!(config.credentials().legacy().unwrap().username, "envuser");

        std::env::remove_var("UNIFI_GATEWAY_HOST");
        std::env::remove_var("UNIFI_USERNAME");
        std::env::remove_var("UNIFI_PASSWORD");
    }
}
