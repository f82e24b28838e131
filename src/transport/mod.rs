pub mod http;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::fmt;

pub use http::ReqwestTransport;

/// A fully resolved request, ready for the wire. `path` is relative to the
/// controller base URL.
#[derive(Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// Header values carry credentials; only names are printed.
impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &names)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Raw controller reply. Header names are lowercase; repeated headers such as
/// `set-cookie` appear once per value.
#[derive(Debug, Clone, Default)]
pub struct UpstreamReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl UpstreamReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Empty bodies parse as `{}`, non-JSON bodies are wrapped as `{"raw": ..}`.
    pub fn json(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Object(Default::default());
        }
        serde_json::from_str(&self.body)
            .unwrap_or_else(|_| serde_json::json!({ "raw": self.body }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
}

/// The network seam between the gateway and the controller.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamReply, TransportError>;
}


#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    type Responder = dyn Fn(&OutboundRequest) -> Result<UpstreamReply, TransportError> + Send + Sync;

    /// In-memory controller: records every request and answers from a closure.
    pub(crate) struct ScriptedTransport {
        responder: Box<Responder>,
        requests: Mutex<Vec<OutboundRequest>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        pub(crate) fn new<F>(responder: F) -> Self
        where
            F: Fn(&OutboundRequest) -> Result<UpstreamReply, TransportError> + Send + Sync + 'static,
        {
            Self {
                responder: Box::new(responder),
                requests: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub(crate) fn calls_to(&self, path: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.path == path)
                .count()
        }
    }

    impl fmt::Debug for ScriptedTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("ScriptedTransport")
                .field("calls", &self.calls())
                .finish()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: OutboundRequest) -> Result<UpstreamReply, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.responder)(&request)
        }
    }

    pub(crate) fn login_ok() -> UpstreamReply {
        UpstreamReply::new(200, r#"{"username":"admin"}"#)
            .with_header("set-cookie", "TOKEN=abc123; Path=/; HttpOnly")
            .with_header("x-csrf-token", "csrf-1")
    }
}
