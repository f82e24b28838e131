use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace};

use super::{OutboundRequest, Transport, TransportError, UpstreamReply};

/// `reqwest`-backed transport talking to a single controller.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: String,
    http_client: Client,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration, verify_tls: bool) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .context("creating HTTP client")?;

        debug!(base_url, verify_tls, timeout_secs = timeout.as_secs(), "controller transport initialized");

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(request: &OutboundRequest) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::Connection(format!("invalid header name {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::Connection(format!("invalid value for header {name}")))?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamReply, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let headers = Self::headers(&request)?;

        trace!(method = %request.method, url = %url, "sending controller request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .headers(headers);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connection(e.without_url().to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connection(e.without_url().to_string())
            }
        })?;

        debug!(status, path = %request.path, "controller replied");
        Ok(UpstreamReply {
            status,
            headers,
            body,
        })
    }
}
