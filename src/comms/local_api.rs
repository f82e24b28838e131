use anyhow::Result;
use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::http::header::RETRY_AFTER;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::gateway::{Dispatcher, Gateway, GatewayError};
use crate::security::audit_log::MemorySink;
use crate::security::credentials::{Credential, CredentialSet};
use crate::security::operator::OperatorToken;
use crate::tools::ToolRegistry;

type SharedState = Arc<AppState>;

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 1000;

// Extract client IP from ConnectInfo, headers, or fallback to 127.0.0.1
#[derive(Debug, Clone)]
struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(addr) = parts.extensions.get::<axum::extract::ConnectInfo<SocketAddr>>() {
            return Ok(ClientIp(addr.0.ip().to_string()));
        }
        if let Some(forwarded) = parts.headers.get("x-forwarded-for") {
            if let Ok(s) = forwarded.to_str() {
                let ip = s.split(',').next().unwrap_or(s).trim().to_string();
                if !ip.is_empty() {
                    return Ok(ClientIp(ip));
                }
            }
        }
        Ok(ClientIp("127.0.0.1".to_string()))
    }
}

// Operator routes need `Authorization: Bearer <operator token>`; without a
// configured token they are refused outright.
struct Operator;

impl FromRequestParts<SharedState> for Operator {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = state.operator_token.as_ref() else {
            warn!(path = %parts.uri.path(), "operator route called with no operator token configured");
            return Err(error_json(StatusCode::FORBIDDEN, "operator routes are disabled"));
        };
        if token.authorizes(&parts.headers) {
            Ok(Operator)
        } else {
            warn!(path = %parts.uri.path(), "operator token missing or wrong");
            Err(error_json(StatusCode::UNAUTHORIZED, "operator token required"))
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub tools: Arc<ToolRegistry>,
    pub audit_trail: Arc<MemorySink>,
    pub operator_token: Option<OperatorToken>,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            dispatcher: gateway.dispatcher,
            tools: Arc::new(ToolRegistry::with_defaults()),
            audit_trail: gateway.audit_trail,
            operator_token: gateway.operator_token,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize, Default)]
pub struct RotateRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl RotateRequest {
    fn into_credentials(self) -> CredentialSet {
        let mut set = CredentialSet::new();
        if let Some(key) = self.api_key {
            set = set.with(Credential::ApiKey(key));
        }
        if let (Some(username), Some(password)) = (self.username, self.password) {
            set = set.with(Credential::Legacy { username, password });
        }
        set
    }
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::AuthenticationFailed { .. } => StatusCode::UNAUTHORIZED,
        GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::Upstream { .. } | GatewayError::Connection(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::UnknownTool(_) => StatusCode::NOT_FOUND,
    }
}

fn error_response(err: &GatewayError) -> Response {
    let mut response = (status_for(err), Json(err.to_json())).into_response();
    if let Some(retry_after) = err.retry_after() {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs().max(1)));
    }
    response
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    error_json(StatusCode::BAD_REQUEST, message)
}

// Empty bodies are treated as `{}`.
fn parse_params(body: &Bytes) -> Result<Value, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err(bad_request("parameters must be a JSON object")),
        Err(e) => Err(bad_request(format!("invalid JSON body: {e}"))),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": crate::VERSION}))
}

async fn list_tools(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({"tools": state.tools.describe()}))
}

async fn invoke_tool(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let params = match parse_params(&body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    debug!(tool = %name, client_ip = %client_ip, "tool call received");
    match state.tools.invoke(&state.dispatcher, &name, &params).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => {
            warn!(tool = %name, client_ip = %client_ip, error = err.code(), "tool call failed");
            error_response(&err)
        }
    }
}

async fn session_info(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.dispatcher.sessions().info().await)
}

async fn session_invalidate(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    _operator: Operator,
) -> impl IntoResponse {
    info!(client_ip = %client_ip, "session invalidation requested");
    state
        .dispatcher
        .sessions()
        .invalidate("operator request")
        .await;
    Json(json!({"invalidated": true}))
}

async fn rotate_credentials(
    State(state): State<SharedState>,
    ClientIp(client_ip): ClientIp,
    _operator: Operator,
    body: Bytes,
) -> Response {
    let request: RotateRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("invalid JSON body: {e}")),
    };
    let next = request.into_credentials();
    if next.is_empty() {
        return bad_request("at least one credential (api_key or username/password) is required");
    }
    info!(client_ip = %client_ip, "credential rotation requested");
    let changed = state.dispatcher.rotate_credentials(next).await;
    let rotated_at = state.dispatcher.credentials().last_rotated().await;
    (
        StatusCode::OK,
        Json(json!({"changed": changed, "rotated_at": rotated_at})),
    )
        .into_response()
}

async fn rate_limit_stats(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    Json(state.dispatcher.rate_limiter().stats(&key).await)
}

async fn audit_events(
    State(state): State<SharedState>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .min(MAX_AUDIT_LIMIT);
    let events = state.audit_trail.recent(limit);
    Json(json!({"count": events.len(), "events": events}))
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tools", get(list_tools))
        .route("/api/v1/tools/{name}", post(invoke_tool))
        .route("/api/v1/session", get(session_info))
        .route("/api/v1/session/invalidate", post(session_invalidate))
        .route("/api/v1/credentials/rotate", post(rotate_credentials))
        .route("/api/v1/rate-limit/{*key}", get(rate_limit_stats))
        .route("/api/v1/audit", get(audit_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(gateway: Gateway, bind: IpAddr, port: u16) -> Result<()> {
    let state = Arc::new(AppState::new(gateway));
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::new(bind, port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("gateway API listening on {}", addr);
    axum::serve(listener, app).into_future().await?;
    Ok(())
}
