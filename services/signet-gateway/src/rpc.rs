//! JSON-RPC surface
//!
//! `POST /` and `POST /rpc` sit behind the auth gate and the quota layer;
//! `GET /health` does not. The only method answered here is
//! `signet_identity`, which echoes the caller's resolved identity; signing
//! methods are served by downstream components.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use signet_auth::{error::RpcError, AuthOutcome, AuthService, RequireAuth};
use signet_db::Database;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub db: Option<Arc<Database>>,
}

/// Router limits
#[derive(Debug, Clone, Copy)]
pub struct RouterLimits {
    pub max_body_size: usize,
    pub request_timeout: Duration,
}

/// Build the gateway router
pub fn build_router(state: AppState, limits: RouterLimits) -> Router {
    let rpc: Router<AppState> = Router::new()
        .route("/", post(handle_rpc))
        .route("/rpc", post(handle_rpc))
        .layer(state.auth.quota_layer())
        .layer(state.auth.dual_auth_layer());

    Router::new()
        .route("/health", get(health))
        .merge(rpc)
        .layer(RequestBodyLimitLayer::new(limits.max_body_size))
        .layer(TimeoutLayer::new(limits.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message: message.to_string(),
            }),
            id,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_rpc(RequireAuth(outcome): RequireAuth, body: Bytes) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable JSON-RPC request");
            return Json(RpcResponse::error(None, PARSE_ERROR, "Parse error"));
        }
    };

    if request.jsonrpc != "2.0" {
        return Json(RpcResponse::error(request.id, INVALID_REQUEST, "Invalid Request"));
    }

    metrics::counter!(
        "signet_rpc_requests_total",
        "method" => request.method.clone(),
        "auth_method" => outcome.method.as_str()
    )
    .increment(1);

    let response = match request.method.as_str() {
        "signet_identity" => RpcResponse::result(request.id, identity(&outcome)),
        other => {
            tracing::debug!(method = %other, org_id = %outcome.org_id, "Unknown JSON-RPC method");
            RpcResponse::error(request.id, METHOD_NOT_FOUND, "Method not found")
        }
    };

    Json(response)
}

fn identity(outcome: &AuthOutcome) -> Value {
    json!({
        "org_id": outcome.org_id,
        "auth_method": outcome.method.as_str(),
        "identifier": outcome.identifier,
        "api_key_id": outcome.api_key_id,
        "cert_fingerprint": outcome.cert_fingerprint,
    })
}

async fn health(State(state): State<AppState>) -> Response {
    let store = match &state.db {
        Some(db) => db.health_check().await.healthy,
        None => true,
    };

    let status = if store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if store { "ok" } else { "degraded" },
            "store": store,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
        .into_response()
}
