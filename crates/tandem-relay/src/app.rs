//! HTTP surface: banner, health, the signaling upgrade and CORS.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use tandem_config::{OriginPolicy, RelayConfig};
use tandem_signal::{EngineStats, PairingEngine};

use crate::connection::handle_connection;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: PairingEngine,
    pub policy: Arc<OriginPolicy>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(engine: PairingEngine, config: RelayConfig) -> Self {
        Self {
            engine,
            policy: Arc::new(config.origin_policy()),
            config: Arc::new(config),
        }
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    #[serde(flatten)]
    stats: EngineStats,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/ws/signaling", get(signaling))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

async fn banner() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Tandem signaling server",
        "status": "running",
    }))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        stats: state.engine.stats().await,
    })
}

async fn signaling(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Some(origin) = request_origin(&headers) {
        if !state.policy.allows(origin) {
            warn!(peer = %peer, origin, "Rejected signaling connection from disallowed origin");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_connection(socket, peer, state))
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

/// Answer preflights and stamp `access-control-allow-origin` on every response.
async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let allow = state
        .policy
        .allow_origin_header(request_origin(request.headers()));

    let mut response = if request.method() == Method::OPTIONS {
        preflight()
    } else {
        next.run(request).await
    };

    let Some(allow) = allow else {
        return response;
    };
    let headers = response.headers_mut();
    // Credentials only accompany an echoed origin, never `*`.
    if allow != "*" {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(header::VARY, HeaderValue::from_static("origin"));
    }
    if let Ok(value) = HeaderValue::from_str(&allow) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    response
}

fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}
