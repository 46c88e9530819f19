//! `TallyServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tally_auth::{Authenticator, TokenAuthority};
use tally_core::{ConnectionId, SessionId, SessionStore, errors};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::ingest::IngestRouter;
use crate::websocket::hub::BroadcastHub;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,
    /// All live poll sessions.
    pub store: Arc<SessionStore>,
    /// Listener registry and tally fan-out.
    pub hub: Arc<BroadcastHub>,
    /// Per-session single-writer vote ingestion.
    pub ingest: Arc<IngestRouter>,
    /// Token issuance for `/login`.
    pub tokens: Arc<TokenAuthority>,
    /// When the server started.
    pub start_time: Instant,
    /// Cooperative shutdown signal shared with every task.
    pub cancel: CancellationToken,
    /// Renders the `/metrics` endpoint.
    pub metrics: PrometheusHandle,
}

/// The tally server: owns the state and serves the HTTP/WebSocket surface.
pub struct TallyServer {
    state: AppState,
}

impl TallyServer {
    /// Wire up a server from configuration and a token authority.
    pub fn new(config: ServerConfig, tokens: TokenAuthority, metrics: PrometheusHandle) -> Self {
        let store = Arc::new(SessionStore::new());
        let hub = Arc::new(BroadcastHub::new());
        let tokens = Arc::new(tokens);
        let cancel = CancellationToken::new();
        let auth: Arc<dyn Authenticator> = tokens.clone();
        let ingest = Arc::new(IngestRouter::new(
            store.clone(),
            hub.clone(),
            auth,
            config.ingest_queue_depth,
            cancel.clone(),
        ));
        Self {
            state: AppState {
                config,
                store,
                hub,
                ingest,
                tokens,
                start_time: Instant::now(),
                cancel,
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/login", post(login_handler))
            .route("/sessions", post(create_session_handler))
            .route(
                "/sessions/{id}",
                get(get_session_handler).delete(delete_session_handler),
            )
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve. Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind((
            self.state.config.host.as_str(),
            self.state.config.port,
        ))
        .await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let cancel = self.state.cancel.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "server task exited with error");
            }
        });
        info!(%addr, "tally server listening");
        Ok((addr, handle))
    }

    /// Initiate shutdown: stop accepting connections and cancel all
    /// workers. In-memory state of completed votes stays intact.
    pub fn shutdown(&self) {
        self.state.cancel.cancel();
    }

    /// Whether shutdown was initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.state.store
    }

    /// The broadcast hub.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.state.hub
    }

    /// The ingest router.
    pub fn ingest(&self) -> &Arc<IngestRouter> {
        &self.state.ingest
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

fn error_body(code: &str, message: impl Into<String>) -> Json<serde_json::Value> {
    Json(json!({ "code": code, "message": message.into() }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.hub.listener_count(),
        state.store.len(),
    );
    Json(resp)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(Debug, Deserialize)]
struct LoginParams {
    name: Option<String>,
}

/// POST /login?name=<display name> returns a signed vote token.
async fn login_handler(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
) -> Response {
    let Some(name) = params.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            error_body(errors::INVALID_PARAMS, "name is required"),
        )
            .into_response();
    };
    match state.tokens.issue(name) {
        Ok(token) => (StatusCode::OK, token).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("INTERNAL_ERROR", e.to_string()),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    options: Vec<String>,
}

/// POST /sessions creates a poll with all counts at zero.
async fn create_session_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Response {
    let id = SessionId::new();
    match state.store.create(id.clone(), request.options) {
        Ok(()) => {
            gauge!(crate::metrics::SESSIONS_ACTIVE).increment(1.0);
            info!(session_id = %id, "poll session created");
            (StatusCode::CREATED, Json(json!({ "sessionId": id }))).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            error_body(e.code(), e.to_string()),
        )
            .into_response(),
    }
}

/// GET /sessions/{id} returns point-in-time poll state.
async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.snapshot(&SessionId::from(id)) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, error_body(e.code(), e.to_string())).into_response(),
    }
}

/// DELETE /sessions/{id} tears a poll down.
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let id = SessionId::from(id);
    if state.store.remove(&id) {
        state.ingest.close_session(&id);
        gauge!(crate::metrics::SESSIONS_ACTIVE).decrement(1.0);
        info!(session_id = %id, "poll session removed");
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            error_body(errors::SESSION_NOT_FOUND, format!("session '{id}' not found")),
        )
            .into_response()
    }
}

/// GET /ws performs the WebSocket upgrade.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.hub.listener_count() >= state.config.max_connections {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            error_body(errors::UNAVAILABLE, "connection limit reached"),
        )
            .into_response();
    }
    if state.cancel.is_cancelled() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            error_body(errors::UNAVAILABLE, "server is shutting down"),
        )
            .into_response();
    }
    ws.on_upgrade(move |socket| run_ws_session(socket, ConnectionId::new(), state))
}
