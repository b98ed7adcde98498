use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::chat::ChatDriver;
use crate::config::ServerConfig;
use crate::discovery::Discovery;
use crate::handlers;
use crate::llm::ProviderRegistry;
use crate::session::SessionStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub discovery: Arc<Discovery>,
    pub sessions: SessionStore,
    pub driver: Arc<ChatDriver>,
    pub keep_alive_interval_seconds: u64,
}

impl AppState {
    pub fn new(providers: ProviderRegistry, server: &ServerConfig) -> Self {
        let driver = ChatDriver::new(providers.clone()).with_idle_timeout(server.idle_timeout());
        Self {
            discovery: Arc::new(Discovery::new(providers)),
            sessions: SessionStore::new(),
            driver: Arc::new(driver),
            keep_alive_interval_seconds: server.keep_alive_interval_seconds,
        }
    }
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api_v1 = Router::new()
        .route("/sessions", post(handlers::v1::create_session))
        .route(
            "/sessions/{session_id}",
            get(handlers::v1::get_session).delete(handlers::v1::delete_session),
        )
        .route(
            "/sessions/{session_id}/transcript",
            get(handlers::v1::get_transcript).delete(handlers::v1::clear_transcript),
        )
        .route("/sessions/{session_id}/chat", post(handlers::v1::chat))
        .with_state(state);

    Router::new()
        .route("/", get(handlers::index))
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api/v1", api_v1)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}
