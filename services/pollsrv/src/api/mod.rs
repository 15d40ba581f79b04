//! HTTP API

pub mod dto;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::MonitorService;

/// Shared handler state
pub struct AppState {
    pub service: Arc<MonitorService>,
    pub service_name: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<MonitorService>, service_name: impl Into<String>) -> Self {
        Self {
            service,
            service_name: service_name.into(),
            started_at: Utc::now(),
        }
    }
}

/// Create all API routes
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/config",
            get(handlers::get_config).post(handlers::update_config),
        )
        .route("/api/connect", post(handlers::connect))
        .route("/api/disconnect", post(handlers::disconnect))
        .route("/api/status", get(handlers::get_status))
        .route("/api/read", post(handlers::read_registers))
        .route("/api/write", post(handlers::write_register))
        .route("/api/write_multiple", post(handlers::write_multiple_registers))
        .route("/api/start_monitoring", post(handlers::start_monitoring))
        .route("/api/stop_monitoring", post(handlers::stop_monitoring))
        .route("/api/data/latest", get(handlers::get_latest_data))
        .route("/api/data/history", get(handlers::get_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
