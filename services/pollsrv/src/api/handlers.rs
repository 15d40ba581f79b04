//! HTTP handlers over `MonitorService`

use axum::{
    extract::{Query, State},
    Json,
};
use common::{AppError, SuccessResponse};
use std::sync::Arc;

use super::dto::{
    HealthResponse, HistoryQuery, MessageResponse, ReadRequest, WriteMultipleRequest,
    WriteRequest,
};
use super::AppState;
use crate::core::types::{Batch, ReadingResult};
use crate::service::{DeviceSettings, ServiceStatus};

type ApiResult<T> = Result<Json<SuccessResponse<T>>, AppError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(SuccessResponse::new(data)))
}

fn message(text: impl Into<String>) -> ApiResult<MessageResponse> {
    ok(MessageResponse::new(text))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<DeviceSettings> {
    ok(state.service.get_config().await)
}

pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<DeviceSettings>,
) -> ApiResult<MessageResponse> {
    state.service.reconfigure(settings).await?;
    message("Configuration updated successfully")
}

pub async fn connect(State(state): State<Arc<AppState>>) -> ApiResult<MessageResponse> {
    state.service.connect().await?;
    message("Connected successfully")
}

pub async fn disconnect(State(state): State<Arc<AppState>>) -> ApiResult<MessageResponse> {
    state.service.disconnect().await;
    message("Disconnected successfully")
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult<ServiceStatus> {
    ok(state.service.get_status().await)
}

pub async fn read_registers(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReadRequest>,
) -> ApiResult<ReadingResult> {
    let reading = state
        .service
        .read_registers(req.address, req.count, req.kind)
        .await?;
    ok(reading)
}

pub async fn write_register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WriteRequest>,
) -> ApiResult<MessageResponse> {
    state.service.write_register(req.address, req.value).await?;
    message(format!(
        "Successfully wrote value {} to address {}",
        req.value, req.address
    ))
}

pub async fn write_multiple_registers(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WriteMultipleRequest>,
) -> ApiResult<MessageResponse> {
    state
        .service
        .write_registers(req.address, &req.values)
        .await?;
    message(format!(
        "Successfully wrote {} registers starting at address {}",
        req.values.len(),
        req.address
    ))
}

pub async fn start_monitoring(State(state): State<Arc<AppState>>) -> ApiResult<MessageResponse> {
    state.service.start_monitoring().await?;
    message("Monitoring started")
}

pub async fn stop_monitoring(State(state): State<Arc<AppState>>) -> ApiResult<MessageResponse> {
    state.service.stop_monitoring().await;
    message("Monitoring stopped")
}

pub async fn get_latest_data(State(state): State<Arc<AppState>>) -> ApiResult<Option<Batch>> {
    ok(state.service.get_latest_data().await?)
}

/// Newest first; `metadata.count` is the number of batches returned
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Batch>> {
    let history = state.service.get_history(query.limit).await?;
    let count = history.len();
    Ok(Json(SuccessResponse::new(history).with_metadata("count", count.into())))
}
