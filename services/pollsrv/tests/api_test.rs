//! HTTP API tests against an in-process router
//!
//! The router runs over a `MonitorService` whose links are backed by one
//! shared mock device and an in-memory sink.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::device;
use pollsrv::api::{create_routes, AppState};
use pollsrv::core::config::{AppConfig, DeviceConfig};
use pollsrv::core::types::EngineState;
use pollsrv::link::{DeviceLink, MockDriver, MockFailure, MockState};
use pollsrv::service::LinkFactory;
use pollsrv::storage::MemorySink;
use pollsrv::MonitorService;

struct TestApp {
    router: Router,
    service: Arc<MonitorService>,
    device: Arc<MockState>,
}

fn test_app() -> TestApp {
    let device_state = Arc::new(MockState::default());
    device_state.set_holding(1, &[10, 20, 30, 40]);

    let shared = device_state.clone();
    let factory: LinkFactory = Arc::new(move |config: &DeviceConfig| {
        DeviceLink::new(
            config.clone(),
            Box::new(MockDriver::with_state(shared.clone())),
        )
    });

    let config = AppConfig {
        device: device(1),
        ..AppConfig::default()
    };
    let service = Arc::new(
        MonitorService::with_link_factory(&config, Arc::new(MemorySink::new()), factory).unwrap(),
    );
    let router = create_routes(Arc::new(AppState::new(service.clone(), "pollsrv")));

    TestApp {
        router,
        service,
        device: device_state,
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body)).await
    }

    async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::POST, uri, None).await
    }
}

fn error_code(body: &Value) -> &str {
    body["error"]["error_code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "pollsrv");
}

#[tokio::test]
async fn test_status_before_connect() {
    let app = test_app();
    let (status, body) = app.get("/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["connected"], false);
    assert_eq!(body["data"]["monitoring"], false);
    assert_eq!(body["data"]["state"], "idle");
    assert_eq!(body["data"]["sink"], "memory");
}

#[tokio::test]
async fn test_read_requires_connection() {
    let app = test_app();
    let (status, body) = app.post("/api/read", json!({"address": 1, "count": 4})).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(error_code(&body), "POLL_NOT_CONNECTED");
    assert_eq!(app.device.io_calls(), 0);
}

#[tokio::test]
async fn test_connect_then_read() {
    let app = test_app();

    let (status, body) = app.post_empty("/api/connect").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "Connected successfully");

    let (status, body) = app
        .post("/api/read", json!({"address": 1, "count": 4, "type": "holding"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["values"], json!([10, 20, 30, 40]));
    assert_eq!(body["data"]["type"], "holding");
    assert_eq!(body["data"]["name"], "holding_1");

    let (_, body) = app.get("/api/status").await;
    assert_eq!(body["data"]["connected"], true);
}

#[tokio::test]
async fn test_read_validation() {
    let app = test_app();
    app.post_empty("/api/connect").await;

    let (status, body) = app.post("/api/read", json!({"address": 0, "count": 126})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&body), "POLL_VALIDATION_ERROR");

    // Does not fit the 16-bit address field
    let (status, _) = app.post("/api/read", json!({"address": 70000})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(app.device.read_calls(), 0);
}

#[tokio::test]
async fn test_device_exception_maps_to_bad_gateway() {
    let app = test_app();
    app.post_empty("/api/connect").await;
    app.device
        .fail(pollsrv::core::RegisterKind::Holding, 1, MockFailure::Exception);

    let (status, body) = app.post("/api/read", json!({"address": 1})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&body), "POLL_PROTOCOL_ERROR");
}

#[tokio::test]
async fn test_write_out_of_range_rejected() {
    let app = test_app();
    app.post_empty("/api/connect").await;

    let (status, body) = app
        .post("/api/write", json!({"address": 5, "value": 65536}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&body), "POLL_VALIDATION_ERROR");
    assert_eq!(app.device.write_calls(), 0);
}

#[tokio::test]
async fn test_write_single_and_multiple() {
    let app = test_app();
    app.post_empty("/api/connect").await;

    let (status, body) = app
        .post("/api/write", json!({"address": 5, "value": 1234}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["message"],
        "Successfully wrote value 1234 to address 5"
    );
    assert_eq!(app.device.holding(5), 1234);

    let (status, _) = app
        .post(
            "/api/write_multiple",
            json!({"address": 100, "values": [1, 2, 3]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.device.holding(100), 1);
    assert_eq!(app.device.holding(102), 3);
}

#[tokio::test]
async fn test_latest_data_empty() {
    let app = test_app();
    let (status, body) = app.get("/api/data/latest").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["data"].is_null());

    let (status, body) = app.get("/api/data/history").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["metadata"]["count"], 0);
}

#[tokio::test]
async fn test_start_monitoring_requires_connection() {
    let app = test_app();
    let (status, body) = app.post_empty("/api/start_monitoring").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "POLL_NOT_CONNECTED");
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_lifecycle() {
    let app = test_app();
    app.post_empty("/api/connect").await;

    let (status, _) = app.post_empty("/api/start_monitoring").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.post_empty("/api/start_monitoring").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "POLL_ALREADY_RUNNING");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let (_, body) = app.get("/api/data/latest").await;
    let readings = body["data"]["data"].as_array().unwrap();
    assert!(!readings.is_empty());
    assert_eq!(readings[0]["name"], "Holding_1-26");
    let values = readings[0]["values"].as_array().unwrap();
    assert_eq!(values.len(), 26);
    assert_eq!(values[..4], [json!(10), json!(20), json!(30), json!(40)]);

    let (_, body) = app.get("/api/data/history?limit=1").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["metadata"]["count"], 1);
    let (_, body) = app.get("/api/data/history").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["metadata"]["count"], 2);

    let (_, body) = app.get("/api/status").await;
    assert_eq!(body["data"]["monitoring"], true);
    assert_eq!(body["data"]["state"], "monitoring");

    let (status, _) = app.post_empty("/api/stop_monitoring").await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.get("/api/status").await;
    assert_eq!(body["data"]["monitoring"], false);
    assert_eq!(body["data"]["state"], "idle");

    // stop twice is fine
    let (status, _) = app.post_empty("/api/stop_monitoring").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_open_until_reconnect() {
    let app = test_app();
    app.post_empty("/api/connect").await;
    app.device.fail_all(Some(MockFailure::Exception));

    app.post_empty("/api/start_monitoring").await;
    assert_eq!(
        app.service.join_monitoring().await.unwrap(),
        EngineState::Faulted
    );

    let (status, body) = app.post("/api/read", json!({"address": 1})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_code(&body), "POLL_CIRCUIT_OPEN");

    app.device.fail_all(None);
    let (status, _) = app.post_empty("/api/connect").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.service.governor_state().await, EngineState::Idle);

    let (status, _) = app.post("/api/read", json!({"address": 1})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_disconnect() {
    let app = test_app();
    app.post_empty("/api/connect").await;

    let (status, body) = app.post_empty("/api/disconnect").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "Disconnected successfully");
    assert!(!app.device.is_connected());

    let (_, body) = app.get("/api/status").await;
    assert_eq!(body["data"]["connected"], false);
}

#[tokio::test]
async fn test_get_and_update_config() {
    let app = test_app();

    let (status, body) = app.get("/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["host"], "10.0.0.5");
    assert_eq!(body["data"]["port"], 502);
    assert_eq!(body["data"]["start_address"], 1);

    app.post_empty("/api/connect").await;
    let update = json!({
        "host": "10.0.0.9",
        "port": 1502,
        "device_id": 3,
        "poll_interval": 0.5,
        "timeout": 1.0,
        "retries": 2,
        "start_address": 1,
        "end_address": 10
    });
    let (status, body) = app.post("/api/config", update).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["message"],
        "Configuration updated successfully"
    );

    let (_, body) = app.get("/api/config").await;
    assert_eq!(body["data"]["host"], "10.0.0.9");
    assert_eq!(body["data"]["device_id"], 3);
    assert_eq!(body["data"]["end_address"], 10);

    // rebuilt engine starts disconnected
    let (_, body) = app.get("/api/status").await;
    assert_eq!(body["data"]["connected"], false);
    let link = app.service.link().await;
    assert_eq!(link.config().endpoint(), "10.0.0.9:1502");
}

#[tokio::test]
async fn test_invalid_config_leaves_engine_untouched() {
    let app = test_app();
    app.post_empty("/api/connect").await;

    let update = json!({
        "host": "10.0.0.9",
        "port": 502,
        "device_id": 1,
        "poll_interval": 0.0,
        "timeout": 1.0,
        "retries": 1,
        "start_address": 1,
        "end_address": 10
    });
    let (status, body) = app.post("/api/config", update).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "POLL_CONFIG_ERROR");

    let (_, body) = app.get("/api/config").await;
    assert_eq!(body["data"]["host"], "10.0.0.5");
    let (_, body) = app.get("/api/status").await;
    assert_eq!(body["data"]["connected"], true);
}
