//! Shared API models for polling services
//!
//! Unified response envelopes and HTTP error conversion so every endpoint
//! answers with the same JSON shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Standard API Response Models
// ============================================================================

/// Successful response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse<T> {
    #[serde(default = "crate::serde_helpers::bool_true")]
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Failed response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default = "crate::serde_helpers::bool_false")]
    pub success: bool,
    pub error: ErrorInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// HTTP status code mirrored into the body
    pub code: u16,
    pub message: String,
    /// Machine readable error code, e.g. `POLL_CIRCUIT_OPEN`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
            error_code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = Some(error_code.into());
        self
    }
}

// ============================================================================
// AppError - HTTP Error with proper status codes (requires axum feature)
// ============================================================================

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

#[cfg(feature = "axum")]
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub error: ErrorInfo,
}

#[cfg(feature = "axum")]
impl AppError {
    pub fn new(status: StatusCode, error: ErrorInfo) -> Self {
        Self { status, error }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ErrorInfo::new(message).with_code(400),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ErrorInfo::new(message).with_code(500),
        }
    }

    /// Build from a classified service error, using its category for the status
    pub fn from_service_error<E: errors::ServiceErrorTrait>(err: &E) -> Self {
        let status = err.http_status();
        Self {
            status,
            error: ErrorInfo::new(err.to_string())
                .with_code(status.as_u16())
                .with_error_code(err.error_code()),
        }
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.error,
            }),
        )
            .into_response()
    }
}

#[cfg(feature = "axum")]
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_error(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_success_response_serialization() {
        let resp = SuccessResponse::new(vec![1, 2, 3]);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], serde_json::json!([1, 2, 3]));
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_error_info_builder() {
        let info = ErrorInfo::new("link down")
            .with_code(503)
            .with_error_code("POLL_NOT_CONNECTED");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["code"], 503);
        assert_eq!(json["error_code"], "POLL_NOT_CONNECTED");

        let json = serde_json::to_value(ErrorInfo::new("boom")).unwrap();
        assert_eq!(json["code"], 500);
        assert!(json.get("error_code").is_none());
    }

    #[test]
    fn test_success_response_metadata() {
        let resp = SuccessResponse::new(Vec::<u8>::new()).with_metadata("count", 0.into());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["metadata"]["count"], 0);
    }

    #[cfg(feature = "axum")]
    #[test]
    fn test_app_error_status() {
        let err = AppError::bad_request("bad limit");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error.code, 400);

        let err: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
