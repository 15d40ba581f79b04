//! Shared error classification for polling services
//!
//! Each service keeps its own domain error enum and implements
//! [`ServiceErrorTrait`] to get uniform error codes, categories, retry hints
//! and HTTP status mapping at API boundaries.

/// Error category enum - used for classification and HTTP mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Database,
    Network,
    Timeout,

    // Request layer
    Validation,
    Conflict,

    // Protocol/communication layer
    Protocol,
    Connection,

    // System level
    Internal,
    ResourceBusy,
}

/// Service error capability trait
///
/// Services keep their domain-specific error type (e.g., `PollSrvError`) and gain
/// a common interface by implementing this trait.
pub trait ServiceErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for API, logs, monitoring)
    fn error_code(&self) -> &'static str;

    /// Get error category (for classification)
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Connection
                | ErrorCategory::ResourceBusy
        )
    }

    /// Convert to HTTP status code
    #[cfg(feature = "axum-support")]
    fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.category() {
            ErrorCategory::Configuration => StatusCode::BAD_REQUEST,
            ErrorCategory::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorCategory::Protocol => StatusCode::BAD_GATEWAY,
            ErrorCategory::Network
            | ErrorCategory::Connection
            | ErrorCategory::ResourceBusy => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Database | ErrorCategory::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Convert into an Axum HTTP response
    #[cfg(feature = "axum-support")]
    fn into_http_response(self) -> axum::response::Response
    where
        Self: Sized,
    {
        use axum::response::{IntoResponse, Json};
        use serde_json::json;

        (
            self.http_status(),
            Json(json!({
                "error_code": self.error_code(),
                "message": self.to_string(),
                "category": format!("{:?}", self.category()),
                "retryable": self.is_retryable(),
            })),
        )
            .into_response()
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Database => Level::ERROR,
            ErrorCategory::Validation | ErrorCategory::Conflict => Level::INFO,
            _ => Level::WARN,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum SampleError {
        #[error("link down")]
        Link,
        #[error("bad input")]
        Input,
    }

    impl ServiceErrorTrait for SampleError {
        fn error_code(&self) -> &'static str {
            match self {
                Self::Link => "SAMPLE_LINK",
                Self::Input => "SAMPLE_INPUT",
            }
        }

        fn category(&self) -> ErrorCategory {
            match self {
                Self::Link => ErrorCategory::Network,
                Self::Input => ErrorCategory::Validation,
            }
        }
    }

    #[test]
    fn test_retryable_by_category() {
        assert!(SampleError::Link.is_retryable());
        assert!(!SampleError::Input.is_retryable());
    }

    #[test]
    fn test_log_level_by_category() {
        assert_eq!(SampleError::Link.log_level(), tracing::Level::WARN);
        assert_eq!(SampleError::Input.log_level(), tracing::Level::INFO);
    }

    #[cfg(feature = "axum-support")]
    #[test]
    fn test_http_status_mapping() {
        use axum::http::StatusCode;
        assert_eq!(
            SampleError::Link.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            SampleError::Input.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
