//! Error handling for the polling service
//!
//! `PollSrvError` is the caller-visible taxonomy. `DriverError` is what a
//! transport driver reports; the Device Link maps it onto `PollSrvError` so
//! callers can tell "device said no" apart from "link is down".

use errors::{ErrorCategory, ServiceErrorTrait};
use thiserror::Error;

/// Polling Service Error Type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollSrvError {
    /// Bad input shape or range, rejected before any I/O
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Connection could not be established (timeout, refusal, DNS)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Link down, request timeout or broken transport
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Device answered with an exception, or a malformed response
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Monitoring is already running")]
    AlreadyRunning,

    #[error("Monitoring is not running")]
    NotRunning,

    /// Governor tripped its circuit breaker; explicit restart required
    #[error("Circuit open: device considered unreachable")]
    CircuitOpen,

    #[error("Device not connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Snapshot sink failures (Redis, serialization)
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the polling service
pub type Result<T> = std::result::Result<T, PollSrvError>;

impl PollSrvError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PollSrvError::ValidationError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        PollSrvError::ConnectionError(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        PollSrvError::TransportError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        PollSrvError::ProtocolError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PollSrvError::ConfigError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        PollSrvError::StorageError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        PollSrvError::InternalError(msg.into())
    }
}

impl From<figment::Error> for PollSrvError {
    fn from(err: figment::Error) -> Self {
        PollSrvError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for PollSrvError {
    fn from(err: serde_json::Error) -> Self {
        PollSrvError::StorageError(format!("JSON: {err}"))
    }
}

impl From<anyhow::Error> for PollSrvError {
    fn from(err: anyhow::Error) -> Self {
        PollSrvError::StorageError(format!("{err:#}"))
    }
}

// ============================================================================
// Driver seam errors
// ============================================================================

/// Errors reported by a transport driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Session could not be opened
    #[error("connect failed: {0}")]
    Connect(String),

    /// Device returned an exception response
    #[error("device exception: {0}")]
    Exception(String),

    /// I/O failure, closed session or unusable response
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<DriverError> for PollSrvError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Connect(msg) => PollSrvError::ConnectionError(msg),
            DriverError::Exception(msg) => PollSrvError::ProtocolError(msg),
            DriverError::Transport(msg) => PollSrvError::TransportError(msg),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

impl ServiceErrorTrait for PollSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "POLL_VALIDATION_ERROR",
            Self::ConnectionError(_) => "POLL_CONNECTION_ERROR",
            Self::TransportError(_) => "POLL_TRANSPORT_ERROR",
            Self::ProtocolError(_) => "POLL_PROTOCOL_ERROR",
            Self::AlreadyRunning => "POLL_ALREADY_RUNNING",
            Self::NotRunning => "POLL_NOT_RUNNING",
            Self::CircuitOpen => "POLL_CIRCUIT_OPEN",
            Self::NotConnected => "POLL_NOT_CONNECTED",
            Self::ConfigError(_) => "POLL_CONFIG_ERROR",
            Self::StorageError(_) => "POLL_STORAGE_ERROR",
            Self::InternalError(_) => "POLL_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationError(_) => ErrorCategory::Validation,
            Self::ConnectionError(_) | Self::TransportError(_) | Self::CircuitOpen => {
                ErrorCategory::Connection
            },
            Self::ProtocolError(_) => ErrorCategory::Protocol,
            Self::AlreadyRunning | Self::NotRunning | Self::NotConnected => {
                ErrorCategory::Conflict
            },
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::StorageError(_) => ErrorCategory::Database,
            Self::InternalError(_) => ErrorCategory::Internal,
        }
    }

    fn is_retryable(&self) -> bool {
        // An open circuit needs an explicit restart, not a blind retry
        match self {
            Self::CircuitOpen => false,
            _ => matches!(
                self.category(),
                ErrorCategory::Connection | ErrorCategory::Network | ErrorCategory::Timeout
            ),
        }
    }
}

impl From<PollSrvError> for common::AppError {
    fn from(err: PollSrvError) -> Self {
        common::AppError::from_service_error(&err)
    }
}
