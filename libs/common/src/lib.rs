//! Shared building blocks for polling services
//!
//! API response envelopes, logging setup, service bootstrap and graceful
//! shutdown helpers.

pub mod api_types;
pub mod logging;
pub mod serde_helpers;
pub mod service_bootstrap;
pub mod shutdown;

pub use api_types::{ErrorInfo, ErrorResponse, SuccessResponse};

#[cfg(feature = "axum")]
pub use api_types::AppError;

pub use logging::{init_logging, LogConfig};
pub use service_bootstrap::{load_development_env, print_startup_banner, ServiceInfo};
pub use shutdown::wait_for_shutdown;
