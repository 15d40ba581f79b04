//! Modbus polling and reliability service
//!
//! Polls a configured register catalog from one Modbus TCP device, keeps the
//! latest batch plus a bounded history in a snapshot sink, and exposes the
//! whole thing over a small HTTP control API.

pub mod api;
pub mod core;
pub mod engine;
pub mod error;
pub mod link;
pub mod service;
pub mod storage;

pub use error::{PollSrvError, Result};
pub use service::{DeviceSettings, MonitorService, ServiceStatus};
