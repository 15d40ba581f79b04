//! Core configuration and data model

pub mod catalog;
pub mod config;
pub mod types;

pub use catalog::{CatalogEntry, RegisterCatalog, RegisterKind, RegisterSpec};
pub use config::{AppConfig, DeviceConfig, RegisterRange};
pub use types::{Batch, EngineState, ReadingResult, RegisterValues};
