//! Request and response bodies

use serde::{Deserialize, Serialize};

use crate::core::catalog::RegisterKind;

fn default_count() -> u16 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadRequest {
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(default = "default_kind", alias = "register_type", alias = "type")]
    pub kind: RegisterKind,
}

fn default_kind() -> RegisterKind {
    RegisterKind::Holding
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub address: u16,
    pub value: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteMultipleRequest {
    pub address: u16,
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: i64,
}
