//! Acquisition data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::catalog::RegisterKind;

/// Raw values of one register group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValues {
    /// Holding / input registers
    Words(Vec<u16>),
    /// Coils / discrete inputs
    Bits(Vec<bool>),
}

impl RegisterValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Words(v) => v.len(),
            Self::Bits(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer view, booleans as 0/1
    pub fn as_integers(&self) -> Vec<i64> {
        match self {
            Self::Words(v) => v.iter().map(|w| i64::from(*w)).collect(),
            Self::Bits(v) => v.iter().map(|b| i64::from(*b)).collect(),
        }
    }
}

/// One register group read, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingResult {
    pub address: u16,
    #[serde(rename = "type")]
    pub kind: RegisterKind,
    pub count: u16,
    pub values: RegisterValues,
    pub timestamp: DateTime<Utc>,
    pub name: String,
}

/// One cycle's readings in catalog order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(rename = "data")]
    pub readings: Vec<ReadingResult>,
    pub timestamp: DateTime<Utc>,
}

impl Batch {
    pub fn new(readings: Vec<ReadingResult>, timestamp: DateTime<Utc>) -> Self {
        Self {
            readings,
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Governor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Idle,
    Connecting,
    Monitoring,
    Stopping,
    /// Circuit breaker tripped; stays here until an explicit restart
    Faulted,
}

impl EngineState {
    /// Loop task is alive in this state
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Monitoring | Self::Stopping)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Monitoring => "monitoring",
            Self::Stopping => "stopping",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}
