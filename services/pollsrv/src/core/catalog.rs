//! Register catalog
//!
//! Ordered list of register groups acquired every cycle. Insertion order is
//! significant: it is the order of readings inside a batch.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PollSrvError, Result};

/// Maximum words per read request
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum bits per coil/discrete read request
pub const MAX_READ_BITS: u16 = 2000;
/// Maximum words per multi-register write
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Register table kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    #[serde(alias = "holding_registers")]
    Holding,
    #[serde(alias = "input_registers")]
    Input,
    #[serde(alias = "coil")]
    Coils,
    #[serde(alias = "discrete", alias = "discrete_input")]
    DiscreteInputs,
}

impl RegisterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Input => "input",
            Self::Coils => "coils",
            Self::DiscreteInputs => "discrete_inputs",
        }
    }

    /// Coils and discrete inputs carry booleans
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coils | Self::DiscreteInputs)
    }

    /// Largest count accepted in a single read request
    pub fn max_read_count(&self) -> u16 {
        if self.is_bit() {
            MAX_READ_BITS
        } else {
            MAX_READ_REGISTERS
        }
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check a read request against per-kind limits and the 16-bit address space
pub fn validate_read(address: u16, count: u16, kind: RegisterKind) -> Result<()> {
    let max = kind.max_read_count();
    if count == 0 || count > max {
        return Err(PollSrvError::validation(format!(
            "count {} out of range 1..={} for {}",
            count, max, kind
        )));
    }
    check_address_span(address, count)
}

pub(crate) fn check_address_span(address: u16, count: u16) -> Result<()> {
    if u32::from(address) + u32::from(count) > 65536 {
        return Err(PollSrvError::validation(format!(
            "address {} + count {} exceeds the 16-bit address space",
            address, count
        )));
    }
    Ok(())
}

/// One register group to acquire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(default = "default_kind", alias = "type", alias = "register_type")]
    pub kind: RegisterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_count() -> u16 {
    1
}

fn default_kind() -> RegisterKind {
    RegisterKind::Holding
}

impl RegisterSpec {
    pub fn new(address: u16, count: u16, kind: RegisterKind) -> Self {
        Self {
            address,
            count,
            kind,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Explicit name, or `{kind}_{address}`
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}", self.kind, self.address),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_read(self.address, self.count, self.kind)
    }
}

/// Catalog entry with its resolved display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub address: u16,
    pub count: u16,
    pub kind: RegisterKind,
    pub name: String,
}

impl From<RegisterSpec> for CatalogEntry {
    fn from(spec: RegisterSpec) -> Self {
        let name = spec.display_name();
        Self {
            address: spec.address,
            count: spec.count,
            kind: spec.kind,
            name,
        }
    }
}

/// Ordered register catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterCatalog {
    entries: Vec<CatalogEntry>,
}

impl RegisterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from specs, validating each one
    pub fn from_specs(specs: impl IntoIterator<Item = RegisterSpec>) -> Result<Self> {
        let mut catalog = Self::new();
        for spec in specs {
            catalog.add(spec)?;
        }
        Ok(catalog)
    }

    /// Inclusive holding range, split into request-sized chunks named
    /// `Holding_{start}-{end}`
    pub fn from_holding_range(start: u16, end: u16) -> Result<Self> {
        Ok(Self {
            entries: holding_range_entries(start, end)?,
        })
    }

    pub fn add(&mut self, spec: RegisterSpec) -> Result<()> {
        spec.validate()?;
        self.entries.push(spec.into());
        Ok(())
    }

    pub fn extend(&mut self, specs: impl IntoIterator<Item = RegisterSpec>) -> Result<()> {
        for spec in specs {
            self.add(spec)?;
        }
        Ok(())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn holding_range_entries(start: u16, end: u16) -> Result<Vec<CatalogEntry>> {
    if start > end {
        return Err(PollSrvError::validation(format!(
            "start address {} is greater than end address {}",
            start, end
        )));
    }

    let mut entries = Vec::new();
    let mut chunk_start = u32::from(start);
    let last = u32::from(end);
    while chunk_start <= last {
        let chunk_end = (chunk_start + u32::from(MAX_READ_REGISTERS) - 1).min(last);
        entries.push(CatalogEntry {
            address: chunk_start as u16,
            count: (chunk_end - chunk_start + 1) as u16,
            kind: RegisterKind::Holding,
            name: format!("Holding_{}-{}", chunk_start, chunk_end),
        });
        chunk_start = chunk_end + 1;
    }
    Ok(entries)
}
