//! Service configuration
//!
//! Load order, later wins: built-in defaults, then the config file (format
//! chosen by extension), then `POLLSRV_` environment variables with `__` as
//! the nesting separator (`POLLSRV_DEVICE__HOST=10.0.0.5`).

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::catalog::{RegisterCatalog, RegisterSpec};
use crate::error::{PollSrvError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "POLLSRV_";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/pollsrv.yaml";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "pollsrv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ApiConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Use Redis as snapshot sink; in-memory otherwise
    pub enabled: bool,
    pub url: String,
    pub max_connections: u32,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379".to_string(),
            max_connections: 8,
            key_prefix: "pollsrv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub console: bool,
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            console: true,
            file: false,
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self, service_name: &str, ansi: bool) -> common::LogConfig {
        common::LogConfig {
            service_name: service_name.to_string(),
            level: self.level.clone(),
            dir: self.file.then(|| PathBuf::from(&self.dir)),
            enable_json: false,
            console: self.console,
            ansi,
        }
    }
}

/// Connection and polling parameters for one device
///
/// Immutable once the link is built; changing it means rebuilding the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    /// Modbus unit identifier
    pub device_id: u8,
    /// Seconds between cycles
    pub poll_interval: f64,
    /// Seconds per request attempt
    pub timeout: f64,
    /// Extra attempts after the first one
    pub retries: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.30.24".to_string(),
            port: 502,
            device_id: 1,
            poll_interval: 2.0,
            timeout: 3.0,
            retries: 3,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(PollSrvError::config("device.host must not be empty"));
        }
        if self.port == 0 {
            return Err(PollSrvError::config("device.port must not be 0"));
        }
        positive_seconds("device.poll_interval", self.poll_interval)?;
        positive_seconds("device.timeout", self.timeout)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::from_secs(1))
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn positive_seconds(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PollSrvError::config(format!(
            "{} must be a positive number of seconds, got {}",
            field, value
        )));
    }
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(PollSrvError::config(format!("{} is too large", field)));
    }
    Ok(())
}

/// Pacing of reconnect attempts while the device is unreachable
///
/// Defaults to a fixed delay of one poll interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Seconds after the first failed reconnect; the poll interval when unset
    pub initial_delay: Option<f64>,
    /// Upper bound in seconds; the initial delay when unset
    pub max_delay: Option<f64>,
    /// Growth per consecutive failure, 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Randomize each delay by ±25%
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: None,
            max_delay: None,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(delay) = self.initial_delay {
            positive_seconds("reconnect.initial_delay", delay)?;
        }
        if let Some(delay) = self.max_delay {
            positive_seconds("reconnect.max_delay", delay)?;
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PollSrvError::config(format!(
                "reconnect.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Inclusive holding register range polled every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterRange {
    pub start_address: u32,
    pub end_address: u32,
}

impl Default for RegisterRange {
    fn default() -> Self {
        Self {
            start_address: 1,
            end_address: 26,
        }
    }
}

impl RegisterRange {
    pub fn validate(&self) -> Result<()> {
        if self.end_address > u32::from(u16::MAX) {
            return Err(PollSrvError::config(format!(
                "registers.end_address {} exceeds 65535",
                self.end_address
            )));
        }
        if self.start_address > self.end_address {
            return Err(PollSrvError::config(format!(
                "registers.start_address {} is greater than end_address {}",
                self.start_address, self.end_address
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub device: DeviceConfig,
    pub reconnect: ReconnectConfig,
    pub registers: RegisterRange,
    /// Extra register groups appended after the range entries
    pub catalog: Vec<RegisterSpec>,
}

impl AppConfig {
    /// Load configuration
    ///
    /// With `Some(path)` the file must exist. With `None` the default path is
    /// used when present and skipped otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = Self::figment(path)?;
        let config: AppConfig = figment
            .extract()
            .map_err(|e| PollSrvError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        let file = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(PollSrvError::config(format!(
                        "Config file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            },
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                default.exists().then_some(default)
            },
        };

        match file {
            Some(file) => {
                info!("Loading configuration from {}", file.display());
                let extension = file
                    .extension()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| PollSrvError::config("Invalid file extension"))?;

                figment = match extension {
                    "json" => figment.merge(Json::file(&file)),
                    "toml" => figment.merge(Toml::file(&file)),
                    "yaml" | "yml" => figment.merge(Yaml::file(&file)),
                    _ => {
                        return Err(PollSrvError::config(format!(
                            "Unsupported config format: {}",
                            extension
                        )))
                    },
                };
            },
            None => debug!("No config file, using defaults and environment"),
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.reconnect.validate()?;
        self.registers.validate()?;
        for spec in &self.catalog {
            spec.validate()
                .map_err(|e| PollSrvError::config(format!("catalog entry: {}", e)))?;
        }
        if self.api.port == 0 {
            return Err(PollSrvError::config("api.port must not be 0"));
        }
        if self.redis.enabled && self.redis.max_connections == 0 {
            return Err(PollSrvError::config("redis.max_connections must be > 0"));
        }
        Ok(())
    }

    /// Range entries followed by explicit catalog entries
    pub fn build_catalog(&self) -> Result<RegisterCatalog> {
        build_catalog(&self.registers, &self.catalog)
    }
}

pub fn build_catalog(
    range: &RegisterRange,
    extra: &[RegisterSpec],
) -> Result<RegisterCatalog> {
    range.validate()?;
    let mut catalog =
        RegisterCatalog::from_holding_range(range.start_address as u16, range.end_address as u16)?;
    catalog.extend(extra.iter().cloned())?;
    Ok(catalog)
}
