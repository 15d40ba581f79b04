//! Logging setup shared by services
//!
//! Console output is on by default. When a log directory is configured a
//! daily rolling file (`{dir}/{service}.log.YYYY-MM-DD`) is added through a
//! non-blocking writer. `RUST_LOG` overrides the configured level.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Keeps the background file writer alive for the process lifetime
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Service name, used as file prefix and default filter target
    pub service_name: String,
    /// Filter directive, e.g. "info" or "info,pollsrv=debug"
    pub level: String,
    /// Directory for rolling log files; no file output when unset
    pub dir: Option<PathBuf>,
    /// Emit JSON lines to the log file
    pub enable_json: bool,
    /// Write to stdout
    pub console: bool,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            level: "info".to_string(),
            dir: None,
            enable_json: false,
            console: true,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Effective filter directive (`RUST_LOG` wins over the configured level)
    pub fn filter_directive(&self) -> String {
        match std::env::var("RUST_LOG") {
            Ok(env) if !env.trim().is_empty() => env,
            _ => self.level.clone(),
        }
    }
}

/// Install the global subscriber
///
/// Fails if a subscriber was already installed or the log directory cannot
/// be created.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(config.filter_directive())
        .map_err(|e| anyhow::anyhow!("Invalid log filter '{}': {}", config.level, e))?;

    let console_layer = config
        .console
        .then(|| fmt::layer().with_ansi(config.ansi).with_target(true).boxed());

    let file_layer = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(())
}
