//! Modbus Polling Service (`pollsrv`)
//!
//! Reads a register catalog from a Modbus TCP device on a fixed interval and
//! serves the results over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use common::service_bootstrap::ServiceInfo;
use pollsrv::api::{create_routes, AppState};
use pollsrv::core::config::{AppConfig, RedisConfig};
use pollsrv::storage::{MemorySink, RedisSink, SnapshotSink};
use pollsrv::MonitorService;

/// Command-line arguments for pollsrv
#[derive(Parser, Clone)]
#[command(
    name = "pollsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus Polling Service",
    long_about = None
)]
struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long, env = "POLLSRV_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Bind address for API server
    #[arg(short = 'b', long)]
    bind_address: Option<String>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::load_development_env();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;

    if args.validate {
        println!(
            "Configuration valid: device {}, {} register groups",
            config.device.endpoint(),
            config.build_catalog()?.len()
        );
        return Ok(());
    }

    let mut log_config = config
        .logging
        .to_log_config(&config.service.name, !args.no_color);
    if let Some(level) = &args.log_level {
        log_config.level = level.clone();
    }
    common::init_logging(&log_config)?;

    let service_info = ServiceInfo::new(
        config.service.name.clone(),
        env!("CARGO_PKG_VERSION"),
        "Modbus Polling Service",
        config.api.port,
    );
    // Goes through the subscriber, so --no-color already applies
    common::print_startup_banner(&service_info);

    let sink = create_sink(&config.redis).await;
    let service = Arc::new(MonitorService::new(&config, sink)?);
    info!(
        "Device {} (unit {}), poll interval {:?}",
        config.device.endpoint(),
        config.device.device_id,
        config.device.poll_interval()
    );

    let state = Arc::new(AppState::new(service.clone(), config.service.name.clone()));
    let app = create_routes(state);

    let bind_address = args
        .bind_address
        .unwrap_or_else(|| config.api.bind_address());
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("API server listening on {}", bind_address);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(common::wait_for_shutdown())
        .await
    {
        error!("Server error: {}", e);
    }

    service.shutdown().await;
    info!("Service shutdown complete");
    Ok(())
}

/// Redis when enabled and reachable, in-memory otherwise
async fn create_sink(config: &RedisConfig) -> Arc<dyn SnapshotSink> {
    if !config.enabled {
        info!("Redis disabled, using in-memory snapshot store");
        return Arc::new(MemorySink::new());
    }

    match RedisSink::connect(config).await {
        Ok(sink) => {
            info!("Connected to Redis at {}", config.url);
            Arc::new(sink)
        },
        Err(e) => {
            warn!(
                "Redis connection failed ({:#}), falling back to in-memory snapshot store",
                e
            );
            Arc::new(MemorySink::new())
        },
    }
}
