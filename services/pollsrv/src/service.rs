//! Control surface
//!
//! `MonitorService` is what the HTTP layer talks to. It owns the current
//! engine (link + catalog + governor) and the snapshot sink. Calls on an
//! unconnected or faulted engine fail immediately; nothing here reconnects
//! silently. Reconfiguration tears the engine down and builds a new one.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::info;

use crate::core::catalog::{RegisterCatalog, RegisterKind, RegisterSpec};
use crate::core::config::{build_catalog, AppConfig, DeviceConfig, ReconnectConfig, RegisterRange};
use crate::core::types::{Batch, EngineState, ReadingResult};
use crate::engine::{Governor, GovernorStatus, ReconnectPolicy};
use crate::error::{PollSrvError, Result};
use crate::link::DeviceLink;
use crate::storage::{SnapshotSink, HISTORY_RETENTION};

/// Default number of history entries returned
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Builds a Device Link for a device configuration
pub type LinkFactory = Arc<dyn Fn(&DeviceConfig) -> DeviceLink + Send + Sync>;

/// Device parameters plus the polled range, as exposed over the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(flatten)]
    pub device: DeviceConfig,
    #[serde(flatten)]
    pub registers: RegisterRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub connected: bool,
    pub monitoring: bool,
    /// Link requests issued and not yet answered
    pub pending_requests: usize,
    #[serde(flatten)]
    pub governor: GovernorStatus,
    pub sink: &'static str,
}

struct Engine {
    device: DeviceConfig,
    registers: RegisterRange,
    governor: Governor,
}

impl Engine {
    fn link(&self) -> &Arc<DeviceLink> {
        self.governor.link()
    }
}

pub struct MonitorService {
    engine: RwLock<Arc<Engine>>,
    extra_catalog: Vec<RegisterSpec>,
    reconnect: ReconnectConfig,
    sink: Arc<dyn SnapshotSink>,
    link_factory: LinkFactory,
}

impl MonitorService {
    /// Service over Modbus TCP
    pub fn new(config: &AppConfig, sink: Arc<dyn SnapshotSink>) -> Result<Self> {
        let factory: LinkFactory =
            Arc::new(|device: &DeviceConfig| DeviceLink::tcp(device.clone()));
        Self::with_link_factory(config, sink, factory)
    }

    pub fn with_link_factory(
        config: &AppConfig,
        sink: Arc<dyn SnapshotSink>,
        link_factory: LinkFactory,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = config.build_catalog()?;
        let engine = build_engine(
            &link_factory,
            config.device.clone(),
            config.registers,
            catalog,
            &config.reconnect,
            sink.clone(),
        );

        Ok(Self {
            engine: RwLock::new(Arc::new(engine)),
            extra_catalog: config.catalog.clone(),
            reconnect: config.reconnect.clone(),
            sink,
            link_factory,
        })
    }

    /// Snapshot for observation only; it may be replaced right after
    async fn engine(&self) -> Arc<Engine> {
        self.engine.read().await.clone()
    }

    /// Current engine, held for the whole operation so `reconfigure` cannot
    /// swap it underneath
    async fn current(&self) -> RwLockReadGuard<'_, Arc<Engine>> {
        self.engine.read().await
    }

    /// Link of the current engine
    pub async fn link(&self) -> Arc<DeviceLink> {
        self.engine().await.link().clone()
    }

    pub async fn governor_state(&self) -> EngineState {
        self.engine().await.governor.state()
    }

    /// Wait for the current monitoring loop to end
    pub async fn join_monitoring(&self) -> Result<EngineState> {
        self.engine().await.governor.join().await
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connect the link; also resets a tripped circuit breaker
    pub async fn connect(&self) -> Result<()> {
        let engine = self.current().await;
        engine.governor.clear_fault().await;
        engine.link().connect().await
    }

    /// Stop monitoring, then release the link
    pub async fn disconnect(&self) {
        let engine = self.current().await;
        engine.governor.stop().await;
        engine.link().disconnect().await;
    }

    pub async fn get_status(&self) -> ServiceStatus {
        let engine = self.engine().await;
        let governor = engine.governor.status();
        ServiceStatus {
            connected: engine.link().is_connected(),
            pending_requests: engine.link().pending_requests(),
            monitoring: engine.governor.is_running().await,
            governor,
            sink: self.sink.name(),
        }
    }

    // ========================================================================
    // Register access
    // ========================================================================

    fn ensure_usable(engine: &Engine) -> Result<()> {
        if engine.governor.state() == EngineState::Faulted {
            return Err(PollSrvError::CircuitOpen);
        }
        if !engine.link().is_connected() {
            return Err(PollSrvError::NotConnected);
        }
        Ok(())
    }

    pub async fn read_registers(
        &self,
        address: u16,
        count: u16,
        kind: RegisterKind,
    ) -> Result<ReadingResult> {
        let engine = self.current().await;
        Self::ensure_usable(&engine)?;
        let values = engine.link().read_block(address, count, kind).await?;
        Ok(ReadingResult {
            address,
            kind,
            count,
            values,
            timestamp: chrono::Utc::now(),
            name: RegisterSpec::new(address, count, kind).display_name(),
        })
    }

    pub async fn write_register(&self, address: u16, value: i64) -> Result<()> {
        let engine = self.current().await;
        Self::ensure_usable(&engine)?;
        engine.link().write_single(address, value).await?;
        info!("Successfully wrote value {} to address {}", value, address);
        Ok(())
    }

    pub async fn write_registers(&self, address: u16, values: &[i64]) -> Result<()> {
        let engine = self.current().await;
        Self::ensure_usable(&engine)?;
        engine.link().write_block(address, values).await?;
        info!(
            "Successfully wrote {} registers starting at address {}",
            values.len(),
            address
        );
        Ok(())
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    pub async fn start_monitoring(&self) -> Result<()> {
        let engine = self.current().await;
        if !engine.link().is_connected() {
            return Err(PollSrvError::NotConnected);
        }
        engine.governor.start().await
    }

    pub async fn stop_monitoring(&self) {
        self.current().await.governor.stop().await;
    }

    // ========================================================================
    // Data
    // ========================================================================

    pub async fn get_latest_data(&self) -> Result<Option<Batch>> {
        Ok(self.sink.get_latest().await?)
    }

    /// Newest first; `limit` defaults to 100 and is capped at the retention
    pub async fn get_history(&self, limit: Option<usize>) -> Result<Vec<Batch>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(HISTORY_RETENTION);
        Ok(self.sink.get_history(limit).await?)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub async fn get_config(&self) -> DeviceSettings {
        let engine = self.engine().await;
        DeviceSettings {
            device: engine.device.clone(),
            registers: engine.registers,
        }
    }

    /// Replace device and range: stop, disconnect, rebuild
    ///
    /// The new settings are validated before the running engine is touched.
    pub async fn reconfigure(&self, settings: DeviceSettings) -> Result<()> {
        settings.device.validate()?;
        let catalog = build_catalog(&settings.registers, &self.extra_catalog)
            .map_err(|e| PollSrvError::config(e.to_string()))?;

        let mut slot = self.engine.write().await;
        slot.governor.stop().await;
        slot.link().disconnect().await;

        let engine = build_engine(
            &self.link_factory,
            settings.device,
            settings.registers,
            catalog,
            &self.reconnect,
            self.sink.clone(),
        );
        info!(
            "Configuration updated: {} ({} register groups)",
            engine.device.endpoint(),
            engine.governor.catalog().len()
        );
        *slot = Arc::new(engine);
        Ok(())
    }

    /// Stop monitoring and disconnect; errors are logged by the link
    pub async fn shutdown(&self) {
        info!("Shutting down monitor service");
        self.disconnect().await;
    }
}

fn build_engine(
    link_factory: &LinkFactory,
    device: DeviceConfig,
    registers: RegisterRange,
    catalog: RegisterCatalog,
    reconnect: &ReconnectConfig,
    sink: Arc<dyn SnapshotSink>,
) -> Engine {
    let link = Arc::new(link_factory(&device));
    let policy = ReconnectPolicy::from_config(reconnect, device.poll_interval());
    let governor = Governor::with_reconnect_policy(link, Arc::new(catalog), sink, policy);
    Engine {
        device,
        registers,
        governor,
    }
}
