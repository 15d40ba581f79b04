//! Modbus TCP driver backed by tokio-modbus

use async_trait::async_trait;
use tokio_modbus::client::{tcp, Client as _, Context, Reader as _, Writer as _};
use tokio_modbus::slave::Slave;
use tracing::{debug, warn};

use super::driver::{DriverResult, ModbusDriver};
use crate::error::DriverError;

/// One TCP session to one unit
pub struct TcpDriver {
    host: String,
    port: u16,
    unit_id: u8,
    ctx: Option<Context>,
}

impl TcpDriver {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            ctx: None,
        }
    }

    fn context(&mut self) -> DriverResult<&mut Context> {
        self.ctx
            .as_mut()
            .ok_or_else(|| DriverError::Transport("session closed".to_string()))
    }

    /// Unwrap a tokio-modbus response; framing or I/O failures end the session
    fn settle<T>(
        &mut self,
        result: tokio_modbus::Result<T>,
        op: &str,
        address: u16,
    ) -> DriverResult<T> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(code)) => Err(DriverError::Exception(format!(
                "{} at {}: {:?}",
                op, address, code
            ))),
            Err(e) => {
                warn!("Modbus session to {}:{} dropped: {}", self.host, self.port, e);
                self.ctx = None;
                Err(DriverError::Transport(format!("{} at {}: {}", op, address, e)))
            },
        }
    }
}

#[async_trait]
impl ModbusDriver for TcpDriver {
    async fn connect(&mut self) -> DriverResult<()> {
        if self.ctx.is_some() {
            return Ok(());
        }

        let endpoint = format!("{}:{}", self.host, self.port);
        let addr = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| DriverError::Connect(format!("resolve {}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| DriverError::Connect(format!("no address for {}", endpoint)))?;

        debug!("Connecting to Modbus TCP server at {}", addr);
        let ctx = tcp::connect_slave(addr, Slave(self.unit_id))
            .await
            .map_err(|e| DriverError::Connect(format!("{}: {}", endpoint, e)))?;
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.disconnect()
                .await
                .map_err(|e| DriverError::Transport(format!("disconnect: {}", e)))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn abort(&mut self) {
        if self.ctx.take().is_some() {
            debug!("Aborted Modbus session to {}:{}", self.host, self.port);
        }
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> DriverResult<Vec<u16>> {
        let result = self
            .context()?
            .read_holding_registers(address, count)
            .await;
        self.settle(result, "read holding", address)
    }

    async fn read_input_registers(&mut self, address: u16, count: u16) -> DriverResult<Vec<u16>> {
        let result = self.context()?.read_input_registers(address, count).await;
        self.settle(result, "read input", address)
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> DriverResult<Vec<bool>> {
        let result = self.context()?.read_coils(address, count).await;
        self.settle(result, "read coils", address)
    }

    async fn read_discrete_inputs(&mut self, address: u16, count: u16) -> DriverResult<Vec<bool>> {
        let result = self.context()?.read_discrete_inputs(address, count).await;
        self.settle(result, "read discrete inputs", address)
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> DriverResult<()> {
        let result = self.context()?.write_single_register(address, value).await;
        self.settle(result, "write register", address)
    }

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> DriverResult<()> {
        let result = self
            .context()?
            .write_multiple_registers(address, values)
            .await;
        self.settle(result, "write registers", address)
    }
}
