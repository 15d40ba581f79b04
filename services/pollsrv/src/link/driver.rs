//! Transport driver seam
//!
//! A driver owns one session to one device and issues single requests. It
//! does no retrying, no timeouts and no validation; `DeviceLink` layers those
//! on top.

use async_trait::async_trait;

use crate::error::DriverError;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[async_trait]
pub trait ModbusDriver: Send {
    /// Open the session
    async fn connect(&mut self) -> DriverResult<()>;

    /// Close the session; a closed driver stays closed
    async fn disconnect(&mut self) -> DriverResult<()>;

    /// Whether a session is currently open
    fn is_connected(&self) -> bool;

    /// Drop the session without a close handshake
    ///
    /// Used after a request was abandoned mid-flight: its late response would
    /// otherwise be taken as the answer to the next request on the session.
    fn abort(&mut self);

    async fn read_holding_registers(&mut self, address: u16, count: u16)
        -> DriverResult<Vec<u16>>;

    async fn read_input_registers(&mut self, address: u16, count: u16) -> DriverResult<Vec<u16>>;

    async fn read_coils(&mut self, address: u16, count: u16) -> DriverResult<Vec<bool>>;

    async fn read_discrete_inputs(&mut self, address: u16, count: u16)
        -> DriverResult<Vec<bool>>;

    async fn write_single_register(&mut self, address: u16, value: u16) -> DriverResult<()>;

    async fn write_multiple_registers(&mut self, address: u16, values: &[u16])
        -> DriverResult<()>;
}
