//! Device Link and transport drivers

pub mod device;
pub mod driver;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod tcp;

pub use device::DeviceLink;
pub use driver::{DriverResult, ModbusDriver};
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockDriver, MockFailure, MockState};
pub use tcp::TcpDriver;
