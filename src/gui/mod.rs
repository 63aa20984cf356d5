//! Terminal interfaces: picking a serial device, and watching the head
//! tracker live.

mod device_selector;
mod error;
mod monitor;

pub use device_selector::{device_selector, resolve_serial_device};
pub use error::GuiError;
pub use monitor::{monitor_until_stop, MonitorSnapshot};
