//! FX Pak Pro backend
//!
//! Talks the USBA protocol to the cartridge over its USB serial port.
//!
//! # Architecture
//!
//! ```text
//!   FxPakProDevice          Device impl, one mutex around the link
//!     -> memory             VGET/VPUT chunking, work RAM diversion
//!        -> exe             generated 65816 copy routine (USB-EXE)
//!     -> link               one method per USBA operation
//!        -> packet          frame layout
//!        -> transport       serial port (or a simulated cartridge in tests)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use snesgate_core::fxpakpro::{FxPakProDriver, FxPakProSettings};
//!
//! let driver = FxPakProDriver::new(FxPakProSettings::default());
//! for descriptor in driver.discover()? {
//!     println!("{} {}", descriptor.uri, descriptor.display_name);
//! }
//! ```

mod device;
pub mod exe;
mod link;
pub mod memory;
pub mod packet;
pub mod transport;

#[cfg(test)]
mod fake;

use std::sync::Arc;
use std::time::Duration;

use serialport::SerialPortType;

use crate::config::FxPakProConfig;
use crate::device::{DeviceDescriptor, DeviceManager};
use crate::driver::{DeviceUri, DriverKind};
use crate::error::Result;
use crate::mapping::AddressSpace;

pub use device::{CAPABILITIES, FxPakProDevice};
pub use exe::{CopyRoutine, ExeSettings, WramWrite, generate_copy_asm};
pub use transport::{SerialTransport, Transport};

/// URI scheme for this backend
pub const SCHEME: &str = "fxpakpro";

/// USB vendor id of the FX Pak Pro
pub const USB_VID: u16 = 0x1209;

/// USB product id of the FX Pak Pro
pub const USB_PID: u16 = 0x5A22;

/// Runtime settings for FX Pak Pro connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FxPakProSettings {
    pub baud_rate: u32,
    pub exe: ExeSettings,
}

impl Default for FxPakProSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            exe: ExeSettings::default(),
        }
    }
}

impl From<&FxPakProConfig> for FxPakProSettings {
    fn from(config: &FxPakProConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            exe: ExeSettings {
                poll_interval: Duration::from_millis(config.exe_poll_interval_ms),
                timeout: Duration::from_millis(config.exe_timeout_ms),
            },
        }
    }
}

/// Discovery and connection management for FX Pak Pro cartridges
pub struct FxPakProDriver {
    settings: FxPakProSettings,
    manager: DeviceManager<FxPakProDevice>,
}

impl FxPakProDriver {
    pub fn new(settings: FxPakProSettings) -> Self {
        Self {
            settings,
            manager: DeviceManager::new(),
        }
    }

    pub fn manager(&self) -> &DeviceManager<FxPakProDevice> {
        &self.manager
    }

    /// Serial ports that identify as an FX Pak Pro
    pub fn discover(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports = serialport::available_ports()?;
        let descriptors: Vec<DeviceDescriptor> = ports
            .into_iter()
            .filter(|port| {
                matches!(&port.port_type, SerialPortType::UsbPort(usb) if usb.vid == USB_VID && usb.pid == USB_PID)
            })
            .map(|port| descriptor_for(&port.port_name))
            .collect();
        tracing::debug!(count = descriptors.len(), "fxpakpro discovery finished");
        Ok(descriptors)
    }

    /// Connection key for a `fxpakpro://./<port>` URI: the port name
    pub fn connection_key(&self, uri: &DeviceUri) -> Result<String> {
        Ok(port_from_path(uri.path()))
    }

    /// Open the port named by `key`
    pub fn open(&self, key: &str) -> Result<Arc<FxPakProDevice>> {
        FxPakProDevice::open(key, self.settings).map(Arc::new)
    }
}

fn descriptor_for(port: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        uri: format!("{SCHEME}://./{}", port.trim_start_matches('/')),
        display_name: format!("FX Pak Pro ({port})"),
        kind: DriverKind::FxPakPro,
        capabilities: CAPABILITIES,
        default_address_space: AddressSpace::FxPakPro,
    }
}

/// Serial port name from a URI path
///
/// `fxpakpro://./dev/ttyACM0` names `/dev/ttyACM0`; `fxpakpro://./COM3` names `COM3`.
fn port_from_path(path: &str) -> String {
    if cfg!(windows) {
        path.trim_start_matches('/').to_string()
    } else {
        format!("/{}", path.trim_start_matches('/'))
    }
}
