//! Device contract shared by every backend
//!
//! - [`Device`] - operations a connected target may offer
//! - [`Capabilities`] - which of those operations a backend advertises
//! - [`DeviceManager`] - open/reuse/fault-close lifecycle per connection key
//! - [`DeviceDescriptor`] - a discoverable, connectable target

mod manager;


use std::io::{Read, Write};

use bitflags::bitflags;

use crate::deadline::Deadline;
use crate::driver::DriverKind;
use crate::error::{DeviceError, Result};
use crate::mapping::{AddressSpace, AddressTuple};

pub use manager::DeviceManager;

bitflags! {
    /// Optional device features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const READ_MEMORY = 1 << 0;
        const WRITE_MEMORY = 1 << 1;
        const RESET_SYSTEM = 1 << 2;
        const RESET_TO_MENU = 1 << 3;
        const PAUSE_UNPAUSE = 1 << 4;
        const PAUSE_TOGGLE = 1 << 5;
        const FETCH_FIELDS = 1 << 6;
        const READ_DIRECTORY = 1 << 7;
        const MAKE_DIRECTORY = 1 << 8;
        const REMOVE_FILE = 1 << 9;
        const RENAME_FILE = 1 << 10;
        const PUT_FILE = 1 << 11;
        const GET_FILE = 1 << 12;
        const BOOT_FILE = 1 << 13;
    }
}

impl Capabilities {
    /// Every filesystem-style operation
    pub const FILESYSTEM: Capabilities = Capabilities::READ_DIRECTORY
        .union(Capabilities::MAKE_DIRECTORY)
        .union(Capabilities::REMOVE_FILE)
        .union(Capabilities::RENAME_FILE)
        .union(Capabilities::PUT_FILE)
        .union(Capabilities::GET_FILE)
        .union(Capabilities::BOOT_FILE);

    /// Reject with [`DeviceError::Unsupported`] unless all of `required` are present
    pub fn require(self, required: Capabilities) -> Result<()> {
        let missing = required.difference(self);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DeviceError::Unsupported(missing))
        }
    }
}

/// A target found by backend discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub uri: String,
    pub display_name: String,
    pub kind: DriverKind,
    pub capabilities: Capabilities,
    pub default_address_space: AddressSpace,
}

/// One memory read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: AddressTuple,
    pub size: usize,
}

/// Result of one memory read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub request_address: AddressTuple,
    /// The same location in the device's native space
    pub device_address: AddressTuple,
    pub data: Vec<u8>,
}

/// One memory write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub address: AddressTuple,
    pub data: Vec<u8>,
}

/// Result of one memory write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub request_address: AddressTuple,
    pub device_address: AddressTuple,
    pub size: usize,
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    Directory,
    File,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: DirEntryKind,
}

/// Informational fields a device can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    DeviceName,
    DeviceVersion,
    DeviceStatus,
    CoreName,
    CoreVersion,
    CorePlatform,
    RomFileName,
}

/// A connected target
///
/// Optional operations default to [`DeviceError::Unsupported`]; backends
/// override what they advertise in [`Device::capabilities`]. Implementations
/// serialize their own I/O; the lifecycle manager never locks around calls.
pub trait Device: Send + Sync {
    /// Features this device offers
    fn capabilities(&self) -> Capabilities;

    /// Whether the connection has gone away
    fn is_closed(&self) -> bool;

    /// Close the connection; further calls fail with [`DeviceError::Closed`]
    fn close(&self) -> Result<()>;

    fn multi_read(&self, _reads: &[ReadRequest], _deadline: Deadline) -> Result<Vec<ReadResponse>> {
        Err(DeviceError::Unsupported(Capabilities::READ_MEMORY))
    }

    fn multi_write(&self, _writes: &[WriteRequest], _deadline: Deadline) -> Result<Vec<WriteResponse>> {
        Err(DeviceError::Unsupported(Capabilities::WRITE_MEMORY))
    }

    fn reset_system(&self, _deadline: Deadline) -> Result<()> {
        Err(DeviceError::Unsupported(Capabilities::RESET_SYSTEM))
    }

    fn reset_to_menu(&self, _deadline: Deadline) -> Result<()> {
        Err(DeviceError::Unsupported(Capabilities::RESET_TO_MENU))
    }

    /// Set the paused state, returning the new state
    fn pause_unpause(&self, _paused: bool, _deadline: Deadline) -> Result<bool> {
        Err(DeviceError::Unsupported(Capabilities::PAUSE_UNPAUSE))
    }

    fn pause_toggle(&self, _deadline: Deadline) -> Result<()> {
        Err(DeviceError::Unsupported(Capabilities::PAUSE_TOGGLE))
    }

    fn read_directory(&self, _path: &str, _deadline: Deadline) -> Result<Vec<DirEntry>> {
        Err(DeviceError::Unsupported(Capabilities::READ_DIRECTORY))
    }

    fn make_directory(&self, _path: &str, _deadline: Deadline) -> Result<()> {
        Err(DeviceError::Unsupported(Capabilities::MAKE_DIRECTORY))
    }

    fn remove_file(&self, _path: &str, _deadline: Deadline) -> Result<()> {
        Err(DeviceError::Unsupported(Capabilities::REMOVE_FILE))
    }

    fn rename_file(&self, _path: &str, _new_name: &str, _deadline: Deadline) -> Result<()> {
        Err(DeviceError::Unsupported(Capabilities::RENAME_FILE))
    }

    /// Upload `size` bytes from `reader` to `path`, returning bytes sent
    fn put_file(&self, _path: &str, _size: u32, _reader: &mut dyn Read, _deadline: Deadline) -> Result<u32> {
        Err(DeviceError::Unsupported(Capabilities::PUT_FILE))
    }

    /// Download `path` into `writer`, returning the file size
    fn get_file(&self, _path: &str, _writer: &mut dyn Write, _deadline: Deadline) -> Result<u32> {
        Err(DeviceError::Unsupported(Capabilities::GET_FILE))
    }

    fn boot_file(&self, _path: &str, _deadline: Deadline) -> Result<()> {
        Err(DeviceError::Unsupported(Capabilities::BOOT_FILE))
    }

    fn fetch_fields(&self, _fields: &[Field], _deadline: Deadline) -> Result<Vec<String>> {
        Err(DeviceError::Unsupported(Capabilities::FETCH_FIELDS))
    }
}
