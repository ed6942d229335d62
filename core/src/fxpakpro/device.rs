//! [`Device`] implementation over one FX Pak Pro link

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::deadline::Deadline;
use crate::device::{
    Capabilities, Device, DirEntry, Field, ReadRequest, ReadResponse, WriteRequest, WriteResponse,
};
use crate::error::{DeviceError, Result};
use crate::mapping::{AddressSpace, AddressTuple, CMD_SPACE_BIT, is_command_address, translate_address};

use super::FxPakProSettings;
use super::link::Link;
use super::memory;
use super::packet::Info;
use super::transport::{SerialTransport, Transport};

/// Operations the FX Pak Pro backend offers
pub const CAPABILITIES: Capabilities = Capabilities::READ_MEMORY
    .union(Capabilities::WRITE_MEMORY)
    .union(Capabilities::RESET_SYSTEM)
    .union(Capabilities::RESET_TO_MENU)
    .union(Capabilities::FETCH_FIELDS)
    .union(Capabilities::FILESYSTEM);

/// Size of the SNES-facing device space
const SNES_SPACE_SIZE: usize = 0x100_0000;

/// Size of the command space
const CMD_SPACE_SIZE: usize = 0x1_0000;

/// Firmware's menu ROM; running it means no game is loaded
const MENU_ROM_NAME: &str = "m3nu.bin";

/// An open FX Pak Pro
///
/// The link mutex is held for the whole of each operation, including every
/// round of a work RAM write, so concurrent callers never interleave frames.
pub struct FxPakProDevice {
    port: String,
    link: Mutex<Link>,
    closed: AtomicBool,
    settings: FxPakProSettings,
}

impl FxPakProDevice {
    /// Open the serial port at `port`
    pub fn open(port: &str, settings: FxPakProSettings) -> Result<Self> {
        let transport = SerialTransport::open(port, settings.baud_rate)?;
        Ok(Self::with_transport(port, Box::new(transport), settings))
    }

    /// Build a device over an already-connected transport
    pub fn with_transport(port: &str, transport: Box<dyn Transport>, settings: FxPakProSettings) -> Self {
        Self {
            port: port.to_string(),
            link: Mutex::new(Link::new(transport)),
            closed: AtomicBool::new(false),
            settings,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Firmware details
    pub fn info(&self, deadline: Deadline) -> Result<Info> {
        self.with_link(|link| link.info(deadline))
    }

    fn with_link<T>(&self, op: impl FnOnce(&mut Link) -> Result<T>) -> Result<T> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }
        let mut link = self.link.lock().unwrap_or_else(|e| {
            tracing::warn!(port = %self.port, "link lock poisoned, recovering");
            e.into_inner()
        });
        op(&mut link)
    }
}

/// Translate to device space and check the range stays inside its space
fn resolve(address: AddressTuple, size: usize) -> Result<u32> {
    let device = translate_address(address, AddressSpace::FxPakPro)?;
    let (start, limit) = if is_command_address(device) {
        ((device & !CMD_SPACE_BIT) as usize, CMD_SPACE_SIZE)
    } else {
        (device as usize, SNES_SPACE_SIZE)
    };
    if start + size > limit {
        return Err(DeviceError::InvalidArgument(format!(
            "{address} + {size} bytes runs past the end of device space"
        )));
    }
    Ok(device)
}

fn device_tuple(request: AddressTuple, device: u32) -> AddressTuple {
    AddressTuple::new(device, AddressSpace::FxPakPro, request.mapping)
}

impl Device for FxPakProDevice {
    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        link.close()
    }

    fn multi_read(&self, reads: &[ReadRequest], deadline: Deadline) -> Result<Vec<ReadResponse>> {
        let mut ranges = Vec::with_capacity(reads.len());
        for read in reads {
            ranges.push((resolve(read.address, read.size)?, read.size));
        }

        let data = self.with_link(|link| memory::read(link, &ranges, deadline))?;

        Ok(reads
            .iter()
            .zip(ranges)
            .zip(data)
            .map(|((request, (device, _)), data)| ReadResponse {
                request_address: request.address,
                device_address: device_tuple(request.address, device),
                data,
            })
            .collect())
    }

    fn multi_write(&self, writes: &[WriteRequest], deadline: Deadline) -> Result<Vec<WriteResponse>> {
        let mut ranges = Vec::with_capacity(writes.len());
        for write in writes {
            ranges.push((resolve(write.address, write.data.len())?, write.data.as_slice()));
        }

        let exe = self.settings.exe;
        self.with_link(|link| memory::write(link, &ranges, &exe, deadline))?;

        Ok(writes
            .iter()
            .zip(ranges)
            .map(|(request, (device, data))| WriteResponse {
                request_address: request.address,
                device_address: device_tuple(request.address, device),
                size: data.len(),
            })
            .collect())
    }

    fn reset_system(&self, deadline: Deadline) -> Result<()> {
        self.with_link(|link| link.reset(deadline))
    }

    fn reset_to_menu(&self, deadline: Deadline) -> Result<()> {
        self.with_link(|link| link.menu_reset(deadline))
    }

    fn read_directory(&self, path: &str, deadline: Deadline) -> Result<Vec<DirEntry>> {
        self.with_link(|link| link.list(path, deadline))
    }

    fn make_directory(&self, path: &str, deadline: Deadline) -> Result<()> {
        self.with_link(|link| link.mkdir(path, deadline))
    }

    fn remove_file(&self, path: &str, deadline: Deadline) -> Result<()> {
        self.with_link(|link| link.remove(path, deadline))
    }

    fn rename_file(&self, path: &str, new_name: &str, deadline: Deadline) -> Result<()> {
        self.with_link(|link| link.rename(path, new_name, deadline))
    }

    fn put_file(&self, path: &str, size: u32, reader: &mut dyn Read, deadline: Deadline) -> Result<u32> {
        self.with_link(|link| link.put_file(path, size, reader, deadline))
    }

    fn get_file(&self, path: &str, writer: &mut dyn Write, deadline: Deadline) -> Result<u32> {
        self.with_link(|link| link.get_file(path, writer, deadline))
    }

    fn boot_file(&self, path: &str, deadline: Deadline) -> Result<()> {
        self.with_link(|link| link.boot(path, deadline))
    }

    fn fetch_fields(&self, fields: &[Field], deadline: Deadline) -> Result<Vec<String>> {
        let info = self.info(deadline)?;
        Ok(fields
            .iter()
            .map(|field| match field {
                Field::DeviceName => "FX Pak Pro".to_string(),
                Field::DeviceVersion => info.version.clone(),
                Field::DeviceStatus => {
                    if info.rom_name.contains(MENU_ROM_NAME) {
                        "menu".to_string()
                    } else {
                        "running".to_string()
                    }
                }
                Field::CoreName => "fxpakpro".to_string(),
                Field::CoreVersion => format!("{:08x}", info.firmware_version),
                Field::CorePlatform => "snes".to_string(),
                Field::RomFileName => info.rom_name.clone(),
            })
            .collect())
    }
}
