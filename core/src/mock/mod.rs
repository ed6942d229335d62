//! In-memory mock backend
//!
//! A `mock://./<name>` device is a SNES that exists only in memory: every
//! [`MemoryRegion`] of FX Pak Pro space is backed by a buffer, allocated on
//! first write. Cartridge ROM can be seeded from an image on disk. Useful for
//! exercising clients without hardware.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;

use crate::deadline::Deadline;
use crate::device::{
    Capabilities, Device, DeviceDescriptor, DeviceManager, Field, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
use crate::driver::{DeviceUri, DriverKind};
use crate::error::{DeviceError, Result};
use crate::mapping::{AddressSpace, AddressTuple, MemoryRegion, memory_region_for, translate_address};

/// URI scheme for this backend
pub const SCHEME: &str = "mock";

/// Name of the device advertised by discovery
pub const DEFAULT_NAME: &str = "snes";

/// Operations the mock backend offers
pub const CAPABILITIES: Capabilities = Capabilities::READ_MEMORY
    .union(Capabilities::WRITE_MEMORY)
    .union(Capabilities::RESET_SYSTEM)
    .union(Capabilities::PAUSE_UNPAUSE)
    .union(Capabilities::PAUSE_TOGGLE)
    .union(Capabilities::FETCH_FIELDS);

#[derive(Default)]
struct MockState {
    regions: HashMap<MemoryRegion, Vec<u8>>,
    paused: bool,
    resets: u32,
    rom_name: String,
}

impl MockState {
    fn region_mut(&mut self, region: MemoryRegion) -> &mut Vec<u8> {
        self.regions
            .entry(region)
            .or_insert_with(|| vec![0u8; region.size() as usize])
    }
}

/// An in-memory SNES
pub struct MockDevice {
    name: String,
    state: Mutex<MockState>,
    closed: AtomicBool,
}

impl MockDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(MockState::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// A device whose cartridge ROM starts with `rom`
    pub fn with_rom(name: &str, rom_name: &str, rom: &[u8]) -> Self {
        let device = Self::new(name);
        {
            let mut state = device.lock();
            let len = rom.len().min(MemoryRegion::CartRom.size() as usize);
            state.region_mut(MemoryRegion::CartRom)[..len].copy_from_slice(&rom[..len]);
            state.rom_name = rom_name.to_string();
        }
        device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Number of system resets so far
    pub fn resets(&self) -> u32 {
        self.lock().resets
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| {
            tracing::warn!(name = %self.name, "mock state lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() { Err(DeviceError::Closed) } else { Ok(()) }
    }
}

/// Resolve a request to its region and byte range within it
fn locate(address: AddressTuple, size: usize) -> Result<(u32, MemoryRegion, usize)> {
    let device = translate_address(address, AddressSpace::FxPakPro)?;
    let located = memory_region_for(device)
        .ok_or_else(|| DeviceError::InvalidArgument(format!("no memory at {address}")))?;
    if size > located.remaining() as usize {
        return Err(DeviceError::InvalidArgument(format!(
            "{address} + {size} bytes runs past the end of {}",
            located.region
        )));
    }
    Ok((device, located.region, located.offset as usize))
}

impl Device for MockDevice {
    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn multi_read(&self, reads: &[ReadRequest], _deadline: Deadline) -> Result<Vec<ReadResponse>> {
        self.check_open()?;
        let mut located = Vec::with_capacity(reads.len());
        for read in reads {
            located.push(locate(read.address, read.size)?);
        }

        let state = self.lock();
        Ok(reads
            .iter()
            .zip(located)
            .map(|(read, (device, region, offset))| {
                let data = match state.regions.get(&region) {
                    Some(memory) => memory[offset..offset + read.size].to_vec(),
                    None => vec![0u8; read.size],
                };
                ReadResponse {
                    request_address: read.address,
                    device_address: AddressTuple::new(device, AddressSpace::FxPakPro, read.address.mapping),
                    data,
                }
            })
            .collect())
    }

    fn multi_write(&self, writes: &[WriteRequest], _deadline: Deadline) -> Result<Vec<WriteResponse>> {
        self.check_open()?;
        let mut located = Vec::with_capacity(writes.len());
        for write in writes {
            located.push(locate(write.address, write.data.len())?);
        }

        let mut state = self.lock();
        let mut responses = Vec::with_capacity(writes.len());
        for (write, (device, region, offset)) in writes.iter().zip(located) {
            if !write.data.is_empty() {
                state.region_mut(region)[offset..offset + write.data.len()].copy_from_slice(&write.data);
            }
            responses.push(WriteResponse {
                request_address: write.address,
                device_address: AddressTuple::new(device, AddressSpace::FxPakPro, write.address.mapping),
                size: write.data.len(),
            });
        }
        Ok(responses)
    }

    fn reset_system(&self, _deadline: Deadline) -> Result<()> {
        self.check_open()?;
        let mut state = self.lock();
        state.resets += 1;
        state.paused = false;
        state.regions.remove(&MemoryRegion::Wram);
        tracing::debug!(name = %self.name, resets = state.resets, "mock reset");
        Ok(())
    }

    fn pause_unpause(&self, paused: bool, _deadline: Deadline) -> Result<bool> {
        self.check_open()?;
        self.lock().paused = paused;
        Ok(paused)
    }

    fn pause_toggle(&self, _deadline: Deadline) -> Result<()> {
        self.check_open()?;
        let mut state = self.lock();
        state.paused = !state.paused;
        Ok(())
    }

    fn fetch_fields(&self, fields: &[Field], _deadline: Deadline) -> Result<Vec<String>> {
        self.check_open()?;
        let state = self.lock();
        Ok(fields
            .iter()
            .map(|field| match field {
                Field::DeviceName => format!("Mock SNES ({})", self.name),
                Field::DeviceVersion | Field::CoreVersion => env!("CARGO_PKG_VERSION").to_string(),
                Field::DeviceStatus => {
                    let status = if state.paused { "paused" } else { "running" };
                    status.to_string()
                }
                Field::CoreName => SCHEME.to_string(),
                Field::CorePlatform => "snes".to_string(),
                Field::RomFileName => state.rom_name.clone(),
            })
            .collect())
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Discovery and connection management for mock devices
pub struct MockDriver {
    rom_path: Option<PathBuf>,
    manager: DeviceManager<MockDevice>,
}

impl MockDriver {
    pub fn new(rom_path: Option<PathBuf>) -> Self {
        Self {
            rom_path,
            manager: DeviceManager::new(),
        }
    }

    pub fn manager(&self) -> &DeviceManager<MockDevice> {
        &self.manager
    }

    pub fn discover(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(vec![DeviceDescriptor {
            uri: format!("{SCHEME}://./{DEFAULT_NAME}"),
            display_name: format!("Mock SNES ({DEFAULT_NAME})"),
            kind: DriverKind::Mock,
            capabilities: CAPABILITIES,
            default_address_space: AddressSpace::FxPakPro,
        }])
    }

    /// Connection key for a `mock://./<name>` URI: the name
    pub fn connection_key(&self, uri: &DeviceUri) -> Result<String> {
        let name = uri.path().trim_matches('/');
        if name.is_empty() {
            return Err(DeviceError::InvalidArgument(format!("{uri}: missing device name")));
        }
        Ok(name.to_string())
    }

    pub fn open(&self, key: &str) -> Result<Arc<MockDevice>> {
        let device = match &self.rom_path {
            Some(path) => {
                let rom = std::fs::read(path)?;
                MockDevice::with_rom(key, &rom_file_name(path), &rom)
            }
            None => MockDevice::new(key),
        };
        tracing::info!(name = key, "opened mock device");
        Ok(Arc::new(device))
    }
}

fn rom_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
