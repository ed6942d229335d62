//! snesgate core - SNES device gateway
//!
//! This crate lets client tools read and write the memory of a Super
//! Nintendo, real or emulated, through one uniform device API.
//!
//! # Architecture
//!
//! - [`mapping`] - address spaces, cartridge mappings, ROM header detection
//! - [`Device`] - operations a backend may offer, tagged by [`Capabilities`]
//! - [`DeviceManager`] - open/reuse/fault-close/reopen lifecycle per connection key
//! - [`fxpakpro`] - the FX Pak Pro USB flash cart (USBA protocol, USB-EXE work RAM writes)
//! - [`asm`] - minimal 65816 emitter used to build injected copy routines
//! - [`mock`] - in-memory SNES for testing clients without hardware
//! - [`Gateway`] - the driver table and [`DeviceHandle`] entry point
//!
//! Every failure is a [`DeviceError`] that knows whether it is fatal; fatal
//! errors tear the connection down and the next call reopens it.

pub mod asm;
pub mod config;
pub mod deadline;
pub mod device;
pub mod driver;
pub mod error;
pub mod fxpakpro;
pub mod mapping;
pub mod mock;

// Re-export the device API
pub use deadline::{DEFAULT_TIMEOUT, Deadline};
pub use device::{
    Capabilities, Device, DeviceDescriptor, DeviceManager, DirEntry, DirEntryKind, Field, ReadRequest,
    ReadResponse, WriteRequest, WriteResponse,
};
pub use driver::{DeviceHandle, DeviceUri, Driver, DriverKind, Gateway};
pub use error::{DeviceError, Result};

// Re-export the address model
pub use mapping::{
    AddressSpace, AddressTuple, Detection, MappingError, MemoryMapping, MemoryRegion, ScoreWeights,
    detect_mapping, memory_region_for, translate_address,
};

pub use config::Config;
