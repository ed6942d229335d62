//! SNES address model and ROM mapping translation
//!
//! Every memory request carries an [`AddressTuple`]: an address, the space it
//! is expressed in, and the cartridge mapping needed to interpret it. Backends
//! call [`translate_address`] to turn a tuple into an address in their own
//! native space before any wire operation.
//!
//! # Address spaces
//!
//! - [`AddressSpace::FxPakPro`] - the FX Pak Pro's flat 24-bit layout, where
//!   ROM, SRAM, WRAM, VRAM etc. sit at fixed offsets (see [`MemoryRegion`])
//! - [`AddressSpace::SnesBus`] - the 65816 CPU's view (`$BB:AAAA`), which
//!   depends on the cartridge mapping
//! - [`AddressSpace::Raw`] - passed through untouched to the device
//!
//! ```text
//!   FxPakPro                     SnesBus (LoROM)
//!   $000000-$DFFFFF  ROM   <->   $80-$FF:$8000-$FFFF
//!   $E00000-$EFFFFF  SRAM  <->   $70-$7D:$0000-$7FFF
//!   $F50000-$F6FFFF  WRAM  <->   $7E-$7F:$0000-$FFFF
//! ```
//!
//! Addresses with [`CMD_SPACE_BIT`] set belong to the command subspace and
//! bypass mapping translation entirely.

pub mod detect;
mod exhirom;
mod exlorom;
pub mod header;
mod hirom;
mod lorom;
pub mod region;
mod sa1;


use serde::{Deserialize, Serialize};
use std::fmt;

pub use detect::{Detection, detect_mapping};
pub use header::{HEADER_SIZE, HIROM_HEADER_OFFSET, LOROM_HEADER_OFFSET, RomHeader, ScoreWeights};
pub use region::{MemoryRegion, RegionAddress, memory_region_for};

/// Reserved address bit selecting the command/auxiliary subspace
pub const CMD_SPACE_BIT: u32 = 0x0100_0000;

/// First FX Pak Pro address of work RAM
pub const PAK_WRAM_BASE: u32 = 0xF5_0000;

/// One past the last FX Pak Pro address of work RAM
pub const PAK_WRAM_END: u32 = 0xF7_0000;

/// First FX Pak Pro address of cartridge SRAM
pub const PAK_SRAM_BASE: u32 = 0xE0_0000;

/// How an address should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AddressSpace {
    /// FX Pak Pro flat device space
    #[default]
    FxPakPro,
    /// SNES A-bus as seen by the CPU
    SnesBus,
    /// Device-native address, never translated
    Raw,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FxPakPro => write!(f, "FxPakPro"),
            Self::SnesBus => write!(f, "SnesBus"),
            Self::Raw => write!(f, "Raw"),
        }
    }
}

/// Cartridge memory-mapping convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryMapping {
    #[default]
    Unknown,
    LoRom,
    HiRom,
    ExLoRom,
    ExHiRom,
    Sa1,
}

impl MemoryMapping {
    /// Convert a SNES bus address to FX Pak Pro space
    pub fn bus_to_pak(self, bus: u32) -> Option<u32> {
        match self {
            Self::Unknown => None,
            Self::LoRom => lorom::bus_to_pak(bus),
            Self::HiRom => hirom::bus_to_pak(bus),
            Self::ExLoRom => exlorom::bus_to_pak(bus),
            Self::ExHiRom => exhirom::bus_to_pak(bus),
            Self::Sa1 => sa1::bus_to_pak(bus),
        }
    }

    /// Convert an FX Pak Pro address to a SNES bus address
    pub fn pak_to_bus(self, pak: u32) -> Option<u32> {
        match self {
            Self::Unknown => None,
            Self::LoRom => lorom::pak_to_bus(pak),
            Self::HiRom => hirom::pak_to_bus(pak),
            Self::ExLoRom => exlorom::pak_to_bus(pak),
            Self::ExHiRom => exhirom::pak_to_bus(pak),
            Self::Sa1 => sa1::pak_to_bus(pak),
        }
    }
}

impl fmt::Display for MemoryMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::LoRom => "LoROM",
            Self::HiRom => "HiROM",
            Self::ExLoRom => "ExLoROM",
            Self::ExHiRom => "ExHiROM",
            Self::Sa1 => "SA-1",
        };
        f.write_str(name)
    }
}

/// A memory location qualified by how to interpret it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AddressTuple {
    pub address: u32,
    pub space: AddressSpace,
    pub mapping: MemoryMapping,
}

impl AddressTuple {
    pub const fn new(address: u32, space: AddressSpace, mapping: MemoryMapping) -> Self {
        Self {
            address,
            space,
            mapping,
        }
    }

    /// Address in FX Pak Pro space (mapping not needed for translation to the pak itself)
    pub const fn pak(address: u32) -> Self {
        Self::new(address, AddressSpace::FxPakPro, MemoryMapping::Unknown)
    }

    /// Address on the SNES bus under the given mapping
    pub const fn bus(address: u32, mapping: MemoryMapping) -> Self {
        Self::new(address, AddressSpace::SnesBus, mapping)
    }

    /// Device-native address passed through untouched
    pub const fn raw(address: u32) -> Self {
        Self::new(address, AddressSpace::Raw, MemoryMapping::Unknown)
    }

    /// Same space and mapping, address moved forward by `offset`
    pub const fn offset_by(self, offset: u32) -> Self {
        Self {
            address: self.address.wrapping_add(offset),
            ..self
        }
    }
}

impl fmt::Display for AddressTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(${:06x} {} {})", self.address, self.space, self.mapping)
    }
}

/// Address translation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The conversion needs a mapping but none was given
    #[error("cannot translate {0} to {1}: memory mapping is unknown")]
    UnknownMapping(AddressTuple, AddressSpace),

    /// The address has no counterpart in the target space
    #[error("address {0} has no equivalent in {1} space")]
    Unmapped(AddressTuple, AddressSpace),
}

/// Check whether an address falls in the command subspace
pub const fn is_command_address(address: u32) -> bool {
    address & CMD_SPACE_BIT != 0
}

/// Check whether an FX Pak Pro address falls in work RAM
pub const fn is_pak_wram(address: u32) -> bool {
    address >= PAK_WRAM_BASE && address < PAK_WRAM_END
}

/// Translate an address tuple into `target` space
///
/// Raw addresses and addresses already in the target space pass through.
/// Command-subspace addresses in FX Pak Pro space bypass mapping. Any other
/// conversion needs the tuple's mapping and fails if it is
/// [`MemoryMapping::Unknown`].
pub fn translate_address(tuple: AddressTuple, target: AddressSpace) -> Result<u32, MappingError> {
    if tuple.space == target || tuple.space == AddressSpace::Raw || target == AddressSpace::Raw {
        return Ok(tuple.address);
    }

    if tuple.space == AddressSpace::FxPakPro && is_command_address(tuple.address) {
        return Ok(tuple.address);
    }

    if tuple.mapping == MemoryMapping::Unknown {
        return Err(MappingError::UnknownMapping(tuple, target));
    }

    let translated = match (tuple.space, target) {
        (AddressSpace::SnesBus, AddressSpace::FxPakPro) => tuple.mapping.bus_to_pak(tuple.address),
        (AddressSpace::FxPakPro, AddressSpace::SnesBus) => tuple.mapping.pak_to_bus(tuple.address),
        _ => None,
    };

    translated.ok_or(MappingError::Unmapped(tuple, target))
}

// ============================================================================
// Helpers shared by the mapping modules
// ============================================================================

#[inline]
pub(crate) const fn bank_of(address: u32) -> u32 {
    (address >> 16) & 0xFF
}

#[inline]
pub(crate) const fn offset_of(address: u32) -> u32 {
    address & 0xFFFF
}

/// Work RAM as seen from the bus: banks $7E-$7F, plus the low 8K mirror in
/// system banks $00-$3F and $80-$BF
pub(crate) const fn bus_wram_to_pak(bus: u32) -> Option<u32> {
    let bank = bank_of(bus);
    let offset = offset_of(bus);
    if bank == 0x7E || bank == 0x7F {
        Some(PAK_WRAM_BASE + (bus - 0x7E_0000))
    } else if bank & 0x40 == 0 && offset < 0x2000 {
        Some(PAK_WRAM_BASE + offset)
    } else {
        None
    }
}

/// Work RAM from device space back to banks $7E-$7F
pub(crate) const fn pak_wram_to_bus(pak: u32) -> Option<u32> {
    if is_pak_wram(pak) {
        Some(0x7E_0000 + (pak - PAK_WRAM_BASE))
    } else {
        None
    }
}
