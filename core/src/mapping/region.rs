//! Fixed hardware regions of FX Pak Pro space
//!
//! Protocols that address memory by named domain rather than flat address
//! (and the in-memory mock device) use [`memory_region_for`] to split a
//! device-space address into a region and an offset within it.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{CMD_SPACE_BIT, PAK_SRAM_BASE, PAK_WRAM_BASE};

/// A named hardware memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryRegion {
    CartRom,
    CartSram,
    Wram,
    Vram,
    ApuRam,
    CgRam,
    Oam,
    Misc,
    PpuReg,
    CpuReg,
    /// Command/auxiliary subspace
    Command,
}

impl MemoryRegion {
    /// Every region in device-address order
    pub const ALL: [MemoryRegion; 11] = [
        Self::CartRom,
        Self::CartSram,
        Self::Wram,
        Self::Vram,
        Self::ApuRam,
        Self::CgRam,
        Self::Oam,
        Self::Misc,
        Self::PpuReg,
        Self::CpuReg,
        Self::Command,
    ];

    /// First FX Pak Pro address of the region
    pub const fn base(self) -> u32 {
        match self {
            Self::CartRom => 0x00_0000,
            Self::CartSram => PAK_SRAM_BASE,
            Self::Wram => PAK_WRAM_BASE,
            Self::Vram => 0xF7_0000,
            Self::ApuRam => 0xF8_0000,
            Self::CgRam => 0xF9_0000,
            Self::Oam => 0xF9_0200,
            Self::Misc => 0xF9_0420,
            Self::PpuReg => 0xF9_0500,
            Self::CpuReg => 0xF9_0700,
            Self::Command => CMD_SPACE_BIT,
        }
    }

    /// Size of the region in bytes
    pub const fn size(self) -> u32 {
        match self {
            Self::CartRom => 0xE0_0000,
            Self::CartSram => 0x10_0000,
            Self::Wram => 0x2_0000,
            Self::Vram => 0x1_0000,
            Self::ApuRam => 0x1_0000,
            Self::CgRam => 0x200,
            Self::Oam => 0x220,
            Self::Misc => 0xE0,
            Self::PpuReg => 0x200,
            Self::CpuReg => 0x200,
            Self::Command => 0x1_0000,
        }
    }

    /// Domain name used by emulator memory APIs
    pub const fn name(self) -> &'static str {
        match self {
            Self::CartRom => "CARTROM",
            Self::CartSram => "SRAM",
            Self::Wram => "WRAM",
            Self::Vram => "VRAM",
            Self::ApuRam => "APURAM",
            Self::CgRam => "CGRAM",
            Self::Oam => "OAM",
            Self::Misc => "MISC",
            Self::PpuReg => "PPUREG",
            Self::CpuReg => "CPUREG",
            Self::Command => "CMD",
        }
    }

    fn contains(self, address: u32) -> bool {
        address >= self.base() && address - self.base() < self.size()
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A device-space address resolved to its region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionAddress {
    pub region: MemoryRegion,
    /// Device address where the region starts
    pub base: u32,
    /// Offset of the address within the region
    pub offset: u32,
}

impl RegionAddress {
    /// Bytes left in the region from this address onward
    pub fn remaining(&self) -> u32 {
        self.region.size() - self.offset
    }
}

/// Classify an FX Pak Pro address into its hardware region
///
/// Returns `None` for the gaps between regions ($F00000-$F4FFFF and above
/// $F908FF outside the command subspace).
pub fn memory_region_for(address: u32) -> Option<RegionAddress> {
    MemoryRegion::ALL
        .iter()
        .copied()
        .find(|region| region.contains(address))
        .map(|region| RegionAddress {
            region,
            base: region.base(),
            offset: address - region.base(),
        })
}
