//! ExLoROM: LoROM extended past 4MB
//!
//! Banks $80-$FF hold the first 4MB, banks $00-$7D the remainder; SRAM and
//! WRAM are laid out as in LoROM.

use super::lorom::{sram_to_bus, wram_or_sram};
use super::{bank_of, offset_of, pak_wram_to_bus};

const HIGH_ROM_BASE: u32 = 0x40_0000;

/// Banks $00-$7D at 32K each
const HIGH_ROM_LIMIT: u32 = HIGH_ROM_BASE + 0x7E * 0x8000;

pub(crate) fn bus_to_pak(bus: u32) -> Option<u32> {
    if let Some(pak) = wram_or_sram(bus) {
        return Some(pak);
    }

    let bank = bank_of(bus);
    let offset = offset_of(bus);
    if offset < 0x8000 {
        return None;
    }

    let window = offset & 0x7FFF;
    if bank >= 0x80 {
        Some((bank - 0x80) * 0x8000 + window)
    } else {
        Some(HIGH_ROM_BASE + bank * 0x8000 + window)
    }
}

pub(crate) fn pak_to_bus(pak: u32) -> Option<u32> {
    if pak < HIGH_ROM_BASE {
        let bank = 0x80 + pak / 0x8000;
        return Some((bank << 16) | 0x8000 | (pak & 0x7FFF));
    }
    if pak < HIGH_ROM_LIMIT {
        let bank = (pak - HIGH_ROM_BASE) / 0x8000;
        return Some((bank << 16) | 0x8000 | (pak & 0x7FFF));
    }
    sram_to_bus(pak).or_else(|| pak_wram_to_bus(pak))
}
