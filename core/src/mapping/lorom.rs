//! LoROM: 32K ROM windows at $8000-$FFFF of every bank, SRAM in banks $70-$7D

use super::{PAK_SRAM_BASE, bank_of, bus_wram_to_pak, offset_of, pak_wram_to_bus};

/// ROM reachable through LoROM (128 banks of 32K)
const ROM_LIMIT: u32 = 0x40_0000;

/// SRAM banks $70-$7D
const SRAM_BANKS: u32 = 14;

pub(crate) fn bus_to_pak(bus: u32) -> Option<u32> {
    if let Some(pak) = wram_or_sram(bus) {
        return Some(pak);
    }

    let offset = offset_of(bus);
    if offset >= 0x8000 {
        let bank = bank_of(bus) & 0x7F;
        return Some(bank * 0x8000 + (offset & 0x7FFF));
    }

    None
}

pub(crate) fn pak_to_bus(pak: u32) -> Option<u32> {
    if pak < ROM_LIMIT {
        // FastROM mirror keeps clear of the WRAM banks
        let bank = 0x80 | (pak / 0x8000);
        return Some((bank << 16) | 0x8000 | (pak & 0x7FFF));
    }
    sram_to_bus(pak).or_else(|| pak_wram_to_bus(pak))
}

/// WRAM and the $70-$7D SRAM window, shared with ExLoROM
pub(crate) fn wram_or_sram(bus: u32) -> Option<u32> {
    let bank = bank_of(bus);
    if bank == 0x7E || bank == 0x7F {
        return bus_wram_to_pak(bus);
    }

    let offset = offset_of(bus);
    let sram_bank = bank & 0x7F;
    if offset < 0x8000 && (0x70..0x70 + SRAM_BANKS).contains(&sram_bank) {
        return Some(PAK_SRAM_BASE + (sram_bank - 0x70) * 0x8000 + offset);
    }

    if offset < 0x8000 {
        return bus_wram_to_pak(bus);
    }
    None
}

pub(crate) fn sram_to_bus(pak: u32) -> Option<u32> {
    if pak < PAK_SRAM_BASE {
        return None;
    }
    let offset = pak - PAK_SRAM_BASE;
    let index = offset / 0x8000;
    if index >= SRAM_BANKS {
        return None;
    }
    Some(((0x70 + index) << 16) | (offset & 0x7FFF))
}
