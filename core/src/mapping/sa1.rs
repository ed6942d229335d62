//! SA-1 (default bank configuration)
//!
//! ROM is linear in banks $C0-$FF and LoROM-style in the upper halves of
//! $00-$3F/$80-$BF; BW-RAM appears whole in banks $40-$43 and as an 8K window
//! at $6000-$7FFF of the system banks.

use super::{PAK_SRAM_BASE, bank_of, bus_wram_to_pak, offset_of, pak_wram_to_bus};

const ROM_LIMIT: u32 = 0x40_0000;

/// 256K of BW-RAM
const BWRAM_SIZE: u32 = 0x4_0000;

pub(crate) fn bus_to_pak(bus: u32) -> Option<u32> {
    let bank = bank_of(bus);
    let offset = offset_of(bus);

    match bank {
        0x7E | 0x7F => bus_wram_to_pak(bus),
        0xC0..=0xFF => Some(((bank - 0xC0) << 16) | offset),
        0x40..=0x43 => Some(PAK_SRAM_BASE + (bus - 0x40_0000)),
        0x44..=0x7D => None,
        _ => {
            if offset >= 0x8000 {
                // $00-$3F -> first 2MB, $80-$BF -> second 2MB
                let index = (bank & 0x3F) | ((bank & 0x80) >> 1);
                Some(index * 0x8000 + (offset & 0x7FFF))
            } else if (0x6000..0x8000).contains(&offset) {
                Some(PAK_SRAM_BASE + (offset - 0x6000))
            } else if offset < 0x2000 {
                bus_wram_to_pak(bus)
            } else {
                // I-RAM and SA-1 registers have no device-side counterpart
                None
            }
        }
    }
}

pub(crate) fn pak_to_bus(pak: u32) -> Option<u32> {
    if pak < ROM_LIMIT {
        return Some(0xC0_0000 | pak);
    }
    if (PAK_SRAM_BASE..PAK_SRAM_BASE + BWRAM_SIZE).contains(&pak) {
        return Some(0x40_0000 + (pak - PAK_SRAM_BASE));
    }
    pak_wram_to_bus(pak)
}
