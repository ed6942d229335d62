//! ExHiROM: HiROM extended to 8MB
//!
//! The low 4MB of ROM sits in banks $C0-$FF (mirrored in the upper halves of
//! $80-$BF), the high 4MB in banks $40-$7D (mirrored in the upper halves of
//! $00-$3F). SRAM windows live in banks $A0-$BF.

use super::hirom::{sram_to_bus, system_bank_to_pak};
use super::{bank_of, bus_wram_to_pak, offset_of, pak_wram_to_bus};

/// Where the high half of ROM begins in device space
const HIGH_ROM_BASE: u32 = 0x40_0000;

/// High ROM visible through whole banks $40-$7D
const HIGH_ROM_WHOLE_BANKS_END: u32 = 0x7E_0000;

/// End of the 8MB ROM image
const ROM_LIMIT: u32 = 0x80_0000;

pub(crate) fn bus_to_pak(bus: u32) -> Option<u32> {
    let bank = bank_of(bus);
    let offset = offset_of(bus);

    if bank == 0x7E || bank == 0x7F {
        return bus_wram_to_pak(bus);
    }

    if bank >= 0xC0 {
        return Some(((bank - 0xC0) << 16) | offset);
    }
    if bank >= 0x40 && bank < 0x80 {
        return Some(HIGH_ROM_BASE + (((bank - 0x40) << 16) | offset));
    }

    // System banks: SRAM only in $A0-$BF
    if bank >= 0x80 || !(0x6000..0x8000).contains(&offset) {
        if let Some(pak) = system_bank_to_pak(bus) {
            return Some(pak);
        }
    }

    if offset < 0x8000 {
        return None;
    }
    let rom = ((bank & 0x3F) << 16) | offset;
    if bank >= 0x80 {
        Some(rom)
    } else {
        Some(HIGH_ROM_BASE + rom)
    }
}

pub(crate) fn pak_to_bus(pak: u32) -> Option<u32> {
    if pak < HIGH_ROM_BASE {
        return Some(0xC0_0000 | pak);
    }
    if pak < HIGH_ROM_WHOLE_BANKS_END {
        return Some(pak);
    }
    if pak < ROM_LIMIT {
        // Banks $7E/$7F are WRAM; reach the last 128K of ROM through $3E/$3F
        let bus = pak - HIGH_ROM_BASE;
        return (offset_of(bus) >= 0x8000).then_some(bus);
    }
    sram_to_bus(pak, 0xA0).or_else(|| pak_wram_to_bus(pak))
}
