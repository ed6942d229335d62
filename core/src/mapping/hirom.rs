//! HiROM: 64K ROM banks at $C0-$FF (mirrored into $40-$7D and the upper
//! halves of $00-$3F/$80-$BF), SRAM at $6000-$7FFF of banks $20-$3F/$A0-$BF

use super::{PAK_SRAM_BASE, bank_of, bus_wram_to_pak, offset_of, pak_wram_to_bus};

/// ROM reachable through HiROM (64 banks of 64K)
const ROM_LIMIT: u32 = 0x40_0000;

/// 32 SRAM windows of 8K each
const SRAM_WINDOWS: u32 = 0x20;

pub(crate) fn bus_to_pak(bus: u32) -> Option<u32> {
    let bank = bank_of(bus);
    let offset = offset_of(bus);

    if bank == 0x7E || bank == 0x7F {
        return bus_wram_to_pak(bus);
    }

    if bank & 0x40 != 0 {
        // $40-$7D and $C0-$FF: whole bank is ROM
        return Some(((bank & 0x3F) << 16) | offset);
    }

    system_bank_to_pak(bus).or_else(|| {
        (offset >= 0x8000).then(|| ((bank & 0x3F) << 16) | offset)
    })
}

pub(crate) fn pak_to_bus(pak: u32) -> Option<u32> {
    if pak < ROM_LIMIT {
        return Some(0xC0_0000 | pak);
    }
    sram_to_bus(pak, 0x20).or_else(|| pak_wram_to_bus(pak))
}

/// WRAM mirror and SRAM window in banks $00-$3F/$80-$BF, shared with ExHiROM
pub(crate) fn system_bank_to_pak(bus: u32) -> Option<u32> {
    let bank = bank_of(bus);
    let offset = offset_of(bus);
    if offset < 0x2000 {
        return bus_wram_to_pak(bus);
    }
    if (0x6000..0x8000).contains(&offset) && bank & 0x3F >= 0x20 {
        return Some(PAK_SRAM_BASE + (bank & 0x1F) * 0x2000 + (offset - 0x6000));
    }
    None
}

/// SRAM back to the bus, with windows starting at `first_bank`
pub(crate) fn sram_to_bus(pak: u32, first_bank: u32) -> Option<u32> {
    if pak < PAK_SRAM_BASE {
        return None;
    }
    let offset = pak - PAK_SRAM_BASE;
    let index = offset / 0x2000;
    if index >= SRAM_WINDOWS {
        return None;
    }
    Some(((first_bank + index) << 16) | (0x6000 + (offset & 0x1FFF)))
}
