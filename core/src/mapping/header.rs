//! Cartridge header decoding and plausibility scoring
//!
//! The internal header is the 0x50 bytes ending at the top of the first ROM
//! bank as the CPU sees it: ROM offset $7FB0 for LoROM-style carts and $FFB0
//! for HiROM-style carts. It ends with the interrupt vector tables.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

use super::MemoryMapping;

/// Size of the header region including vector tables
pub const HEADER_SIZE: usize = 0x50;

/// ROM offset of a LoROM-style header
pub const LOROM_HEADER_OFFSET: u32 = 0x7FB0;

/// ROM offset of a HiROM-style header
pub const HIROM_HEADER_OFFSET: u32 = 0xFFB0;

/// Length of the title field
const TITLE_LEN: usize = 21;

/// Which candidate header location a header was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSlot {
    LoRom,
    HiRom,
}

impl HeaderSlot {
    pub const fn rom_offset(self) -> u32 {
        match self {
            Self::LoRom => LOROM_HEADER_OFFSET,
            Self::HiRom => HIROM_HEADER_OFFSET,
        }
    }
}

/// Point weights for header plausibility scoring
///
/// These are heuristics, validated against known headers rather than
/// derived; tune them here rather than in the scoring code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    /// Reset vector points into ROM ($8000 or above); without it a header scores zero
    pub valid_reset_vector: i32,
    /// Checksum and its complement sum to $FFFF
    pub checksum_complement: i32,
    /// NMI and IRQ vectors also point into ROM
    pub vector_table: i32,
    /// Map mode byte agrees with the slot it was read from
    pub map_mode_match: i32,
    /// ROM size byte within 256K..8M
    pub rom_size: i32,
    /// Title is printable ASCII
    pub printable_title: i32,
    /// Minimum score for a candidate to be selected at all
    pub min_score: i32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            valid_reset_vector: 8,
            checksum_complement: 4,
            vector_table: 2,
            map_mode_match: 2,
            rom_size: 1,
            printable_title: 1,
            min_score: 10,
        }
    }
}

/// Native-mode interrupt vectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeVectors {
    pub cop: u16,
    pub brk: u16,
    pub abort: u16,
    pub nmi: u16,
    pub irq: u16,
}

/// Emulation-mode interrupt vectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmulationVectors {
    pub cop: u16,
    pub abort: u16,
    pub nmi: u16,
    pub reset: u16,
    pub irq_brk: u16,
}

/// Decoded cartridge header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RomHeader {
    pub maker_code: [u8; 2],
    pub game_code: [u8; 4],
    pub expansion_ram_size: u8,
    pub special_version: u8,
    pub cartridge_subtype: u8,
    pub title: [u8; TITLE_LEN],
    pub map_mode: u8,
    pub cartridge_type: u8,
    pub rom_size: u8,
    pub ram_size: u8,
    pub destination_code: u8,
    pub old_maker_code: u8,
    pub version: u8,
    pub complement_checksum: u16,
    pub checksum: u16,
    pub native: NativeVectors,
    pub emulation: EmulationVectors,
}

impl RomHeader {
    /// Decode a header from exactly [`HEADER_SIZE`] bytes
    pub fn parse(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("header must be {} bytes, got {}", HEADER_SIZE, bytes.len()),
            ));
        }

        let mut r = Cursor::new(bytes);
        let mut header = RomHeader::default();

        r.read_exact(&mut header.maker_code)?;
        r.read_exact(&mut header.game_code)?;
        let mut reserved = [0u8; 7];
        r.read_exact(&mut reserved)?;
        header.expansion_ram_size = r.read_u8()?;
        header.special_version = r.read_u8()?;
        header.cartridge_subtype = r.read_u8()?;
        r.read_exact(&mut header.title)?;
        header.map_mode = r.read_u8()?;
        header.cartridge_type = r.read_u8()?;
        header.rom_size = r.read_u8()?;
        header.ram_size = r.read_u8()?;
        header.destination_code = r.read_u8()?;
        header.old_maker_code = r.read_u8()?;
        header.version = r.read_u8()?;
        header.complement_checksum = r.read_u16::<LittleEndian>()?;
        header.checksum = r.read_u16::<LittleEndian>()?;

        // $30: native vectors
        r.read_u32::<LittleEndian>()?;
        header.native.cop = r.read_u16::<LittleEndian>()?;
        header.native.brk = r.read_u16::<LittleEndian>()?;
        header.native.abort = r.read_u16::<LittleEndian>()?;
        header.native.nmi = r.read_u16::<LittleEndian>()?;
        r.read_u16::<LittleEndian>()?;
        header.native.irq = r.read_u16::<LittleEndian>()?;

        // $40: emulation vectors
        r.read_u32::<LittleEndian>()?;
        header.emulation.cop = r.read_u16::<LittleEndian>()?;
        r.read_u16::<LittleEndian>()?;
        header.emulation.abort = r.read_u16::<LittleEndian>()?;
        header.emulation.nmi = r.read_u16::<LittleEndian>()?;
        header.emulation.reset = r.read_u16::<LittleEndian>()?;
        header.emulation.irq_brk = r.read_u16::<LittleEndian>()?;

        Ok(header)
    }

    /// Title with trailing padding removed
    pub fn title(&self) -> String {
        String::from_utf8_lossy(&self.title)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }

    /// Map mode with the FastROM bit masked off
    pub fn map_mode_base(&self) -> u8 {
        self.map_mode & !0x10
    }

    /// Whether checksum and complement are consistent
    pub fn checksum_valid(&self) -> bool {
        self.checksum as u32 + self.complement_checksum as u32 == 0xFFFF
    }

    /// Mapping implied by this header when read from `slot`
    pub fn mapping_for(&self, slot: HeaderSlot) -> MemoryMapping {
        match (slot, self.map_mode_base()) {
            (HeaderSlot::LoRom, 0x22) => MemoryMapping::ExLoRom,
            (HeaderSlot::LoRom, 0x23) => MemoryMapping::Sa1,
            (HeaderSlot::LoRom, _) => MemoryMapping::LoRom,
            (HeaderSlot::HiRom, 0x25) => MemoryMapping::ExHiRom,
            (HeaderSlot::HiRom, _) => MemoryMapping::HiRom,
        }
    }

    /// Score how plausible it is that this is the real header for `slot`
    pub fn score(&self, slot: HeaderSlot, weights: &ScoreWeights) -> i32 {
        if self.emulation.reset < 0x8000 {
            return 0;
        }

        let mut score = weights.valid_reset_vector;

        if self.checksum_valid() {
            score += weights.checksum_complement;
        }

        if self.native.nmi >= 0x8000 && self.emulation.nmi >= 0x8000 && self.emulation.irq_brk >= 0x8000 {
            score += weights.vector_table;
        }

        let mode_matches = match slot {
            HeaderSlot::LoRom => matches!(self.map_mode_base(), 0x20 | 0x22 | 0x23),
            HeaderSlot::HiRom => matches!(self.map_mode_base(), 0x21 | 0x25),
        };
        if mode_matches {
            score += weights.map_mode_match;
        }

        if (0x08..=0x0D).contains(&self.rom_size) {
            score += weights.rom_size;
        }

        if self.title.iter().all(|&b| b == 0 || (0x20..0x7F).contains(&b)) {
            score += weights.printable_title;
        }

        score.max(0)
    }
}
