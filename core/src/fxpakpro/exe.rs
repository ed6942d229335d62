//! Work RAM writes through injected code (USB-EXE)
//!
//! The cartridge cannot drive writes onto the console's internal RAM bus, so
//! work RAM is written by the SNES CPU itself. A copy routine is generated,
//! its data appended, and the result staged at `$2C00` in the command space.
//! Writing the first byte last arms the slot: while `$2C00` is non-zero the
//! cartridge redirects the NMI vector there. The routine copies every block
//! with MVN, clears `$2C00` and chains to the original NMI handler.
//!
//! ```text
//!   $2C00  php / rep #$30 / pha / phx / phy / phb        prologue
//!          lda #len-1 / ldx #src / ldy #dst / mvn        one per block
//!          sep #$20 / lda #0 / sta $002c00               release slot
//!          plb / ply / plx / rep #$20 / pla / plp
//!          jmp ($ffea)                                   original NMI
//!   +code  data for block 0, block 1, ...
//! ```
//!
//! Whatever does not fit in the 512-byte slot is carried to the next round.

use std::time::Duration;

use crate::asm::{Emitter, StatusFlags};
use crate::deadline::Deadline;
use crate::error::{DeviceError, Result};
use crate::mapping::{CMD_SPACE_BIT, PAK_WRAM_BASE, PAK_WRAM_END};

use super::link::Link;
use super::memory;
use super::packet::Space;

/// Command-space address of the injection slot and its busy byte
pub const EXE_ADDRESS: u32 = 0x2C00;

/// Size of the injection slot
pub const EXE_CAPACITY: usize = 512;

/// Code bytes per copied block: LDA, LDX, LDY immediates plus MVN
pub const TRANSFER_BLOCK_SIZE: usize = 12;

/// Fixed prologue and epilogue bytes
pub const ROUTINE_OVERHEAD: usize = 25;

/// Native-mode NMI vector
const NMI_VECTOR: u16 = 0xFFEA;

/// Work RAM bank boundary in device space; MVN cannot cross it
const WRAM_BANK_SPLIT: u32 = PAK_WRAM_BASE + 0x1_0000;

/// Polling behavior while waiting for the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExeSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ExeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
        }
    }
}

/// One pending work RAM write in device space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WramWrite {
    pub address: u32,
    pub data: Vec<u8>,
}

/// A generated routine and what it could not fit
#[derive(Debug, Clone)]
pub struct CopyRoutine {
    /// Code followed by its data, ready to stage at [`EXE_ADDRESS`]
    pub encoded: Vec<u8>,
    /// Length of the code part of `encoded`
    pub code_len: usize,
    /// Number of MVN blocks
    pub blocks: usize,
    /// Writes left for a later round, offsets already advanced
    pub remainder: Vec<WramWrite>,
    /// Disassembly, when requested
    pub text: Option<String>,
}

/// Build a copy routine for as many of `writes` as fit in the slot
///
/// Writes are first split at the bank boundary. If the last one that fits
/// only partly fits, its head is copied and its tail leads the remainder.
pub fn generate_copy_asm(writes: &[WramWrite], with_text: bool) -> Result<CopyRoutine> {
    let mut pieces = Vec::with_capacity(writes.len());
    for write in writes.iter().filter(|w| !w.data.is_empty()) {
        let end = write.address as usize + write.data.len();
        if write.address < PAK_WRAM_BASE || end > PAK_WRAM_END as usize {
            return Err(DeviceError::InvalidArgument(format!(
                "${:06x}+{} is outside work RAM",
                write.address,
                write.data.len()
            )));
        }
        if write.address < WRAM_BANK_SPLIT && end > WRAM_BANK_SPLIT as usize {
            let (head, tail) = write.data.split_at((WRAM_BANK_SPLIT - write.address) as usize);
            pieces.push(WramWrite {
                address: write.address,
                data: head.to_vec(),
            });
            pieces.push(WramWrite {
                address: WRAM_BANK_SPLIT,
                data: tail.to_vec(),
            });
        } else {
            pieces.push(write.clone());
        }
    }

    // Pick what fits
    let budget = EXE_CAPACITY - ROUTINE_OVERHEAD;
    let mut used = 0;
    let mut taken: Vec<WramWrite> = Vec::new();
    let mut remainder: Vec<WramWrite> = Vec::new();
    let mut rest = pieces.into_iter();
    for piece in rest.by_ref() {
        let cost = TRANSFER_BLOCK_SIZE + piece.data.len();
        if used + cost <= budget {
            used += cost;
            taken.push(piece);
            continue;
        }
        let room = budget - used;
        if room > TRANSFER_BLOCK_SIZE {
            let fit = room - TRANSFER_BLOCK_SIZE;
            taken.push(WramWrite {
                address: piece.address,
                data: piece.data[..fit].to_vec(),
            });
            remainder.push(WramWrite {
                address: piece.address + fit as u32,
                data: piece.data[fit..].to_vec(),
            });
        } else {
            remainder.push(piece);
        }
        break;
    }
    remainder.extend(rest);

    let code_len = ROUTINE_OVERHEAD + TRANSFER_BLOCK_SIZE * taken.len();
    let mut a = Emitter::new(EXE_ADDRESS, with_text);

    a.comment("save registers");
    a.php();
    a.rep(StatusFlags::M | StatusFlags::X);
    a.pha();
    a.phx();
    a.phy();
    a.phb();

    let mut src = EXE_ADDRESS as usize + code_len;
    for write in &taken {
        let wram_offset = write.address - PAK_WRAM_BASE;
        let dst_bank = 0x7E + (wram_offset >> 16) as u8;
        let len = write.data.len();
        a.comment(&format!("copy {len} bytes to ${dst_bank:02x}:{:04x}", wram_offset & 0xFFFF));
        a.lda_imm16((len - 1) as u16)?;
        a.ldx_imm16(src as u16)?;
        a.ldy_imm16((wram_offset & 0xFFFF) as u16)?;
        a.mvn(dst_bank, 0x00);
        src += len;
    }

    a.comment("release the slot");
    a.sep(StatusFlags::M);
    a.lda_imm8(0)?;
    a.sta_long(EXE_ADDRESS);

    a.comment("restore registers");
    a.plb();
    a.ply();
    a.plx();
    a.rep(StatusFlags::M);
    a.pla();
    a.plp();
    a.jmp_indirect(NMI_VECTOR);

    debug_assert_eq!(a.len(), code_len);
    let text = a.text().map(str::to_string);

    let mut encoded = a.into_code();
    for write in &taken {
        encoded.extend_from_slice(&write.data);
    }
    debug_assert!(encoded.len() <= EXE_CAPACITY);

    Ok(CopyRoutine {
        encoded,
        code_len,
        blocks: taken.len(),
        remainder,
        text,
    })
}

/// Write `writes` into work RAM, one generated routine per round
pub fn write_wram(link: &mut Link, writes: &[WramWrite], settings: &ExeSettings, deadline: Deadline) -> Result<()> {
    let mut pending = writes.to_vec();
    let mut round = 0usize;
    let slot = CMD_SPACE_BIT | EXE_ADDRESS;

    while pending.iter().any(|w| !w.data.is_empty()) {
        let routine = generate_copy_asm(&pending, tracing::enabled!(tracing::Level::TRACE))?;
        round += 1;
        tracing::debug!(
            round,
            blocks = routine.blocks,
            code_len = routine.code_len,
            size = routine.encoded.len(),
            deferred = routine.remainder.len(),
            "generated work RAM copy routine"
        );
        if let Some(text) = routine.text.as_deref() {
            tracing::trace!("copy routine:\n{text}");
        }

        wait_for_idle_slot(link, settings, deadline)?;
        memory::write_direct(link, &[(slot + 1, &routine.encoded[1..])], deadline)?;
        memory::write_direct(link, &[(slot, &routine.encoded[..1])], deadline)?;
        wait_for_idle_slot(link, settings, deadline)?;

        pending = routine.remainder;
    }
    Ok(())
}

/// Poll the busy byte until the previous routine has run
fn wait_for_idle_slot(link: &mut Link, settings: &ExeSettings, deadline: Deadline) -> Result<()> {
    let until = deadline.min(Deadline::after(settings.timeout));
    loop {
        let busy = link.vget(Space::Cmd, &[(EXE_ADDRESS, 1)], until)?;
        if busy.first() == Some(&0) {
            return Ok(());
        }
        let left = until.check("USB-EXE slot to clear")?;
        std::thread::sleep(settings.poll_interval.min(left));
    }
}
