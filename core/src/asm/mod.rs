//! Minimal 65816 emitter
//!
//! Appends one instruction at a time to a code buffer while tracking the
//! current address and the M/X register-width flags. With text enabled, each
//! instruction also produces a disassembly-style line:
//!
//! ```text
//!     rep  #$30             ; $002c00  c2 30
//!     lda  #$0008           ; $002c03  a9 08 00
//! ```
//!
//! Width-sensitive instructions return [`AsmError`] when the tracked flags
//! disagree with the operand width being emitted. That is a code generator
//! bug, never a data error.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut a = Emitter::new(0x2C00, true);
//! a.rep(StatusFlags::M | StatusFlags::X);
//! a.lda_imm16(0x0008)?;
//! a.mvn(0x7E, 0x00);
//! let code = a.into_code();
//! ```


use std::fmt::Write as _;

use bitflags::bitflags;

bitflags! {
    /// Processor status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const C = 0x01;
        const Z = 0x02;
        const I = 0x04;
        const D = 0x08;
        /// Index registers are 8-bit when set
        const X = 0x10;
        /// Accumulator is 8-bit when set
        const M = 0x20;
        const V = 0x40;
        const N = 0x80;
    }
}

/// Register width a width-sensitive instruction was emitted under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Bits8,
    Bits16,
}

impl std::fmt::Display for Width {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bits8 => f.write_str("8-bit"),
            Self::Bits16 => f.write_str("16-bit"),
        }
    }
}

/// Emitter precondition violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    #[error("{mnemonic} needs a {required} accumulator but it is {actual}")]
    AccumulatorWidth {
        mnemonic: &'static str,
        required: Width,
        actual: Width,
    },

    #[error("{mnemonic} needs {required} index registers but they are {actual}")]
    IndexWidth {
        mnemonic: &'static str,
        required: Width,
        actual: Width,
    },
}

/// Instruction-at-a-time 65816 code generator
#[derive(Debug, Clone)]
pub struct Emitter {
    base: u32,
    code: Vec<u8>,
    text: Option<String>,
    m8: bool,
    x8: bool,
}

impl Emitter {
    /// Start emitting at `base`, in emulation-compatible 8-bit mode
    pub fn new(base: u32, with_text: bool) -> Self {
        Self {
            base,
            code: Vec::new(),
            text: with_text.then(String::new),
            m8: true,
            x8: true,
        }
    }

    /// Address the next instruction will be emitted at
    pub fn address(&self) -> u32 {
        self.base + self.code.len() as u32
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    /// Disassembly text, if enabled
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn is_m8(&self) -> bool {
        self.m8
    }

    pub fn is_x8(&self) -> bool {
        self.x8
    }

    /// Append a comment line to the text buffer
    pub fn comment(&mut self, comment: &str) {
        if let Some(text) = self.text.as_mut() {
            let _ = writeln!(text, "    ; {comment}");
        }
    }

    // ========================================================================
    // Stack and flags
    // ========================================================================

    pub fn php(&mut self) {
        self.emit("php", "", &[0x08]);
    }

    pub fn plp(&mut self) {
        self.emit("plp", "", &[0x28]);
    }

    pub fn pha(&mut self) {
        self.emit("pha", "", &[0x48]);
    }

    pub fn pla(&mut self) {
        self.emit("pla", "", &[0x68]);
    }

    pub fn phx(&mut self) {
        self.emit("phx", "", &[0xDA]);
    }

    pub fn plx(&mut self) {
        self.emit("plx", "", &[0xFA]);
    }

    pub fn phy(&mut self) {
        self.emit("phy", "", &[0x5A]);
    }

    pub fn ply(&mut self) {
        self.emit("ply", "", &[0x7A]);
    }

    pub fn phb(&mut self) {
        self.emit("phb", "", &[0x8B]);
    }

    pub fn plb(&mut self) {
        self.emit("plb", "", &[0xAB]);
    }

    pub fn sei(&mut self) {
        self.emit("sei", "", &[0x78]);
    }

    pub fn clc(&mut self) {
        self.emit("clc", "", &[0x18]);
    }

    pub fn sec(&mut self) {
        self.emit("sec", "", &[0x38]);
    }

    pub fn xce(&mut self) {
        self.emit("xce", "", &[0xFB]);
    }

    pub fn nop(&mut self) {
        self.emit("nop", "", &[0xEA]);
    }

    /// Clear status bits; clearing M or X widens the matching registers
    pub fn rep(&mut self, flags: StatusFlags) {
        if flags.contains(StatusFlags::M) {
            self.m8 = false;
        }
        if flags.contains(StatusFlags::X) {
            self.x8 = false;
        }
        self.emit("rep", &format!("#${:02x}", flags.bits()), &[0xC2, flags.bits()]);
    }

    /// Set status bits; setting M or X narrows the matching registers
    pub fn sep(&mut self, flags: StatusFlags) {
        if flags.contains(StatusFlags::M) {
            self.m8 = true;
        }
        if flags.contains(StatusFlags::X) {
            self.x8 = true;
        }
        self.emit("sep", &format!("#${:02x}", flags.bits()), &[0xE2, flags.bits()]);
    }

    // ========================================================================
    // Loads
    // ========================================================================

    pub fn lda_imm8(&mut self, value: u8) -> Result<(), AsmError> {
        self.check_m("lda", Width::Bits8)?;
        self.emit("lda", &format!("#${value:02x}"), &[0xA9, value]);
        Ok(())
    }

    pub fn lda_imm16(&mut self, value: u16) -> Result<(), AsmError> {
        self.check_m("lda", Width::Bits16)?;
        let [lo, hi] = value.to_le_bytes();
        self.emit("lda", &format!("#${value:04x}"), &[0xA9, lo, hi]);
        Ok(())
    }

    pub fn ldx_imm8(&mut self, value: u8) -> Result<(), AsmError> {
        self.check_x("ldx", Width::Bits8)?;
        self.emit("ldx", &format!("#${value:02x}"), &[0xA2, value]);
        Ok(())
    }

    pub fn ldx_imm16(&mut self, value: u16) -> Result<(), AsmError> {
        self.check_x("ldx", Width::Bits16)?;
        let [lo, hi] = value.to_le_bytes();
        self.emit("ldx", &format!("#${value:04x}"), &[0xA2, lo, hi]);
        Ok(())
    }

    pub fn ldy_imm8(&mut self, value: u8) -> Result<(), AsmError> {
        self.check_x("ldy", Width::Bits8)?;
        self.emit("ldy", &format!("#${value:02x}"), &[0xA0, value]);
        Ok(())
    }

    pub fn ldy_imm16(&mut self, value: u16) -> Result<(), AsmError> {
        self.check_x("ldy", Width::Bits16)?;
        let [lo, hi] = value.to_le_bytes();
        self.emit("ldy", &format!("#${value:04x}"), &[0xA0, lo, hi]);
        Ok(())
    }

    // ========================================================================
    // Stores, moves, jumps
    // ========================================================================

    pub fn sta_abs(&mut self, addr: u16) {
        let [lo, hi] = addr.to_le_bytes();
        self.emit("sta", &format!("${addr:04x}"), &[0x8D, lo, hi]);
    }

    pub fn sta_long(&mut self, addr: u32) {
        let [lo, hi, bank, _] = addr.to_le_bytes();
        self.emit("sta", &format!("${:06x}", addr & 0xFF_FFFF), &[0x8F, lo, hi, bank]);
    }

    pub fn stz_abs(&mut self, addr: u16) {
        let [lo, hi] = addr.to_le_bytes();
        self.emit("stz", &format!("${addr:04x}"), &[0x9C, lo, hi]);
    }

    /// Block move with incrementing addresses
    ///
    /// Copies C+1 bytes from `src_bank:X` to `dst_bank:Y` and leaves the data
    /// bank register set to `dst_bank`. Object code order is destination first.
    pub fn mvn(&mut self, dst_bank: u8, src_bank: u8) {
        self.emit(
            "mvn",
            &format!("${src_bank:02x},${dst_bank:02x}"),
            &[0x54, dst_bank, src_bank],
        );
    }

    pub fn jmp_abs(&mut self, addr: u16) {
        let [lo, hi] = addr.to_le_bytes();
        self.emit("jmp", &format!("${addr:04x}"), &[0x4C, lo, hi]);
    }

    pub fn jmp_indirect(&mut self, addr: u16) {
        let [lo, hi] = addr.to_le_bytes();
        self.emit("jmp", &format!("(${addr:04x})"), &[0x6C, lo, hi]);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_m(&self, mnemonic: &'static str, required: Width) -> Result<(), AsmError> {
        let actual = if self.m8 { Width::Bits8 } else { Width::Bits16 };
        if actual == required {
            Ok(())
        } else {
            Err(AsmError::AccumulatorWidth {
                mnemonic,
                required,
                actual,
            })
        }
    }

    fn check_x(&self, mnemonic: &'static str, required: Width) -> Result<(), AsmError> {
        let actual = if self.x8 { Width::Bits8 } else { Width::Bits16 };
        if actual == required {
            Ok(())
        } else {
            Err(AsmError::IndexWidth {
                mnemonic,
                required,
                actual,
            })
        }
    }

    fn emit(&mut self, mnemonic: &str, operand: &str, bytes: &[u8]) {
        let address = self.address();
        if let Some(text) = self.text.as_mut() {
            let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
            let _ = writeln!(
                text,
                "    {mnemonic:<4} {operand:<16} ; ${address:06x}  {}",
                hex.join(" ")
            );
        }
        self.code.extend_from_slice(bytes);
    }
}
