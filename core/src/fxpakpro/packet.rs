//! USBA frame encoding
//!
//! Every command starts with the header `"USBA" opcode space flags`. Whole
//! buffer commands are 512 bytes with a big-endian size at 252 and either a
//! big-endian address or a NUL-padded name at 256. VGET/VPUT commands are 64
//! bytes carrying up to eight packed `size addr_hi addr_mid addr_lo` tuples at
//! offset 32. Responses reuse the header: opcode is `RESPONSE` and byte 5 is
//! the status code.

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};

use crate::error::{DeviceError, Result};

pub const MAGIC: &[u8; 4] = b"USBA";

/// Size of a whole-buffer frame
pub const FRAME_SIZE: usize = 512;

/// Size of a VGET/VPUT frame
pub const VFRAME_SIZE: usize = 64;

/// Largest single VGET/VPUT chunk
pub const MAX_CHUNK_SIZE: usize = 255;

/// Most chunks one VGET/VPUT frame can carry
pub const MAX_CHUNKS: usize = 8;

const SIZE_OFFSET: usize = 252;
const ADDRESS_OFFSET: usize = 256;
const NAME_OFFSET: usize = 256;
const NEW_NAME_OFFSET: usize = 8;
const CHUNK_OFFSET: usize = 32;

const STATUS_OFFSET: usize = 5;

/// Longest path that fits at the name offset with a terminating NUL
pub const MAX_NAME_LEN: usize = FRAME_SIZE - NAME_OFFSET - 1;

/// Longest new name accepted by MV
pub const MAX_NEW_NAME_LEN: usize = SIZE_OFFSET - NEW_NAME_OFFSET - 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Get = 0,
    Put,
    VGet,
    VPut,
    Ls,
    Mkdir,
    Rm,
    Mv,
    Reset,
    Boot,
    PowerCycle,
    Info,
    MenuReset,
    Stream,
    Time,
    Response,
}

impl Opcode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::VGet => "vget",
            Self::VPut => "vput",
            Self::Ls => "ls",
            Self::Mkdir => "mkdir",
            Self::Rm => "rm",
            Self::Mv => "mv",
            Self::Reset => "reset",
            Self::Boot => "boot",
            Self::PowerCycle => "power_cycle",
            Self::Info => "info",
            Self::MenuReset => "menu_reset",
            Self::Stream => "stream",
            Self::Time => "time",
            Self::Response => "response",
        }
    }
}

/// Target space byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    File = 0,
    Snes,
    Msu,
    Cmd,
    Config,
}

bitflags! {
    /// Command flag byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const SKIPRESET = 0x01;
        const ONLYRESET = 0x02;
        const CLRX = 0x04;
        const SETX = 0x08;
        const STREAM_BURST = 0x10;
        const NORESP = 0x40;
        const DATA64B = 0x80;
    }
}

fn frame(len: usize, opcode: Opcode, space: Space, flags: Flags) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    buf[..4].copy_from_slice(MAGIC);
    buf[4] = opcode as u8;
    buf[5] = space as u8;
    buf[6] = flags.bits();
    buf
}

/// Header-only whole-buffer command
pub fn command(opcode: Opcode, space: Space, flags: Flags) -> Vec<u8> {
    frame(FRAME_SIZE, opcode, space, flags)
}

/// Whole-buffer command carrying a size and an address
pub fn address_command(opcode: Opcode, space: Space, flags: Flags, address: u32, size: u32) -> Vec<u8> {
    let mut buf = frame(FRAME_SIZE, opcode, space, flags);
    BigEndian::write_u32(&mut buf[SIZE_OFFSET..], size);
    BigEndian::write_u32(&mut buf[ADDRESS_OFFSET..], address);
    buf
}

/// Whole-buffer command carrying a path, plus a size for uploads
pub fn name_command(opcode: Opcode, space: Space, flags: Flags, name: &str, size: u32) -> Result<Vec<u8>> {
    let mut buf = frame(FRAME_SIZE, opcode, space, flags);
    BigEndian::write_u32(&mut buf[SIZE_OFFSET..], size);
    put_name(&mut buf, NAME_OFFSET, MAX_NAME_LEN, name)?;
    Ok(buf)
}

/// MV command: old path at 256, new name at 8
pub fn rename_command(path: &str, new_name: &str) -> Result<Vec<u8>> {
    let mut buf = name_command(Opcode::Mv, Space::File, Flags::empty(), path, 0)?;
    put_name(&mut buf, NEW_NAME_OFFSET, MAX_NEW_NAME_LEN, new_name)?;
    Ok(buf)
}

fn put_name(buf: &mut [u8], offset: usize, max: usize, name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() > max {
        return Err(DeviceError::InvalidArgument(format!(
            "name is {} bytes, at most {} allowed",
            bytes.len(),
            max
        )));
    }
    if bytes.contains(&0) {
        return Err(DeviceError::InvalidArgument("name contains NUL".to_string()));
    }
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// VGET/VPUT command; `chunks` are `(address, size)` with at most [`MAX_CHUNKS`] entries
pub fn vector_command(opcode: Opcode, space: Space, chunks: &[(u32, u8)]) -> Vec<u8> {
    debug_assert!(chunks.len() <= MAX_CHUNKS);
    let mut buf = frame(VFRAME_SIZE, opcode, space, Flags::DATA64B);
    for (i, &(address, size)) in chunks.iter().enumerate() {
        let at = CHUNK_OFFSET + i * 4;
        buf[at] = size;
        BigEndian::write_u24(&mut buf[at + 1..at + 4], address & 0xFF_FFFF);
    }
    buf
}

/// Validate a response frame
///
/// Bad magic or opcode always means the stream is out of step and is fatal.
/// A non-zero status is fatal only when `fatal_status` is set.
pub fn check_response(response: &[u8], op: Opcode, fatal_status: bool) -> Result<()> {
    if response.len() < 8 || &response[..4] != MAGIC {
        return Err(DeviceError::Protocol(format!("{}: response has bad magic", op.name())));
    }
    if response[4] != Opcode::Response as u8 {
        return Err(DeviceError::Protocol(format!(
            "{}: expected response opcode, got {:#04x}",
            op.name(),
            response[4]
        )));
    }
    match response[STATUS_OFFSET] {
        0 => Ok(()),
        code if fatal_status => Err(DeviceError::fatal_status(op.name(), code)),
        code => Err(DeviceError::soft_status(op.name(), code)),
    }
}

/// Size field of a whole-buffer response
pub fn response_size(response: &[u8]) -> u32 {
    BigEndian::read_u32(&response[SIZE_OFFSET..SIZE_OFFSET + 4])
}

/// NUL-terminated string starting at `offset`
pub fn read_cstr(buf: &[u8], offset: usize) -> String {
    let tail = buf.get(offset..).unwrap_or_default();
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

/// Round `len` up to a whole number of `block`-sized frames
pub const fn padded_len(len: usize, block: usize) -> usize {
    len.div_ceil(block) * block
}

// ============================================================================
// INFO response
// ============================================================================

const INFO_ROM_NAME_OFFSET: usize = 16;
const INFO_FIRMWARE_OFFSET: usize = 256;
const INFO_VERSION_OFFSET: usize = 260;
const INFO_FEATURES_OFFSET: usize = 6;

/// Firmware details reported by INFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub firmware_version: u32,
    pub version: String,
    pub rom_name: String,
    pub features: u8,
}

impl Info {
    pub fn decode(response: &[u8]) -> Result<Self> {
        if response.len() < FRAME_SIZE {
            return Err(DeviceError::Protocol("info: short response".to_string()));
        }
        Ok(Self {
            firmware_version: BigEndian::read_u32(&response[INFO_FIRMWARE_OFFSET..]),
            version: read_cstr(response, INFO_VERSION_OFFSET),
            rom_name: read_cstr(response, INFO_ROM_NAME_OFFSET),
            features: response[INFO_FEATURES_OFFSET],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_command_layout() {
        let buf = address_command(Opcode::Get, Space::Snes, Flags::empty(), 0xF5_0000, 0x200);
        assert_eq!(buf.len(), FRAME_SIZE);
        assert_eq!(&buf[..4], b"USBA");
        assert_eq!(buf[4], 0);
        assert_eq!(buf[5], 1);
        assert_eq!(&buf[252..256], &[0x00, 0x00, 0x02, 0x00]);
        assert_eq!(&buf[256..260], &[0x00, 0xF5, 0x00, 0x00]);
    }

    #[test]
    fn test_vector_command_layout() {
        let buf = vector_command(Opcode::VGet, Space::Cmd, &[(0x2C00, 1), (0xF5_00FF, 255)]);
        assert_eq!(buf.len(), VFRAME_SIZE);
        assert_eq!(buf[4], Opcode::VGet as u8);
        assert_eq!(buf[5], Space::Cmd as u8);
        assert_eq!(buf[6], Flags::DATA64B.bits());
        assert_eq!(&buf[32..36], &[1, 0x00, 0x2C, 0x00]);
        assert_eq!(&buf[36..40], &[255, 0xF5, 0x00, 0xFF]);
        assert!(buf[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rename_layout() {
        let buf = rename_command("/roms/a.sfc", "b.sfc").unwrap();
        assert_eq!(buf[4], Opcode::Mv as u8);
        assert_eq!(buf[5], Space::File as u8);
        assert_eq!(read_cstr(&buf, 8), "b.sfc");
        assert_eq!(read_cstr(&buf, 256), "/roms/a.sfc");
    }

    #[test]
    fn test_name_too_long() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        let err = name_command(Opcode::Ls, Space::File, Flags::empty(), &long, 0).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidArgument(_)));
        assert!(name_command(Opcode::Ls, Space::File, Flags::empty(), &long[1..], 0).is_ok());
    }

    #[test]
    fn test_check_response() {
        let mut ok = command(Opcode::Response, Space::File, Flags::empty());
        assert!(check_response(&ok, Opcode::Boot, true).is_ok());

        ok[5] = 2;
        let fatal = check_response(&ok, Opcode::Boot, true).unwrap_err();
        assert!(fatal.is_fatal());
        let soft = check_response(&ok[..64], Opcode::VGet, false).unwrap_err();
        assert!(!soft.is_fatal());

        let mut bad = ok.clone();
        bad[0] = b'X';
        assert!(matches!(check_response(&bad, Opcode::VGet, false), Err(DeviceError::Protocol(_))));

        let mut wrong_op = ok;
        wrong_op[4] = Opcode::Get as u8;
        assert!(check_response(&wrong_op, Opcode::Get, false).unwrap_err().is_fatal());
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0, 64), 0);
        assert_eq!(padded_len(1, 64), 64);
        assert_eq!(padded_len(600, 64), 640);
        assert_eq!(padded_len(512, 512), 512);
    }

    #[test]
    fn test_info_decode() {
        let mut buf = command(Opcode::Response, Space::Snes, Flags::empty());
        buf[6] = 0x05;
        buf[16..25].copy_from_slice(b"/game.sfc");
        buf[256..260].copy_from_slice(&0x0001_0B00u32.to_be_bytes());
        buf[260..265].copy_from_slice(b"1.11b");

        let info = Info::decode(&buf).unwrap();
        assert_eq!(info.firmware_version, 0x0001_0B00);
        assert_eq!(info.version, "1.11b");
        assert_eq!(info.rom_name, "/game.sfc");
        assert_eq!(info.features, 0x05);
    }
}
