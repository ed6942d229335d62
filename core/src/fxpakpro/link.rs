//! USBA command exchange over a [`Transport`]
//!
//! One method per protocol operation. Whole-buffer and filesystem commands
//! treat any bad response as fatal. VGET/VPUT report a non-zero status as a
//! soft error; a bad header is still fatal.
//!
//! A `Link` has no locking of its own. The owning device holds it behind a
//! mutex for an entire logical operation and hands `&mut Link` down.

use std::io::{Read, Write};

use crate::deadline::Deadline;
use crate::device::{DirEntry, DirEntryKind};
use crate::error::{DeviceError, Result};

use super::packet::{
    self, FRAME_SIZE, Flags, Info, MAX_CHUNK_SIZE, MAX_CHUNKS, Opcode, Space, VFRAME_SIZE,
};
use super::transport::Transport;

/// LS entry type: directory
const LS_DIRECTORY: u8 = 0;
/// LS entry type: file
const LS_FILE: u8 = 1;
/// LS marker: listing continues in the next frame
const LS_NEXT_FRAME: u8 = 2;
/// LS marker: end of listing
const LS_END: u8 = 0xFF;

pub struct Link {
    transport: Box<dyn Transport>,
}

impl Link {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    fn send(&mut self, frame: &[u8], deadline: Deadline) -> Result<()> {
        tracing::trace!(opcode = frame[4], space = frame[5], len = frame.len(), "usba send");
        self.transport.write_all(frame, deadline)
    }

    fn recv(&mut self, len: usize, deadline: Deadline) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.transport.read_exact(&mut buf, deadline)?;
        Ok(buf)
    }

    /// Send a whole-buffer command and validate its 512-byte response
    fn exchange(&mut self, frame: &[u8], op: Opcode, deadline: Deadline) -> Result<Vec<u8>> {
        self.send(frame, deadline)?;
        let response = self.recv(FRAME_SIZE, deadline)?;
        packet::check_response(&response, op, true)?;
        Ok(response)
    }

    // ========================================================================
    // Vectorized memory access
    // ========================================================================

    /// Read up to eight `(address, size)` chunks, returning their bytes concatenated
    pub fn vget(&mut self, space: Space, chunks: &[(u32, u8)], deadline: Deadline) -> Result<Vec<u8>> {
        let total = self.send_vget(space, chunks, deadline)?;
        self.recv_vget(total, deadline)
    }

    /// Send a VGET frame without waiting for its reply
    ///
    /// Returns the payload size to hand to [`Link::recv_vget`]. Replies come
    /// back in the order the frames were sent.
    pub fn send_vget(&mut self, space: Space, chunks: &[(u32, u8)], deadline: Deadline) -> Result<usize> {
        check_chunks(chunks.len())?;
        self.send(&packet::vector_command(Opcode::VGet, space, chunks), deadline)?;
        Ok(chunks.iter().map(|&(_, size)| size as usize).sum())
    }

    /// Read the reply to the oldest outstanding VGET
    pub fn recv_vget(&mut self, total: usize, deadline: Deadline) -> Result<Vec<u8>> {
        let header = self.recv(VFRAME_SIZE, deadline)?;
        packet::check_response(&header, Opcode::VGet, false)?;

        let mut data = self.recv(packet::padded_len(total, VFRAME_SIZE), deadline)?;
        data.truncate(total);
        Ok(data)
    }

    /// Write up to eight `(address, data)` chunks
    pub fn vput(&mut self, space: Space, chunks: &[(u32, &[u8])], deadline: Deadline) -> Result<()> {
        check_chunks(chunks.len())?;
        let mut tuples = Vec::with_capacity(chunks.len());
        let mut data = Vec::new();
        for &(address, bytes) in chunks {
            if bytes.is_empty() || bytes.len() > MAX_CHUNK_SIZE {
                return Err(DeviceError::InvalidArgument(format!(
                    "vput chunk of {} bytes at ${address:06x}",
                    bytes.len()
                )));
            }
            tuples.push((address, bytes.len() as u8));
            data.extend_from_slice(bytes);
        }
        data.resize(packet::padded_len(data.len(), VFRAME_SIZE), 0);

        self.send(&packet::vector_command(Opcode::VPut, space, &tuples), deadline)?;
        self.transport.write_all(&data, deadline)?;
        let header = self.recv(VFRAME_SIZE, deadline)?;
        packet::check_response(&header, Opcode::VPut, false)
    }

    // ========================================================================
    // Filesystem
    // ========================================================================

    pub fn list(&mut self, path: &str, deadline: Deadline) -> Result<Vec<DirEntry>> {
        let frame = packet::name_command(Opcode::Ls, Space::File, Flags::empty(), path, 0)?;
        self.exchange(&frame, Opcode::Ls, deadline)?;

        let mut entries = Vec::new();
        'frames: loop {
            let block = self.recv(FRAME_SIZE, deadline)?;
            let mut at = 0;
            while at < block.len() {
                let kind = match block[at] {
                    LS_END => break 'frames,
                    LS_NEXT_FRAME => continue 'frames,
                    LS_DIRECTORY => DirEntryKind::Directory,
                    LS_FILE => DirEntryKind::File,
                    other => {
                        return Err(DeviceError::Protocol(format!("ls: unknown entry type {other:#04x}")));
                    }
                };
                let rest = &block[at + 1..];
                let end = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| DeviceError::Protocol("ls: unterminated entry name".to_string()))?;
                entries.push(DirEntry {
                    name: String::from_utf8_lossy(&rest[..end]).into_owned(),
                    kind,
                });
                at += end + 2;
            }
            // A frame that runs out without a marker is a desynchronized stream
            return Err(DeviceError::Protocol("ls: listing frame without terminator".to_string()));
        }
        Ok(entries)
    }

    pub fn mkdir(&mut self, path: &str, deadline: Deadline) -> Result<()> {
        let frame = packet::name_command(Opcode::Mkdir, Space::File, Flags::empty(), path, 0)?;
        self.exchange(&frame, Opcode::Mkdir, deadline).map(drop)
    }

    pub fn remove(&mut self, path: &str, deadline: Deadline) -> Result<()> {
        let frame = packet::name_command(Opcode::Rm, Space::File, Flags::empty(), path, 0)?;
        self.exchange(&frame, Opcode::Rm, deadline).map(drop)
    }

    pub fn rename(&mut self, path: &str, new_name: &str, deadline: Deadline) -> Result<()> {
        let frame = packet::rename_command(path, new_name)?;
        self.exchange(&frame, Opcode::Mv, deadline).map(drop)
    }

    pub fn boot(&mut self, path: &str, deadline: Deadline) -> Result<()> {
        let frame = packet::name_command(Opcode::Boot, Space::File, Flags::empty(), path, 0)?;
        self.exchange(&frame, Opcode::Boot, deadline).map(drop)
    }

    /// Stream a file from the device into `writer`, returning its size
    pub fn get_file(&mut self, path: &str, writer: &mut dyn Write, deadline: Deadline) -> Result<u32> {
        let frame = packet::name_command(Opcode::Get, Space::File, Flags::empty(), path, 0)?;
        let response = self.exchange(&frame, Opcode::Get, deadline)?;
        let size = packet::response_size(&response);

        let mut left = size as usize;
        let mut block = vec![0u8; FRAME_SIZE];
        while left > 0 {
            self.transport.read_exact(&mut block, deadline)?;
            let take = left.min(FRAME_SIZE);
            writer.write_all(&block[..take])?;
            left -= take;
        }
        tracing::debug!(path, size, "downloaded file");
        Ok(size)
    }

    /// Stream `size` bytes from `reader` to a file on the device
    pub fn put_file(&mut self, path: &str, size: u32, reader: &mut dyn Read, deadline: Deadline) -> Result<u32> {
        let frame = packet::name_command(Opcode::Put, Space::File, Flags::empty(), path, size)?;
        self.exchange(&frame, Opcode::Put, deadline)?;

        let mut left = size as usize;
        let mut block = vec![0u8; FRAME_SIZE];
        while left > 0 {
            let take = left.min(FRAME_SIZE);
            // Once the header is out the device expects every byte, so a
            // short reader is a fatal desync from here on.
            reader.read_exact(&mut block[..take])?;
            block[take..].fill(0);
            self.transport.write_all(&block, deadline)?;
            left -= take;
        }
        tracing::debug!(path, size, "uploaded file");
        Ok(size)
    }

    // ========================================================================
    // System
    // ========================================================================

    pub fn reset(&mut self, deadline: Deadline) -> Result<()> {
        let frame = packet::command(Opcode::Reset, Space::Snes, Flags::empty());
        self.exchange(&frame, Opcode::Reset, deadline).map(drop)
    }

    pub fn menu_reset(&mut self, deadline: Deadline) -> Result<()> {
        let frame = packet::command(Opcode::MenuReset, Space::Snes, Flags::empty());
        self.exchange(&frame, Opcode::MenuReset, deadline).map(drop)
    }

    pub fn info(&mut self, deadline: Deadline) -> Result<Info> {
        let frame = packet::command(Opcode::Info, Space::Snes, Flags::empty());
        let response = self.exchange(&frame, Opcode::Info, deadline)?;
        Info::decode(&response)
    }
}

fn check_chunks(count: usize) -> Result<()> {
    if count == 0 || count > MAX_CHUNKS {
        return Err(DeviceError::InvalidArgument(format!(
            "vectorized frame needs 1..={MAX_CHUNKS} chunks, got {count}"
        )));
    }
    Ok(())
}
