//! Batched memory access over VGET/VPUT
//!
//! Requests are cut into chunks of at most 255 bytes and accumulated into two
//! groups, one per target space (SNES memory and the command space), since a
//! frame cannot mix spaces. A group is sent as soon as it holds eight chunks;
//! whatever is left goes out once the request list is exhausted. Read data is
//! handed back in submission order.
//!
//! Consecutive VGET frames for the same space are pipelined: up to
//! [`PIPELINE_DEPTH`] frames go out before their replies are read back.
//!
//! Writes landing in work RAM cannot be done by VPUT and are carved out for
//! [`super::exe::write_wram`].

use smallvec::SmallVec;

use crate::deadline::Deadline;
use crate::error::Result;
use crate::mapping::{PAK_WRAM_BASE, PAK_WRAM_END, is_command_address};

use super::exe::{self, ExeSettings, WramWrite};
use super::link::Link;
use super::packet::{MAX_CHUNK_SIZE, MAX_CHUNKS, Space};

/// One wire chunk and where its bytes belong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Device address, command bit included
    pub address: u32,
    pub size: u8,
    /// Index of the request this chunk came from
    pub request: usize,
    /// Byte offset of this chunk within that request
    pub offset: usize,
}

type Group = SmallVec<[Chunk; MAX_CHUNKS]>;

/// Most VGET frames in flight before replies are read
pub const PIPELINE_DEPTH: usize = 4;

/// Cut `len` bytes at `address` into chunks of at most [`MAX_CHUNK_SIZE`]
pub fn split(request: usize, address: u32, offset: usize, len: usize) -> impl Iterator<Item = Chunk> {
    (0..len).step_by(MAX_CHUNK_SIZE).map(move |start| Chunk {
        address: address + start as u32,
        size: (len - start).min(MAX_CHUNK_SIZE) as u8,
        request,
        offset: offset + start,
    })
}

fn space_of(address: u32) -> Space {
    if is_command_address(address) {
        Space::Cmd
    } else {
        Space::Snes
    }
}

/// Per-space chunk accumulators
#[derive(Default)]
struct Batches {
    snes: Group,
    cmd: Group,
}

impl Batches {
    /// Add a chunk; returns its group once full
    fn push(&mut self, chunk: Chunk) -> Option<(Space, Group)> {
        let space = space_of(chunk.address);
        let group = match space {
            Space::Cmd => &mut self.cmd,
            _ => &mut self.snes,
        };
        group.push(chunk);
        (group.len() == MAX_CHUNKS).then(|| (space, std::mem::take(group)))
    }

    /// Take every non-empty group, SNES space first
    fn drain(&mut self) -> impl Iterator<Item = (Space, Group)> {
        [
            (Space::Snes, std::mem::take(&mut self.snes)),
            (Space::Cmd, std::mem::take(&mut self.cmd)),
        ]
        .into_iter()
        .filter(|(_, group)| !group.is_empty())
    }
}

fn wire_tuples(group: &Group) -> SmallVec<[(u32, u8); MAX_CHUNKS]> {
    group.iter().map(|c| (c.address & 0xFF_FFFF, c.size)).collect()
}

// ============================================================================
// Reads
// ============================================================================

/// Read each `(device_address, size)` range
pub fn read(link: &mut Link, reads: &[(u32, usize)], deadline: Deadline) -> Result<Vec<Vec<u8>>> {
    let mut out: Vec<Vec<u8>> = reads.iter().map(|&(_, size)| vec![0u8; size]).collect();
    let mut batches = Batches::default();
    let mut pipeline = ReadPipeline::default();

    for (i, &(address, size)) in reads.iter().enumerate() {
        for chunk in split(i, address, 0, size) {
            if let Some((space, group)) = batches.push(chunk) {
                pipeline.queue(link, space, group, &mut out, deadline)?;
            }
        }
    }
    for (space, group) in batches.drain() {
        pipeline.queue(link, space, group, &mut out, deadline)?;
    }
    pipeline.flush(link, &mut out, deadline)?;

    Ok(out)
}

/// Full VGET groups waiting to be sent back to back
#[derive(Default)]
struct ReadPipeline {
    space: Option<Space>,
    groups: Vec<Group>,
}

impl ReadPipeline {
    fn queue(
        &mut self,
        link: &mut Link,
        space: Space,
        group: Group,
        out: &mut [Vec<u8>],
        deadline: Deadline,
    ) -> Result<()> {
        if self.space.is_some_and(|s| s != space) || self.groups.len() == PIPELINE_DEPTH {
            self.flush(link, out, deadline)?;
        }
        self.space = Some(space);
        self.groups.push(group);
        Ok(())
    }

    /// Send every queued frame, then read the replies in order
    ///
    /// A soft status on one reply does not stop the others from being
    /// drained, so the link stays in step; the first such error is returned.
    fn flush(&mut self, link: &mut Link, out: &mut [Vec<u8>], deadline: Deadline) -> Result<()> {
        let Some(space) = self.space.take() else {
            return Ok(());
        };
        let groups = std::mem::take(&mut self.groups);

        let mut totals = SmallVec::<[usize; PIPELINE_DEPTH]>::new();
        for group in &groups {
            totals.push(link.send_vget(space, &wire_tuples(group), deadline)?);
        }

        let mut first_err = None;
        for (group, total) in groups.iter().zip(totals) {
            match link.recv_vget(total, deadline) {
                Ok(data) => {
                    tracing::trace!(?space, chunks = group.len(), bytes = data.len(), "vget");
                    scatter(group, &data, out);
                }
                Err(err) if !err.is_fatal() => {
                    first_err.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Copy a VGET payload back into the requests its chunks came from
fn scatter(group: &Group, data: &[u8], out: &mut [Vec<u8>]) {
    let mut at = 0;
    for chunk in group {
        let size = chunk.size as usize;
        out[chunk.request][chunk.offset..chunk.offset + size].copy_from_slice(&data[at..at + size]);
        at += size;
    }
}

// ============================================================================
// Writes
// ============================================================================

/// Write each `(device_address, data)` range, routing work RAM through USB-EXE
///
/// VPUT traffic goes out first, then the work RAM routine rounds.
pub fn write(link: &mut Link, writes: &[(u32, &[u8])], exe: &ExeSettings, deadline: Deadline) -> Result<()> {
    let mut batches = Batches::default();
    let mut wram = Vec::new();

    for (i, &(address, data)) in writes.iter().enumerate() {
        for piece in partition(address, data.len()) {
            if piece.wram {
                wram.push(WramWrite {
                    address: piece.address,
                    data: data[piece.offset..piece.offset + piece.len].to_vec(),
                });
                continue;
            }
            for chunk in split(i, piece.address, piece.offset, piece.len) {
                if let Some((space, group)) = batches.push(chunk) {
                    flush_write(link, space, &group, writes, deadline)?;
                }
            }
        }
    }
    for (space, group) in batches.drain() {
        flush_write(link, space, &group, writes, deadline)?;
    }

    if !wram.is_empty() {
        exe::write_wram(link, &wram, exe, deadline)?;
    }
    Ok(())
}

/// Write ranges with VPUT only, no work RAM diversion
pub fn write_direct(link: &mut Link, writes: &[(u32, &[u8])], deadline: Deadline) -> Result<()> {
    let mut batches = Batches::default();
    for (i, &(address, data)) in writes.iter().enumerate() {
        for chunk in split(i, address, 0, data.len()) {
            if let Some((space, group)) = batches.push(chunk) {
                flush_write(link, space, &group, writes, deadline)?;
            }
        }
    }
    for (space, group) in batches.drain() {
        flush_write(link, space, &group, writes, deadline)?;
    }
    Ok(())
}

fn flush_write(link: &mut Link, space: Space, group: &Group, writes: &[(u32, &[u8])], deadline: Deadline) -> Result<()> {
    let chunks: SmallVec<[(u32, &[u8]); MAX_CHUNKS]> = group
        .iter()
        .map(|c| {
            let data = writes[c.request].1;
            (c.address & 0xFF_FFFF, &data[c.offset..c.offset + c.size as usize])
        })
        .collect();
    tracing::trace!(?space, chunks = chunks.len(), "vput");
    link.vput(space, &chunks, deadline)
}

/// A sub-range of one write, inside or outside work RAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Piece {
    address: u32,
    offset: usize,
    len: usize,
    wram: bool,
}

/// Split a write at the edges of the work RAM window
fn partition(address: u32, len: usize) -> SmallVec<[Piece; 3]> {
    let mut pieces = SmallVec::new();
    if len == 0 {
        return pieces;
    }

    let end = address + len as u32;
    let lo = address.max(PAK_WRAM_BASE);
    let hi = end.min(PAK_WRAM_END);
    if is_command_address(address) || lo >= hi {
        pieces.push(Piece {
            address,
            offset: 0,
            len,
            wram: false,
        });
        return pieces;
    }

    for (start, stop, wram) in [(address, lo, false), (lo, hi, true), (hi, end, false)] {
        if start < stop {
            pieces.push(Piece {
                address: start,
                offset: (start - address) as usize,
                len: (stop - start) as usize,
                wram,
            });
        }
    }
    pieces
}
