//! ROM mapping detection from cartridge headers
//!
//! Reads both candidate header locations, scores each with
//! [`RomHeader::score`] and picks the better one. The header bytes actually
//! used are returned so callers can cache them and skip the reads next time.

use crate::deadline::Deadline;
use crate::device::{Device, ReadRequest};
use crate::error::DeviceError;

use super::header::{HEADER_SIZE, HeaderSlot, RomHeader, ScoreWeights};
use super::{AddressTuple, AddressSpace, MemoryMapping};

/// Outcome of mapping detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub mapping: MemoryMapping,
    /// True when one candidate was plausible and clearly beat the other
    pub confident: bool,
    /// LoROM-slot header followed by HiROM-slot header
    pub header_bytes: Vec<u8>,
}

/// Detect the cartridge mapping
///
/// `header_bytes`, when given, must hold both candidate headers back to back
/// (LoROM slot first, `2 * HEADER_SIZE` bytes) and no device I/O happens.
/// Otherwise both regions are read from ROM through `device`.
///
/// When neither candidate reaches `ScoreWeights::min_score`, `fallback` (or
/// [`MemoryMapping::Unknown`]) is returned with `confident == false`.
pub fn detect_mapping<D: Device + ?Sized>(
    device: &D,
    fallback: Option<MemoryMapping>,
    header_bytes: Option<&[u8]>,
    deadline: Deadline,
) -> Result<Detection, DeviceError> {
    detect_mapping_with(device, fallback, header_bytes, &ScoreWeights::default(), deadline)
}

/// [`detect_mapping`] with explicit scoring weights
pub fn detect_mapping_with<D: Device + ?Sized>(
    device: &D,
    fallback: Option<MemoryMapping>,
    header_bytes: Option<&[u8]>,
    weights: &ScoreWeights,
    deadline: Deadline,
) -> Result<Detection, DeviceError> {
    let header_bytes = match header_bytes {
        Some(bytes) => {
            if bytes.len() != 2 * HEADER_SIZE {
                return Err(DeviceError::InvalidArgument(format!(
                    "prefetched header must be {} bytes, got {}",
                    2 * HEADER_SIZE,
                    bytes.len()
                )));
            }
            bytes.to_vec()
        }
        None => read_headers(device, deadline)?,
    };

    let (lo_bytes, hi_bytes) = header_bytes.split_at(HEADER_SIZE);
    let lo = RomHeader::parse(lo_bytes).map_err(|e| DeviceError::InvalidArgument(e.to_string()))?;
    let hi = RomHeader::parse(hi_bytes).map_err(|e| DeviceError::InvalidArgument(e.to_string()))?;

    let lo_score = lo.score(HeaderSlot::LoRom, weights);
    let hi_score = hi.score(HeaderSlot::HiRom, weights);
    tracing::debug!(lo_score, hi_score, lo_title = %lo.title(), hi_title = %hi.title(), "scored ROM headers");

    let (best_score, other_score, mapping) = if hi_score > lo_score {
        (hi_score, lo_score, hi.mapping_for(HeaderSlot::HiRom))
    } else {
        (lo_score, hi_score, lo.mapping_for(HeaderSlot::LoRom))
    };

    if best_score < weights.min_score {
        return Ok(Detection {
            mapping: fallback.unwrap_or_default(),
            confident: false,
            header_bytes,
        });
    }

    Ok(Detection {
        mapping,
        confident: best_score > other_score,
        header_bytes,
    })
}

/// Read both candidate header regions straight from ROM
fn read_headers<D: Device + ?Sized>(device: &D, deadline: Deadline) -> Result<Vec<u8>, DeviceError> {
    // ROM offsets are identical in device space for every mapping
    let reads = [HeaderSlot::LoRom, HeaderSlot::HiRom].map(|slot| ReadRequest {
        address: AddressTuple::new(slot.rom_offset(), AddressSpace::FxPakPro, MemoryMapping::LoRom),
        size: HEADER_SIZE,
    });

    let responses = device.multi_read(&reads, deadline)?;
    if responses.len() != 2 || responses.iter().any(|r| r.data.len() != HEADER_SIZE) {
        return Err(DeviceError::Protocol("short ROM header read".to_string()));
    }

    let mut bytes = Vec::with_capacity(2 * HEADER_SIZE);
    for response in responses {
        bytes.extend_from_slice(&response.data);
    }
    Ok(bytes)
}
