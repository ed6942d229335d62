//! Address arguments and hex output

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use snesgate_core::{AddressSpace, AddressTuple, MemoryMapping};

/// Address space as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpaceArg {
    /// FX Pak Pro device space
    Pak,
    /// SNES CPU bus (needs --mapping)
    Bus,
    /// Device-native, untranslated
    Raw,
}

impl From<SpaceArg> for AddressSpace {
    fn from(space: SpaceArg) -> Self {
        match space {
            SpaceArg::Pak => AddressSpace::FxPakPro,
            SpaceArg::Bus => AddressSpace::SnesBus,
            SpaceArg::Raw => AddressSpace::Raw,
        }
    }
}

/// Cartridge mapping as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MappingArg {
    Lorom,
    Hirom,
    Exlorom,
    Exhirom,
    Sa1,
}

impl From<MappingArg> for MemoryMapping {
    fn from(mapping: MappingArg) -> Self {
        match mapping {
            MappingArg::Lorom => MemoryMapping::LoRom,
            MappingArg::Hirom => MemoryMapping::HiRom,
            MappingArg::Exlorom => MemoryMapping::ExLoRom,
            MappingArg::Exhirom => MemoryMapping::ExHiRom,
            MappingArg::Sa1 => MemoryMapping::Sa1,
        }
    }
}

/// Parse a hex address written as `$7E0010`, `0x7e0010` or `7e0010`
pub fn parse_address(text: &str) -> Result<u32> {
    let digits = text
        .strip_prefix('$')
        .or_else(|| text.strip_prefix("0x"))
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() {
        bail!("empty address");
    }
    u32::from_str_radix(digits, 16).with_context(|| format!("invalid hex address {text:?}"))
}

pub fn tuple(address: u32, space: SpaceArg, mapping: Option<MappingArg>) -> AddressTuple {
    AddressTuple::new(
        address,
        space.into(),
        mapping.map(MemoryMapping::from).unwrap_or_default(),
    )
}

/// Parse hex bytes, ignoring whitespace
pub fn parse_data(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).with_context(|| format!("invalid hex data {text:?}"))
}

/// Classic 16-bytes-per-line hex dump starting at `address`
pub fn hexdump(address: u32, data: &[u8]) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(i, line)| {
            let bytes: Vec<String> = line.iter().map(|b| hex::encode([*b])).collect();
            format!("{:06x}  {}", address as usize + i * 16, bytes.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(parse_address("$7E0010").unwrap(), 0x7E_0010);
        assert_eq!(parse_address("0xf50000").unwrap(), 0xF5_0000);
        assert_eq!(parse_address("2c00").unwrap(), 0x2C00);
        assert!(parse_address("$").is_err());
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn test_tuple_defaults_to_unknown_mapping() {
        let t = tuple(0x8000, SpaceArg::Bus, None);
        assert_eq!(t.space, AddressSpace::SnesBus);
        assert_eq!(t.mapping, MemoryMapping::Unknown);
        assert_eq!(tuple(0, SpaceArg::Pak, Some(MappingArg::Hirom)).mapping, MemoryMapping::HiRom);
    }

    #[test]
    fn test_parse_data() {
        assert_eq!(parse_data("01 02 ff").unwrap(), vec![1, 2, 0xFF]);
        assert!(parse_data("0").is_err());
    }

    #[test]
    fn test_hexdump() {
        let data: Vec<u8> = (0..18).collect();
        let dump = hexdump(0xF5_0000, &data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("f50000  00 01 02"));
        assert_eq!(lines[1], "f50010  10 11");
    }
}
