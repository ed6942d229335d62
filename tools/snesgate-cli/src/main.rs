//! snesgate CLI - talk to a SNES through the device gateway
//!
//! # Commands
//!
//! - `snesgate list` - Show connectable devices
//! - `snesgate read` / `write` - Memory access by address tuple
//! - `snesgate ls` / `mkdir` / `rm` / `mv` / `get` / `put` / `boot` - Cartridge filesystem
//! - `snesgate reset` / `menu` - System control
//! - `snesgate detect` - Guess the cartridge mapping from its ROM header
//! - `snesgate fields` - Device and firmware information
//!
//! # Usage
//!
//! ```bash
//! # Read 32 bytes of work RAM through the LoROM bus view
//! snesgate read '$7E0000' 32 --space bus --mapping lorom
//!
//! # Patch SRAM on a specific cart
//! snesgate --uri fxpakpro://./dev/ttyACM0 write 0xE00010 "01 02 03"
//!
//! # Upload and boot a ROM
//! snesgate put game.sfc /roms/game.sfc && snesgate boot /roms/game.sfc
//! ```
//!
//! Logging follows `RUST_LOG`, falling back to `[log] filter` in config.toml.

mod address;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use snesgate_core::{
    Config, Deadline, DeviceHandle, DirEntryKind, Field, Gateway, MemoryMapping, ReadRequest, WriteRequest, config,
};

use address::{MappingArg, SpaceArg, hexdump, parse_address, parse_data, tuple};

/// snesgate - SNES device gateway CLI
#[derive(Parser)]
#[command(name = "snesgate")]
#[command(about = "Read, write and manage a SNES through its flash cart or an emulator")]
#[command(version)]
struct Cli {
    /// Device URI (default: first device found)
    #[arg(long, global = true)]
    uri: Option<String>,

    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Request timeout in milliseconds (default: from config)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectable devices
    List,

    #[command(flatten)]
    Device(DeviceCommand),
}

/// Commands that run against one opened device
#[derive(Subcommand)]
enum DeviceCommand {
    /// Read memory and print a hex dump
    Read {
        /// Hex address ($7E0000, 0xF50000, ...)
        #[arg(value_parser = parse_address)]
        address: u32,
        /// Number of bytes
        size: usize,
        #[arg(long, value_enum, default_value = "pak")]
        space: SpaceArg,
        #[arg(long, value_enum)]
        mapping: Option<MappingArg>,
        /// Write raw bytes to this file instead of printing
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Write hex bytes to memory
    Write {
        #[arg(value_parser = parse_address)]
        address: u32,
        /// Bytes as hex, spaces allowed ("01 02 ff")
        data: String,
        #[arg(long, value_enum, default_value = "pak")]
        space: SpaceArg,
        #[arg(long, value_enum)]
        mapping: Option<MappingArg>,
    },

    /// List a directory on the cartridge
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Create a directory on the cartridge
    Mkdir { path: String },

    /// Remove a file or empty directory on the cartridge
    Rm { path: String },

    /// Rename a file on the cartridge (new name stays in the same directory)
    Mv { path: String, new_name: String },

    /// Download a file from the cartridge
    Get {
        remote: String,
        /// Local destination (default: remote file name)
        local: Option<PathBuf>,
    },

    /// Upload a file to the cartridge
    Put { local: PathBuf, remote: String },

    /// Boot a ROM file on the cartridge
    Boot { path: String },

    /// Reset the console
    Reset,

    /// Return to the cartridge menu
    Menu,

    /// Detect the cartridge mapping from its ROM header
    Detect {
        /// Mapping to report when no header is plausible
        #[arg(long, value_enum)]
        fallback: Option<MappingArg>,
    },

    /// Show device and firmware information
    Fields,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides(),
        None => config::load(),
    };
    if let Some(timeout_ms) = cli.timeout_ms {
        config.fxpakpro.timeout_ms = timeout_ms;
    }

    init_logging(&config);

    let gateway = Gateway::from_config(&config);
    run(&gateway, &cli)
}

fn init_logging(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(gateway: &Gateway, cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::List => list(gateway),
        Commands::Device(command) => {
            let handle = open(gateway, cli.uri.as_deref())?;
            execute(gateway, &handle, command)
        }
    }
}

fn execute(gateway: &Gateway, handle: &DeviceHandle, command: &DeviceCommand) -> Result<()> {
    let deadline = gateway.default_deadline();

    match command {
        DeviceCommand::Read {
            address,
            size,
            space,
            mapping,
            output,
        } => {
            let request = ReadRequest {
                address: tuple(*address, *space, *mapping),
                size: *size,
            };
            let responses = handle.multi_read(&[request], deadline)?;
            let response = responses.into_iter().next().context("device returned no data")?;
            match output {
                Some(path) => std::fs::write(path, &response.data)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{}", hexdump(response.device_address.address, &response.data)),
            }
        }
        DeviceCommand::Write {
            address,
            data,
            space,
            mapping,
        } => {
            let request = WriteRequest {
                address: tuple(*address, *space, *mapping),
                data: parse_data(data)?,
            };
            let responses = handle.multi_write(&[request], deadline)?;
            for response in responses {
                println!("wrote {} bytes at {}", response.size, response.device_address);
            }
        }
        DeviceCommand::Ls { path } => {
            for entry in handle.read_directory(path, deadline)? {
                match entry.kind {
                    DirEntryKind::Directory => println!("{}/", entry.name),
                    DirEntryKind::File => println!("{}", entry.name),
                }
            }
        }
        DeviceCommand::Mkdir { path } => handle.make_directory(path, deadline)?,
        DeviceCommand::Rm { path } => handle.remove_file(path, deadline)?,
        DeviceCommand::Mv { path, new_name } => handle.rename_file(path, new_name, deadline)?,
        DeviceCommand::Get { remote, local } => {
            let local = match local {
                Some(path) => path.clone(),
                None => PathBuf::from(remote.rsplit('/').next().unwrap_or(remote.as_str())),
            };
            let mut file = File::create(&local).with_context(|| format!("creating {}", local.display()))?;
            let size = handle.get_file(remote, &mut file, transfer_deadline(gateway))?;
            println!("{remote} -> {} ({size} bytes)", local.display());
        }
        DeviceCommand::Put { local, remote } => {
            let file = File::open(local).with_context(|| format!("opening {}", local.display()))?;
            let len = file.metadata()?.len();
            let Ok(size) = u32::try_from(len) else {
                bail!("{} is too large ({len} bytes)", local.display());
            };
            let mut reader = BufReader::new(file);
            handle.put_file(remote, size, &mut reader, transfer_deadline(gateway))?;
            println!("{} -> {remote} ({size} bytes)", local.display());
        }
        DeviceCommand::Boot { path } => handle.boot_file(path, deadline)?,
        DeviceCommand::Reset => handle.reset_system(deadline)?,
        DeviceCommand::Menu => handle.reset_to_menu(deadline)?,
        DeviceCommand::Detect { fallback } => {
            let detection = handle.detect_mapping((*fallback).map(MemoryMapping::from), None, deadline)?;
            println!(
                "{}{}",
                detection.mapping,
                if detection.confident { "" } else { " (not confident)" }
            );
        }
        DeviceCommand::Fields => {
            let fields = [
                Field::DeviceName,
                Field::DeviceVersion,
                Field::DeviceStatus,
                Field::CoreName,
                Field::CoreVersion,
                Field::CorePlatform,
                Field::RomFileName,
            ];
            let values = handle.fetch_fields(&fields, deadline)?;
            for (field, value) in fields.iter().zip(values) {
                println!("{field:?}: {value}");
            }
        }
    }
    Ok(())
}

fn list(gateway: &Gateway) -> Result<()> {
    let descriptors = gateway.list_descriptors();
    if descriptors.is_empty() {
        eprintln!("No devices found.");
    }
    for descriptor in descriptors {
        println!("{:<32} {} [{:?}]", descriptor.uri, descriptor.display_name, descriptor.capabilities);
    }
    Ok(())
}

/// Handle for `uri`, or for the first discovered device
fn open(gateway: &Gateway, uri: Option<&str>) -> Result<DeviceHandle> {
    let uri = match uri {
        Some(uri) => uri.to_string(),
        None => gateway
            .list_descriptors()
            .into_iter()
            .next()
            .map(|descriptor| descriptor.uri)
            .context("no devices found; pass --uri or connect a device")?,
    };
    tracing::debug!(%uri, "using device");
    Ok(gateway.open(&uri)?)
}

/// File transfers run far longer than single commands
fn transfer_deadline(gateway: &Gateway) -> Deadline {
    gateway
        .default_deadline()
        .max(Deadline::after(Duration::from_secs(120)))
}
