//! Driver table and gateway
//!
//! The set of backends is closed and known at compile time, so it is a
//! [`Driver`] enum rather than a registry of trait objects. A [`Gateway`]
//! owns one instance of every enabled driver and hands out [`DeviceHandle`]s.
//!
//! # Usage
//!
//! ```rust,ignore
//! use snesgate_core::{Gateway, config};
//!
//! let gateway = Gateway::from_config(&config::load());
//! for descriptor in gateway.list_descriptors() {
//!     println!("{}", descriptor.uri);
//! }
//! let handle = gateway.open("fxpakpro://./dev/ttyACM0")?;
//! let responses = handle.multi_read(&reads, gateway.default_deadline())?;
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::deadline::Deadline;
use crate::device::{
    Capabilities, DeviceDescriptor, Device, DirEntry, Field, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
use crate::error::{DeviceError, Result};
use crate::fxpakpro::{self, FxPakProDriver, FxPakProSettings};
use crate::mapping::{Detection, MemoryMapping, ScoreWeights, detect::detect_mapping_with};
use crate::mock::{self, MockDriver};

/// Which backend a device belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    FxPakPro,
    Mock,
}

impl DriverKind {
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::FxPakPro => fxpakpro::SCHEME,
            Self::Mock => mock::SCHEME,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

// ============================================================================
// URIs
// ============================================================================

/// A parsed `scheme://host/path` device URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUri {
    raw: String,
    scheme: String,
    host: String,
    path: String,
}

impl DeviceUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| DeviceError::InvalidArgument(format!("{uri}: missing scheme")))?;
        if scheme.is_empty() {
            return Err(DeviceError::InvalidArgument(format!("{uri}: empty scheme")));
        }
        let (host, path) = match rest.find('/') {
            Some(at) => rest.split_at(at),
            None => (rest, ""),
        };
        Ok(Self {
            raw: uri.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path including its leading `/`, or empty
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for DeviceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// Driver table
// ============================================================================

/// One backend and its connection registry
pub enum Driver {
    FxPakPro(FxPakProDriver),
    Mock(MockDriver),
}

impl Driver {
    pub fn kind(&self) -> DriverKind {
        match self {
            Self::FxPakPro(_) => DriverKind::FxPakPro,
            Self::Mock(_) => DriverKind::Mock,
        }
    }

    /// Operations every device of this backend offers
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::FxPakPro(_) => fxpakpro::CAPABILITIES,
            Self::Mock(_) => mock::CAPABILITIES,
        }
    }

    pub fn discover(&self) -> Result<Vec<DeviceDescriptor>> {
        match self {
            Self::FxPakPro(driver) => driver.discover(),
            Self::Mock(driver) => driver.discover(),
        }
    }

    pub fn connection_key(&self, uri: &DeviceUri) -> Result<String> {
        match self {
            Self::FxPakPro(driver) => driver.connection_key(uri),
            Self::Mock(driver) => driver.connection_key(uri),
        }
    }

    /// Run `op` against the open device for `key`, opening it first if needed
    pub fn use_device<T>(&self, key: &str, op: impl FnOnce(&dyn Device) -> Result<T>) -> Result<T> {
        match self {
            Self::FxPakPro(driver) => driver
                .manager()
                .use_device(key, || driver.open(key), |device| op(device)),
            Self::Mock(driver) => driver
                .manager()
                .use_device(key, || driver.open(key), |device| op(device)),
        }
    }

    /// Close and forget the connection for `key`
    pub fn close(&self, key: &str) -> Result<()> {
        match self {
            Self::FxPakPro(driver) => driver.manager().close(key),
            Self::Mock(driver) => driver.manager().close(key),
        }
    }

    /// Keys with an open connection
    pub fn open_keys(&self) -> Vec<String> {
        match self {
            Self::FxPakPro(driver) => driver.manager().keys(),
            Self::Mock(driver) => driver.manager().keys(),
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Entry point for clients: every enabled driver behind one API
pub struct Gateway {
    drivers: Vec<Arc<Driver>>,
    default_timeout: Duration,
}

impl Gateway {
    pub fn new(drivers: Vec<Driver>, default_timeout: Duration) -> Self {
        Self {
            drivers: drivers.into_iter().map(Arc::new).collect(),
            default_timeout,
        }
    }

    /// Build the driver table from configuration
    pub fn from_config(config: &Config) -> Self {
        let mut drivers = Vec::new();
        if !config.fxpakpro.disable {
            drivers.push(Driver::FxPakPro(FxPakProDriver::new(FxPakProSettings::from(&config.fxpakpro))));
        }
        if config.mock.enable {
            drivers.push(Driver::Mock(MockDriver::new(config.mock.rom_path.clone())));
        }
        tracing::debug!(
            drivers = ?drivers.iter().map(Driver::kind).collect::<Vec<_>>(),
            "gateway configured"
        );
        Self::new(drivers, Duration::from_millis(config.fxpakpro.timeout_ms))
    }

    pub fn drivers(&self) -> impl Iterator<Item = &Driver> {
        self.drivers.iter().map(|driver| driver.as_ref())
    }

    /// Deadline for a request that did not bring its own
    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(self.default_timeout)
    }

    /// Discover devices on every driver concurrently
    ///
    /// A driver whose discovery fails contributes nothing; the failure is logged.
    pub fn list_descriptors(&self) -> Vec<DeviceDescriptor> {
        std::thread::scope(|scope| {
            let probes: Vec<_> = self
                .drivers
                .iter()
                .map(|driver| (driver.kind(), scope.spawn(move || driver.discover())))
                .collect();

            let mut descriptors = Vec::new();
            for (kind, probe) in probes {
                match probe.join() {
                    Ok(Ok(found)) => descriptors.extend(found),
                    Ok(Err(e)) => tracing::warn!(driver = %kind, error = %e, "discovery failed"),
                    Err(_) => tracing::warn!(driver = %kind, "discovery thread panicked"),
                }
            }
            descriptors
        })
    }

    /// Handle for the device at `uri`; the connection opens on first use
    pub fn open(&self, uri: &str) -> Result<DeviceHandle> {
        let uri = DeviceUri::parse(uri)?;
        let driver = self
            .drivers
            .iter()
            .find(|driver| driver.kind().scheme() == uri.scheme())
            .ok_or_else(|| DeviceError::NotFound(format!("no enabled driver for scheme {:?}", uri.scheme())))?;
        let key = driver.connection_key(&uri)?;
        Ok(DeviceHandle {
            driver: Arc::clone(driver),
            uri: uri.as_str().to_string(),
            key,
        })
    }

    /// Disconnect the device behind `handle`
    pub fn close(&self, handle: &DeviceHandle) -> Result<()> {
        tracing::info!(uri = %handle.uri, "closing device");
        handle.driver.close(&handle.key)
    }
}

/// A logical connection to one device
///
/// Cheap to clone. The backing connection is opened lazily, reopened after a
/// fatal error, and shared by every handle with the same connection key.
#[derive(Clone)]
pub struct DeviceHandle {
    driver: Arc<Driver>,
    uri: String,
    key: String,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("kind", &self.driver.kind())
            .field("uri", &self.uri)
            .field("key", &self.key)
            .finish()
    }
}

impl DeviceHandle {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> DriverKind {
        self.driver.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.driver.capabilities()
    }

    fn call<T>(&self, required: Capabilities, op: impl FnOnce(&dyn Device) -> Result<T>) -> Result<T> {
        self.capabilities().require(required)?;
        self.driver.use_device(&self.key, op)
    }

    pub fn multi_read(&self, reads: &[ReadRequest], deadline: Deadline) -> Result<Vec<ReadResponse>> {
        self.call(Capabilities::READ_MEMORY, |d| d.multi_read(reads, deadline))
    }

    pub fn multi_write(&self, writes: &[WriteRequest], deadline: Deadline) -> Result<Vec<WriteResponse>> {
        self.call(Capabilities::WRITE_MEMORY, |d| d.multi_write(writes, deadline))
    }

    pub fn reset_system(&self, deadline: Deadline) -> Result<()> {
        self.call(Capabilities::RESET_SYSTEM, |d| d.reset_system(deadline))
    }

    pub fn reset_to_menu(&self, deadline: Deadline) -> Result<()> {
        self.call(Capabilities::RESET_TO_MENU, |d| d.reset_to_menu(deadline))
    }

    pub fn pause_unpause(&self, paused: bool, deadline: Deadline) -> Result<bool> {
        self.call(Capabilities::PAUSE_UNPAUSE, |d| d.pause_unpause(paused, deadline))
    }

    pub fn pause_toggle(&self, deadline: Deadline) -> Result<()> {
        self.call(Capabilities::PAUSE_TOGGLE, |d| d.pause_toggle(deadline))
    }

    pub fn read_directory(&self, path: &str, deadline: Deadline) -> Result<Vec<DirEntry>> {
        self.call(Capabilities::READ_DIRECTORY, |d| d.read_directory(path, deadline))
    }

    pub fn make_directory(&self, path: &str, deadline: Deadline) -> Result<()> {
        self.call(Capabilities::MAKE_DIRECTORY, |d| d.make_directory(path, deadline))
    }

    pub fn remove_file(&self, path: &str, deadline: Deadline) -> Result<()> {
        self.call(Capabilities::REMOVE_FILE, |d| d.remove_file(path, deadline))
    }

    pub fn rename_file(&self, path: &str, new_name: &str, deadline: Deadline) -> Result<()> {
        self.call(Capabilities::RENAME_FILE, |d| d.rename_file(path, new_name, deadline))
    }

    pub fn put_file(&self, path: &str, size: u32, reader: &mut dyn Read, deadline: Deadline) -> Result<u32> {
        self.call(Capabilities::PUT_FILE, |d| d.put_file(path, size, reader, deadline))
    }

    pub fn get_file(&self, path: &str, writer: &mut dyn Write, deadline: Deadline) -> Result<u32> {
        self.call(Capabilities::GET_FILE, |d| d.get_file(path, writer, deadline))
    }

    pub fn boot_file(&self, path: &str, deadline: Deadline) -> Result<()> {
        self.call(Capabilities::BOOT_FILE, |d| d.boot_file(path, deadline))
    }

    pub fn fetch_fields(&self, fields: &[Field], deadline: Deadline) -> Result<Vec<String>> {
        self.call(Capabilities::FETCH_FIELDS, |d| d.fetch_fields(fields, deadline))
    }

    /// Detect the cartridge mapping
    ///
    /// With `header_bytes` no connection is opened at all.
    pub fn detect_mapping(
        &self,
        fallback: Option<MemoryMapping>,
        header_bytes: Option<&[u8]>,
        deadline: Deadline,
    ) -> Result<Detection> {
        self.detect_mapping_with(fallback, header_bytes, &ScoreWeights::default(), deadline)
    }

    /// [`DeviceHandle::detect_mapping`] with explicit scoring weights
    pub fn detect_mapping_with(
        &self,
        fallback: Option<MemoryMapping>,
        header_bytes: Option<&[u8]>,
        weights: &ScoreWeights,
        deadline: Deadline,
    ) -> Result<Detection> {
        if header_bytes.is_some() {
            return detect_mapping_with(&NoDevice, fallback, header_bytes, weights, deadline);
        }
        self.call(Capabilities::READ_MEMORY, |d| {
            detect_mapping_with(d, fallback, None, weights, deadline)
        })
    }
}

/// Stand-in reader for detection from prefetched headers; never called
struct NoDevice;

impl Device for NoDevice {
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{AddressTuple, HEADER_SIZE};

    fn mock_gateway() -> Gateway {
        let mut config = Config::default();
        config.fxpakpro.disable = true;
        config.mock.enable = true;
        Gateway::from_config(&config)
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    #[test]
    fn test_parse_uri() {
        let uri = DeviceUri::parse("fxpakpro://./dev/ttyACM0").unwrap();
        assert_eq!(uri.scheme(), "fxpakpro");
        assert_eq!(uri.host(), ".");
        assert_eq!(uri.path(), "/dev/ttyACM0");

        let uri = DeviceUri::parse("MOCK://./snes").unwrap();
        assert_eq!(uri.scheme(), "mock");
        assert_eq!(uri.path(), "/snes");

        let uri = DeviceUri::parse("mock://host").unwrap();
        assert_eq!(uri.path(), "");

        assert!(DeviceUri::parse("/dev/ttyACM0").is_err());
        assert!(DeviceUri::parse("://x").is_err());
    }

    #[test]
    fn test_from_config_selects_drivers() {
        let kinds: Vec<DriverKind> = mock_gateway().drivers().map(Driver::kind).collect();
        assert_eq!(kinds, vec![DriverKind::Mock]);

        let kinds: Vec<DriverKind> = Gateway::from_config(&Config::default()).drivers().map(Driver::kind).collect();
        assert_eq!(kinds, vec![DriverKind::FxPakPro]);
    }

    #[test]
    fn test_list_descriptors() {
        let descriptors = mock_gateway().list_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].uri, "mock://./snes");
        assert_eq!(descriptors[0].kind, DriverKind::Mock);
    }

    #[test]
    fn test_open_is_lazy_and_shared() {
        let gateway = mock_gateway();
        let a = gateway.open("mock://./snes").unwrap();
        let b = gateway.open("mock://./snes").unwrap();
        let driver = gateway.drivers().next().unwrap();
        assert!(driver.open_keys().is_empty());

        a.multi_write(
            &[WriteRequest {
                address: AddressTuple::pak(0xF5_0000),
                data: vec![5, 6],
            }],
            deadline(),
        )
        .unwrap();
        let responses = b
            .multi_read(
                &[ReadRequest {
                    address: AddressTuple::pak(0xF5_0000),
                    size: 2,
                }],
                deadline(),
            )
            .unwrap();
        assert_eq!(responses[0].data, vec![5, 6]);
        assert_eq!(driver.open_keys(), vec!["snes".to_string()]);

        gateway.close(&a).unwrap();
        assert!(driver.open_keys().is_empty());
    }

    #[test]
    fn test_unknown_scheme() {
        let gateway = mock_gateway();
        assert!(matches!(gateway.open("fxpakpro://./COM3"), Err(DeviceError::NotFound(_))));
        assert!(matches!(gateway.open("retroarch://localhost"), Err(DeviceError::NotFound(_))));
    }

    #[test]
    fn test_missing_capability_rejected_before_open() {
        let gateway = mock_gateway();
        let handle = gateway.open("mock://./snes").unwrap();

        let err = handle.boot_file("/game.sfc", deadline()).unwrap_err();
        assert!(matches!(err, DeviceError::Unsupported(c) if c == Capabilities::BOOT_FILE));
        assert!(!err.is_fatal());
        assert!(gateway.drivers().next().unwrap().open_keys().is_empty());
    }

    #[test]
    fn test_detect_from_prefetched_header_does_no_io() {
        let gateway = mock_gateway();
        let handle = gateway.open("mock://./snes").unwrap();

        let blank = vec![0u8; 2 * HEADER_SIZE];
        let detection = handle
            .detect_mapping(Some(MemoryMapping::HiRom), Some(&blank), deadline())
            .unwrap();
        assert_eq!(detection.mapping, MemoryMapping::HiRom);
        assert!(!detection.confident);
        assert!(gateway.drivers().next().unwrap().open_keys().is_empty());
    }

    #[test]
    fn test_detect_reads_through_device() {
        let gateway = mock_gateway();
        let handle = gateway.open("mock://./snes").unwrap();
        let detection = handle.detect_mapping(None, None, deadline()).unwrap();
        assert_eq!(detection.mapping, MemoryMapping::Unknown);
        assert_eq!(detection.header_bytes.len(), 2 * HEADER_SIZE);
    }

    #[test]
    fn test_pause_through_handle() {
        let gateway = mock_gateway();
        let handle = gateway.open("mock://./snes").unwrap();
        assert!(handle.pause_unpause(true, deadline()).unwrap());
        assert_eq!(handle.fetch_fields(&[Field::DeviceStatus], deadline()).unwrap(), vec!["paused"]);
        handle.pause_toggle(deadline()).unwrap();
        assert_eq!(handle.fetch_fields(&[Field::DeviceStatus], deadline()).unwrap(), vec!["running"]);
    }
}
