//! Gateway configuration (config.toml)
//!
//! Handles loading, saving, and providing defaults for driver settings.
//! Settings are stored in TOML format in the platform-specific config directory.
//!
//! ```toml
//! [fxpakpro]
//! timeout_ms = 5000
//! exe_poll_interval_ms = 20
//!
//! [mock]
//! enable = true
//! rom_path = "roms/test.sfc"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the config file inside [`config_dir`]
pub const CONFIG_FILE: &str = "config.toml";

/// Set to `1`/`true` to disable the FX Pak Pro driver
pub const ENV_FXPAKPRO_DISABLE: &str = "SNESGATE_FXPAKPRO_DISABLE";

/// Set to `1`/`true` to enable the mock driver
pub const ENV_MOCK_ENABLE: &str = "SNESGATE_MOCK_ENABLE";

/// Errors reading or writing configuration files
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no config directory available on this platform")]
    NoConfigDir,
}

/// Gateway configuration.
///
/// One section per driver plus logging. Every section may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// FX Pak Pro driver settings
    #[serde(default)]
    pub fxpakpro: FxPakProConfig,
    /// In-memory mock driver settings
    #[serde(default)]
    pub mock: MockConfig,
    /// Logging settings (read by binaries)
    #[serde(default)]
    pub log: LogConfig,
}

/// FX Pak Pro driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxPakProConfig {
    /// Skip this driver entirely (default: false)
    #[serde(default)]
    pub disable: bool,
    /// Default request deadline in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay between polls of the USB-EXE busy byte (default: 20)
    #[serde(default = "default_exe_poll_interval_ms")]
    pub exe_poll_interval_ms: u64,
    /// Give up waiting on the USB-EXE slot after this long (default: 5000)
    #[serde(default = "default_exe_timeout_ms")]
    pub exe_timeout_ms: u64,
    /// Serial baud rate; USB CDC ignores it but the OS needs a value (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Mock driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MockConfig {
    /// Advertise a mock device (default: false)
    #[serde(default)]
    pub enable: bool,
    /// ROM image loaded into mock cartridge ROM
    #[serde(default)]
    pub rom_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset (default: "info")
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_timeout_ms() -> u64 {
    5000
}
fn default_exe_poll_interval_ms() -> u64 {
    20
}
fn default_exe_timeout_ms() -> u64 {
    5000
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for FxPakProConfig {
    fn default() -> Self {
        Self {
            disable: false,
            timeout_ms: default_timeout_ms(),
            exe_poll_interval_ms: default_exe_poll_interval_ms(),
            exe_timeout_ms: default_exe_timeout_ms(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Apply `SNESGATE_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok());
        self
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if var(ENV_FXPAKPRO_DISABLE).is_some_and(|v| is_truthy(&v)) {
            self.fxpakpro.disable = true;
        }
        if var(ENV_MOCK_ENABLE).is_some_and(|v| is_truthy(&v)) {
            self.mock.enable = true;
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\snesgate\config`
/// On macOS: `~/Library/Application Support/io.snesgate.snesgate`
/// On Linux: `~/.config/snesgate`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "snesgate", "snesgate").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `config.toml` from the platform's configuration directory and
/// applies environment overrides. Returns default values if the file doesn't
/// exist or cannot be parsed.
pub fn load() -> Config {
    let config = match config_dir().map(|dir| dir.join(CONFIG_FILE)) {
        Some(path) if path.exists() => load_from(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            Config::default()
        }),
        _ => Config::default(),
    };
    config.with_env_overrides()
}

/// Loads the configuration from a specific file.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    from_toml_str(&content)
}

/// Parses configuration from TOML text.
pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Saves the configuration to the platform configuration directory.
///
/// Creates the directory if it doesn't exist.
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    let path = dir.join(CONFIG_FILE);
    save_to(config, &path)?;
    Ok(path)
}

/// Saves the configuration to a specific file, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
