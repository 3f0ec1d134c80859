//! TOML-based bus configuration.
//!
//! Reads and writes [`BusConfig`] from an explicit path or from the
//! platform-appropriate config file:
//! - Windows:  `%APPDATA%\dxl-master\bus.toml`
//! - Linux:    `~/.config/dxl-master/bus.toml`
//! - macOS:    `~/Library/Application Support/dxl-master/bus.toml`
//!
//! Example file:
//!
//! ```toml
//! [port]
//! device = "/dev/ttyUSB0"
//! baud_rate = 1000000
//! latency_timer_ms = 16
//!
//! [protocol]
//! version = "2.0"
//! ```
//!
//! # Serde default values
//!
//! Every field has a `#[serde(default = "...")]` fallback, so a partial file
//! (or no file at all) still yields a usable configuration.

use std::path::{Path, PathBuf};

use dxl_core::ProtocolVersion;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the configuration inside the platform config directory.
const CONFIG_FILE_NAME: &str = "bus.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level bus configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusConfig {
    #[serde(default)]
    pub port: PortConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Serial line settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortConfig {
    /// Device path (`/dev/ttyUSB0`, `COM3`, …).
    #[serde(default = "default_device")]
    pub device: String,
    /// Line speed in bits per second.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Input buffering delay of the USB-serial adapter, in milliseconds.
    #[serde(default = "default_latency_timer_ms")]
    pub latency_timer_ms: u64,
}

/// Wire format settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// `"1.0"` or `"2.0"`.
    #[serde(default = "default_version")]
    pub version: ProtocolVersion,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    57_600
}
fn default_latency_timer_ms() -> u64 {
    16
}
fn default_version() -> ProtocolVersion {
    ProtocolVersion::V2
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            latency_timer_ms: default_latency_timer_ms(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads a [`BusConfig`] from `path`, returning the defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<BusConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BusConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &BusConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `dxl-master`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("dxl-master"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("dxl-master"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("dxl-master")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
