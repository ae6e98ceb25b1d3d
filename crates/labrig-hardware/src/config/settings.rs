//! Application settings using Figment.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (`labrig.toml` in the working directory, or `--settings`)
//! 3. Environment variables prefixed with `LABRIG_`, nested with `__`
//!    (`LABRIG_LOAD__WORKERS=4`, `LABRIG_TRANSPORT__SCPI_PORT=5026`)
//!
//! # Example
//! ```no_run
//! use labrig_hardware::config::RigSettings;
//!
//! let settings = RigSettings::load(None)?;
//! println!("loading with {} worker(s)", settings.load.workers);
//! # Ok::<(), labrig_hardware::config::SettingsError>(())
//! ```

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::transport::tcp::DEFAULT_SCPI_PORT;
use crate::transport::DEFAULT_BAUD_RATE;

/// Settings file looked up in the working directory when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "labrig.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LABRIG_";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Error types for settings loading.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// An explicitly requested settings file does not exist.
    #[error("settings file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be read or did not match the schema.
    #[error("failed to load settings: {0}")]
    Extract(#[from] Box<figment::Error>),

    /// Values parsed but are out of range.
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, colored when attached to a terminal.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Resource manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadSettings {
    /// Concurrent entry workers; 1 loads strictly sequentially.
    pub workers: usize,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

/// Transport defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Port used for `TCPIP ... ::INSTR` resources.
    pub scpi_port: u16,
    /// Baud rate for `ASRL` resources.
    pub baud_rate: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            scpi_port: DEFAULT_SCPI_PORT,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigSettings {
    /// Default log filter when `RUST_LOG` is unset.
    ///
    /// Valid values: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Loader settings.
    pub load: LoadSettings,
    /// Transport defaults.
    pub transport: TransportSettings,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            load: LoadSettings::default(),
            transport: TransportSettings::default(),
        }
    }
}

impl RigSettings {
    /// Layered figment for `path` (or the default file) without extracting.
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
        Figment::from(Serialized::defaults(RigSettings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate settings.
    ///
    /// A missing default file is not an error; a missing explicit `path` is.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(SettingsError::NotFound(path.to_path_buf()));
            }
        }
        let settings: RigSettings = Self::figment(path).extract().map_err(Box::new)?;
        settings.validate()?;
        tracing::debug!(?settings, "settings loaded");
        Ok(settings)
    }

    /// Range checks that serde cannot express.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(SettingsError::Invalid(format!(
                "log_level '{}' is not one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.load.workers == 0 {
            return Err(SettingsError::Invalid("load.workers must be at least 1".into()));
        }
        if self.transport.scpi_port == 0 {
            return Err(SettingsError::Invalid("transport.scpi_port must not be 0".into()));
        }
        if self.transport.baud_rate == 0 {
            return Err(SettingsError::Invalid("transport.baud_rate must not be 0".into()));
        }
        Ok(())
    }
}
