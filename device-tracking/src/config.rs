//! Client configuration.
//!
//! Settings can be built in code or read from an INI file:
//!
//! ```ini
//! [loader]
//! default_host = device.maxmind.com
//! module_path = /js/device-module.js
//! load_timeout_ms = 10000
//!
//! [logging]
//! level = info
//! file = /var/log/device-tracking.log
//! ```
//!
//! Unknown sections and keys are ignored. Missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::logging::LogConfig;
use crate::options::is_valid_hostname;

/// Host the tracking module is loaded from when the caller names none.
pub const DEFAULT_HOST: &str = "device.maxmind.com";

/// Path of the tracking module on every host.
pub const MODULE_PATH: &str = "/js/device-module.js";

/// How long a module load may take before it is abandoned.
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 10_000;

const LOADER_SECTION: &str = "loader";
const LOGGING_SECTION: &str = "logging";

/// Errors that can occur while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or parsed.
    #[error("Failed to load config file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// The config text is not valid INI.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    /// A setting has an unusable value.
    #[error("Invalid value for {section}.{key}: {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        reason: String,
    },
}

/// Module loader settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Host used when a request does not name one.
    pub default_host: String,

    /// Path of the module script on the host. Starts with `/`.
    pub module_path: String,

    /// Upper bound on a single module load.
    pub load_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_host: DEFAULT_HOST.to_string(),
            module_path: MODULE_PATH.to_string(),
            load_timeout: Duration::from_millis(DEFAULT_LOAD_TIMEOUT_MS),
        }
    }
}

impl TrackingConfig {
    /// Set the default host.
    pub fn with_default_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = host.into();
        self
    }

    /// Set the module path.
    pub fn with_module_path(mut self, path: impl Into<String>) -> Self {
        self.module_path = path.into();
        self
    }

    /// Set the load timeout.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Check that the settings are usable.
    ///
    /// The builder setters do not validate; this does.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_hostname(&self.default_host) {
            return Err(ConfigError::InvalidValue {
                section: LOADER_SECTION,
                key: "default_host",
                reason: format!("'{}' is not a valid hostname", self.default_host),
            });
        }
        if !self.module_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                section: LOADER_SECTION,
                key: "module_path",
                reason: format!("'{}' must start with '/'", self.module_path),
            });
        }
        if self.load_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                section: LOADER_SECTION,
                key: "load_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything read from a config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// `[loader]` section.
    pub loader: TrackingConfig,

    /// `[logging]` section.
    pub logging: LogConfig,
}

impl ConfigFile {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse and validate config text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = ConfigFile::default();

        if let Some(section) = ini.section(Some(LOADER_SECTION)) {
            if let Some(host) = section.get("default_host") {
                config.loader.default_host = host.trim().to_string();
            }
            if let Some(path) = section.get("module_path") {
                config.loader.module_path = path.trim().to_string();
            }
            if let Some(timeout) = section.get("load_timeout_ms") {
                let millis = timeout
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        section: LOADER_SECTION,
                        key: "load_timeout_ms",
                        reason: e.to_string(),
                    })?;
                config.loader.load_timeout = Duration::from_millis(millis);
            }
        }

        if let Some(section) = ini.section(Some(LOGGING_SECTION)) {
            if let Some(level) = section.get("level") {
                config.logging.level = level.trim().to_string();
            }
            if let Some(file) = section.get("file") {
                let file = file.trim();
                config.logging.file = (!file.is_empty()).then(|| PathBuf::from(file));
            }
        }

        config.loader.validate()?;
        Ok(config)
    }
}
