//! Logging setup.
//!
//! Library code only emits `tracing` events. Applications that have no
//! subscriber of their own can call [`init_logging`] once at startup:
//!
//! ```ignore
//! use device_tracking::logging::{init_logging, LogConfig};
//!
//! let _guard = init_logging(&LogConfig::default())?;
//! tracing::info!("ready");
//! ```
//!
//! `RUST_LOG` overrides the configured level.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default log level filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directives, e.g. `info` or `device_tracking=debug`.
    pub level: String,

    /// Also write plain-text logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

/// Errors that can occur while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The level directives could not be parsed.
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    /// The log file path does not name a file.
    #[error("Log file path {0} has no file name")]
    InvalidFilePath(PathBuf),

    /// The log directory could not be created.
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Another global subscriber is already installed.
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Install a global subscriber writing to stderr and, optionally, a file.
///
/// Returns the file writer's guard when a file is configured; keep it alive
/// for as long as logs should be flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| level_filter(&config.level))?;

    let stderr_layer = fmt::layer().with_writer(io::stderr).with_target(true);

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(guard)
}

/// Parse level directives without consulting the environment.
fn level_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|source| LoggingError::InvalidFilter {
        filter: level.to_string(),
        source,
    })
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr), LoggingError> {
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidFilePath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok((dir, name))
}
