//! Device Tracking - device fingerprint tracking client
//!
//! This library validates tracking options, loads a host-specific remote
//! tracking module, runs it and checks the token it returns. Modules are
//! loaded at most once per host; failed loads are retried on the next call.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use device_tracking::{DeviceTrackingClient, HttpModuleSource, TrackDeviceOptions};
//!
//! let source = HttpModuleSource::new(Arc::new(my_linker))?;
//! let client = DeviceTrackingClient::new(Arc::new(source));
//!
//! let result = client
//!     .track_device(TrackDeviceOptions::new(123456).with_host("tracking.example.com"))
//!     .await?;
//! println!("token: {}", result.tracking_token);
//! ```

pub mod config;
pub mod loader;
pub mod logging;
pub mod options;
pub mod tracker;

pub use config::{ConfigError, ConfigFile, TrackingConfig};
pub use loader::{
    HttpModuleSource, LoadError, LoadState, ModuleFuture, ModuleHandle, ModuleLinker,
    ModuleLoader, ModuleSource, RemoteExport, RemoteTracker, RemoteValue,
};
pub use logging::{init_logging, LogConfig, LoggingError};
pub use options::{TrackDeviceOptions, ValidationError};
pub use tracker::{DeviceTrackingClient, TrackError, TrackResult};
