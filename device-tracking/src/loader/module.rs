//! Remote module contract.
//!
//! A module source hands back an arbitrary, late-bound value. The loader only
//! trusts it after checking that it is an object exporting a callable
//! `trackDevice`. Everything the loader and the façade know about remote code
//! goes through the types in this module, so tests can substitute doubles for
//! the network and for the module itself.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::options::TrackDeviceOptions;

/// Name of the export the loader requires.
pub const TRACK_DEVICE_EXPORT: &str = "trackDevice";

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error raised by remote tracking code. Passed to callers untouched.
pub type RemoteError = Box<dyn std::error::Error + Send + Sync>;

/// Error raised by a module source while fetching or instantiating code.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// The `trackDevice` capability exported by a remote module.
///
/// The raw JSON result is returned as-is; the façade decides whether it
/// carries a usable tracking token.
pub trait RemoteTracker: Send + Sync {
    /// Collect a device fingerprint for the given options.
    ///
    /// # Arguments
    ///
    /// * `options` - Validated tracking options, passed through in full
    ///
    /// # Returns
    ///
    /// The module's raw result, or the error it raised.
    fn track_device<'a>(
        &'a self,
        options: &'a TrackDeviceOptions,
    ) -> BoxFuture<'a, Result<Value, RemoteError>>;
}

/// A single named export of a remote module.
#[derive(Clone)]
pub enum RemoteExport {
    /// A callable export.
    Function(Arc<dyn RemoteTracker>),
    /// A plain data export.
    Value(Value),
}

impl fmt::Debug for RemoteExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteExport::Function(_) => f.write_str("Function(..)"),
            RemoteExport::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

/// Whatever a module source produced for a URL.
#[derive(Debug, Clone)]
pub enum RemoteValue {
    /// Nothing came back.
    Null,
    /// Plain data rather than a module.
    Value(Value),
    /// A module object with named exports.
    Module(HashMap<String, RemoteExport>),
}

impl RemoteValue {
    /// A module exporting only `trackDevice`.
    ///
    /// # Arguments
    ///
    /// * `tracker` - Implementation of the `trackDevice` export
    pub fn with_tracker(tracker: Arc<dyn RemoteTracker>) -> Self {
        let mut exports = HashMap::new();
        exports.insert(
            TRACK_DEVICE_EXPORT.to_string(),
            RemoteExport::Function(tracker),
        );
        RemoteValue::Module(exports)
    }

    /// Whether the value is an object to a script host.
    ///
    /// Modules, JSON objects and JSON arrays qualify; `null` and scalars do not.
    pub fn is_object(&self) -> bool {
        match self {
            RemoteValue::Null => false,
            RemoteValue::Value(value) => value.is_object() || value.is_array(),
            RemoteValue::Module(_) => true,
        }
    }

    /// The callable `trackDevice` export, if there is one.
    pub fn tracker(&self) -> Option<Arc<dyn RemoteTracker>> {
        match self {
            RemoteValue::Module(exports) => match exports.get(TRACK_DEVICE_EXPORT) {
                Some(RemoteExport::Function(tracker)) => Some(Arc::clone(tracker)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Capability to load remote code from a URL.
///
/// The URL is only known at run time. Implementations fetch and instantiate
/// the code; the loader owns caching, timeouts and validation.
pub trait ModuleSource: Send + Sync {
    /// Load the module published at `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute module URL, e.g. `https://device.maxmind.com/js/device-module.js`
    ///
    /// # Returns
    ///
    /// Whatever the code evaluated to, or the fetch/instantiation error.
    /// The loader checks the shape of the value.
    fn load<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<RemoteValue, SourceError>>;
}
