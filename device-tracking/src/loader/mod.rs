//! Remote module loader.
//!
//! The loader turns a host name into a validated tracking module, loading it
//! at most once per host.
//!
//! # Cache Semantics
//!
//! ```text
//! Unloaded --get_module--> Loading --ok--> Loaded (kept until reset)
//!                             |
//!                             +--error--> Unloaded (next call retries)
//! ```
//!
//! Each host maps to a shared future. Every caller asking for the same host
//! while a load is pending gets a clone of the same future and sees the same
//! outcome, whether that is a module handle or a shared [`LoadError`].
//! Failures evict the entry; successes stay cached with no expiry.
//!
//! Host keys are compared exactly. `Example.com` and `example.com` are two
//! cache entries and two loads.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use device_tracking::loader::ModuleLoader;
//!
//! let loader = ModuleLoader::new(Arc::new(my_source));
//! let module = loader.get_module(None).await?;
//! let result = module.track_device(&options).await?;
//! ```

mod error;
mod http;
mod module;

pub use error::LoadError;
pub use http::{HttpModuleSource, ModuleLinker};
pub use module::{
    BoxFuture, ModuleSource, RemoteError, RemoteExport, RemoteTracker, RemoteValue, SourceError,
    TRACK_DEVICE_EXPORT,
};

#[cfg(test)]
pub use module::tests::{Behavior, MockSource, MockTracker, TrackerFailure};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::options::TrackDeviceOptions;

/// Outcome of a module load, as seen by every waiter.
pub type LoadResult = Result<ModuleHandle, Arc<LoadError>>;

/// Cloneable future for a host's module load.
///
/// Clones handed out for the same pending load satisfy
/// [`Shared::ptr_eq`].
pub type ModuleFuture = Shared<BoxFuture<'static, LoadResult>>;

/// A loaded, validated tracking module.
#[derive(Clone)]
pub struct ModuleHandle {
    host: Arc<str>,
    url: Arc<str>,
    tracker: Arc<dyn RemoteTracker>,
}

impl ModuleHandle {
    /// Host the module was loaded for (the cache key).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// URL the module was loaded from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call the module's `trackDevice` export.
    pub fn track_device<'a>(
        &'a self,
        options: &'a TrackDeviceOptions,
    ) -> BoxFuture<'a, Result<Value, RemoteError>> {
        self.tracker.track_device(options)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("host", &self.host)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Load state of a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing cached; the next request starts a load.
    Unloaded,
    /// A load is in flight.
    Loading,
    /// The module is cached.
    Loaded,
}

struct CacheEntry {
    /// Distinguishes this load from later loads of the same host.
    generation: u64,
    future: ModuleFuture,
    loaded: Arc<AtomicBool>,
}

/// Per-host, de-duplicating module loader.
///
/// Loads run on spawned Tokio tasks. Called outside a Tokio runtime,
/// [`ModuleLoader::get_module`] returns a future that resolves to
/// [`LoadError::NoRuntime`] and caches nothing.
pub struct ModuleLoader {
    source: Arc<dyn ModuleSource>,
    config: TrackingConfig,
    entries: Arc<DashMap<String, CacheEntry>>,
    next_generation: AtomicU64,
}

impl ModuleLoader {
    /// Create a loader with default settings.
    pub fn new(source: Arc<dyn ModuleSource>) -> Self {
        Self::with_config(source, TrackingConfig::default())
    }

    /// Create a loader with custom settings.
    pub fn with_config(source: Arc<dyn ModuleSource>, config: TrackingConfig) -> Self {
        Self {
            source,
            config,
            entries: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// The loader's settings.
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    /// URL the module for `host` is loaded from.
    pub fn module_url(&self, host: &str) -> String {
        format!("https://{}{}", host, self.config.module_path)
    }

    /// Get the module for `host`, or for the default host when `None`.
    ///
    /// Returns the cached future when one exists for this exact host string,
    /// otherwise starts a load and caches its future before it settles.
    pub fn get_module(&self, host: Option<&str>) -> ModuleFuture {
        let host = host.unwrap_or(self.config.default_host.as_str());

        match self.entries.entry(host.to_string()) {
            Entry::Occupied(entry) => {
                debug!(host = %host, "Reusing cached device module load");
                entry.get().future.clone()
            }
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let loaded = Arc::new(AtomicBool::new(false));
                match self.start_load(host, generation, Arc::clone(&loaded)) {
                    Ok(future) => {
                        entry.insert(CacheEntry {
                            generation,
                            future: future.clone(),
                            loaded,
                        });
                        future
                    }
                    Err(e) => {
                        warn!(host = %host, error = %e, "Device module load not started");
                        futures::future::ready::<LoadResult>(Err(Arc::new(e)))
                            .boxed()
                            .shared()
                    }
                }
            }
        }
    }

    /// Current load state for `host`, or for the default host when `None`.
    pub fn load_state(&self, host: Option<&str>) -> LoadState {
        let host = host.unwrap_or(self.config.default_host.as_str());
        match self.entries.get(host) {
            None => LoadState::Unloaded,
            Some(entry) if entry.loaded.load(Ordering::Acquire) => LoadState::Loaded,
            Some(_) => LoadState::Loading,
        }
    }

    /// Hosts with a pending or completed load, sorted.
    pub fn cached_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        hosts.sort();
        hosts
    }

    /// Forget every cached load.
    ///
    /// Pending loads keep running for their current waiters, but their
    /// outcome is no longer cached.
    pub fn reset(&self) {
        let count = self.entries.len();
        self.entries.clear();
        debug!(entries = count, "Device module cache reset");
    }

    fn start_load(
        &self,
        host: &str,
        generation: u64,
        loaded: Arc<AtomicBool>,
    ) -> Result<ModuleFuture, LoadError> {
        let url = self.module_url(host);
        let runtime =
            Handle::try_current().map_err(|_| LoadError::NoRuntime { url: url.clone() })?;
        let timeout = self.config.load_timeout;
        debug!(url = %url, "Loading device tracking module");

        let task = runtime.spawn({
            let source = Arc::clone(&self.source);
            let entries = Arc::clone(&self.entries);
            let host: Arc<str> = Arc::from(host);
            let url: Arc<str> = Arc::from(url.as_str());

            async move {
                match load_module(source.as_ref(), &url, timeout).await {
                    Ok(tracker) => {
                        loaded.store(true, Ordering::Release);
                        info!(url = %url, "Device tracking module loaded");
                        Ok(ModuleHandle { host, url, tracker })
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "Device tracking module load failed");
                        evict(&entries, &host, generation);
                        Err(Arc::new(e))
                    }
                }
            }
        });

        let entries = Arc::clone(&self.entries);
        let host = host.to_string();
        let future = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(url = %url, error = %e, "Device tracking module load task ended");
                    evict(&entries, &host, generation);
                    Err(Arc::new(LoadError::Aborted { url }))
                }
            }
        }
        .boxed()
        .shared();

        Ok(future)
    }
}

/// Drop `host`'s entry if it still belongs to load `generation`.
fn evict(entries: &DashMap<String, CacheEntry>, host: &str, generation: u64) {
    if entries
        .remove_if(host, |_, entry| entry.generation == generation)
        .is_some()
    {
        debug!(host = %host, "Evicted failed device module load");
    }
}

/// Fetch and validate a module, bounded by `timeout`.
///
/// When the timeout wins, the pending fetch is dropped along with the timer.
async fn load_module(
    source: &dyn ModuleSource,
    url: &str,
    timeout: Duration,
) -> Result<Arc<dyn RemoteTracker>, LoadError> {
    let value = match tokio::time::timeout(timeout, source.load(url)).await {
        Ok(Ok(value)) => value,
        Ok(Err(source)) => {
            return Err(LoadError::Fetch {
                url: url.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(LoadError::TimedOut {
                url: url.to_string(),
                timeout_ms: timeout_millis(timeout),
            })
        }
    };

    if !value.is_object() {
        return Err(LoadError::NotAnObject {
            url: url.to_string(),
        });
    }

    value.tracker().ok_or_else(|| LoadError::MissingTrackDevice {
        url: url.to_string(),
    })
}

/// Whole milliseconds in `timeout`, saturating at `u64::MAX`.
fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
