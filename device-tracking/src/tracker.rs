//! Device tracking façade.
//!
//! [`DeviceTrackingClient`] is the single entry point callers use:
//!
//! ```text
//! options ──► validate ──► ModuleLoader::get_module(host) ──► trackDevice(options)
//!                                                                  │
//! TrackResult ◄── check trackingToken ◄────────────────────────────┘
//! ```
//!
//! Validation failures and malformed results are the only errors built here.
//! Loader and remote errors reach the caller unchanged.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::TrackingConfig;
use crate::loader::{LoadError, ModuleLoader, ModuleSource, RemoteError};
use crate::options::{TrackDeviceOptions, ValidationError};

/// Successful tracking outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResult {
    /// Opaque token identifying the tracked device. Never empty.
    pub tracking_token: String,
}

/// Errors returned by [`DeviceTrackingClient::track_device`].
#[derive(Debug, Error)]
pub enum TrackError {
    /// The options were rejected before any network activity.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The module could not be loaded. Every caller waiting on the same load
    /// receives the same `Arc`.
    #[error(transparent)]
    Load(Arc<LoadError>),

    /// The remote `trackDevice` call failed.
    #[error(transparent)]
    Remote(RemoteError),

    /// The remote call succeeded but returned no usable token.
    #[error(
        "Device tracking module returned an invalid result: trackingToken is missing or not a string"
    )]
    InvalidResult,
}

/// Client that validates options, loads the tracking module and runs it.
pub struct DeviceTrackingClient {
    loader: ModuleLoader,
}

impl DeviceTrackingClient {
    /// Create a client with default loader settings.
    pub fn new(source: Arc<dyn ModuleSource>) -> Self {
        Self::from_loader(ModuleLoader::new(source))
    }

    /// Create a client with custom loader settings.
    pub fn with_config(source: Arc<dyn ModuleSource>, config: TrackingConfig) -> Self {
        Self::from_loader(ModuleLoader::with_config(source, config))
    }

    /// Create a client around an existing loader.
    pub fn from_loader(loader: ModuleLoader) -> Self {
        Self { loader }
    }

    /// The module loader, for cache inspection and reset.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Load the tracking module and collect a device fingerprint.
    ///
    /// The module is loaded once per host and cached. A failed load is not
    /// cached, so the next call retries it.
    ///
    /// # Errors
    ///
    /// - [`TrackError::Validation`] if the options break a rule
    /// - [`TrackError::Load`] if the module fails to load, times out or has
    ///   the wrong shape
    /// - [`TrackError::Remote`] if the module's `trackDevice` fails
    /// - [`TrackError::InvalidResult`] if no non-empty `trackingToken` came back
    pub async fn track_device(&self, options: TrackDeviceOptions) -> Result<TrackResult, TrackError> {
        options.validate()?;
        self.run(options).await
    }

    /// Like [`track_device`](Self::track_device), for options given as
    /// untyped JSON.
    pub async fn track_device_json(&self, options: &Value) -> Result<TrackResult, TrackError> {
        let options = TrackDeviceOptions::from_json(options)?;
        self.run(options).await
    }

    async fn run(&self, options: TrackDeviceOptions) -> Result<TrackResult, TrackError> {
        let module = self
            .loader
            .get_module(options.host())
            .await
            .map_err(TrackError::Load)?;

        debug!(
            account_id = options.account_id,
            url = %module.url(),
            "Running device tracking"
        );

        let result = module
            .track_device(&options)
            .await
            .map_err(TrackError::Remote)?;

        extract_token(&result)
    }
}

fn extract_token(result: &Value) -> Result<TrackResult, TrackError> {
    match result.get("trackingToken") {
        Some(Value::String(token)) if !token.is_empty() => Ok(TrackResult {
            tracking_token: token.clone(),
        }),
        _ => Err(TrackError::InvalidResult),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    use serde_json::json;

    use crate::loader::{LoadState, MockSource, MockTracker, TrackerFailure};

    fn client_with(tracker: Arc<MockTracker>) -> (DeviceTrackingClient, Arc<MockSource>) {
        let source = MockSource::tracking(tracker);
        (DeviceTrackingClient::new(source.clone()), source)
    }

    #[tokio::test]
    async fn test_returns_token() {
        let tracker = MockTracker::ok(json!({ "trackingToken": "abc123" }));
        let (client, _) = client_with(tracker.clone());

        let result = client.track_device(TrackDeviceOptions::new(123)).await.unwrap();

        assert_eq!(result.tracking_token, "abc123");
        assert_eq!(tracker.calls(), 1);
    }

    #[tokio::test]
    async fn test_passes_full_options_to_module() {
        let tracker = MockTracker::ok(json!({ "trackingToken": "t" }));
        let (client, source) = client_with(tracker.clone());
        let options = TrackDeviceOptions::new(42)
            .with_host("tracking.example.com")
            .with_disable_webgl_hash(true);

        client.track_device(options.clone()).await.unwrap();

        assert_eq!(tracker.last_options(), Some(options));
        assert_eq!(
            source.urls(),
            vec!["https://tracking.example.com/js/device-module.js".to_string()]
        );
    }

    #[tokio::test]
    async fn test_validation_happens_before_loading() {
        let tracker = MockTracker::ok(json!({ "trackingToken": "t" }));
        let (client, source) = client_with(tracker.clone());

        let err = client
            .track_device(TrackDeviceOptions::new(1).with_host("bad..host"))
            .await
            .unwrap_err();

        assert!(matches!(err, TrackError::Validation(ValidationError::InvalidHost)));
        assert_eq!(source.loads(), 0);
        assert_eq!(tracker.calls(), 0);
    }

    #[tokio::test]
    async fn test_json_options() {
        let tracker = MockTracker::ok(json!({ "trackingToken": "from-json" }));
        let (client, _) = client_with(tracker.clone());

        let result = client
            .track_device_json(&json!({ "accountId": 7, "disableWebglHash": false }))
            .await
            .unwrap();

        assert_eq!(result.tracking_token, "from-json");
        assert_eq!(
            tracker.last_options(),
            Some(TrackDeviceOptions::new(7).with_disable_webgl_hash(false))
        );
    }

    #[tokio::test]
    async fn test_json_validation_messages() {
        let (client, source) = client_with(MockTracker::ok(json!({ "trackingToken": "t" })));

        let cases = [
            (json!(null), "options must be an object"),
            (
                json!({ "accountId": "123" }),
                "accountId must be a positive integer, received: \"123\" (string)",
            ),
            (json!({ "accountId": 1, "host": "" }), "host must be a non-empty string"),
            (
                json!({ "accountId": 1, "disableWebglHash": "yes" }),
                "disableWebglHash must be a boolean",
            ),
        ];

        for (options, message) in cases {
            let err = client.track_device_json(&options).await.unwrap_err();
            assert_eq!(err.to_string(), message);
        }
        assert_eq!(source.loads(), 0);
    }

    #[tokio::test]
    async fn test_invalid_results() {
        for response in [
            json!({}),
            json!({ "trackingToken": "" }),
            json!({ "trackingToken": 12345 }),
            json!({ "trackingToken": null }),
            json!(null),
            json!("token"),
        ] {
            let (client, _) = client_with(MockTracker::ok(response.clone()));

            let err = client.track_device(TrackDeviceOptions::new(1)).await.unwrap_err();

            assert!(matches!(err, TrackError::InvalidResult), "response: {}", response);
            assert_eq!(
                err.to_string(),
                "Device tracking module returned an invalid result: trackingToken is missing or not a string"
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_result_keeps_module_cached() {
        let (client, source) = client_with(MockTracker::ok(json!({ "trackingToken": "" })));

        assert!(client.track_device(TrackDeviceOptions::new(1)).await.is_err());
        assert!(client.track_device(TrackDeviceOptions::new(1)).await.is_err());

        assert_eq!(source.loads(), 1);
        assert_eq!(client.loader().load_state(None), LoadState::Loaded);
    }

    #[tokio::test]
    async fn test_remote_error_passes_through() {
        let (client, _) = client_with(MockTracker::failing(503));

        let err = client.track_device(TrackDeviceOptions::new(1)).await.unwrap_err();

        let TrackError::Remote(remote) = &err else {
            panic!("expected remote error, got {:?}", err);
        };
        let failure = remote.downcast_ref::<TrackerFailure>().unwrap();
        assert_eq!(failure.code, 503);
        assert_eq!(remote.to_string(), "tracker failed with code 503");
    }

    #[tokio::test]
    async fn test_load_error_passes_through() {
        let source = MockSource::failing("dns failure");
        let client = DeviceTrackingClient::new(source.clone());

        let err = client.track_device(TrackDeviceOptions::new(1)).await.unwrap_err();

        let TrackError::Load(load) = &err else {
            panic!("expected load error, got {:?}", err);
        };
        assert!(matches!(**load, LoadError::Fetch { .. }));
        assert_eq!(err.to_string(), load.to_string());
        assert_eq!(err.source().unwrap().to_string(), "dns failure");
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = TrackResult {
            tracking_token: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "trackingToken": "abc" })
        );
    }
}
