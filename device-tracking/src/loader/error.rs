//! Module loading errors.

use thiserror::Error;

use super::module::SourceError;

/// Errors that can occur while loading a remote tracking module.
///
/// None of these outcomes stay cached, so the next request starts a fresh
/// load.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module source failed to fetch or instantiate the code.
    #[error("Failed to load device tracking module from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: SourceError,
    },

    /// The source did not finish before the load timeout.
    #[error("Loading device tracking module from {url} timed out after {timeout_ms}ms")]
    TimedOut { url: String, timeout_ms: u64 },

    /// The source produced something other than an object.
    #[error("Loaded module from {url} is not a valid object")]
    NotAnObject { url: String },

    /// The module has no callable `trackDevice` export.
    #[error("Loaded module does not export trackDevice")]
    MissingTrackDevice { url: String },

    /// The load task ended without producing a result.
    #[error("Loading device tracking module from {url} was aborted")]
    Aborted { url: String },

    /// No Tokio runtime was available to run the load on.
    #[error("Loading device tracking module from {url} requires a Tokio runtime")]
    NoRuntime { url: String },
}

impl LoadError {
    /// The module URL this error refers to.
    pub fn url(&self) -> &str {
        match self {
            LoadError::Fetch { url, .. }
            | LoadError::TimedOut { url, .. }
            | LoadError::NotAnObject { url }
            | LoadError::MissingTrackDevice { url }
            | LoadError::Aborted { url }
            | LoadError::NoRuntime { url } => url,
        }
    }

    /// Whether the load was abandoned because of the timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LoadError::TimedOut { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    const URL: &str = "https://device.maxmind.com/js/device-module.js";

    #[test]
    fn test_fetch_error_wraps_source_message() {
        let err = LoadError::Fetch {
            url: URL.to_string(),
            source: Box::new(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
        };
        assert_eq!(
            err.to_string(),
            format!("Failed to load device tracking module from {}: refused", URL)
        );

        let source = err.source().expect("fetch error should keep its cause");
        let io_err = source.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_timeout_message() {
        let err = LoadError::TimedOut {
            url: URL.to_string(),
            timeout_ms: 10_000,
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            format!(
                "Loading device tracking module from {} timed out after 10000ms",
                URL
            )
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn test_validation_messages() {
        let err = LoadError::NotAnObject {
            url: URL.to_string(),
        };
        assert!(err.to_string().contains("is not a valid object"));
        assert_eq!(err.url(), URL);

        let err = LoadError::MissingTrackDevice {
            url: URL.to_string(),
        };
        assert_eq!(err.to_string(), "Loaded module does not export trackDevice");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_no_runtime_message() {
        let err = LoadError::NoRuntime {
            url: URL.to_string(),
        };
        assert_eq!(
            err.to_string(),
            format!(
                "Loading device tracking module from {} requires a Tokio runtime",
                URL
            )
        );
        assert_eq!(err.url(), URL);
    }
}
