//! Tracking options and their validation.
//!
//! Options reach the client either as typed Rust values or as an untyped JSON
//! object passed through from a script host. Both paths apply the same rules,
//! in the same order, and fail with the same messages. The first violated rule
//! wins.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while validating caller-supplied options.
///
/// These are detected locally, before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The options value is not an object.
    #[error("options must be an object")]
    NotAnObject,

    /// `accountId` is missing, not an integer, or not positive.
    #[error("accountId must be a positive integer, received: {received} ({type_name})")]
    InvalidAccountId {
        /// JSON rendering of the received value (`undefined` when absent).
        received: String,
        /// Script-style type name of the received value.
        type_name: &'static str,
    },

    /// `host` is present but is not a string, or is empty.
    #[error("host must be a non-empty string")]
    EmptyHost,

    /// `host` does not follow hostname grammar.
    #[error("host must be a valid hostname (e.g. \"tracking.yourdomain.com\")")]
    InvalidHost,

    /// `disableWebglHash` is present but is not a boolean.
    #[error("disableWebglHash must be a boolean")]
    InvalidDisableWebglHash,
}

/// Options for a single device tracking call.
///
/// Serializes with the field names the remote module expects
/// (`accountId`, `host`, `disableWebglHash`); absent optionals are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDeviceOptions {
    /// Account ID. Must be at least 1.
    pub account_id: u64,

    /// Custom module host, e.g. a first-party domain that proxies the
    /// tracking script.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Skip WebGL hash collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_webgl_hash: Option<bool>,
}

impl TrackDeviceOptions {
    /// Create options for an account, with no host override.
    pub fn new(account_id: u64) -> Self {
        Self {
            account_id,
            host: None,
            disable_webgl_hash: None,
        }
    }

    /// Load the module from a custom host instead of the default one.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the `disableWebglHash` flag.
    pub fn with_disable_webgl_hash(mut self, disable: bool) -> Self {
        self.disable_webgl_hash = Some(disable);
        self
    }

    /// The host override, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Check typed options against the validation rules.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.account_id == 0 {
            return Err(ValidationError::InvalidAccountId {
                received: "0".to_string(),
                type_name: "number",
            });
        }
        if let Some(host) = &self.host {
            validate_host(host)?;
        }
        Ok(())
    }

    /// Build options from an untyped JSON value.
    ///
    /// Mirrors script-host semantics: arrays count as objects (with no
    /// fields), an absent field is `undefined`, and `null` is present but has
    /// the wrong type for every field.
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let fields = match value {
            Value::Object(map) => Some(map),
            Value::Array(_) => None,
            _ => return Err(ValidationError::NotAnObject),
        };
        let field = |name: &str| fields.and_then(|map| map.get(name));

        let account_id = parse_account_id(field("accountId"))?;

        let host = match field("host") {
            None => None,
            Some(Value::String(host)) => {
                validate_host(host)?;
                Some(host.clone())
            }
            Some(_) => return Err(ValidationError::EmptyHost),
        };

        let disable_webgl_hash = match field("disableWebglHash") {
            None => None,
            Some(Value::Bool(flag)) => Some(*flag),
            Some(_) => return Err(ValidationError::InvalidDisableWebglHash),
        };

        Ok(Self {
            account_id,
            host,
            disable_webgl_hash,
        })
    }
}

impl TryFrom<&Value> for TrackDeviceOptions {
    type Error = ValidationError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

/// Check a host override: non-empty, then hostname grammar.
pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::EmptyHost);
    }
    if !is_valid_hostname(host) {
        return Err(ValidationError::InvalidHost);
    }
    Ok(())
}

/// Whether `host` is a syntactically valid hostname.
///
/// Alphanumeric at both ends, alphanumerics, dots and hyphens in between, and
/// never two dots in a row.
pub fn is_valid_hostname(host: &str) -> bool {
    hostname_pattern().is_match(host) && !host.contains("..")
}

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9.-]*[a-zA-Z0-9])?$").unwrap())
}

fn parse_account_id(value: Option<&Value>) -> Result<u64, ValidationError> {
    let Some(value) = value else {
        return Err(ValidationError::InvalidAccountId {
            received: "undefined".to_string(),
            type_name: "undefined",
        });
    };

    if let Value::Number(number) = value {
        if let Some(id) = number.as_u64() {
            if id > 0 {
                return Ok(id);
            }
        } else if let Some(float) = number.as_f64() {
            // Integral floats such as `42.0` are integers to a script host. IDs
            // must still fit in a `u64`.
            if float.fract() == 0.0 && float >= 1.0 && float < u64::MAX as f64 {
                return Ok(float as u64);
            }
        }
    }

    Err(ValidationError::InvalidAccountId {
        received: script_json(value),
        type_name: script_type_name(value),
    })
}

/// JSON text for `value` as a script host would stringify it.
///
/// Integral floats print without a fraction (`-3.0` is `-3`, `-0.0` is `0`)
/// up to the point where scripts switch to exponent notation.
fn script_json(value: &Value) -> String {
    match value {
        Value::Number(number) if number.is_f64() => match number.as_f64() {
            Some(float) if float == 0.0 => "0".to_string(),
            Some(float) if float.fract() == 0.0 && float.abs() < 1e21 => format!("{:.0}", float),
            _ => value.to_string(),
        },
        _ => value.to_string(),
    }
}

/// Type name as a script host's `typeof` would report it.
fn script_type_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
    }
}
