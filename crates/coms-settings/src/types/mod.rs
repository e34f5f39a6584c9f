//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may name only the fields it overrides.

use std::fmt;
use std::str::FromStr;

use coms_core::constants::{DEFAULT_RESOURCE, MAX_ENVELOPE_SIZE};
use coms_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings for the coms transport.
///
/// Example `~/.coms/settings.json`:
///
/// ```json
/// {
///   "endpoint": "http://127.0.0.1:1337/",
///   "connection": { "resource": "coms", "pendingOnClose": "reject" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComsSettings {
    /// Settings schema version.
    pub version: String,
    /// Base endpoint (`http`/`https`/`ws`/`wss`) of the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Session token appended to the transport URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Transport behaviour.
    pub connection: ConnectionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for ComsSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            endpoint: None,
            session_token: None,
            connection: ConnectionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Transport behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Path segment appended to the endpoint before the session token.
    /// Defaults to `coms`; an empty string leaves the path untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// What happens to pending calls when the transport closes.
    pub pending_on_close: PendingPolicy,
    /// Largest envelope accepted or sent, in bytes.
    pub max_envelope_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            resource: Some(DEFAULT_RESOURCE.to_string()),
            pending_on_close: PendingPolicy::Retain,
            max_envelope_bytes: MAX_ENVELOPE_SIZE,
        }
    }
}

/// Fate of transactions still pending when the transport closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicy {
    /// Leave pending calls unsettled; no reply can arrive any more.
    #[default]
    Retain,
    /// Fail every pending call with a transport-closed error.
    Reject,
}

impl fmt::Display for PendingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => write!(f, "retain"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for PendingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retain" | "keep" => Ok(Self::Retain),
            "reject" | "fail" => Ok(Self::Reject),
            other => Err(format!("unknown pending policy '{other}'")),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` still wins when set).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
