//! Client construction options.

use coms_core::constants::{DEFAULT_RESOURCE, MAX_ENVELOPE_SIZE};
use coms_settings::{ComsSettings, PendingPolicy};

/// Options fixed for the lifetime of a [`Client`](crate::Client).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Path segment placed before the session token in the transport URL.
    pub resource: Option<String>,
    /// Fate of pending calls when the transport closes.
    pub pending_on_close: PendingPolicy,
    /// Largest envelope sent or accepted, in bytes.
    pub max_envelope_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resource: Some(DEFAULT_RESOURCE.to_string()),
            pending_on_close: PendingPolicy::default(),
            max_envelope_bytes: MAX_ENVELOPE_SIZE,
        }
    }
}

impl From<&ComsSettings> for ClientConfig {
    fn from(settings: &ComsSettings) -> Self {
        let conn = &settings.connection;
        Self {
            resource: conn.resource.clone(),
            pending_on_close: conn.pending_on_close,
            max_envelope_bytes: conn.max_envelope_bytes,
        }
    }
}
