//! # coms-settings
//!
//! Configuration for the coms transport, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`ComsSettings::default()`]
//! 2. **User file**: `~/.coms/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `COMS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<ComsSettings> = OnceLock::new();

/// Get the process-wide settings.
///
/// On first call, loads `~/.coms/settings.json` with env var overrides; if
/// loading fails the compiled defaults are used. Later calls return the
/// cached value.
pub fn get_settings() -> &'static ComsSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            ComsSettings::default()
        })
    })
}

/// Initialize the process-wide settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ComsSettings) -> std::result::Result<(), ComsSettings> {
    SETTINGS.set(settings)
}
