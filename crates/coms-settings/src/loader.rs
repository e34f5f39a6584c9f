//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ComsSettings::default()`]
//! 2. If `~/.coms/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `COMS_*` environment variable overrides (highest priority)
//! 4. Validate ranges
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use coms_core::constants::MAX_ENVELOPE_SIZE;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{ComsSettings, PendingPolicy};

/// Smallest accepted `maxEnvelopeBytes`.
pub const MIN_ENVELOPE_BYTES: usize = 1024;

/// Resolve the path to the settings file (`~/.coms/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".coms").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ComsSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or a value is out of range, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ComsSettings> {
    let defaults = serde_json::to_value(ComsSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ComsSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (the file/default value stays).
pub fn apply_env_overrides(settings: &mut ComsSettings) {
    if let Some(v) = read_env_string("COMS_ENDPOINT") {
        settings.endpoint = Some(v);
    }
    if let Some(v) = read_env_string("COMS_SESSION_TOKEN") {
        settings.session_token = Some(v);
    }
    if let Some(v) = read_env_string("COMS_RESOURCE") {
        settings.connection.resource = Some(v);
    }
    if let Some(v) = read_env_parsed::<PendingPolicy>("COMS_PENDING_ON_CLOSE") {
        settings.connection.pending_on_close = v;
    }
    if let Some(v) = read_env_usize("COMS_MAX_ENVELOPE_BYTES", MIN_ENVELOPE_BYTES, MAX_ENVELOPE_SIZE) {
        settings.connection.max_envelope_bytes = v;
    }
    if let Some(v) = read_env_string("COMS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_parsed("COMS_LOG_FORMAT") {
        settings.logging.format = v;
    }
}

/// Check values that serde cannot constrain.
pub fn validate(settings: &ComsSettings) -> Result<()> {
    let max = settings.connection.max_envelope_bytes;
    if !(MIN_ENVELOPE_BYTES..=MAX_ENVELOPE_SIZE).contains(&max) {
        return Err(SettingsError::InvalidValue(format!(
            "maxEnvelopeBytes {max} outside {MIN_ENVELOPE_BYTES}..={MAX_ENVELOPE_SIZE}"
        )));
    }
    if settings.endpoint.as_deref().is_some_and(str::is_empty) {
        return Err(SettingsError::InvalidValue("endpoint is empty".to_string()));
    }
    Ok(())
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let val = std::env::var(name).ok()?;
    let result = val.parse().ok();
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}
