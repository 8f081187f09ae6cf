//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `TETHER_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tether_core::logging::LogFormat;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Resolve the default settings file path (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let json_err = |source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    };
    let defaults = serde_json::to_value(TetherSettings::default()).map_err(json_err)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(json_err)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged).map_err(json_err)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Overlay `source` onto `target`.
///
/// Objects merge key by key, recursively. Anything else in `source`
/// replaces what `target` had, except `null`, which leaves it untouched.
pub fn deep_merge(mut target: Value, source: Value) -> Value {
    merge_into(&mut target, source);
    target
}

fn merge_into(slot: &mut Value, source: Value) {
    match (slot, source) {
        (_, Value::Null) => {}
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = dst.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `TETHER_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are logged
/// and ignored.
pub fn apply_overrides<F>(settings: &mut TetherSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── HTTP ────────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_BASE_URL") {
        settings.http.base_url = v;
    }
    if let Some(v) = env.u64("TETHER_REQUEST_TIMEOUT_MS", 1, 3_600_000) {
        settings.http.timeout_ms = v;
    }
    if let Some(v) = env.u32("TETHER_MAX_RETRIES", 0, 20) {
        settings.http.max_retries = v;
    }
    if let Some(v) = env.u64("TETHER_RETRY_UNIT_MS", 1, 600_000) {
        settings.http.retry_unit_ms = v;
    }
    if let Some(v) = env.string("TETHER_AUTH_TOKEN") {
        let _ = settings
            .http
            .default_headers
            .insert("Authorization".to_string(), format!("Bearer {v}"));
    }

    // ── Realtime ────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_WS_URL") {
        settings.realtime.url = v;
    }
    if let Some(v) = env.u64("TETHER_RECONNECT_BASE_MS", 1, 3_600_000) {
        settings.realtime.reconnect_base_ms = v;
    }
    if let Some(v) = env.u64("TETHER_RECONNECT_CAP_MS", 1, 3_600_000) {
        settings.realtime.reconnect_cap_ms = v;
    }
    if let Some(v) = env.u32("TETHER_MAX_RECONNECT_ATTEMPTS", 0, 1000) {
        settings.realtime.max_reconnect_attempts = v;
    }
    if let Some(v) = env.u64("TETHER_HEARTBEAT_INTERVAL_MS", 100, 3_600_000) {
        settings.realtime.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("TETHER_CONNECT_TIMEOUT_MS", 1, 600_000) {
        settings.realtime.connect_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(json) = env.bool("TETHER_LOG_JSON") {
        settings.logging.format = if json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse an on/off flag. Case-insensitive.
pub fn parse_bool(val: &str) -> Option<bool> {
    const ON: [&str; 4] = ["true", "1", "yes", "on"];
    const OFF: [&str; 4] = ["false", "0", "no", "off"];
    let val = val.trim();
    if ON.iter().any(|w| w.eq_ignore_ascii_case(val)) {
        Some(true)
    } else if OFF.iter().any(|w| w.eq_ignore_ascii_case(val)) {
        Some(false)
    } else {
        None
    }
}

/// Parse a `u32` in `min..=max`.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    val.trim().parse().ok().filter(|n| (min..=max).contains(n))
}

/// Parse a `u64` in `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    val.trim().parse().ok().filter(|n| (min..=max).contains(n))
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = self.string(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}
