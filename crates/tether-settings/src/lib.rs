//! # tether-settings
//!
//! Configuration for the request executor and the connection manager.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **Settings file**: `~/.tether/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! There is no global instance. Callers load a [`TetherSettings`] once and
//! hand the relevant section to each client they construct.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{HttpSettings, LoggingSettings, RealtimeSettings, TetherSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = TetherSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = TetherSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.http.max_retries, 3);
        assert_eq!(settings.realtime.max_reconnect_attempts, 10);
    }
}
