//! # switchboard-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `SWITCHBOARD_*` overrides
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{DEFAULT_SETTINGS_PATH, apply_env_overrides, deep_merge, load_settings_from_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.port, 8378);
        assert_eq!(settings.server.path, "/graphql");
        assert_eq!(settings.upstream.subprotocol, "graphql-transport-ws");
        assert_eq!(settings.bus.inbound_topic, "from-akka-apps-redis-channel");
        assert_eq!(settings.bus.outbound_topic, "to-akka-apps-redis-channel");
        assert!(settings.validate().is_ok());
    }
}
