//! Settings types.
//!
//! Every struct is `#[serde(default)]` so a settings file only needs the keys
//! it changes. JSON keys are camelCase.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Browser-facing listener.
    pub server: ServerSettings,
    /// GraphQL engine connection.
    pub upstream: UpstreamSettings,
    /// Per-connection queue sizes.
    pub channels: ChannelSettings,
    /// Control-plane bus.
    pub bus: BusSettings,
    /// Reconnect replay policy.
    pub retransmit: RetransmitSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));
        if self.server.port == 0 {
            return invalid("server.port must be non-zero");
        }
        if !self.server.path.starts_with('/') {
            return invalid("server.path must start with '/'");
        }
        if self.server.max_connections == 0 {
            return invalid("server.maxConnections must be non-zero");
        }
        if self.channels.browser_outbound_capacity == 0
            || self.channels.upstream_inbound_capacity == 0
            || self.channels.retransmit_capacity == 0
        {
            return invalid("channel capacities must be non-zero");
        }
        if self.bus.max_concurrent_handlers == 0 {
            return invalid("bus.maxConcurrentHandlers must be non-zero");
        }
        if !(self.upstream.url.starts_with("ws://") || self.upstream.url.starts_with("wss://")) {
            return invalid("upstream.url must be a ws:// or wss:// URL");
        }
        Ok(())
    }
}

/// Browser-facing listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// WebSocket endpoint path.
    pub path: String,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8378,
            path: "/graphql".to_string(),
            max_connections: 10_000,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// GraphQL engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Engine WebSocket URL.
    pub url: String,
    /// `Sec-WebSocket-Protocol` offered to the engine.
    pub subprotocol: String,
    /// Pause between a lost upstream and the next dial.
    pub reconnect_delay_ms: u64,
    /// Dial timeout.
    pub connect_timeout_ms: u64,
}

impl UpstreamSettings {
    /// [`reconnect_delay_ms`](Self::reconnect_delay_ms) as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// [`connect_timeout_ms`](Self::connect_timeout_ms) as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8085/v1/graphql".to_string(),
            subprotocol: "graphql-transport-ws".to_string(),
            reconnect_delay_ms: 1000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Queue capacities, in frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Frames queued toward one browser.
    pub browser_outbound_capacity: usize,
    /// Browser frames queued toward the current upstream.
    pub upstream_inbound_capacity: usize,
    /// Replayed frames queued toward a fresh upstream.
    pub retransmit_capacity: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            browser_outbound_capacity: 1000,
            upstream_inbound_capacity: 1000,
            retransmit_capacity: 1000,
        }
    }
}

/// Control-plane bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Redis connection URL.
    pub redis_url: String,
    /// Topic the relay listens on.
    pub inbound_topic: String,
    /// Topic the relay publishes to.
    pub outbound_topic: String,
    /// Bus events handled concurrently.
    pub max_concurrent_handlers: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            inbound_topic: "from-akka-apps-redis-channel".to_string(),
            outbound_topic: "to-akka-apps-redis-channel".to_string(),
            max_concurrent_handlers: 64,
        }
    }
}

/// Reconnect replay policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetransmitSettings {
    /// Operations replayed for a user who has left the meeting.
    pub allowed_for_not_in_meeting: Vec<String>,
}

impl Default for RetransmitSettings {
    fn default() -> Self {
        Self {
            allowed_for_not_in_meeting: [
                "getUserInfo",
                "getUserCurrent",
                "getGuestLobbyInfo",
                "getMeetingEndData",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
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

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(json["server"]["maxConnections"], 10_000);
        assert_eq!(json["server"]["maxMessageSize"], 16 * 1024 * 1024);
        assert_eq!(json["channels"]["browserOutboundCapacity"], 1000);
        assert_eq!(json["upstream"]["reconnectDelayMs"], 1000);
        assert_eq!(json["bus"]["maxConcurrentHandlers"], 64);
        assert_eq!(json["logging"]["format"], "compact");
        assert_eq!(
            json["retransmit"]["allowedForNotInMeeting"][0],
            "getUserInfo"
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: RelaySettings = serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.channels.retransmit_capacity, 1000);
    }

    #[test]
    fn durations() {
        let u = UpstreamSettings::default();
        assert_eq!(u.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(u.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut s = RelaySettings::default();
        s.channels.retransmit_capacity = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_bad_path_and_url() {
        let mut s = RelaySettings::default();
        s.server.path = "graphql".into();
        assert!(s.validate().is_err());

        let mut s = RelaySettings::default();
        s.upstream.url = "http://engine".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_handlers() {
        let mut s = RelaySettings::default();
        s.bus.max_concurrent_handlers = 0;
        assert!(s.validate().is_err());
    }
}
