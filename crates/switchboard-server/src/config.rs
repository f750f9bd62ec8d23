//! Runtime configuration of the relay server.

use std::collections::HashSet;
use std::time::Duration;

use switchboard_settings::RelaySettings;

/// Settings the relay reads on its hot paths, resolved once at startup.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// WebSocket endpoint path.
    pub path: String,
    /// Maximum concurrent browser connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Frames queued toward one browser.
    pub browser_outbound_capacity: usize,
    /// Browser frames queued toward the current upstream.
    pub upstream_inbound_capacity: usize,
    /// Replayed frames queued toward a fresh upstream.
    pub retransmit_capacity: usize,
    /// Pause between a lost upstream and the next dial.
    pub reconnect_delay: Duration,
    /// Operations still replayed after the user left the meeting.
    pub allowed_for_not_in_meeting: HashSet<String>,
}

impl From<&RelaySettings> for RelayConfig {
    fn from(s: &RelaySettings) -> Self {
        Self {
            host: s.server.host.clone(),
            port: s.server.port,
            path: s.server.path.clone(),
            max_connections: s.server.max_connections,
            max_message_size: s.server.max_message_size,
            browser_outbound_capacity: s.channels.browser_outbound_capacity,
            upstream_inbound_capacity: s.channels.upstream_inbound_capacity,
            retransmit_capacity: s.channels.retransmit_capacity,
            reconnect_delay: s.upstream.reconnect_delay(),
            allowed_for_not_in_meeting: s
                .retransmit
                .allowed_for_not_in_meeting
                .iter()
                .cloned()
                .collect(),
        }
    }
}

impl Default for RelayConfig {
    /// Production defaults bound to `127.0.0.1:0`.
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from(&RelaySettings::default())
        }
    }
}
