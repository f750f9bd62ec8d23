//! Events the relay publishes.

use serde_json::{Value, json};
use switchboard_core::InstanceId;

/// `envelope.routing.sender` on every outbound message. Consumers on the
/// bus key on this value, so it is part of the wire contract.
pub const SENDER_NAME: &str = "bbb-graphql-middleware";

/// Outbound control-plane event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundEvent {
    /// A forced reconnection was carried out.
    ReconnectionForced {
        /// Session token that was acted on.
        session_token: String,
    },
    /// A forced disconnection was carried out.
    DisconnectionForced {
        /// Session token that was acted on.
        session_token: String,
    },
    /// A browser connection was accepted.
    ConnectionEstablished {
        /// Session token of the client.
        session_token: String,
        /// Client-generated session UUID.
        client_session_uuid: String,
        /// Client flavour (`HTML5`, ...).
        client_type: String,
        /// Whether the client reported a mobile device.
        client_is_mobile: bool,
        /// Relay-assigned connection id.
        browser_connection_id: String,
    },
    /// A browser connection went away.
    ConnectionClosed {
        /// Session token of the client.
        session_token: String,
        /// Relay-assigned connection id.
        browser_connection_id: String,
    },
    /// Reply to a liveness ping addressed to this instance.
    AlivePong,
}

impl OutboundEvent {
    /// Envelope name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReconnectionForced { .. } => "UserGraphqlReconnectionForcedEvtMsg",
            Self::DisconnectionForced { .. } => "UserGraphqlDisconnectionForcedEvtMsg",
            Self::ConnectionEstablished { .. } => "UserGraphqlConnectionEstablishedSysMsg",
            Self::ConnectionClosed { .. } => "UserGraphqlConnectionClosedSysMsg",
            Self::AlivePong => "CheckGraphqlMiddlewareAlivePongSysMsg",
        }
    }

    fn body(&self, instance_id: &InstanceId) -> Value {
        let mut body = match self {
            Self::ReconnectionForced { session_token }
            | Self::DisconnectionForced { session_token } => {
                json!({"sessionToken": session_token})
            }
            Self::ConnectionEstablished {
                session_token,
                client_session_uuid,
                client_type,
                client_is_mobile,
                browser_connection_id,
            } => json!({
                "sessionToken": session_token,
                "clientSessionUUID": client_session_uuid,
                "clientType": client_type,
                "clientIsMobile": client_is_mobile,
                "browserConnectionId": browser_connection_id,
            }),
            Self::ConnectionClosed {
                session_token,
                browser_connection_id,
            } => json!({
                "sessionToken": session_token,
                "browserConnectionId": browser_connection_id,
            }),
            Self::AlivePong => json!({}),
        };
        body["middlewareUID"] = json!(instance_id.as_str());
        body
    }

    /// Full bus message stamped with `timestamp_ms`.
    pub fn to_envelope(&self, instance_id: &InstanceId, timestamp_ms: i64) -> Value {
        let name = self.name();
        json!({
            "envelope": {
                "name": name,
                "routing": {"sender": SENDER_NAME},
                "timestamp": timestamp_ms,
            },
            "core": {
                "header": {"name": name},
                "body": self.body(instance_id),
            }
        })
    }
}
