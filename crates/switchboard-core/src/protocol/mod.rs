//! graphql-ws wire frames.
//!
//! Frames are `{id, type, payload}` JSON objects. Both the
//! `graphql-transport-ws` names and the legacy `subscriptions-transport-ws`
//! names are accepted on input (`start`, `data`, `stop` alias `subscribe`,
//! `next`, `complete`). Relayed frames are forwarded as the original bytes;
//! only the header is decoded for routing.

pub mod operation;
pub mod template;

pub use operation::{
    CursorDescriptor, DetectedOperation, OperationKind, detect_operation, last_cursor_value,
    patch_cursor_value,
};
pub use template::{FrameTemplate, QUERY_ID_PLACEHOLDER};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::ProtocolError;

/// Wire `type` of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Client handshake.
    ConnectionInit,
    /// Server handshake reply.
    ConnectionAck,
    /// Keepalive request.
    Ping,
    /// Keepalive reply.
    Pong,
    /// Start an operation.
    #[serde(alias = "start")]
    Subscribe,
    /// Operation result.
    #[serde(alias = "data")]
    Next,
    /// Operation failure.
    Error,
    /// End of an operation, from either side.
    #[serde(alias = "stop")]
    Complete,
    /// Anything else (`ka`, `connection_error`, ...). Relayed untouched.
    #[serde(other)]
    Unknown,
}

/// Routing header of a frame: everything but the payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FrameHeader {
    /// Client-assigned query id, absent on connection-level frames.
    #[serde(default)]
    pub id: Option<String>,
    /// Frame type.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
}

impl FrameHeader {
    /// Decode only the routing fields.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The id, or [`ProtocolError::MissingId`].
    pub fn require_id(&self) -> Result<&str, ProtocolError> {
        self.id.as_deref().ok_or_else(|| ProtocolError::MissingId {
            frame_type: format!("{:?}", self.frame_type),
        })
    }
}

/// Payload of a subscribe frame.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// GraphQL operation name, used for allow-listing and stream routing.
    #[serde(default)]
    pub operation_name: Option<String>,
    /// GraphQL document.
    #[serde(default)]
    pub query: String,
    /// Operation variables.
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct SubscribeFrame {
    id: Option<String>,
    payload: Option<SubscribePayload>,
}

/// Decode a subscribe frame into its id and payload.
pub fn parse_subscribe(bytes: &[u8]) -> Result<(String, SubscribePayload), ProtocolError> {
    let frame: SubscribeFrame = serde_json::from_slice(bytes)?;
    let id = frame.id.ok_or_else(|| ProtocolError::MissingId {
        frame_type: "subscribe".into(),
    })?;
    let payload = frame
        .payload
        .ok_or_else(|| ProtocolError::MissingPayload { id: id.clone() })?;
    Ok((id, payload))
}

/// `{"id", "type": "next", "payload": {"data": data}}`.
pub fn next_frame(id: &str, data: Value) -> Bytes {
    Bytes::from(json!({"id": id, "type": "next", "payload": {"data": data}}).to_string())
}

/// `{"id", "type": "error", "payload": [{"message"}]}`.
pub fn error_frame(id: &str, message: &str) -> Bytes {
    Bytes::from(
        json!({"id": id, "type": "error", "payload": [{"message": message}]}).to_string(),
    )
}

/// `{"id", "type": "complete"}`.
pub fn complete_frame(id: &str) -> Bytes {
    Bytes::from(json!({"id": id, "type": "complete"}).to_string())
}
