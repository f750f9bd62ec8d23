//! Inbound control-plane events.
//!
//! Every bus message is an envelope:
//!
//! ```text
//! {"envelope": {"name", "routing", "timestamp"},
//!  "core": {"header": {"name", "meetingId"?, "userId"?}, "body": {...}}}
//! ```
//!
//! The relay acts on a handful of names. [`parse_inbound`] reads only
//! `envelope.name` first and skips everything else without decoding the
//! body; recognized names decode into a typed [`InboundEvent`] and any
//! missing or mistyped field rejects the whole message.

use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::errors::BusError;

/// Envelope names the relay subscribes to.
pub const ALLOWED_MESSAGES: [&str; 8] = [
    FORCE_RECONNECTION,
    FORCE_DISCONNECTION,
    ALIVE_PING,
    CURSOR_POSITION,
    SET_CURRENT_PAGE,
    MODIFY_WHITEBOARD_ACCESS,
    USER_LEFT_MEETING,
    MEETING_ENDED,
];

const FORCE_RECONNECTION: &str = "ForceUserGraphqlReconnectionSysMsg";
const FORCE_DISCONNECTION: &str = "ForceUserGraphqlDisconnectionSysMsg";
const ALIVE_PING: &str = "CheckGraphqlMiddlewareAlivePingSysMsg";
const CURSOR_POSITION: &str = "SendCursorPositionEvtMsg";
const SET_CURRENT_PAGE: &str = "SetCurrentPageEvtMsg";
const MODIFY_WHITEBOARD_ACCESS: &str = "ModifyWhiteboardAccessEvtMsg";
const USER_LEFT_MEETING: &str = "UserLeftMeetingEvtMsg";
const MEETING_ENDED: &str = "MeetingEndedEvtMsg";

/// A cursor move inside a meeting.
#[derive(Clone, Debug, PartialEq)]
pub struct CursorPosition {
    /// Meeting the cursor belongs to.
    pub meeting_id: String,
    /// User who moved it.
    pub user_id: String,
    /// Whether that user is a viewer (subject to the cursor-lock rule).
    pub user_is_viewer: bool,
    /// Horizontal position, percent of the page.
    pub x_percent: f64,
    /// Vertical position, percent of the page.
    pub y_percent: f64,
}

/// Decoded inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// Drop and re-dial the upstream of every connection with this token.
    ForceReconnect {
        /// Session token to act on.
        session_token: String,
        /// Free-text reason, for logs.
        reason: String,
    },
    /// Close every browser connection with this token.
    ForceDisconnect {
        /// Session token to act on.
        session_token: String,
        /// Free-text reason, for logs.
        reason: String,
        /// Client-facing message id, sent as the close reason.
        reason_message_id: String,
    },
    /// Liveness probe addressed to one relay instance.
    AlivePing {
        /// Instance the probe is for.
        middleware_uid: String,
    },
    /// Presence update.
    CursorPosition(CursorPosition),
    /// Presentation page changed.
    PageChanged {
        /// Meeting id.
        meeting_id: String,
    },
    /// Whiteboard access changed.
    WhiteboardAccessChanged {
        /// Meeting id.
        meeting_id: String,
    },
    /// A user left a meeting.
    UserLeft {
        /// Meeting id.
        meeting_id: String,
        /// User id.
        user_id: String,
    },
    /// A meeting ended.
    MeetingEnded {
        /// Meeting id.
        meeting_id: String,
    },
}

impl InboundEvent {
    /// Short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ForceReconnect { .. } => "force_reconnect",
            Self::ForceDisconnect { .. } => "force_disconnect",
            Self::AlivePing { .. } => "alive_ping",
            Self::CursorPosition(_) => "cursor_position",
            Self::PageChanged { .. } => "page_changed",
            Self::WhiteboardAccessChanged { .. } => "whiteboard_access_changed",
            Self::UserLeft { .. } => "user_left",
            Self::MeetingEnded { .. } => "meeting_ended",
        }
    }
}

#[derive(Deserialize)]
struct NameOnly {
    envelope: EnvelopeName,
}

#[derive(Deserialize)]
struct EnvelopeName {
    name: String,
}

#[derive(Deserialize)]
struct Message<B> {
    core: Core<B>,
}

#[derive(Deserialize)]
struct Core<B> {
    #[serde(default)]
    header: Header,
    body: B,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    meeting_id: Option<String>,
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForceReconnectBody {
    session_token: String,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForceDisconnectBody {
    session_token: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    reason_message_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PingBody {
    #[serde(rename = "middlewareUID")]
    middleware_uid: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorBody {
    user_is_viewer: bool,
    x_percent: f64,
    y_percent: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeetingEndedBody {
    meeting_id: String,
}

/// Decode a raw bus payload.
///
/// `Ok(None)` for names the relay does not handle. `Err` when the envelope
/// is unreadable or a handled message is malformed.
pub fn parse_inbound(payload: &str) -> Result<Option<InboundEvent>, BusError> {
    let name = serde_json::from_str::<NameOnly>(payload)?.envelope.name;
    if !ALLOWED_MESSAGES.contains(&name.as_str()) {
        return Ok(None);
    }

    let event = match name.as_str() {
        FORCE_RECONNECTION => {
            let (_, body) = decode::<ForceReconnectBody>(payload)?;
            InboundEvent::ForceReconnect {
                session_token: body.session_token,
                reason: body.reason,
            }
        }
        FORCE_DISCONNECTION => {
            let (_, body) = decode::<ForceDisconnectBody>(payload)?;
            InboundEvent::ForceDisconnect {
                session_token: body.session_token,
                reason: body.reason,
                reason_message_id: body.reason_message_id,
            }
        }
        ALIVE_PING => {
            let (_, body) = decode::<PingBody>(payload)?;
            InboundEvent::AlivePing {
                middleware_uid: body.middleware_uid,
            }
        }
        CURSOR_POSITION => {
            let (header, body) = decode::<CursorBody>(payload)?;
            InboundEvent::CursorPosition(CursorPosition {
                meeting_id: require(&name, header.meeting_id, "core.header.meetingId")?,
                user_id: require(&name, header.user_id, "core.header.userId")?,
                user_is_viewer: body.user_is_viewer,
                x_percent: body.x_percent,
                y_percent: body.y_percent,
            })
        }
        SET_CURRENT_PAGE | MODIFY_WHITEBOARD_ACCESS => {
            let (header, _) = decode::<IgnoredAny>(payload)?;
            let meeting_id = require(&name, header.meeting_id, "core.header.meetingId")?;
            if name == SET_CURRENT_PAGE {
                InboundEvent::PageChanged { meeting_id }
            } else {
                InboundEvent::WhiteboardAccessChanged { meeting_id }
            }
        }
        USER_LEFT_MEETING => {
            let (header, _) = decode::<IgnoredAny>(payload)?;
            InboundEvent::UserLeft {
                meeting_id: require(&name, header.meeting_id, "core.header.meetingId")?,
                user_id: require(&name, header.user_id, "core.header.userId")?,
            }
        }
        MEETING_ENDED => {
            let (_, body) = decode::<MeetingEndedBody>(payload)?;
            InboundEvent::MeetingEnded {
                meeting_id: body.meeting_id,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode<B: DeserializeOwned>(payload: &str) -> Result<(Header, B), BusError> {
    let msg: Message<B> = serde_json::from_str(payload)?;
    Ok((msg.core.header, msg.core.body))
}

fn require(message: &str, value: Option<String>, field: &'static str) -> Result<String, BusError> {
    value.ok_or_else(|| BusError::MissingField {
        message: message.to_owned(),
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    fn envelope(name: &str, header: Value, body: Value) -> String {
        let mut header = header;
        header["name"] = json!(name);
        json!({
            "envelope": {"name": name, "routing": {"sender": "akka-apps"}, "timestamp": 1},
            "core": {"header": header, "body": body}
        })
        .to_string()
    }

    #[test]
    fn unknown_names_are_skipped() {
        let raw = envelope("SomethingElseEvtMsg", json!({}), json!({"whatever": true}));
        assert_eq!(parse_inbound(&raw).unwrap(), None);
    }

    #[test]
    fn unknown_name_with_garbage_body_is_still_skipped() {
        let raw = r#"{"envelope":{"name":"Other"},"core":42}"#;
        assert_eq!(parse_inbound(raw).unwrap(), None);
    }

    #[test]
    fn unreadable_envelope_is_error() {
        assert_matches!(parse_inbound("nope"), Err(BusError::Decode(_)));
        assert_matches!(parse_inbound(r#"{"core":{}}"#), Err(BusError::Decode(_)));
    }

    #[test]
    fn force_reconnect() {
        let raw = envelope(
            FORCE_RECONNECTION,
            json!({}),
            json!({"sessionToken": "tok", "reason": "role changed"}),
        );
        assert_eq!(
            parse_inbound(&raw).unwrap(),
            Some(InboundEvent::ForceReconnect {
                session_token: "tok".into(),
                reason: "role changed".into(),
            })
        );
    }

    #[test]
    fn force_disconnect() {
        let raw = envelope(
            FORCE_DISCONNECTION,
            json!({}),
            json!({"sessionToken": "tok", "reason": "ejected", "reasonMessageId": "app.userList.ejected"}),
        );
        assert_matches!(
            parse_inbound(&raw).unwrap(),
            Some(InboundEvent::ForceDisconnect { reason_message_id, .. }) if reason_message_id == "app.userList.ejected"
        );
    }

    #[test]
    fn ping_reads_middleware_uid() {
        let raw = envelope(ALIVE_PING, json!({}), json!({"middlewareUID": "uid-1"}));
        assert_eq!(
            parse_inbound(&raw).unwrap(),
            Some(InboundEvent::AlivePing {
                middleware_uid: "uid-1".into()
            })
        );
    }

    #[test]
    fn cursor_position() {
        let raw = envelope(
            CURSOR_POSITION,
            json!({"meetingId": "m1", "userId": "u1"}),
            json!({"userIsViewer": true, "xPercent": 12.5, "yPercent": 50.0, "whiteboardId": "w"}),
        );
        let Some(InboundEvent::CursorPosition(pos)) = parse_inbound(&raw).unwrap() else {
            panic!("expected cursor event");
        };
        assert_eq!(pos.meeting_id, "m1");
        assert_eq!(pos.user_id, "u1");
        assert!(pos.user_is_viewer);
        assert!((pos.x_percent - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cursor_with_wrong_types_fails_closed() {
        let raw = envelope(
            CURSOR_POSITION,
            json!({"meetingId": "m1", "userId": "u1"}),
            json!({"userIsViewer": "yes", "xPercent": 1, "yPercent": 2}),
        );
        assert_matches!(parse_inbound(&raw), Err(BusError::Decode(_)));
    }

    #[test]
    fn cursor_without_header_user_fails() {
        let raw = envelope(
            CURSOR_POSITION,
            json!({"meetingId": "m1"}),
            json!({"userIsViewer": false, "xPercent": 1.0, "yPercent": 2.0}),
        );
        assert_matches!(
            parse_inbound(&raw),
            Err(BusError::MissingField { field: "core.header.userId", .. })
        );
    }

    #[test]
    fn meeting_scoped_clears() {
        let page = envelope(SET_CURRENT_PAGE, json!({"meetingId": "m1"}), json!({"pageId": "p"}));
        assert_eq!(
            parse_inbound(&page).unwrap(),
            Some(InboundEvent::PageChanged { meeting_id: "m1".into() })
        );

        let access = envelope(MODIFY_WHITEBOARD_ACCESS, json!({"meetingId": "m2"}), json!({}));
        assert_eq!(
            parse_inbound(&access).unwrap(),
            Some(InboundEvent::WhiteboardAccessChanged { meeting_id: "m2".into() })
        );

        let ended = envelope(MEETING_ENDED, json!({}), json!({"meetingId": "m3"}));
        assert_eq!(
            parse_inbound(&ended).unwrap(),
            Some(InboundEvent::MeetingEnded { meeting_id: "m3".into() })
        );
    }

    #[test]
    fn user_left() {
        let raw = envelope(USER_LEFT_MEETING, json!({"meetingId": "m1", "userId": "u9"}), json!({}));
        assert_eq!(
            parse_inbound(&raw).unwrap(),
            Some(InboundEvent::UserLeft {
                meeting_id: "m1".into(),
                user_id: "u9".into()
            })
        );
    }

    #[test]
    fn event_kind_labels() {
        let e = InboundEvent::MeetingEnded { meeting_id: "m".into() };
        assert_eq!(e.kind(), "meeting_ended");
    }
}
