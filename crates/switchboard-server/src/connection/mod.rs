//! Browser and upstream connection entities.
//!
//! A [`BrowserConnection`] lives as long as the client socket. It owns the
//! subscription and streaming registries and two [`SafeChannel`]s: frames
//! toward the client, and client frames toward whichever
//! [`UpstreamConnection`] is current. Upstreams come and go underneath it.
//!
//! [`SafeChannel`]: switchboard_core::SafeChannel

pub mod browser;
pub mod manager;
pub mod subscription;
pub mod upstream;

pub use browser::BrowserConnection;
pub use manager::ConnectionManager;
pub use subscription::{Claim, GraphQlSubscription, SubscriptionRegistry};
pub use upstream::{UpstreamConnection, UpstreamFrame};

/// Close code and reason sent to the browser when the relay ends a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
}

impl CloseReason {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Relay going away (shutdown).
    pub const GOING_AWAY: u16 = 1001;
    /// Session forcibly disconnected by the control plane.
    pub const FORCED: u16 = 4403;

    /// Build a reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with an empty reason.
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }

    /// Forced disconnect carrying the client-facing message id.
    pub fn forced(reason_message_id: impl Into<String>) -> Self {
        Self::new(Self::FORCED, reason_message_id)
    }
}
