//! Frame transports.
//!
//! Sessions only see [`FrameReader`] and [`FrameWriter`]; the axum adapter
//! serves browsers and the tungstenite adapter dials the engine. WebSocket
//! control frames (ping/pong) are handled inside the adapters and a close
//! frame ends the read side.

pub mod axum_ws;
pub mod tungstenite;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::TransportError;
use crate::websocket::auth::SessionInfo;

/// Read half of a frame transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Next data frame. `None` once the peer closed.
    async fn read(&mut self) -> Option<Result<Bytes, TransportError>>;
}

/// Write half of a frame transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one data frame.
    async fn write(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Send a close frame and shut the write side.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// An open upstream session.
pub struct UpstreamTransport {
    /// Frames from the engine.
    pub reader: Box<dyn FrameReader>,
    /// Frames to the engine.
    pub writer: Box<dyn FrameWriter>,
}

impl std::fmt::Debug for UpstreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamTransport").finish_non_exhaustive()
    }
}

/// Dials the engine on behalf of one browser session.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a new upstream session for `session`.
    async fn connect(&self, session: &SessionInfo) -> Result<UpstreamTransport, TransportError>;
}
