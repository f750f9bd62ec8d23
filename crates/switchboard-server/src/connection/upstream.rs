//! One upstream session.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use switchboard_core::{BrowserConnectionId, SafeChannel, UpstreamConnectionId};

/// A browser frame headed upstream.
#[derive(Clone, Debug, PartialEq)]
pub enum UpstreamFrame {
    /// A subscribe frame for a registered query id. The upstream write loop
    /// claims it in the registry before writing.
    Subscribe {
        /// Query id.
        id: String,
        /// Frame bytes.
        frame: Bytes,
    },
    /// Anything else, forwarded verbatim.
    Raw(Bytes),
}

/// One dial of the engine on behalf of a browser connection.
///
/// Its token is independent of the browser's: tearing it down never ends the
/// browser session, and the browser session tears it down explicitly.
#[derive(Debug)]
pub struct UpstreamConnection {
    /// Unique per dial.
    pub id: UpstreamConnectionId,
    /// Owning browser connection.
    pub browser_id: BrowserConnectionId,
    cancel: CancellationToken,
    /// Replayed start frames, drained ahead of live browser traffic.
    pub retransmit: SafeChannel<Bytes>,
}

impl UpstreamConnection {
    /// Create an upstream with a fresh id.
    pub fn new(browser_id: BrowserConnectionId, retransmit_capacity: usize) -> Self {
        Self {
            id: UpstreamConnectionId::new(),
            browser_id,
            cancel: CancellationToken::new(),
            retransmit: SafeChannel::new(retransmit_capacity),
        }
    }

    /// Cancellation scope of this upstream session.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close the private channel and cancel the token. Returns `true` for the
    /// call that did it.
    pub fn teardown(&self) -> bool {
        let first = self.retransmit.close();
        self.cancel.cancel();
        first
    }

    /// Whether [`teardown`](Self::teardown) has run.
    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
