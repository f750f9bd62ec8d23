//! Browser-side connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use switchboard_core::{BrowserConnectionId, SafeChannel, UpstreamConnectionId};

use super::CloseReason;
use super::subscription::SubscriptionRegistry;
use super::upstream::{UpstreamConnection, UpstreamFrame};
use crate::config::RelayConfig;
use crate::streaming::StreamingRegistry;
use crate::websocket::auth::{CURSOR_LOCKED_USER_VARIABLE, SessionInfo};

/// One connected browser client.
pub struct BrowserConnection {
    /// Relay-assigned id.
    pub id: BrowserConnectionId,
    /// Claims from the upgrade request.
    pub session: SessionInfo,
    in_meeting: AtomicBool,
    /// Frames toward the client.
    pub to_browser: SafeChannel<Bytes>,
    /// Client frames toward the current upstream. Frozen while no upstream
    /// is usable.
    pub to_upstream: SafeChannel<UpstreamFrame>,
    cancel: CancellationToken,
    closed: AtomicBool,
    /// Operations in flight.
    pub subscriptions: SubscriptionRegistry,
    /// Relay-served single-slot streams.
    pub streams: StreamingRegistry,
    connection_init: watch::Sender<Option<Bytes>>,
    acked: AtomicBool,
    upstream: Mutex<Option<Arc<UpstreamConnection>>>,
    close_reason: Mutex<Option<CloseReason>>,
    /// Droppable frames that did not fit.
    pub dropped_frames: AtomicU64,
    /// When the client connected.
    pub connected_at: Instant,
}

impl BrowserConnection {
    /// Create a connection with channel capacities from `config`.
    pub fn new(session: SessionInfo, config: &RelayConfig) -> Self {
        let (connection_init, _) = watch::channel(None);
        Self {
            id: BrowserConnectionId::new(),
            session,
            in_meeting: AtomicBool::new(true),
            to_browser: SafeChannel::new(config.browser_outbound_capacity),
            to_upstream: SafeChannel::new_frozen(config.upstream_inbound_capacity),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            subscriptions: SubscriptionRegistry::new(),
            streams: StreamingRegistry::new(),
            connection_init,
            acked: AtomicBool::new(false),
            upstream: Mutex::new(None),
            close_reason: Mutex::new(None),
            dropped_frames: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    /// Cancellation scope of the whole browser session.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the user is still in the meeting.
    pub fn is_in_meeting(&self) -> bool {
        self.in_meeting.load(Ordering::Acquire)
    }

    /// Record that the user left the meeting. Later replays only carry
    /// allow-listed operations.
    pub fn mark_left_meeting(&self) {
        self.in_meeting.store(false, Ordering::Release);
    }

    /// Whether this user holds the cursor lock of their session.
    pub fn holds_cursor_lock(&self) -> bool {
        self.session.variable(CURSOR_LOCKED_USER_VARIABLE) == Some(self.session.user_id.as_str())
    }

    /// Count a dropped droppable frame.
    pub fn record_drop(&self) {
        let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Store the client's `connection_init`. Replayed on every new upstream.
    pub fn store_connection_init(&self, frame: Bytes) {
        let _ = self.connection_init.send_replace(Some(frame));
    }

    /// The stored `connection_init`, if the client sent one.
    pub fn connection_init(&self) -> Option<Bytes> {
        self.connection_init.borrow().clone()
    }

    /// Wait until the client sends `connection_init`. `None` if the session
    /// ends first.
    pub async fn wait_connection_init(&self) -> Option<Bytes> {
        let mut rx = self.connection_init.subscribe();
        tokio::select! {
            () = self.cancel.cancelled() => None,
            res = rx.wait_for(Option::is_some) => res.ok().and_then(|v| v.clone()),
        }
    }

    /// Returns `true` only the first time; later acks are swallowed.
    pub fn mark_acked(&self) -> bool {
        !self.acked.swap(true, Ordering::AcqRel)
    }

    /// The current upstream, if any.
    pub fn current_upstream(&self) -> Option<Arc<UpstreamConnection>> {
        self.upstream.lock().clone()
    }

    /// Id of the current upstream.
    pub fn current_upstream_id(&self) -> Option<UpstreamConnectionId> {
        self.upstream.lock().as_ref().map(|u| u.id.clone())
    }

    /// Make `upstream` current. A previous upstream is torn down.
    ///
    /// Refused (and `upstream` torn down) once the browser is closed.
    pub fn attach_upstream(&self, upstream: Arc<UpstreamConnection>) -> bool {
        let mut slot = self.upstream.lock();
        if self.is_closed() {
            let _ = upstream.teardown();
            return false;
        }
        if let Some(previous) = slot.replace(upstream) {
            let _ = previous.teardown();
        }
        true
    }

    /// Drop `id` as current and freeze the upstream-bound channel. No-op if a
    /// different upstream is current.
    pub fn detach_upstream(&self, id: &UpstreamConnectionId) -> bool {
        let mut slot = self.upstream.lock();
        if slot.as_ref().is_some_and(|u| &u.id == id) {
            let _ = slot.take();
            self.to_upstream.freeze();
            true
        } else {
            false
        }
    }

    /// Open the upstream-bound channel for `upstream`, unless it has been
    /// superseded or torn down meanwhile.
    pub fn unfreeze_for(&self, upstream: &UpstreamConnection) -> bool {
        let slot = self.upstream.lock();
        let current = slot
            .as_ref()
            .is_some_and(|u| u.id == upstream.id && !u.is_torn_down());
        if current && !self.is_closed() {
            self.to_upstream.unfreeze();
            true
        } else {
            false
        }
    }

    /// Drop the current upstream so the supervisor dials a new one.
    ///
    /// Live traffic is frozen first so nothing lands on the old session.
    /// Returns whether an upstream was torn down.
    pub fn force_reconnect(&self) -> bool {
        let slot = self.upstream.lock();
        self.to_upstream.freeze();
        slot.as_ref().is_some_and(|u| u.teardown())
    }

    /// End the session with `reason` as the close frame.
    pub fn disconnect(&self, reason: CloseReason) -> bool {
        {
            let mut stored = self.close_reason.lock();
            if stored.is_none() {
                *stored = Some(reason);
            }
        }
        self.close()
    }

    /// Close frame to send, if the relay chose one.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// Tear the session down: cancel, close both channels, tear down the
    /// current upstream. Only the first call returns `true`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let upstream = self.upstream.lock().take();
        if let Some(upstream) = upstream {
            let _ = upstream.teardown();
        }
        self.cancel.cancel();
        let _ = self.to_upstream.close();
        let _ = self.to_browser.close();
        true
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Clear both registries.
    pub fn clear_registries(&self) {
        self.subscriptions.clear();
        self.streams.clear();
    }

    /// Time since connect.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for BrowserConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserConnection")
            .field("id", &self.id)
            .field("meeting_id", &self.session.meeting_id)
            .field("user_id", &self.session.user_id)
            .field("in_meeting", &self.is_in_meeting())
            .field("subscriptions", &self.subscriptions.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
