//! Cursor fan-out and stream seeding.

use metrics::counter;
use serde_json::{Value, json};
use tracing::{debug, trace};

use switchboard_bus::CursorPosition;
use switchboard_core::protocol::{FrameTemplate, next_frame};

use super::cache::PresenceCache;
use crate::connection::{BrowserConnection, ConnectionManager};
use crate::metrics::PRESENCE_DROPS_TOTAL;
use crate::streaming::CURSOR_STREAM_OPERATION;

/// Response field of the cursor stream.
pub const CURSOR_STREAM_FIELD: &str = "pres_page_cursor_stream";
const CURSOR_TYPENAME: &str = "pres_page_cursor";

/// Outcome of one cursor broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued.
    pub delivered: usize,
    /// Frames dropped on full or closed channels.
    pub dropped: usize,
    /// Recipients skipped by the cursor-lock rule.
    pub withheld: usize,
}

/// The row stored and sent for a cursor position.
pub fn cursor_row(position: &CursorPosition) -> Value {
    json!({
        "xPercent": position.x_percent,
        "yPercent": position.y_percent,
        "userId": position.user_id,
        "__typename": CURSOR_TYPENAME,
    })
}

/// Send a cursor move to every cursor-stream subscriber in the meeting,
/// then cache it.
///
/// A viewer's cursor is withheld from the user holding the cursor lock.
/// Delivery is best effort.
pub fn broadcast_cursor(
    connections: &ConnectionManager,
    cache: &PresenceCache,
    position: &CursorPosition,
) -> BroadcastReport {
    let row = cursor_row(position);
    let template = FrameTemplate::next(json!({ CURSOR_STREAM_FIELD: [row.clone()] }));

    let mut report = BroadcastReport::default();
    for browser in connections.in_meeting(&position.meeting_id) {
        let Some(query_id) = browser.streams.query_id(CURSOR_STREAM_OPERATION) else {
            continue;
        };
        if position.user_is_viewer && browser.holds_cursor_lock() {
            trace!(browser_connection_id = %browser.id, "viewer cursor withheld from lock holder");
            report.withheld += 1;
            continue;
        }
        if browser.to_browser.try_send(template.render(&query_id)) {
            report.delivered += 1;
        } else {
            browser.record_drop();
            report.dropped += 1;
        }
    }
    if report.dropped > 0 {
        counter!(PRESENCE_DROPS_TOTAL).increment(report.dropped as u64);
    }

    cache.store(&position.meeting_id, &position.user_id, row);
    debug!(
        meeting_id = %position.meeting_id,
        delivered = report.delivered,
        dropped = report.dropped,
        "cursor broadcast"
    );
    report
}

/// Send the meeting's cached cursors as one `next` frame for `query_id`.
///
/// Nothing is sent while the meeting has no cached cursor. Returns whether
/// a seed frame was queued.
pub async fn seed_cursor_stream(
    browser: &BrowserConnection,
    cache: &PresenceCache,
    query_id: &str,
) -> bool {
    let rows = cache.rows(&browser.session.meeting_id);
    if rows.is_empty() {
        return false;
    }
    let frame = next_frame(query_id, json!({ CURSOR_STREAM_FIELD: rows }));
    browser.to_browser.send_wait(browser.cancel_token(), frame).await
}
