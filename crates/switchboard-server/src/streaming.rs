//! Relay-served streams.
//!
//! Some subscriptions are answered by the relay itself instead of the
//! engine. Each is a named slot that a browser connection may fill at most
//! once; today the only one is the cursor coordinates stream fed by
//! [`presence`](crate::presence).

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use switchboard_core::protocol::{complete_frame, error_frame};

use crate::connection::BrowserConnection;
use crate::presence::{PresenceCache, seed_cursor_stream};

/// Operation name of the relay-served cursor stream.
pub const CURSOR_STREAM_OPERATION: &str = "getCursorCoordinatesStream";

/// Stream name → query id.
#[derive(Debug, Default)]
pub struct StreamingRegistry {
    slots: RwLock<HashMap<String, String>>,
}

impl StreamingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the `name` slot for `query_id`.
    ///
    /// Fails with the query id already holding the slot; the existing
    /// registration is left as is.
    pub fn register(&self, name: &str, query_id: &str) -> Result<(), String> {
        let mut slots = self.slots.write();
        if let Some(existing) = slots.get(name) {
            return Err(existing.clone());
        }
        let _ = slots.insert(name.to_owned(), query_id.to_owned());
        Ok(())
    }

    /// Query id holding `name`.
    pub fn query_id(&self, name: &str) -> Option<String> {
        self.slots.read().get(name).cloned()
    }

    /// Free whichever slot `query_id` holds. Returns the stream name.
    pub fn remove_query(&self, query_id: &str) -> Option<String> {
        let mut slots = self.slots.write();
        let name = slots
            .iter()
            .find(|(_, id)| id.as_str() == query_id)
            .map(|(name, _)| name.clone())?;
        let _ = slots.remove(&name);
        Some(name)
    }

    /// Drop every slot.
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

/// Handle a browser subscribe for the cursor stream.
///
/// The first registration is seeded with the meeting's cached cursors. A
/// duplicate gets an `error` then a `complete` for its own id and changes
/// nothing else. Returns whether the stream was registered.
pub async fn open_cursor_stream(
    browser: &BrowserConnection,
    presence: &PresenceCache,
    query_id: &str,
) -> bool {
    if let Err(existing) = browser.streams.register(CURSOR_STREAM_OPERATION, query_id) {
        warn!(
            browser_connection_id = %browser.id,
            query_id,
            existing_query_id = %existing,
            "duplicate cursor stream rejected"
        );
        let cancel = browser.cancel_token();
        let message = format!("Only one {CURSOR_STREAM_OPERATION} subscription is allowed");
        if browser
            .to_browser
            .send_wait(cancel, error_frame(query_id, &message))
            .await
        {
            let _ = browser
                .to_browser
                .send_wait(cancel, complete_frame(query_id))
                .await;
        }
        return false;
    }
    debug!(browser_connection_id = %browser.id, query_id, "cursor stream opened");
    let _ = seed_cursor_stream(browser, presence, query_id).await;
    true
}
