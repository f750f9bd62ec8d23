//! Last-known presence rows per meeting and user.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

/// meeting id → user id → row.
#[derive(Debug, Default)]
pub struct PresenceCache {
    meetings: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl PresenceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the row of `(meeting_id, user_id)`.
    pub fn store(&self, meeting_id: &str, user_id: &str, row: Value) {
        let _ = self
            .meetings
            .write()
            .entry(meeting_id.to_owned())
            .or_default()
            .insert(user_id.to_owned(), row);
    }

    /// Copy of the meeting's rows, ordered by user id.
    pub fn rows(&self, meeting_id: &str) -> Vec<Value> {
        let meetings = self.meetings.read();
        let Some(users) = meetings.get(meeting_id) else {
            return Vec::new();
        };
        let mut entries: Vec<_> = users.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, row)| row.clone()).collect()
    }

    /// Row of one user.
    pub fn get(&self, meeting_id: &str, user_id: &str) -> Option<Value> {
        self.meetings
            .read()
            .get(meeting_id)
            .and_then(|users| users.get(user_id))
            .cloned()
    }

    /// Forget a whole meeting.
    pub fn clear_meeting(&self, meeting_id: &str) -> bool {
        self.meetings.write().remove(meeting_id).is_some()
    }

    /// Forget one user.
    pub fn clear_user(&self, meeting_id: &str, user_id: &str) -> bool {
        let mut meetings = self.meetings.write();
        let Some(users) = meetings.get_mut(meeting_id) else {
            return false;
        };
        let removed = users.remove(user_id).is_some();
        if users.is_empty() {
            let _ = meetings.remove(meeting_id);
        }
        removed
    }

    /// Meetings with at least one row.
    pub fn meeting_count(&self) -> usize {
        self.meetings.read().len()
    }
}
