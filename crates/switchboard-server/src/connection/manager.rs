//! Process-wide index of live browser connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use switchboard_core::BrowserConnectionId;

use super::CloseReason;
use super::browser::BrowserConnection;

/// Live browser connections by id.
///
/// Lookups copy the matching handles out under the read lock; every action
/// on a connection happens after the lock is released.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<BrowserConnectionId, Arc<BrowserConnection>>>,
}

impl ConnectionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub fn add(&self, connection: Arc<BrowserConnection>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Unregister a connection.
    pub fn remove(&self, id: &BrowserConnectionId) -> Option<Arc<BrowserConnection>> {
        self.connections.write().remove(id)
    }

    /// Look up one connection.
    pub fn get(&self, id: &BrowserConnectionId) -> Option<Arc<BrowserConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Every live connection.
    pub fn all(&self) -> Vec<Arc<BrowserConnection>> {
        self.connections.read().values().cloned().collect()
    }

    fn select(&self, pred: impl Fn(&BrowserConnection) -> bool) -> Vec<Arc<BrowserConnection>> {
        self.connections
            .read()
            .values()
            .filter(|c| pred(c))
            .cloned()
            .collect()
    }

    /// Connections opened with `session_token`.
    pub fn by_session_token(&self, session_token: &str) -> Vec<Arc<BrowserConnection>> {
        self.select(|c| c.session.session_token == session_token)
    }

    /// Connections of users currently in `meeting_id`.
    pub fn in_meeting(&self, meeting_id: &str) -> Vec<Arc<BrowserConnection>> {
        self.select(|c| c.session.meeting_id == meeting_id && c.is_in_meeting())
    }

    /// Connections of one user in one meeting.
    pub fn by_user(&self, meeting_id: &str, user_id: &str) -> Vec<Arc<BrowserConnection>> {
        self.select(|c| c.session.meeting_id == meeting_id && c.session.user_id == user_id)
    }

    /// Re-dial the upstream of every connection with `session_token`.
    /// Returns how many connections were affected.
    pub fn force_reconnect(&self, session_token: &str) -> usize {
        let targets = self.by_session_token(session_token);
        for conn in &targets {
            let _ = conn.force_reconnect();
            debug!(browser_connection_id = %conn.id, "upstream reconnect forced");
        }
        targets.len()
    }

    /// Close every connection with `session_token` with code 4403 and
    /// `reason_message_id` as the reason.
    pub fn force_disconnect(&self, session_token: &str, reason_message_id: &str) -> usize {
        let targets = self.by_session_token(session_token);
        for conn in &targets {
            let _ = conn.disconnect(CloseReason::forced(reason_message_id));
            debug!(browser_connection_id = %conn.id, reason_message_id, "browser disconnect forced");
        }
        targets.len()
    }

    /// Flag every connection of the user as no longer in the meeting.
    pub fn mark_left_meeting(&self, meeting_id: &str, user_id: &str) -> usize {
        let targets = self.by_user(meeting_id, user_id);
        for conn in &targets {
            conn.mark_left_meeting();
        }
        targets.len()
    }

    /// Close every connection with `reason`. Used on shutdown.
    pub fn disconnect_all(&self, reason: &CloseReason) -> usize {
        let targets = self.all();
        for conn in &targets {
            let _ = conn.disconnect(reason.clone());
        }
        info!(count = targets.len(), code = reason.code, "disconnected all browser connections");
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::browser::tests::browser;
    use crate::connection::upstream::UpstreamConnection;

    #[test]
    fn add_get_remove() {
        let mgr = ConnectionManager::new();
        let b = browser("m", "u", "t");
        mgr.add(b.clone());
        assert_eq!(mgr.connection_count(), 1);
        assert!(mgr.get(&b.id).is_some());
        assert!(mgr.remove(&b.id).is_some());
        assert!(mgr.remove(&b.id).is_none());
        assert_eq!(mgr.connection_count(), 0);
    }

    #[test]
    fn lookup_by_token_meeting_user() {
        let mgr = ConnectionManager::new();
        let a = browser("m1", "u1", "t1");
        let b = browser("m1", "u2", "t2");
        let c = browser("m2", "u1", "t1");
        for conn in [&a, &b, &c] {
            mgr.add(conn.clone());
        }
        assert_eq!(mgr.by_session_token("t1").len(), 2);
        assert_eq!(mgr.in_meeting("m1").len(), 2);
        assert_eq!(mgr.by_user("m1", "u1").len(), 1);

        b.mark_left_meeting();
        assert_eq!(mgr.in_meeting("m1").len(), 1);
    }

    #[test]
    fn force_reconnect_hits_only_matching_token() {
        let mgr = ConnectionManager::new();
        let a = browser("m", "u", "t1");
        let b = browser("m", "u", "t2");
        mgr.add(a.clone());
        mgr.add(b.clone());
        let ua = Arc::new(UpstreamConnection::new(a.id.clone(), 4));
        let ub = Arc::new(UpstreamConnection::new(b.id.clone(), 4));
        assert!(a.attach_upstream(ua.clone()));
        assert!(b.attach_upstream(ub.clone()));

        assert_eq!(mgr.force_reconnect("t1"), 1);
        assert!(ua.is_torn_down());
        assert!(!ub.is_torn_down());
        assert!(!a.is_closed());
    }

    #[test]
    fn force_disconnect_sets_4403() {
        let mgr = ConnectionManager::new();
        let a = browser("m", "u", "t1");
        mgr.add(a.clone());
        assert_eq!(mgr.force_disconnect("t1", "user_kicked"), 1);
        assert!(a.is_closed());
        assert_eq!(a.close_reason(), Some(CloseReason::new(4403, "user_kicked")));
        assert_eq!(mgr.force_disconnect("nobody", "x"), 0);
    }

    #[test]
    fn mark_left_and_disconnect_all() {
        let mgr = ConnectionManager::new();
        let a = browser("m", "u", "t1");
        let b = browser("m", "v", "t2");
        mgr.add(a.clone());
        mgr.add(b.clone());
        assert_eq!(mgr.mark_left_meeting("m", "u"), 1);
        assert!(!a.is_in_meeting());
        assert!(b.is_in_meeting());

        assert_eq!(mgr.disconnect_all(&CloseReason::new(CloseReason::GOING_AWAY, "shutdown")), 2);
        assert!(a.is_closed() && b.is_closed());
    }
}
