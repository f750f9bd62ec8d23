//! Per-connection registry of in-flight GraphQL operations.
//!
//! Every subscribe frame a browser sends is recorded here before it is
//! forwarded, keyed by the client-assigned query id. The registry is what
//! survives an upstream reconnect: the retransmitter replays from it and the
//! upstream write loop uses [`SubscriptionRegistry::claim`] so a start frame
//! reaches each upstream at most once.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;

use switchboard_core::UpstreamConnectionId;
use switchboard_core::errors::ProtocolError;
use switchboard_core::protocol::{
    CursorDescriptor, OperationKind, SubscribePayload, detect_operation, patch_cursor_value,
};

/// One registered operation.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphQlSubscription {
    /// Client-assigned query id.
    pub id: String,
    /// Replay behaviour.
    pub kind: OperationKind,
    /// GraphQL operation name, if the client sent one.
    pub operation_name: Option<String>,
    /// The subscribe frame exactly as the browser sent it.
    pub start_frame: Bytes,
    /// Upstream this frame was last written to.
    pub last_seen_on: Option<UpstreamConnectionId>,
    /// Resume point descriptor for cursor streams.
    pub cursor: Option<CursorDescriptor>,
    /// Last observed cursor value.
    pub cursor_value: Option<Value>,
}

impl GraphQlSubscription {
    /// Build an entry from a decoded subscribe frame.
    pub fn new(id: impl Into<String>, payload: &SubscribePayload, start_frame: Bytes) -> Self {
        let detected = detect_operation(&payload.query);
        Self {
            id: id.into(),
            kind: detected.kind,
            operation_name: payload.operation_name.clone(),
            start_frame,
            last_seen_on: None,
            cursor: detected.cursor,
            cursor_value: None,
        }
    }

    /// Frame to send when replaying onto a new upstream.
    ///
    /// Streams with a recorded cursor resume from it; everything else is the
    /// original frame.
    pub fn replay_frame(&self) -> Result<Bytes, ProtocolError> {
        match (&self.kind, &self.cursor, &self.cursor_value) {
            (OperationKind::Streaming, Some(cursor), Some(value)) => {
                patch_cursor_value(&self.start_frame, &cursor.variable, value)
            }
            _ => Ok(self.start_frame.clone()),
        }
    }

    /// Whether the operation name is in `allowed`.
    pub fn is_allowed_by<S: std::hash::BuildHasher>(
        &self,
        allowed: &std::collections::HashSet<String, S>,
    ) -> bool {
        self.operation_name
            .as_ref()
            .is_some_and(|name| allowed.contains(name))
    }
}

/// Outcome of [`SubscriptionRegistry::claim`].
#[derive(Clone, Debug, PartialEq)]
pub enum Claim {
    /// The entry is now marked as seen on the upstream. Carries a copy of the
    /// entry and the value `last_seen_on` had before, for rollback.
    Claimed {
        /// Entry after the claim.
        entry: Box<GraphQlSubscription>,
        /// Previous `last_seen_on`.
        previous: Option<UpstreamConnectionId>,
    },
    /// Already seen on this upstream; do not send again.
    AlreadySeen,
    /// No such entry (completed meanwhile).
    Missing,
}

/// Query id → operation, behind its own reader/writer lock.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, GraphQlSubscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry. Returns the replaced one.
    pub fn insert(&self, subscription: GraphQlSubscription) -> Option<GraphQlSubscription> {
        self.entries
            .write()
            .insert(subscription.id.clone(), subscription)
    }

    /// Remove an entry.
    pub fn remove(&self, id: &str) -> Option<GraphQlSubscription> {
        self.entries.write().remove(id)
    }

    /// Copy of one entry.
    pub fn get(&self, id: &str) -> Option<GraphQlSubscription> {
        self.entries.read().get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Copy of every entry, taken under one read lock.
    pub fn snapshot(&self) -> Vec<GraphQlSubscription> {
        self.entries.read().values().cloned().collect()
    }

    /// Mark `id` as seen on `upstream` unless it already is.
    ///
    /// Check and update happen under one write lock, so two writers racing to
    /// deliver the same start frame to the same upstream get exactly one
    /// `Claimed`.
    pub fn claim(&self, id: &str, upstream: &UpstreamConnectionId) -> Claim {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(id) else {
            return Claim::Missing;
        };
        if entry.last_seen_on.as_ref() == Some(upstream) {
            return Claim::AlreadySeen;
        }
        let previous = entry.last_seen_on.replace(upstream.clone());
        Claim::Claimed {
            entry: Box::new(entry.clone()),
            previous,
        }
    }

    /// Undo a claim after a failed delivery, if nobody has re-claimed since.
    pub fn release(
        &self,
        id: &str,
        upstream: &UpstreamConnectionId,
        previous: Option<UpstreamConnectionId>,
    ) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(entry) if entry.last_seen_on.as_ref() == Some(upstream) => {
                entry.last_seen_on = previous;
                true
            }
            _ => false,
        }
    }

    /// Cursor descriptor of a streaming entry.
    pub fn cursor_of(&self, id: &str) -> Option<CursorDescriptor> {
        self.entries.read().get(id).and_then(|e| e.cursor.clone())
    }

    /// Record the latest cursor value of a streaming entry.
    pub fn record_cursor(&self, id: &str, value: Value) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(id) {
            Some(entry) if entry.kind == OperationKind::Streaming && entry.cursor.is_some() => {
                entry.cursor_value = Some(value);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    pub(crate) fn subscribe_frame(id: &str, operation: &str, query: &str) -> (SubscribePayload, Bytes) {
        let frame = json!({
            "id": id,
            "type": "subscribe",
            "payload": {"operationName": operation, "query": query, "variables": {}}
        });
        let payload: SubscribePayload = serde_json::from_value(frame["payload"].clone()).unwrap();
        (payload, Bytes::from(frame.to_string()))
    }

    pub(crate) fn entry(id: &str, operation: &str, query: &str) -> GraphQlSubscription {
        let (payload, frame) = subscribe_frame(id, operation, query);
        GraphQlSubscription::new(id, &payload, frame)
    }

    const STREAM: &str = "subscription s($c: timestamptz) { chat_stream(batch_size: 5, cursor: {initial_value: {createdAt: $c}}) { createdAt } }";

    #[test]
    fn new_detects_kind() {
        assert_eq!(entry("1", "m", "mutation m { x }").kind, OperationKind::Mutation);
        assert_eq!(entry("2", "s", "subscription s { x }").kind, OperationKind::Subscription);
        let stream = entry("3", "s", STREAM);
        assert_eq!(stream.kind, OperationKind::Streaming);
        assert_eq!(stream.cursor.unwrap().variable, "c");
    }

    #[test]
    fn insert_replaces_same_id() {
        let reg = SubscriptionRegistry::new();
        assert!(reg.insert(entry("1", "a", "subscription a { x }")).is_none());
        let old = reg.insert(entry("1", "b", "subscription b { x }")).unwrap();
        assert_eq!(old.operation_name.as_deref(), Some("a"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn claim_is_exclusive_per_upstream() {
        let reg = SubscriptionRegistry::new();
        let _ = reg.insert(entry("1", "a", "subscription a { x }"));
        let u1 = UpstreamConnectionId::from("u1");
        let u2 = UpstreamConnectionId::from("u2");

        assert_matches!(reg.claim("1", &u1), Claim::Claimed { previous: None, .. });
        assert_eq!(reg.claim("1", &u1), Claim::AlreadySeen);
        assert_matches!(
            reg.claim("1", &u2),
            Claim::Claimed { previous: Some(p), .. } if p == u1
        );
        assert_eq!(reg.claim("missing", &u1), Claim::Missing);
    }

    #[test]
    fn release_rolls_back_own_claim_only() {
        let reg = SubscriptionRegistry::new();
        let _ = reg.insert(entry("1", "a", "subscription a { x }"));
        let u1 = UpstreamConnectionId::from("u1");
        let u2 = UpstreamConnectionId::from("u2");

        let _ = reg.claim("1", &u1);
        assert!(reg.release("1", &u1, None));
        assert!(reg.get("1").unwrap().last_seen_on.is_none());

        let _ = reg.claim("1", &u1);
        let _ = reg.claim("1", &u2);
        assert!(!reg.release("1", &u1, None));
        assert_eq!(reg.get("1").unwrap().last_seen_on, Some(u2));
    }

    #[test]
    fn record_cursor_only_for_streams() {
        let reg = SubscriptionRegistry::new();
        let _ = reg.insert(entry("s", "s", STREAM));
        let _ = reg.insert(entry("p", "p", "subscription p { x }"));
        assert!(reg.record_cursor("s", json!("2024-01-01")));
        assert!(!reg.record_cursor("p", json!(1)));
        assert!(!reg.record_cursor("nope", json!(1)));
        assert_eq!(reg.get("s").unwrap().cursor_value, Some(json!("2024-01-01")));
    }

    #[test]
    fn replay_frame_patches_stream_cursor() {
        let mut sub = entry("s", "s", STREAM);
        assert_eq!(sub.replay_frame().unwrap(), sub.start_frame);

        sub.cursor_value = Some(json!("2024-02-02"));
        let frame: Value = serde_json::from_slice(&sub.replay_frame().unwrap()).unwrap();
        assert_eq!(frame["payload"]["variables"]["c"], "2024-02-02");
        assert_eq!(frame["id"], "s");
    }

    #[test]
    fn allow_list_check() {
        let allowed: std::collections::HashSet<String> = ["getUserInfo".to_string()].into();
        assert!(entry("1", "getUserInfo", "subscription getUserInfo { x }").is_allowed_by(&allowed));
        assert!(!entry("2", "chat", "subscription chat { x }").is_allowed_by(&allowed));
    }

    #[test]
    fn snapshot_and_clear() {
        let reg = SubscriptionRegistry::new();
        let _ = reg.insert(entry("1", "a", "subscription a { x }"));
        let _ = reg.insert(entry("2", "b", "subscription b { x }"));
        assert_eq!(reg.snapshot().len(), 2);
        reg.clear();
        assert!(reg.is_empty());
    }
}
