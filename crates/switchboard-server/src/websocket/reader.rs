//! Frames from the browser.

use bytes::Bytes;
use tracing::{debug, trace};

use switchboard_core::protocol::{FrameHeader, FrameType, parse_subscribe};

use crate::connection::{BrowserConnection, GraphQlSubscription, UpstreamFrame};
use crate::presence::PresenceCache;
use crate::streaming::{CURSOR_STREAM_OPERATION, open_cursor_stream};

/// Route one browser frame.
///
/// `connection_init` is kept for upstream replay and not forwarded here.
/// Subscribes are registered before they are queued, so a replay can never
/// miss one. The cursor stream is served by the relay.
pub async fn handle_browser_frame(browser: &BrowserConnection, presence: &PresenceCache, frame: Bytes) {
    let header = match FrameHeader::parse(&frame) {
        Ok(header) => header,
        Err(e) => {
            debug!(browser_connection_id = %browser.id, error = %e, "malformed browser frame dropped");
            return;
        }
    };

    match header.frame_type {
        FrameType::ConnectionInit => {
            trace!(browser_connection_id = %browser.id, "connection_init stored");
            browser.store_connection_init(frame);
        }
        FrameType::Subscribe => handle_subscribe(browser, presence, frame).await,
        FrameType::Complete => {
            let Ok(id) = header.require_id() else {
                debug!(browser_connection_id = %browser.id, "complete without id dropped");
                return;
            };
            if browser.streams.remove_query(id).is_some() {
                trace!(query_id = id, "relay-served stream completed");
                return;
            }
            let _ = browser.subscriptions.remove(id);
            forward(browser, UpstreamFrame::Raw(frame)).await;
        }
        _ => forward(browser, UpstreamFrame::Raw(frame)).await,
    }
}

async fn handle_subscribe(browser: &BrowserConnection, presence: &PresenceCache, frame: Bytes) {
    let (id, payload) = match parse_subscribe(&frame) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(browser_connection_id = %browser.id, error = %e, "malformed subscribe dropped");
            return;
        }
    };

    if payload.operation_name.as_deref() == Some(CURSOR_STREAM_OPERATION) {
        let _ = open_cursor_stream(browser, presence, &id).await;
        return;
    }

    let subscription = GraphQlSubscription::new(id.clone(), &payload, frame.clone());
    trace!(query_id = %id, kind = ?subscription.kind, "subscription registered");
    let _ = browser.subscriptions.insert(subscription);
    forward(browser, UpstreamFrame::Subscribe { id, frame }).await;
}

async fn forward(browser: &BrowserConnection, frame: UpstreamFrame) {
    if !browser
        .to_upstream
        .send_wait(browser.cancel_token(), frame)
        .await
    {
        trace!(browser_connection_id = %browser.id, "frame not forwarded, session closing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::browser::tests::browser;
    use serde_json::{Value, json};

    fn bytes(v: &Value) -> Bytes {
        Bytes::from(v.to_string())
    }

    fn open(b: &BrowserConnection) {
        b.to_upstream.unfreeze();
    }

    #[tokio::test]
    async fn connection_init_is_stored_not_forwarded() {
        let b = browser("m", "u", "t");
        open(&b);
        let init = bytes(&json!({"type": "connection_init", "payload": {}}));
        handle_browser_frame(&b, &PresenceCache::new(), init.clone()).await;
        assert_eq!(b.connection_init(), Some(init));
        assert!(b.to_upstream.try_receive().is_none());
    }

    #[tokio::test]
    async fn subscribe_is_registered_then_forwarded() {
        let b = browser("m", "u", "t");
        open(&b);
        let frame = bytes(&json!({
            "id": "1", "type": "subscribe",
            "payload": {"operationName": "chat", "query": "subscription chat { x }"}
        }));
        handle_browser_frame(&b, &PresenceCache::new(), frame.clone()).await;

        assert!(b.subscriptions.contains("1"));
        assert_eq!(
            b.to_upstream.try_receive(),
            Some(UpstreamFrame::Subscribe { id: "1".into(), frame })
        );
    }

    #[tokio::test]
    async fn legacy_start_counts_as_subscribe() {
        let b = browser("m", "u", "t");
        open(&b);
        let frame = bytes(&json!({
            "id": "7", "type": "start",
            "payload": {"query": "subscription { x }"}
        }));
        handle_browser_frame(&b, &PresenceCache::new(), frame).await;
        assert!(b.subscriptions.contains("7"));
    }

    #[tokio::test]
    async fn complete_unregisters_and_forwards() {
        let b = browser("m", "u", "t");
        open(&b);
        let presence = PresenceCache::new();
        let sub = bytes(&json!({"id": "1", "type": "subscribe", "payload": {"query": "subscription { x }"}}));
        handle_browser_frame(&b, &presence, sub).await;
        let _ = b.to_upstream.try_receive();

        let done = bytes(&json!({"id": "1", "type": "complete"}));
        handle_browser_frame(&b, &presence, done.clone()).await;
        assert!(!b.subscriptions.contains("1"));
        assert_eq!(b.to_upstream.try_receive(), Some(UpstreamFrame::Raw(done)));
    }

    #[tokio::test]
    async fn cursor_stream_is_served_locally() {
        let b = browser("m", "u", "t");
        open(&b);
        let presence = PresenceCache::new();
        presence.store("m", "other", json!({"userId": "other"}));
        let sub = bytes(&json!({
            "id": "c1", "type": "subscribe",
            "payload": {"operationName": "getCursorCoordinatesStream", "query": "subscription getCursorCoordinatesStream { x }"}
        }));
        handle_browser_frame(&b, &presence, sub).await;

        assert!(b.to_upstream.try_receive().is_none());
        assert!(!b.subscriptions.contains("c1"));
        assert_eq!(b.streams.query_id(CURSOR_STREAM_OPERATION).as_deref(), Some("c1"));
        let seed: Value = serde_json::from_slice(&b.to_browser.try_receive().unwrap()).unwrap();
        assert_eq!(seed["type"], "next");

        let done = bytes(&json!({"id": "c1", "type": "complete"}));
        handle_browser_frame(&b, &presence, done).await;
        assert!(b.streams.query_id(CURSOR_STREAM_OPERATION).is_none());
        assert!(b.to_upstream.try_receive().is_none());
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let b = browser("m", "u", "t");
        open(&b);
        let presence = PresenceCache::new();
        handle_browser_frame(&b, &presence, Bytes::from_static(b"not json")).await;
        handle_browser_frame(&b, &presence, Bytes::from_static(br#"{"type":"subscribe","payload":{"query":"q"}}"#)).await;
        assert!(b.to_upstream.try_receive().is_none());
        assert!(b.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn other_frames_pass_through() {
        let b = browser("m", "u", "t");
        open(&b);
        let ping = bytes(&json!({"type": "ping"}));
        handle_browser_frame(&b, &PresenceCache::new(), ping.clone()).await;
        assert_eq!(b.to_upstream.try_receive(), Some(UpstreamFrame::Raw(ping)));
    }

    #[tokio::test]
    async fn forward_gives_up_when_session_closes() {
        let b = browser("m", "u", "t");
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move {
                let ping = Bytes::from_static(br#"{"type":"ping"}"#);
                handle_browser_frame(&b, &PresenceCache::new(), ping).await;
            })
        };
        tokio::task::yield_now().await;
        let _ = b.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("forward returns after close")
            .unwrap();
    }
}
