//! Per-browser upstream supervisor.
//!
//! Waits for the client's `connection_init`, then keeps one upstream
//! attached for as long as the browser session lives:
//!
//! 1. dial and write the stored `connection_init`
//! 2. attach the new [`UpstreamConnection`] (tearing down any previous one)
//! 3. start the read and write loops
//! 4. replay registered subscriptions, then open live traffic
//! 5. when either loop ends, detach, freeze live traffic, wait, redial

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{Instrument, debug, info, instrument, trace, warn};

use switchboard_core::protocol::{
    FrameHeader, FrameType, OperationKind, error_frame, last_cursor_value,
};

use super::session::CLOSE_TIMEOUT;
use crate::connection::{BrowserConnection, Claim, CloseReason, UpstreamConnection, UpstreamFrame};
use crate::context::RelayContext;
use crate::metrics::UPSTREAM_CONNECTS_TOTAL;
use crate::retransmit::retransmit;
use crate::transport::{FrameReader, FrameWriter, UpstreamTransport};

/// Error text sent for a mutation whose upstream went away mid-write.
pub(crate) const MUTATION_LOST_MESSAGE: &str =
    "Upstream connection lost before the mutation was delivered";

/// Keep `browser` attached to an upstream until the browser session ends.
#[instrument(skip_all, fields(browser_connection_id = %browser.id))]
pub async fn supervise(ctx: Arc<RelayContext>, browser: Arc<BrowserConnection>) {
    let cancel = browser.cancel_token().clone();
    let Some(mut init) = browser.wait_connection_init().await else {
        return;
    };

    while !cancel.is_cancelled() {
        let dialed = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            dialed = ctx.connector.connect(&browser.session) => dialed,
        };
        match dialed {
            Ok(transport) => {
                counter!(UPSTREAM_CONNECTS_TOTAL, "outcome" => "ok").increment(1);
                if let Some(latest) = browser.connection_init() {
                    init = latest;
                }
                run_upstream(&ctx, &browser, transport, init.clone()).await;
            }
            Err(e) => {
                counter!(UPSTREAM_CONNECTS_TOTAL, "outcome" => "error").increment(1);
                warn!(error = %e, "upstream dial failed");
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(ctx.config.reconnect_delay) => {}
        }
    }
    debug!("upstream supervisor finished");
}

/// Drive one upstream session until it ends.
async fn run_upstream(
    ctx: &RelayContext,
    browser: &Arc<BrowserConnection>,
    transport: UpstreamTransport,
    init: Bytes,
) {
    let UpstreamTransport { reader, mut writer } = transport;
    if let Err(e) = writer.write(init).await {
        warn!(error = %e, "connection_init not delivered upstream");
        return;
    }

    let upstream = Arc::new(UpstreamConnection::new(
        browser.id.clone(),
        ctx.config.retransmit_capacity,
    ));
    if !browser.attach_upstream(upstream.clone()) {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close(CloseReason::NORMAL, "")).await;
        return;
    }
    let span = tracing::debug_span!("upstream", upstream_id = %upstream.id);
    info!(upstream_id = %upstream.id, "upstream attached");

    let write_task = tokio::spawn(
        write_loop(browser.clone(), upstream.clone(), writer).instrument(span.clone()),
    );
    let read_task = tokio::spawn(
        read_loop(browser.clone(), upstream.clone(), reader).instrument(span),
    );

    let report = retransmit(browser, &upstream, &ctx.config.allowed_for_not_in_meeting).await;
    if browser.unfreeze_for(&upstream) {
        debug!(
            upstream_id = %upstream.id,
            replayed = report.sent,
            "live traffic open"
        );
    }

    let _ = read_task.await;
    let _ = write_task.await;
    let _ = upstream.teardown();
    let _ = browser.detach_upstream(&upstream.id);
    info!(upstream_id = %upstream.id, "upstream detached");
}

/// Replayed frames first, then live browser traffic.
async fn write_loop(
    browser: Arc<BrowserConnection>,
    upstream: Arc<UpstreamConnection>,
    mut writer: Box<dyn FrameWriter>,
) {
    let cancel = upstream.cancel_token().clone();
    loop {
        let (frame, live_id) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(frame) = upstream.retransmit.receive() => (frame, None),
            live = browser.to_upstream.receive() => match live {
                Some(UpstreamFrame::Raw(frame)) => (frame, None),
                Some(UpstreamFrame::Subscribe { id, frame }) => {
                    match browser.subscriptions.claim(&id, &upstream.id) {
                        Claim::Claimed { .. } | Claim::Missing => (frame, Some(id)),
                        Claim::AlreadySeen => {
                            trace!(query_id = %id, "already replayed on this upstream");
                            continue;
                        }
                    }
                }
                None => break,
            },
        };
        let written = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            written = writer.write(frame) => Some(written),
        };
        match written {
            Some(Ok(())) => continue,
            Some(Err(e)) => debug!(error = %e, "upstream write failed"),
            None => {}
        }
        if let Some(id) = live_id {
            fail_unsent_mutation(&browser, &id).await;
        }
        break;
    }
    let _ = upstream.teardown();
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close(CloseReason::NORMAL, "")).await;
}

/// A subscribe frame that was dequeued but not written is replayed on the
/// next upstream, except for mutations. Those are answered with an `error`
/// frame so the client does not wait for a result that will never come.
async fn fail_unsent_mutation(browser: &BrowserConnection, query_id: &str) {
    let is_mutation = browser
        .subscriptions
        .get(query_id)
        .is_some_and(|entry| entry.kind == OperationKind::Mutation);
    if !is_mutation {
        return;
    }
    let _ = browser.subscriptions.remove(query_id);
    warn!(query_id, "mutation lost with its upstream");
    let _ = browser
        .to_browser
        .send_wait(browser.cancel_token(), error_frame(query_id, MUTATION_LOST_MESSAGE))
        .await;
}

/// Engine frames toward the browser.
async fn read_loop(
    browser: Arc<BrowserConnection>,
    upstream: Arc<UpstreamConnection>,
    mut reader: Box<dyn FrameReader>,
) {
    let cancel = upstream.cancel_token().clone();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = reader.read() => next,
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(error = %e, "upstream read failed");
                break;
            }
            None => {
                debug!("upstream closed");
                break;
            }
        };
        if !relay_upstream_frame(&browser, frame).await {
            break;
        }
    }
    let _ = upstream.teardown();
}

/// Update registries from an engine frame and pass it on. Returns `false`
/// once the browser is gone.
async fn relay_upstream_frame(browser: &BrowserConnection, frame: Bytes) -> bool {
    let header = match FrameHeader::parse(&frame) {
        Ok(header) => header,
        Err(e) => {
            debug!(error = %e, "malformed upstream frame dropped");
            return true;
        }
    };

    match header.frame_type {
        FrameType::ConnectionAck => {
            if !browser.mark_acked() {
                trace!("repeat connection_ack swallowed");
                return true;
            }
        }
        FrameType::Next => {
            if let Some(id) = header.id.as_deref() {
                if let Some(cursor) = browser.subscriptions.cursor_of(id) {
                    if let Some(value) = last_cursor_value(&frame, &cursor.field) {
                        let _ = browser.subscriptions.record_cursor(id, value);
                    }
                }
            }
        }
        FrameType::Complete | FrameType::Error => {
            if let Some(id) = header.id.as_deref() {
                let _ = browser.subscriptions.remove(id);
            }
        }
        _ => {}
    }

    browser
        .to_browser
        .send_wait(browser.cancel_token(), frame)
        .await
}
