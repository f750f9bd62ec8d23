//! Browser session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tracing::{Instrument, debug, info, instrument};

use switchboard_bus::OutboundEvent;

use super::reader::handle_browser_frame;
use super::upstream_session::supervise;
use crate::connection::{BrowserConnection, CloseReason};
use crate::context::RelayContext;
use crate::metrics::{
    BROWSER_CONNECTION_DURATION_SECONDS, BROWSER_CONNECTIONS_ACTIVE, BROWSER_CONNECTIONS_TOTAL,
    BROWSER_DISCONNECTIONS_TOTAL,
};
use crate::transport::{FrameReader, FrameWriter};

/// Budget for the close handshake toward a client that stopped reading.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one browser session to completion.
///
/// 1. Registers the connection and announces it on the bus
/// 2. Spawns the write loop and the upstream supervisor
/// 3. Routes client frames until the client leaves or the relay ends the session
/// 4. Tears everything down and announces the disconnect
#[instrument(skip_all, fields(
    browser_connection_id = %browser.id,
    meeting_id = %browser.session.meeting_id,
    user_id = %browser.session.user_id,
))]
pub async fn run_browser_session<R, W>(
    ctx: Arc<RelayContext>,
    browser: Arc<BrowserConnection>,
    mut reader: R,
    writer: W,
) where
    R: FrameReader,
    W: FrameWriter + 'static,
{
    ctx.connections.add(browser.clone());
    info!("browser connected");
    counter!(BROWSER_CONNECTIONS_TOTAL).increment(1);
    gauge!(BROWSER_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.publisher.publish_detached(OutboundEvent::ConnectionEstablished {
        session_token: browser.session.session_token.clone(),
        client_session_uuid: browser.session.client_session_uuid.clone(),
        client_type: browser.session.client_type.clone(),
        client_is_mobile: browser.session.client_is_mobile,
        browser_connection_id: browser.id.to_string(),
    });

    let write_task = tokio::spawn(write_loop(browser.clone(), writer).in_current_span());
    let supervisor = tokio::spawn(supervise(ctx.clone(), browser.clone()).in_current_span());

    let cancel = browser.cancel_token().clone();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = reader.read() => next,
        };
        match next {
            Some(Ok(frame)) => handle_browser_frame(&browser, &ctx.presence, frame).await,
            Some(Err(e)) => {
                debug!(error = %e, "browser read failed");
                break;
            }
            None => {
                debug!("browser closed the socket");
                break;
            }
        }
    }

    let _ = browser.close();
    let _ = write_task.await;
    let _ = supervisor.await;
    browser.clear_registries();
    let _ = ctx.connections.remove(&browser.id);

    counter!(BROWSER_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(BROWSER_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(BROWSER_CONNECTION_DURATION_SECONDS).record(browser.age().as_secs_f64());
    ctx.publisher.publish_detached(OutboundEvent::ConnectionClosed {
        session_token: browser.session.session_token.clone(),
        browser_connection_id: browser.id.to_string(),
    });
    info!(
        dropped_frames = browser.dropped_frames.load(std::sync::atomic::Ordering::Relaxed),
        "browser disconnected"
    );
}

/// Drain frames toward the client, then send the close frame.
async fn write_loop<W: FrameWriter>(browser: Arc<BrowserConnection>, mut writer: W) {
    let cancel = browser.cancel_token().clone();
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = browser.to_browser.receive() => frame,
        };
        let Some(frame) = frame else { break };
        let written = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            written = writer.write(frame) => written,
        };
        if let Err(e) = written {
            debug!(error = %e, "browser write failed");
            break;
        }
    }

    let reason = browser.close_reason().unwrap_or_else(CloseReason::normal);
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close(reason.code, &reason.reason)).await;
    let _ = browser.close();
}
