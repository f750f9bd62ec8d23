//! Replay of live operations onto a fresh upstream.
//!
//! When an upstream is attached, every registered subscription that has not
//! been seen on it yet is claimed and queued on the upstream's private
//! channel. The upstream write loop drains that channel before live browser
//! traffic, and live traffic stays frozen until the pass completes.

use std::collections::HashSet;

use metrics::counter;
use tracing::{debug, trace, warn};

use switchboard_core::protocol::OperationKind;

use crate::connection::{BrowserConnection, Claim, GraphQlSubscription, UpstreamConnection};
use crate::metrics::RETRANSMITTED_SUBSCRIPTIONS_TOTAL;

/// Outcome of one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetransmitReport {
    /// Frames queued on the upstream.
    pub sent: usize,
    /// Entries left out (mutations, filtered, already seen).
    pub skipped: usize,
}

/// Whether `subscription` is replayed for a browser that is or is not in
/// the meeting.
pub fn is_eligible<S: std::hash::BuildHasher>(
    subscription: &GraphQlSubscription,
    in_meeting: bool,
    allowed_for_not_in_meeting: &HashSet<String, S>,
) -> bool {
    if subscription.kind == OperationKind::Mutation {
        return false;
    }
    in_meeting || subscription.is_allowed_by(allowed_for_not_in_meeting)
}

/// Replay `browser`'s subscriptions onto `upstream`.
///
/// No registry lock is held while sending. Each entry is claimed under the
/// write lock right before its send and released again if the send fails,
/// so a concurrent live subscribe and the replay never both reach the same
/// upstream.
pub async fn retransmit<S: std::hash::BuildHasher>(
    browser: &BrowserConnection,
    upstream: &UpstreamConnection,
    allowed_for_not_in_meeting: &HashSet<String, S>,
) -> RetransmitReport {
    let in_meeting = browser.is_in_meeting();
    let mut report = RetransmitReport::default();

    for subscription in browser.subscriptions.snapshot() {
        if !is_eligible(&subscription, in_meeting, allowed_for_not_in_meeting) {
            trace!(
                query_id = %subscription.id,
                operation = subscription.operation_name.as_deref().unwrap_or_default(),
                kind = ?subscription.kind,
                "not retransmitted"
            );
            report.skipped += 1;
            continue;
        }

        let (entry, previous) = match browser.subscriptions.claim(&subscription.id, &upstream.id) {
            Claim::Claimed { entry, previous } => (entry, previous),
            Claim::AlreadySeen | Claim::Missing => {
                report.skipped += 1;
                continue;
            }
        };

        let frame = match entry.replay_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(query_id = %entry.id, error = %e, "cursor patch failed, replaying original frame");
                entry.start_frame.clone()
            }
        };

        if upstream
            .retransmit
            .send_wait(upstream.cancel_token(), frame)
            .await
        {
            report.sent += 1;
        } else {
            let _ = browser
                .subscriptions
                .release(&entry.id, &upstream.id, previous);
            debug!(upstream_id = %upstream.id, "upstream gone during retransmit");
            report.skipped += 1;
            break;
        }
    }

    if report.sent > 0 {
        counter!(RETRANSMITTED_SUBSCRIPTIONS_TOTAL).increment(report.sent as u64);
    }
    debug!(
        browser_connection_id = %browser.id,
        upstream_id = %upstream.id,
        sent = report.sent,
        skipped = report.skipped,
        "retransmit pass done"
    );
    report
}
