//! Bounded, closeable, freezable message channels.
//!
//! [`SafeChannel`] is the handoff primitive between every pair of tasks in
//! the relay (browser → upstream and upstream → browser). It wraps a tokio
//! `mpsc` queue and adds three guarantees the raw queue does not give:
//!
//! - **Idempotent close** from any side. The sender half lives behind a lock
//!   and is taken exactly once; a send racing the close reports `false`.
//! - **Freeze**: a full backpressure gate. Blocking senders park until the
//!   gate reopens, non-blocking senders fail fast. Queued items are kept.
//! - **Cancellation**: blocking sends are bounded by a caller token so a
//!   stuck consumer can never wedge a producer forever.

mod gate;

pub use gate::FreezeGate;

use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Outcome of committing a reserved slot.
enum Commit<T> {
    Sent,
    Closed,
    Frozen(T),
}

/// Thread-safe bounded queue with close and freeze semantics.
pub struct SafeChannel<T> {
    /// `None` once closed.
    tx: RwLock<Option<mpsc::Sender<T>>>,
    rx: Mutex<mpsc::Receiver<T>>,
    closed: CancellationToken,
    gate: FreezeGate,
    capacity: usize,
}

impl<T: Send> SafeChannel<T> {
    /// Create an open channel holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self::with_gate(capacity, FreezeGate::new())
    }

    /// Create a channel that starts frozen.
    pub fn new_frozen(capacity: usize) -> Self {
        Self::with_gate(capacity, FreezeGate::frozen())
    }

    fn with_gate(capacity: usize, gate: FreezeGate) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
            gate,
            capacity,
        }
    }

    /// Non-blocking send. Fails when closed, frozen or full.
    pub fn try_send(&self, value: T) -> bool {
        let guard = self.tx.read();
        if self.gate.is_frozen() {
            return false;
        }
        match guard.as_ref() {
            Some(tx) => tx.try_send(value).is_ok(),
            None => false,
        }
    }

    /// Blocking send bounded by `cancel`.
    ///
    /// Waits at the freeze gate first, then for queue capacity. Returns
    /// `false` if the channel closes or `cancel` fires before the value is
    /// queued. A freeze that lands while a slot is reserved sends the caller
    /// back to the gate.
    pub async fn send_wait(&self, cancel: &CancellationToken, value: T) -> bool {
        let mut value = value;
        loop {
            tokio::select! {
                biased;
                () = self.closed.cancelled() => return false,
                () = cancel.cancelled() => return false,
                () = self.gate.wait_open() => {}
            }

            let Some(tx) = self.sender() else {
                return false;
            };
            let permit = tokio::select! {
                biased;
                () = self.closed.cancelled() => return false,
                () = cancel.cancelled() => return false,
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return false,
                },
            };

            match self.commit(permit, value) {
                Commit::Sent => return true,
                Commit::Closed => return false,
                Commit::Frozen(v) => value = v,
            }
        }
    }

    /// Receive the next item. `None` once the channel is closed and drained.
    pub async fn receive(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Receive without waiting. `None` if nothing is queued or another task
    /// is currently receiving.
    pub fn try_receive(&self) -> Option<T> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Close the channel. Only the first call tears down and returns `true`.
    ///
    /// Releases the freeze gate so parked `send_wait` callers return `false`.
    pub fn close(&self) -> bool {
        let Some(tx) = self.tx.write().take() else {
            return false;
        };
        drop(tx);
        self.closed.cancel();
        let _ = self.gate.unfreeze();
        trace!(capacity = self.capacity, "safe channel closed");
        true
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Freeze the channel. Once this returns no send completes until
    /// [`unfreeze`](Self::unfreeze). Idempotent.
    pub fn freeze(&self) {
        // Taking the write side waits out any commit that already passed its
        // frozen check.
        let guard = self.tx.write();
        if guard.is_some() {
            let _ = self.gate.freeze();
        }
    }

    /// Reopen the channel and wake parked senders. Idempotent.
    pub fn unfreeze(&self) {
        let _ = self.gate.unfreeze();
    }

    /// Whether the channel is currently frozen.
    pub fn is_frozen(&self) -> bool {
        self.gate.is_frozen()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> {
        self.tx.read().clone()
    }

    fn commit(&self, permit: mpsc::Permit<'_, T>, value: T) -> Commit<T> {
        let guard = self.tx.read();
        if guard.is_none() {
            trace!("send lost a race with close");
            return Commit::Closed;
        }
        if self.gate.is_frozen() {
            trace!("send lost a race with freeze, back to the gate");
            drop(permit);
            return Commit::Frozen(value);
        }
        permit.send(value);
        Commit::Sent
    }
}

impl<T> std::fmt::Debug for SafeChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeChannel")
            .field("capacity", &self.capacity)
            .field("closed", &self.closed.is_cancelled())
            .field("frozen", &self.gate.is_frozen())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn chan(cap: usize) -> Arc<SafeChannel<u32>> {
        Arc::new(SafeChannel::new(cap))
    }

    #[tokio::test]
    async fn try_send_and_receive() {
        let ch = chan(4);
        assert!(ch.try_send(1));
        assert!(ch.try_send(2));
        assert_eq!(ch.receive().await, Some(1));
        assert_eq!(ch.receive().await, Some(2));
    }

    #[test]
    fn try_send_fails_when_full() {
        let ch = chan(1);
        assert!(ch.try_send(1));
        assert!(!ch.try_send(2));
    }

    #[test]
    fn try_send_fails_when_frozen() {
        let ch = chan(4);
        ch.freeze();
        assert!(!ch.try_send(1));
        ch.unfreeze();
        assert!(ch.try_send(1));
    }

    #[test]
    fn try_send_fails_after_close() {
        let ch = chan(4);
        assert!(ch.close());
        assert!(!ch.try_send(1));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let ch: SafeChannel<u8> = SafeChannel::new(0);
        assert_eq!(ch.capacity(), 1);
        assert!(ch.try_send(1));
    }

    #[test]
    fn close_is_idempotent() {
        let ch = chan(4);
        assert!(ch.close());
        assert!(!ch.close());
        assert!(!ch.close());
        assert!(ch.is_closed());
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn close_is_traced_once() {
        let out = Capture::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let ch = chan(3);
            assert!(ch.close());
            assert!(!ch.close());
        });
        let logged = String::from_utf8(out.0.lock().clone()).unwrap();
        assert_eq!(logged.matches("safe channel closed").count(), 1);
        assert!(logged.contains("capacity=3"));
    }

    #[tokio::test]
    async fn concurrent_close_tears_down_once() {
        let ch = chan(4);
        let torn_down = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ch = ch.clone();
            let torn_down = torn_down.clone();
            handles.push(tokio::spawn(async move {
                if ch.close() {
                    let _ = torn_down.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn receive_drains_then_reports_exhaustion() {
        let ch = chan(4);
        assert!(ch.try_send(7));
        assert!(ch.try_send(8));
        let _ = ch.close();
        assert_eq!(ch.receive().await, Some(7));
        assert_eq!(ch.receive().await, Some(8));
        assert_eq!(ch.receive().await, None);
    }

    #[tokio::test]
    async fn freeze_keeps_queued_items() {
        let ch = chan(4);
        assert!(ch.try_send(1));
        assert!(ch.try_send(2));
        ch.freeze();
        assert!(!ch.is_closed());
        assert_eq!(ch.receive().await, Some(1));
        assert_eq!(ch.receive().await, Some(2));
    }

    #[test]
    fn freeze_and_unfreeze_are_idempotent() {
        let ch = chan(4);
        ch.freeze();
        ch.freeze();
        assert!(ch.is_frozen());
        ch.unfreeze();
        ch.unfreeze();
        assert!(!ch.is_frozen());
    }

    #[tokio::test]
    async fn send_wait_delivers_when_open() {
        let ch = chan(4);
        let cancel = CancellationToken::new();
        assert!(ch.send_wait(&cancel, 5).await);
        assert_eq!(ch.try_receive(), Some(5));
    }

    #[tokio::test]
    async fn send_wait_parks_until_unfreeze() {
        let ch = chan(4);
        ch.freeze();
        let cancel = CancellationToken::new();
        let sender = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.send_wait(&cancel, 9).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!sender.is_finished());
        assert_eq!(ch.try_receive(), None);

        ch.unfreeze();
        let sent = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .expect("sender released")
            .unwrap();
        assert!(sent);
        assert_eq!(ch.receive().await, Some(9));
    }

    #[tokio::test]
    async fn send_wait_frozen_respects_cancel() {
        let ch = chan(4);
        ch.freeze();
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let sender = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.send_wait(&child, 1).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(!sender.await.unwrap());
        ch.unfreeze();
        assert_eq!(ch.try_receive(), None);
    }

    #[tokio::test]
    async fn close_releases_frozen_senders() {
        let ch = chan(4);
        ch.freeze();
        let sender = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.send_wait(&CancellationToken::new(), 1).await })
        };
        tokio::task::yield_now().await;
        assert!(ch.close());
        let sent = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .expect("close must not deadlock a frozen sender")
            .unwrap();
        assert!(!sent);
        assert_eq!(ch.receive().await, None);
    }

    #[tokio::test]
    async fn send_wait_blocks_on_full_queue_until_drained() {
        let ch = chan(1);
        assert!(ch.try_send(1));
        let sender = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.send_wait(&CancellationToken::new(), 2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());
        assert_eq!(ch.receive().await, Some(1));
        assert!(sender.await.unwrap());
        assert_eq!(ch.receive().await, Some(2));
    }

    #[tokio::test]
    async fn send_wait_full_queue_fails_on_close() {
        let ch = chan(1);
        assert!(ch.try_send(1));
        let sender = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.send_wait(&CancellationToken::new(), 2).await })
        };
        tokio::task::yield_now().await;
        let _ = ch.close();
        assert!(!sender.await.unwrap());
        assert_eq!(ch.receive().await, Some(1));
        assert_eq!(ch.receive().await, None);
    }

    #[tokio::test]
    async fn send_wait_after_close_fails() {
        let ch = chan(1);
        let _ = ch.close();
        assert!(!ch.send_wait(&CancellationToken::new(), 1).await);
    }

    #[tokio::test]
    async fn close_racing_senders_never_panics() {
        let ch = chan(8);
        let mut handles = Vec::new();
        for i in 0..32 {
            let ch = ch.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ch.try_send(i)
                } else {
                    ch.send_wait(&CancellationToken::new(), i).await
                }
            }));
        }
        let _ = ch.close();
        // Drain so parked senders observe the close instead of a full queue.
        while ch.receive().await.is_some() {}
        for h in handles {
            let _ = h.await.expect("sender task must not panic");
        }
        assert!(!ch.try_send(99));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Freeze,
            Unfreeze,
            TrySend(u32),
            Receive,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::Freeze),
                Just(Op::Unfreeze),
                any::<u32>().prop_map(Op::TrySend),
                Just(Op::Receive),
            ]
        }

        proptest! {
            #[test]
            fn try_send_matches_gate_model(ops in proptest::collection::vec(op(), 1..64)) {
                let ch: SafeChannel<u32> = SafeChannel::new(4);
                let mut frozen = false;
                let mut queued: std::collections::VecDeque<u32> = std::collections::VecDeque::new();
                for op in ops {
                    match op {
                        Op::Freeze => { ch.freeze(); frozen = true; }
                        Op::Unfreeze => { ch.unfreeze(); frozen = false; }
                        Op::TrySend(v) => {
                            let expected = !frozen && queued.len() < 4;
                            prop_assert_eq!(ch.try_send(v), expected);
                            if expected { queued.push_back(v); }
                        }
                        Op::Receive => {
                            prop_assert_eq!(ch.try_receive(), queued.pop_front());
                        }
                    }
                }
            }

            #[test]
            fn send_wait_never_lands_while_frozen(toggles in proptest::collection::vec(any::<bool>(), 1..16)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async move {
                    let ch = Arc::new(SafeChannel::<u32>::new(4));
                    ch.freeze();
                    let sender = {
                        let ch = ch.clone();
                        tokio::spawn(async move { ch.send_wait(&CancellationToken::new(), 1).await })
                    };
                    // Arbitrary freeze/refreeze noise while frozen overall.
                    for t in toggles {
                        if t { ch.freeze(); }
                        tokio::task::yield_now().await;
                        assert_eq!(ch.try_receive(), None);
                    }
                    assert!(!sender.is_finished());
                    ch.unfreeze();
                    assert!(sender.await.unwrap());
                    assert_eq!(ch.try_receive(), Some(1));
                });
            }
        }
    }
}
