//! Two-state open/frozen latch with waiters.

use tokio::sync::watch;

/// A latch that is either open or frozen.
///
/// Frozen means "callers of [`wait_open`](Self::wait_open) park until the
/// gate opens again". Nothing is owned or locked by whoever froze the gate,
/// so any task may unfreeze it and repeated toggles are harmless.
#[derive(Debug)]
pub struct FreezeGate {
    /// `true` while frozen.
    state: watch::Sender<bool>,
}

impl FreezeGate {
    /// Create an open gate.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Create a gate that starts frozen.
    pub fn frozen() -> Self {
        let (state, _) = watch::channel(true);
        Self { state }
    }

    /// Freeze the gate. Returns `true` if this call changed the state.
    pub fn freeze(&self) -> bool {
        self.state.send_if_modified(|frozen| {
            if *frozen {
                false
            } else {
                *frozen = true;
                true
            }
        })
    }

    /// Open the gate and wake every waiter. Returns `true` if this call
    /// changed the state.
    pub fn unfreeze(&self) -> bool {
        self.state.send_if_modified(|frozen| {
            if *frozen {
                *frozen = false;
                true
            } else {
                false
            }
        })
    }

    /// Whether the gate is currently frozen.
    pub fn is_frozen(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the gate is open. Returns immediately if it already is.
    pub async fn wait_open(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the wait cannot observe a closed channel.
        let _ = rx.wait_for(|frozen| !*frozen).await;
    }
}

impl Default for FreezeGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn new_gate_is_open() {
        let gate = FreezeGate::new();
        assert!(!gate.is_frozen());
    }

    #[test]
    fn frozen_constructor() {
        let gate = FreezeGate::frozen();
        assert!(gate.is_frozen());
    }

    #[test]
    fn freeze_is_idempotent() {
        let gate = FreezeGate::new();
        assert!(gate.freeze());
        assert!(!gate.freeze());
        assert!(!gate.freeze());
        assert!(gate.is_frozen());
    }

    #[test]
    fn unfreeze_is_idempotent() {
        let gate = FreezeGate::frozen();
        assert!(gate.unfreeze());
        assert!(!gate.unfreeze());
        assert!(!gate.is_frozen());
    }

    #[tokio::test]
    async fn wait_open_returns_immediately_when_open() {
        let gate = FreezeGate::new();
        tokio::time::timeout(Duration::from_millis(50), gate.wait_open())
            .await
            .expect("open gate must not block");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_open_blocks_while_frozen() {
        let gate = FreezeGate::frozen();
        let res = tokio::time::timeout(Duration::from_secs(5), gate.wait_open()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn unfreeze_releases_every_waiter() {
        let gate = Arc::new(FreezeGate::frozen());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let g = gate.clone();
            handles.push(tokio::spawn(async move { g.wait_open().await }));
        }
        tokio::task::yield_now().await;
        assert!(gate.unfreeze());
        for h in handles {
            tokio::time::timeout(Duration::from_secs(1), h)
                .await
                .expect("waiter released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn refreeze_after_open_blocks_new_waiters() {
        let gate = FreezeGate::new();
        gate.wait_open().await;
        let _ = gate.freeze();
        let res = tokio::time::timeout(Duration::from_millis(30), gate.wait_open()).await;
        assert!(res.is_err());
    }
}
