// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A clonable, multi-reader cancellation token. Generalizes the
/// `tokio::sync::oneshot` + `select!` cancellation idiom used for a single
/// agent loop into something that reaches the model stream *and* every
/// in-flight tool call from one `abort()` call, since a turn may have many
/// concurrent awaiters (spec §5's cancellation semantics).
#[derive(Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call any number of times (spec §9).
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once `abort()` has been called. Registers for notification
    /// before checking the flag so a concurrent `abort()` can never be
    /// missed (same pattern as `RunGraph::await_ids`).
    pub async fn cancelled(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_signal_is_not_aborted() {
        assert!(!AbortSignal::new().is_aborted());
    }

    #[test]
    fn abort_is_idempotent() {
        let s = AbortSignal::new();
        s.abort();
        s.abort();
        assert!(s.is_aborted());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_aborted() {
        let s = AbortSignal::new();
        s.abort();
        tokio::time::timeout(std::time::Duration::from_millis(50), s.cancelled())
            .await
            .expect("cancelled() should resolve without waiting");
    }

    #[tokio::test]
    async fn cancelled_wakes_on_concurrent_abort() {
        let s = AbortSignal::new();
        let s2 = s.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            s2.abort();
        });
        tokio::time::timeout(std::time::Duration::from_millis(500), s.cancelled())
            .await
            .expect("cancelled() should wake once abort() runs");
    }

    #[tokio::test]
    async fn clone_shares_abort_state() {
        let s = AbortSignal::new();
        let s2 = s.clone();
        s.abort();
        assert!(s2.is_aborted());
    }
}
