// src/control.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause and cancel flags for one download run.
///
/// Cloning shares the flags, so every worker of a session observes the same
/// state. Cancellation is one-way; a new run needs a fresh value.
#[derive(Debug, Clone, Default)]
pub struct ControlSignals {
    pause: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    /// Cancels the run. Also clears pause so paused workers wake up and exit.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Sleeps for `duration` unless cancelled first. Returns false on cancel.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Blocks while paused, polling every `poll`. Returns false if the run
    /// was cancelled, either before or during the pause.
    pub async fn wait_while_paused(&self, poll: Duration) -> bool {
        while self.is_paused() && !self.is_cancelled() {
            if !self.sleep(poll).await {
                return false;
            }
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let signals = ControlSignals::new();
        let worker_view = signals.clone();

        signals.pause();
        assert!(worker_view.is_paused());
        signals.resume();
        assert!(!worker_view.is_paused());

        signals.cancel();
        assert!(worker_view.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wakes_a_paused_waiter() {
        let signals = ControlSignals::new();
        signals.pause();

        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_while_paused(Duration::from_millis(10)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        signals.cancel();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn resume_releases_a_paused_waiter() {
        let signals = ControlSignals::new();
        signals.pause();

        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_while_paused(Duration::from_millis(10)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        signals.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn sleep_is_cut_short_by_cancel() {
        let signals = ControlSignals::new();
        signals.cancel();
        assert!(!signals.sleep(Duration::from_secs(60)).await);
    }
}
