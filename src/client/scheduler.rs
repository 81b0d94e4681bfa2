//! Per-message response timeouts.
//!
//! One timer task per response-expecting message. A timer ends early when
//! its message completes, so long timeouts do not pile up finished tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::message::ResponseSlot;

#[derive(Debug, Clone)]
pub struct TimeoutScheduler {
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self {
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Fail `slot` with a timeout once its timeout elapses, unless it settles first.
    pub(crate) fn schedule_expiration<R: Send + 'static>(&self, slot: Arc<ResponseSlot<R>>) {
        let cancel = self.cancel.clone();
        let timeout = slot.timeout();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = slot.settled() => {}
                _ = tokio::time::sleep(timeout) => {
                    slot.expire();
                }
            }
        });
    }

    /// Number of timers still running.
    pub fn scheduled(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every timer and wait for them, bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "Timeout scheduler did not terminate in time");
        }
    }
}

impl Default for TimeoutScheduler {
    fn default() -> Self {
        Self::new()
    }
}
