//! Shutdown coordination for the platform.

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

/// Something that can be shut down as part of an ordered teardown.
///
/// Implementations must be idempotent: the second and later calls
/// complete without side effects.
pub trait Shutdownable: Send + Sync {
    fn shutdown(&self) -> BoxFuture<'_, ()>;

    /// Short human-readable description used in logs and responses.
    fn describe(&self) -> String;
}

/// Coordinator for process-wide shutdown.
///
/// Provides a broadcast channel that long-running tasks can subscribe to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    pub(crate) fn sender(&self) -> broadcast::Sender<()> {
        self.tx.clone()
    }

    /// Get the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Shut down every target in order, logging each step.
pub async fn shutdown_all(targets: &[&dyn Shutdownable]) {
    for target in targets {
        tracing::info!(target = %target.describe(), "Shutting down");
        target.shutdown().await;
    }
}
