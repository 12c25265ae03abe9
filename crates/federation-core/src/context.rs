//! The per-ring runtime context every component is constructed with,
//! replacing the global singletons (factory, listener registry) the design
//! notes (spec §9) call out as needing re-architecture: instead of each
//! component reaching for a process-wide static, the top-level process
//! builds one `CoreContext` per ring and threads it through every
//! component's constructor, mirroring how `spark-core::context::Context` is
//! passed into every pipeline stage rather than looked up globally.

use crate::config::FederationConfig;
use crate::time::{Clock, SystemClock};
use std::sync::Arc;

/// Cooperative shutdown signal. Components that own background tasks
/// (timers, retry loops) select on `shutdown.wait()` alongside their other
/// work and tear down cleanly instead of being killed mid-operation.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<tokio::sync::watch::Sender<bool>>,
    rx: tokio::sync::watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Requests shutdown. Idempotent; a component observing an
    /// already-closed channel simply proceeds to tear down.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `trigger` has been called.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // A send error means the sender was dropped, which only happens if
        // this context itself was torn down; treat that as shutdown too.
        let _ = rx.changed().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared context threaded through every federation component's
/// constructor: configuration, a clock, and a shutdown signal. Components
/// hold an `Arc<CoreContext>` rather than cloning the pieces individually so
/// a single `shutdown.trigger()` call reaches every subsystem.
pub struct CoreContext {
    pub config: FederationConfig,
    pub clock: Arc<dyn Clock>,
    pub shutdown: ShutdownSignal,
}

impl CoreContext {
    pub fn new(config: FederationConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock: Arc::new(SystemClock::new()),
            shutdown: ShutdownSignal::new(),
        })
    }

    pub fn with_clock(config: FederationConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            shutdown: ShutdownSignal::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        assert!(!signal.is_triggered());
        signal.trigger();
        handle.await.unwrap();
        assert!(signal.is_triggered());
    }
}
