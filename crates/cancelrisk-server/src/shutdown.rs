//! Graceful shutdown for the prediction server.
//!
//! Inference runs on tokio's blocking pool through an [`InferenceTracker`],
//! which keeps every [`JoinHandle`] it hands out in a [`TaskTracker`]. When
//! [`shutdown_signal`] resolves, axum stops accepting connections and `main`
//! calls [`InferenceTracker::drain`] to let running predictions finish within
//! `shutdown.timeout_seconds`.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Owns the blocking inference tasks and the shutdown trigger.
#[derive(Clone)]
pub struct InferenceTracker {
    tasks: TaskTracker,
    token: CancellationToken,
    drain_timeout: Duration,
}

impl InferenceTracker {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            tasks: TaskTracker::new(),
            token: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// Run one prediction on the blocking pool, tracked until it returns.
    pub fn spawn_inference<F, T>(&self, inference: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.tasks.spawn_blocking(inference)
    }

    /// Predictions currently running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Request shutdown without an OS signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait for running predictions, up to the drain timeout.
    ///
    /// Returns `true` if every prediction finished in time.
    pub async fn drain(&self) -> bool {
        self.tasks.close();
        match tokio::time::timeout(self.drain_timeout, self.tasks.wait()).await {
            Ok(()) => {
                info!("All in-flight predictions completed");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.in_flight(),
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Drain timeout expired with predictions still running"
                );
                false
            }
        }
    }
}

/// Resolves on SIGTERM, SIGINT (Ctrl-C elsewhere) or [`InferenceTracker::trigger`].
pub async fn shutdown_signal(tracker: InferenceTracker) {
    let token = tracker.token.clone();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received, stopping"),
                    _ = sigint.recv() => info!("SIGINT received, stopping"),
                    _ = token.cancelled() => info!("Shutdown requested"),
                }
            }
            _ => {
                warn!("Failed to install signal handlers; waiting for programmatic shutdown");
                token.cancelled().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, stopping"),
            _ = token.cancelled() => info!("Shutdown requested"),
        }
    }
}
