//! Graceful Shutdown
//!
//! Listeners watch a stop flag; dispatched evaluations hold a guard so
//! the process can wait for them after the listeners are gone.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Shared stop flag plus a count of running evaluations.
#[derive(Clone)]
pub struct ShutdownController {
    stop: Arc<watch::Sender<bool>>,
    running: Arc<Running>,
}

#[derive(Default)]
struct Running {
    count: AtomicUsize,
    idle: Notify,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop: Arc::new(stop),
            running: Arc::default(),
        }
    }

    /// Flip the stop flag. Listeners subscribed earlier or later both see it.
    pub fn initiate_shutdown(&self) {
        if !self.stop.send_replace(true) {
            tracing::info!("stopping listeners");
        }
    }

    /// Receiver whose value becomes `true` once shutdown starts.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Count one evaluation as running until the guard is dropped.
    pub fn evaluation_guard(&self) -> EvaluationGuard {
        self.running.count.fetch_add(1, Ordering::SeqCst);
        EvaluationGuard {
            running: self.running.clone(),
        }
    }

    pub(crate) fn running_evaluations(&self) -> usize {
        self.running.count.load(Ordering::SeqCst)
    }

    /// Wait until no evaluation is running, or `timeout` elapses.
    ///
    /// Returns false on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // register before checking so a final release cannot slip between
            let idle = self.running.idle.notified();
            let running = self.running_evaluations();
            if running == 0 {
                return true;
            }

            tokio::select! {
                _ = idle => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(running, "drain timeout, evaluations still running");
                    return false;
                }
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one dispatched evaluation as running.
pub struct EvaluationGuard {
    running: Arc<Running>,
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        if self.running.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.running.idle.notify_waiters();
        }
    }
}

/// Wait for SIGINT or SIGTERM, then initiate shutdown.
///
/// If a handler cannot be installed, the other signal still works.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }

    controller.initiate_shutdown();
}
