//! Graceful shutdown
//!
//! One [`ShutdownController`] per process. Background loops take a child token
//! and exit when it is cancelled; long-lived connection tasks also hold a
//! [`TaskGuard`] so shutdown can wait for them to close cleanly.
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//! supervisor.spawn_monitor(shutdown.token());
//!
//! let guard = shutdown.register_task();
//! tokio::spawn(async move {
//!     let token = guard.token();
//!     // ... run until token.cancelled()
//! });
//!
//! shutdown.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Cancellation sent, waiting for registered tasks to finish
    Draining,
    /// Drain timeout exceeded; remaining tasks are abandoned
    Terminating,
    /// Shutdown complete
    Terminated,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Coordinates graceful shutdown across components
#[derive(Debug)]
pub struct ShutdownController {
    cancel_token: CancellationToken,
    phase: watch::Sender<ShutdownPhase>,
    initiated: AtomicBool,
    active_tasks: AtomicU32,
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Create a controller with the default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Create a controller that waits at most `drain_timeout` for tasks
    #[must_use]
    pub fn with_timeout(drain_timeout: Duration) -> Arc<Self> {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase,
            initiated: AtomicBool::new(false),
            active_tasks: AtomicU32::new(0),
            drain_timeout,
        })
    }

    /// Child token for a component; cancelled when shutdown starts
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Watch phase changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Whether shutdown has started
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Track a task that shutdown should wait for
    pub fn register_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            controller: Arc::clone(self),
        }
    }

    /// Number of registered tasks still running
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Cancel every token and wait (bounded) for registered tasks.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        info!("Initiating graceful shutdown");
        self.set_phase(ShutdownPhase::Draining);
        self.cancel_token.cancel();

        let started = Instant::now();
        loop {
            let active = self.active_task_count();
            if active == 0 {
                info!("All tasks completed gracefully");
                break;
            }
            if started.elapsed() >= self.drain_timeout {
                warn!(
                    active_tasks = active,
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Drain timeout exceeded, terminating"
                );
                self.set_phase(ShutdownPhase::Terminating);
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        self.set_phase(ShutdownPhase::Terminated);
    }

    /// Cancel everything without waiting
    pub fn force_shutdown(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!("Force shutdown initiated");
            self.cancel_token.cancel();
            self.set_phase(ShutdownPhase::Terminated);
        }
    }
}

/// Registration of a running task; dropping it marks the task finished
#[derive(Debug)]
pub struct TaskGuard {
    controller: Arc<ShutdownController>,
}

impl TaskGuard {
    /// Token cancelled when shutdown starts
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.controller.token()
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.controller.cancel_token.is_cancelled()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.controller.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolve on Ctrl+C or SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

/// Wait for a signal, then run the controller's shutdown
pub async fn shutdown_signal_with_controller(controller: Arc<ShutdownController>) {
    wait_for_shutdown_signal().await;
    controller.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_phases() {
        let controller = ShutdownController::new();
        assert_eq!(controller.phase(), ShutdownPhase::Running);
        assert!(!controller.is_shutting_down());

        controller.shutdown().await;

        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
        assert!(controller.is_shutting_down());
    }

    #[test]
    fn test_task_guard_counts() {
        let controller = ShutdownController::new();
        {
            let _a = controller.register_task();
            let _b = controller.register_task();
            assert_eq!(controller.active_task_count(), 2);
        }
        assert_eq!(controller.active_task_count(), 0);
    }

    #[tokio::test]
    async fn test_tokens_cancelled_on_shutdown() {
        let controller = ShutdownController::new();
        let token = controller.token();
        let guard = controller.register_task();
        let guard_token = guard.token();

        let task = tokio::spawn(async move {
            guard_token.cancelled().await;
            drop(guard);
        });

        controller.shutdown().await;

        assert!(token.is_cancelled());
        assert_eq!(controller.active_task_count(), 0);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_timeout() {
        let controller = ShutdownController::with_timeout(Duration::from_millis(60));
        let _stuck = controller.register_task();
        let mut phases = controller.subscribe();

        controller.shutdown().await;

        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
        assert!(phases.has_changed().unwrap());
        assert_eq!(controller.active_task_count(), 1);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let controller = ShutdownController::new();
        let other = Arc::clone(&controller);

        tokio::join!(controller.shutdown(), other.shutdown());

        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
    }

    #[test]
    fn test_force_shutdown() {
        let controller = ShutdownController::new();
        let token = controller.token();

        controller.force_shutdown();

        assert_eq!(controller.phase(), ShutdownPhase::Terminated);
        assert!(token.is_cancelled());
    }
}
