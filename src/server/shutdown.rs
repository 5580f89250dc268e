use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;

pub struct ShutdownManager {
    shutdown: Arc<AtomicBool>,
    active_requests: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            active_requests: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Resolve on Ctrl-C, SIGTERM or [`ShutdownManager::signal_shutdown`],
    /// then mark the server as shutting down.
    pub async fn wait_for_shutdown(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
                _ = self.signaled() => {},
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = self.signaled() => {},
            }
        }

        self.signal_shutdown();
        tracing::info!("Shutting down gracefully...");
        Ok(())
    }

    /// Resolve once shutdown has been signalled, without listening for OS
    /// signals itself.
    pub async fn signaled(&self) {
        // Subscribe before checking the flag so a concurrent
        // signal_shutdown() cannot slip in between and be lost.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutting_down() {
            return;
        }
        notified.await;
    }

    pub fn signal_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn increment_requests(&self) {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_requests(&self) {
        self.active_requests.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    pub async fn wait_for_requests(&self, timeout: Duration) {
        tracing::info!("Waiting for {} in-flight requests...", self.active_requests());

        let start = tokio::time::Instant::now();

        while start.elapsed() < timeout {
            if self.active_requests() == 0 {
                tracing::info!("Server stopped");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tracing::warn!(
            "Forced shutdown after timeout ({} requests remain)",
            self.active_requests()
        );
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
