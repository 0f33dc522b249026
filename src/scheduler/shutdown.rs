//! Cooperative cancellation
//!
//! A [`ShutdownContext`] is cloned into every loop that waits. Signals flip
//! it once; each loop sees the flag at its next check and stops starting
//! new work. Long waits are sliced into one-second ticks so the flag is
//! observed promptly.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use crate::config::StartupMode;

/// Granularity of interruptible waits
pub const TICK: Duration = Duration::from_secs(1);

/// What a termination signal does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationPolicy {
    /// Exit the process right away
    Immediate,
    /// Let the in-flight request finish, then stop at the next check
    Graceful,
}

impl CancellationPolicy {
    pub fn for_mode(mode: StartupMode) -> Self {
        match mode {
            StartupMode::Immediate => Self::Immediate,
            StartupMode::Scheduled | StartupMode::Daemon => Self::Graceful,
        }
    }
}

/// Shared shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownContext {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownContext {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Ask every loop to stop
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` in ticks
    ///
    /// Returns `false` when shutdown was requested before the full duration
    /// passed.
    pub async fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(TICK)).await;
        }
    }
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Spawn the signal listener for `policy`
pub fn install_signal_handler(
    shutdown: ShutdownContext,
    policy: CancellationPolicy,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        termination_signal().await;
        shutdown.request();
        match policy {
            CancellationPolicy::Immediate => {
                info!("Termination signal received, exiting now");
                std::process::exit(0);
            }
            CancellationPolicy::Graceful => {
                info!("Termination signal received, finishing the current request before stopping");
            }
        }
    })
}
