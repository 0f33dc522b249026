//! Run modes
//!
//! [`Application`] owns the configuration, the notification sink and the
//! shutdown context, and dispatches to one of three run modes. Every mode
//! uses the same unit of work: one pass over the configured users
//! ([`crate::session::run_pass`]).
//!
//! ```text
//!            ┌──────────────┐
//!            │ Application  │
//!            └──────┬───────┘
//!       ┌───────────┼──────────────┐
//!       ▼           ▼              ▼
//!  immediate    scheduled        daemon
//!  one pass     ScheduleSpec     DaemonScheduler
//!               next_run loop    daily cap loop
//!       └───────────┼──────────────┘
//!                   ▼
//!               run_pass ──▶ SessionOrchestrator per user
//! ```
//!
//! # Modules
//!
//! - [`shutdown`] - Shutdown flag, interruptible waits and signal handling
//! - [`trigger`] - Cron subset for scheduled mode
//! - [`daemon`] - Daily-capped pass loop

pub mod daemon;
pub mod shutdown;
pub mod trigger;

pub use daemon::{DaemonScheduler, DaemonState};
pub use shutdown::{install_signal_handler, CancellationPolicy, ShutdownContext};
pub use trigger::ScheduleSpec;

use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{Config, StartupMode};
use crate::error::Result;
use crate::notifications::{NotificationService, NotificationSink};
use crate::session::{run_pass, LiveSessions, SessionRunner};
use crate::utils::format_minutes_seconds;

/// Orchestration context for one process run
pub struct Application {
    config: Arc<Config>,
    sink: Arc<dyn NotificationSink>,
    shutdown: ShutdownContext,
    clock: daemon::Clock,
}

impl Application {
    pub fn new(config: Config) -> Self {
        let service = NotificationService::new(&config.notification);
        info!(
            enabled = config.notification.enabled,
            channels = service.channel_count(),
            "Notification service ready"
        );
        Self::with_sink(config, Arc::new(service))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            config: Arc::new(config),
            sink,
            shutdown: ShutdownContext::new(),
            clock: Arc::new(Local::now),
        }
    }

    /// Replace the wall clock used by the scheduled and daemon loops
    pub fn with_clock(mut self, clock: daemon::Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shutdown(&self) -> ShutdownContext {
        self.shutdown.clone()
    }

    pub fn sink(&self) -> Arc<dyn NotificationSink> {
        Arc::clone(&self.sink)
    }

    pub fn cancellation_policy(&self) -> CancellationPolicy {
        CancellationPolicy::for_mode(self.config.app.startup_mode)
    }

    /// Run the configured mode against the live service
    pub async fn run(&self) -> Result<()> {
        let runner = LiveSessions::new(Arc::clone(&self.config), self.sink(), self.shutdown());
        self.run_with(&runner).await
    }

    /// Run the configured mode with `runner` as the unit of work
    ///
    /// # Errors
    ///
    /// Immediate mode returns the pass error. Scheduled mode fails on an
    /// unsupported cron expression. Daemon mode never fails.
    pub async fn run_with<S>(&self, runner: &S) -> Result<()>
    where
        S: SessionRunner + ?Sized,
    {
        let mode = self.config.app.startup_mode;
        info!(%mode, "Starting");

        match mode {
            StartupMode::Immediate => {
                run_pass(&self.config, runner, self.sink.as_ref(), &self.shutdown).await?;
                Ok(())
            }
            StartupMode::Scheduled => self.run_scheduled(runner).await,
            StartupMode::Daemon => {
                self.run_daemon(runner).await;
                Ok(())
            }
        }
    }

    async fn run_scheduled<S>(&self, runner: &S) -> Result<()>
    where
        S: SessionRunner + ?Sized,
    {
        if !self.config.schedule.enabled {
            error!("Scheduled mode selected but schedule.enabled is false");
            return Ok(());
        }
        let spec: ScheduleSpec = self.config.schedule.cron_expression.parse()?;
        info!(schedule = %spec, "Schedule set, waiting for the first run");

        let mut last_run: Option<DateTime<Local>> = None;
        loop {
            let now = (self.clock)();
            let next = spec.next_run(now, last_run);
            let wait = spec.duration_until_next(now, last_run);
            info!(
                next = %next.format("%Y-%m-%d %H:%M:%S"),
                wait = %format_minutes_seconds(wait.as_secs()),
                "Waiting for next scheduled run"
            );
            if !self.shutdown.pause(wait).await {
                break;
            }

            last_run = Some((self.clock)());
            if let Err(e) = run_pass(&self.config, runner, self.sink.as_ref(), &self.shutdown).await {
                error!(error = %e, "Scheduled pass failed");
            }
            if self.shutdown.is_requested() {
                break;
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    async fn run_daemon<S>(&self, runner: &S)
    where
        S: SessionRunner + ?Sized,
    {
        if !self.config.daemon.enabled {
            error!("Daemon mode selected but daemon.enabled is false");
            return;
        }

        let config: &Config = &self.config;
        let sink: &dyn NotificationSink = self.sink.as_ref();
        let shutdown = &self.shutdown;

        let mut daemon = DaemonScheduler::new(config.daemon.clone(), self.shutdown())
            .with_clock(Arc::clone(&self.clock));
        daemon
            .run(move || async move { run_pass(config, runner, sink, shutdown).await.map(|_| ()) })
            .await;
    }
}
