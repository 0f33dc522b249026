//! Daemon mode: passes in a loop under a daily cap
//!
//! The counter belongs to the local calendar date. When the date changes
//! the counter resets before the next cap check, so a pass that finishes
//! at 23:59 and one that starts at 00:00 count toward different days.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::shutdown::ShutdownContext;
use crate::config::DaemonConfig;
use crate::error::{PacerErrorTrait, Result};
use crate::utils::format_minutes_seconds;

/// Wait after a failed pass
pub const ERROR_RETRY: Duration = Duration::from_secs(300);

/// Wall-clock source, swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Passes completed on the current date
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonState {
    date: Option<NaiveDate>,
    sessions_today: u32,
}

impl DaemonState {
    /// Move to `today`, resetting the counter on a date change
    ///
    /// Returns `true` when a reset happened.
    pub fn observe(&mut self, today: NaiveDate) -> bool {
        match self.date {
            Some(date) if date == today => false,
            previous => {
                self.date = Some(today);
                self.sessions_today = 0;
                previous.is_some()
            }
        }
    }

    pub fn cap_reached(&self, max_daily_sessions: u32) -> bool {
        self.sessions_today >= max_daily_sessions
    }

    pub fn record_pass(&mut self) {
        self.sessions_today += 1;
    }

    pub fn sessions_today(&self) -> u32 {
        self.sessions_today
    }
}

/// Time from `now` to the next local midnight
pub fn duration_until_midnight(now: DateTime<Local>) -> Duration {
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    let midnight = tomorrow
        .and_hms_opt(0, 0, 0)
        .and_then(|t| Local.from_local_datetime(&t).earliest());

    match midnight {
        Some(midnight) => midnight.signed_duration_since(now).to_std().unwrap_or_default(),
        // Midnight skipped by a DST change
        None => Duration::from_secs(3600),
    }
}

pub struct DaemonScheduler {
    config: DaemonConfig,
    shutdown: ShutdownContext,
    clock: Clock,
    rng: ChaCha8Rng,
    state: DaemonState,
}

impl DaemonScheduler {
    pub fn new(config: DaemonConfig, shutdown: ShutdownContext) -> Self {
        Self {
            config,
            shutdown,
            clock: Arc::new(Local::now),
            rng: ChaCha8Rng::from_entropy(),
            state: DaemonState::default(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Run passes until shutdown is requested
    ///
    /// Every pass counts toward the daily cap whether it failed or not; a
    /// failure only shortens the wait before the next one.
    pub async fn run<F, Fut>(&mut self, mut pass: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(
            max_daily_sessions = self.config.max_daily_sessions,
            interval_minutes = %self.config.session_interval,
            "Daemon started"
        );

        while !self.shutdown.is_requested() {
            let now = (self.clock)();
            if self.state.observe(now.date_naive()) {
                info!(date = %now.date_naive(), "New day, session counter reset");
            }

            if self.state.cap_reached(self.config.max_daily_sessions) {
                let wait = duration_until_midnight(now);
                info!(
                    sessions = self.state.sessions_today(),
                    wait = %format_minutes_seconds(wait.as_secs()),
                    "Daily session limit reached, waiting for midnight"
                );
                if !self.shutdown.pause(wait).await {
                    break;
                }
                continue;
            }

            info!(
                session = self.state.sessions_today() + 1,
                max = self.config.max_daily_sessions,
                "Starting daemon pass"
            );
            let outcome = pass().await;
            self.state.record_pass();
            let wait = match outcome {
                Ok(()) => {
                    let minutes = self.config.session_interval.sample(&mut self.rng);
                    let wait = Duration::from_secs_f64(minutes * 60.0);
                    info!(
                        wait = %format_minutes_seconds(wait.as_secs()),
                        "Pass finished, waiting for the next one"
                    );
                    wait
                }
                Err(e) => {
                    error!(
                        error = %e,
                        category = e.category().as_str(),
                        sessions_today = self.state.sessions_today(),
                        "Daemon pass failed, retrying in 5 minutes"
                    );
                    ERROR_RETRY
                }
            };

            if !self.shutdown.pause(wait).await {
                break;
            }
        }

        info!(sessions_today = self.state.sessions_today(), "Daemon stopped");
    }
}
