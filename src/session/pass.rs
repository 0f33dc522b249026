//! One pass over the configured users
//!
//! Users run one after another, never concurrently, with a 30-60 s gap
//! between them. A pass with configured users ends with an aggregate
//! summary; a single-user pass reports through the session itself.

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{SessionOrchestrator, SessionStats};
use crate::config::{Config, SpanRange, UserConfig};
use crate::error::{PacerErrorTrait, Result};
use crate::notifications::NotificationSink;
use crate::scheduler::shutdown::ShutdownContext;
use crate::utils::format_minutes_seconds;

/// Gap between two users' sessions, in seconds
pub const USER_GAP_SECS: SpanRange = SpanRange { min: 30.0, max: 60.0 };

/// Runs the session for one user
#[async_trait]
pub trait SessionRunner: Send + Sync {
    /// `None` is the single default user of a single-user setup
    async fn run_session(&self, user: Option<&UserConfig>) -> Result<SessionStats>;
}

/// Sessions against the live service
pub struct LiveSessions {
    config: Arc<Config>,
    sink: Arc<dyn NotificationSink>,
    shutdown: ShutdownContext,
}

impl LiveSessions {
    pub fn new(config: Arc<Config>, sink: Arc<dyn NotificationSink>, shutdown: ShutdownContext) -> Self {
        Self {
            config,
            sink,
            shutdown,
        }
    }
}

#[async_trait]
impl SessionRunner for LiveSessions {
    async fn run_session(&self, user: Option<&UserConfig>) -> Result<SessionStats> {
        let session = SessionOrchestrator::from_config(
            &self.config,
            user,
            Arc::clone(&self.sink),
            self.shutdown.clone(),
        )?;
        session.run().await
    }
}

/// What a pass produced
#[derive(Debug)]
pub enum PassReport {
    Single(SessionStats),
    Multi(PassSummary),
}

/// Aggregate over a multi-user pass
#[derive(Debug, Default)]
pub struct PassSummary {
    pub total_users: usize,
    pub completed: Vec<SessionStats>,
    pub failed: Vec<String>,
}

impl PassSummary {
    pub fn total_reading_secs(&self) -> u64 {
        self.completed.iter().map(|s| s.elapsed().as_secs()).sum()
    }

    pub fn total_successes(&self) -> u64 {
        self.completed.iter().map(|s| s.successes).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.completed.iter().map(|s| s.failures).sum()
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_successes() + self.total_failures();
        if total == 0 {
            return 0.0;
        }
        self.total_successes() as f64 / total as f64 * 100.0
    }

    pub fn render(&self) -> String {
        let names = |list: Vec<&str>| {
            if list.is_empty() {
                "none".to_string()
            } else {
                list.join(", ")
            }
        };
        let completed = names(self.completed.iter().map(|s| s.user.as_str()).collect());
        let failed = names(self.failed.iter().map(String::as_str).collect());

        format!(
            "WeRead multi-user summary\n\
             Users: {total}\n\
             Completed: {ok} ({completed})\n\
             Failed: {bad} ({failed})\n\
             Total reading time: {duration}\n\
             Successful reads: {reads}\n\
             Failed reads: {failed_reads}\n\
             Overall success rate: {rate:.1}%",
            total = self.total_users,
            ok = self.completed.len(),
            bad = self.failed.len(),
            duration = format_minutes_seconds(self.total_reading_secs()),
            reads = self.total_successes(),
            failed_reads = self.total_failures(),
            rate = self.success_rate(),
        )
    }
}

/// Run one pass: the default user, or every configured user in turn
///
/// # Errors
///
/// A single-user pass returns the session's error after reporting it.
/// A multi-user pass reports each failed user and always completes.
pub async fn run_pass<S>(
    config: &Config,
    runner: &S,
    sink: &dyn NotificationSink,
    shutdown: &ShutdownContext,
) -> Result<PassReport>
where
    S: SessionRunner + ?Sized,
{
    if !config.is_multi_user() {
        return match runner.run_session(None).await {
            Ok(stats) => {
                info!(summary = %stats.summary(), "Session statistics");
                Ok(PassReport::Single(stats))
            }
            Err(e) => {
                let message = format!("Reading session failed: {e}");
                error!(
                    error = %e,
                    category = e.category().as_str(),
                    recoverable = e.is_recoverable(),
                    "Reading session failed"
                );
                sink.send(&message).await;
                Err(e)
            }
        };
    }

    info!(users = config.users.len(), "Multi-user pass starting");
    let mut rng = ChaCha8Rng::from_entropy();
    let mut summary = PassSummary {
        total_users: config.users.len(),
        ..Default::default()
    };

    for (i, user) in config.users.iter().enumerate() {
        if shutdown.is_requested() {
            info!("Shutdown requested, skipping remaining users");
            break;
        }
        if i > 0 {
            let gap = USER_GAP_SECS.sample_secs(&mut rng);
            info!(secs = gap.as_secs(), "Waiting before next user");
            if !shutdown.pause(gap).await {
                break;
            }
        }

        info!(user = %user.name, "Starting user session");
        match runner.run_session(Some(user)).await {
            Ok(stats) => {
                info!(user = %user.name, summary = %stats.summary(), "User session statistics");
                summary.completed.push(stats);
            }
            Err(e) => {
                error!(
                    user = %user.name,
                    error = %e,
                    category = e.category().as_str(),
                    "User session failed"
                );
                sink.send(&format!("Reading session for user {} failed: {e}", user.name))
                    .await;
                summary.failed.push(user.name.clone());
            }
        }
    }

    let rendered = summary.render();
    info!(summary = %rendered, "Multi-user pass finished");
    if config.notification.enabled
        && config.notification.include_statistics
        && !sink.send(&rendered).await
    {
        warn!("Multi-user summary was not delivered");
    }

    Ok(PassReport::Multi(summary))
}
