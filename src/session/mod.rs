//! Reading sessions
//!
//! A [`SessionOrchestrator`] drives one user's session: startup delay,
//! session key renewal, then the read/pace loop until the drawn target
//! duration is reached or shutdown is requested. [`pass`] runs sessions for
//! every configured user.

pub mod pass;
pub mod stats;

pub use pass::{run_pass, LiveSessions, PassReport, PassSummary, SessionRunner};
pub use stats::SessionStats;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::client::credentials;
use crate::client::headers::random_user_agent;
use crate::client::transport::Transport;
use crate::client::{ReadOutcome, ReadingClient, SessionClient};
use crate::config::{Config, ReadingConfig, SpanRange, UserConfig};
use crate::error::{Error, PacerErrorTrait, Result};
use crate::notifications::NotificationSink;
use crate::reading::{BehaviorSimulator, Catalog, PositionScheduler};
use crate::scheduler::shutdown::ShutdownContext;
use crate::utils::format_minutes_seconds;

/// Pause after an unexpected error inside the read loop
pub const ERROR_COOLDOWN: Duration = Duration::from_secs(30);

/// Settings of one session once per-user overrides are applied
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub user: String,
    pub reading: ReadingConfig,
    pub startup_delay: SpanRange,
    /// Send the statistics summary when the session ends
    pub report_statistics: bool,
}

impl SessionPlan {
    pub fn for_user(config: &Config, user: Option<&UserConfig>) -> Self {
        let reading = match user {
            Some(user) if !user.reading_overrides.is_empty() => {
                info!(user = %user.name, "Applying per-user reading overrides");
                user.reading_overrides.apply(&config.reading)
            }
            _ => config.reading.clone(),
        };

        Self {
            user: user.map_or_else(|| "default".to_string(), |u| u.name.clone()),
            reading,
            startup_delay: config.app.startup_delay,
            report_statistics: config.notification.enabled && config.notification.include_statistics,
        }
    }
}

/// Drives one reading session
pub struct SessionOrchestrator<C> {
    plan: SessionPlan,
    client: C,
    scheduler: PositionScheduler,
    behavior: BehaviorSimulator,
    sink: Arc<dyn NotificationSink>,
    shutdown: ShutdownContext,
    rng: ChaCha8Rng,
}

impl SessionOrchestrator<SessionClient> {
    /// Wire up a live session for `user` (or the single default user)
    ///
    /// # Errors
    ///
    /// Fails when the captured session is missing or invalid, or when no
    /// starting position can be found in the catalog.
    pub fn from_config(
        config: &Config,
        user: Option<&UserConfig>,
        sink: Arc<dyn NotificationSink>,
        shutdown: ShutdownContext,
    ) -> Result<Self> {
        let plan = SessionPlan::for_user(config, user);
        let captured = credentials::load(user, &config.curl)?;

        let catalog = Catalog::from_config(&plan.reading.books);
        let mut scheduler = PositionScheduler::new(catalog, &plan.reading);
        let (seed_book, seed_chapter) = if plan.reading.use_curl_data_first {
            captured.seed().unwrap_or_default()
        } else {
            Default::default()
        };
        scheduler.initialize(&seed_book, &seed_chapter)?;

        let simulation = &config.human_simulation;
        let mut rng = ChaCha8Rng::from_entropy();
        let user_agent = (simulation.enabled && simulation.rotate_user_agent)
            .then(|| random_user_agent(&mut rng));
        if let Some(ua) = user_agent {
            info!(user = %plan.user, user_agent = ua, "Rotated User-Agent for this session");
        }

        let transport = Transport::new(&config.network)?;
        let client = SessionClient::new(plan.user.clone(), captured, transport, user_agent);
        let behavior = BehaviorSimulator::new(simulation.clone());

        Ok(Self::new(plan, client, scheduler, behavior, sink, shutdown))
    }
}

impl<C: ReadingClient> SessionOrchestrator<C> {
    pub fn new(
        plan: SessionPlan,
        client: C,
        scheduler: PositionScheduler,
        behavior: BehaviorSimulator,
        sink: Arc<dyn NotificationSink>,
        shutdown: ShutdownContext,
    ) -> Self {
        Self {
            plan,
            client,
            scheduler,
            behavior,
            sink,
            shutdown,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Seed the draws for startup delay and target duration
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    /// Run the session to completion
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthExpired`] when the session key cannot be renewed
    /// before the first read. Per-read failures are only counted.
    pub async fn run(mut self) -> Result<SessionStats> {
        info!(
            user = %self.plan.user,
            mode = %self.plan.reading.mode,
            target = %self.plan.reading.target_duration,
            "Reading session starting"
        );

        let delay = self.plan.startup_delay.sample_secs(&mut self.rng);
        info!(delay_secs = delay.as_secs(), "Startup delay");
        self.shutdown.pause(delay).await;

        let target_minutes = self.plan.reading.target_duration.sample_whole(&mut self.rng);
        let mut stats = SessionStats::new(&self.plan.user, target_minutes);
        info!(target_minutes, "Target reading time drawn");

        if !self.client.renew_cookie().await {
            error!(user = %self.plan.user, "Could not renew the session key, aborting session");
            return Err(Error::AuthExpired);
        }
        self.client.begin_session();

        let target = stats.target();
        while stats.elapsed() < target {
            if self.shutdown.is_requested() {
                info!(user = %self.plan.user, "Shutdown requested, ending session");
                break;
            }

            if self.behavior.should_break() {
                let pause = self.behavior.break_duration();
                info!(secs = pause.as_secs(), "Taking a break");
                self.shutdown.pause(pause).await;
                stats.record_break(pause);
                continue;
            }

            match self.read_once(&mut stats).await {
                Ok(latency) => stats.record_latency(latency),
                Err(e) => {
                    error!(
                        user = %self.plan.user,
                        error = %e,
                        category = e.category().as_str(),
                        "Unexpected error while reading"
                    );
                    stats.record_failure();
                    self.shutdown.pause(ERROR_COOLDOWN).await;
                    continue;
                }
            }

            let interval = self.behavior.paced_interval(&self.plan.reading.reading_interval);
            self.shutdown.pause(interval).await;
        }

        stats.finish();
        info!(
            user = %self.plan.user,
            duration = %format_minutes_seconds(stats.elapsed().as_secs()),
            successes = stats.successes,
            failures = stats.failures,
            "Reading session finished"
        );

        if self.plan.report_statistics && !self.sink.send(&stats.summary()).await {
            warn!(user = %self.plan.user, "Session summary was not delivered");
        }

        Ok(stats)
    }

    async fn read_once(&mut self, stats: &mut SessionStats) -> Result<Duration> {
        let position = self.scheduler.next()?;
        let outcome = self.client.read(&position).await?;

        match outcome {
            ReadOutcome::Success { .. } => {
                let name = self.scheduler.catalog().book_name(&position.book_id);
                stats.record_success(&position.book_id, &name, &position.chapter_id);
                info!(
                    book = %name,
                    chapter_id = %position.chapter_id,
                    progress_min = stats.elapsed().as_secs() / 60,
                    target_min = stats.target_minutes,
                    "Read recorded"
                );
            }
            ReadOutcome::RetryableFailure { reason, .. } => {
                stats.record_failure();
                warn!(
                    reason = reason.as_str(),
                    failures = stats.failures,
                    "Read not counted"
                );
            }
        }

        Ok(outcome.latency())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FailureReason;
    use crate::config::{BookConfig, ChapterEntry, HumanSimulationConfig, ReadingOverrides};
    use crate::notifications::RecordingSink;
    use crate::reading::Position;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedClient {
        renew_ok: bool,
        fail_reads: bool,
        reads: Vec<Position>,
        renewals: u32,
        began_at: Arc<Mutex<Option<Instant>>>,
    }

    #[async_trait]
    impl ReadingClient for ScriptedClient {
        async fn renew_cookie(&mut self) -> bool {
            self.renewals += 1;
            self.renew_ok
        }

        fn begin_session(&mut self) {
            *self.began_at.lock().unwrap() = Some(Instant::now());
        }

        async fn read(&mut self, position: &Position) -> Result<ReadOutcome> {
            self.reads.push(position.clone());
            if self.fail_reads {
                return Err(Error::config("scripted failure"));
            }
            Ok(ReadOutcome::Success {
                latency: Duration::from_millis(50),
            })
        }
    }

    fn reading() -> ReadingConfig {
        ReadingConfig {
            target_duration: SpanRange::fixed(1.0),
            reading_interval: SpanRange::fixed(10.0),
            books: vec![BookConfig {
                name: "Walden".into(),
                book_id: "walden".into(),
                chapters: vec![ChapterEntry::Id("c1".into())],
            }],
            ..Default::default()
        }
    }

    fn orchestrator(client: ScriptedClient, sink: Arc<RecordingSink>) -> SessionOrchestrator<ScriptedClient> {
        let plan = SessionPlan {
            user: "tester".into(),
            reading: reading(),
            startup_delay: SpanRange::fixed(0.0),
            report_statistics: true,
        };
        let mut scheduler = PositionScheduler::new(Catalog::from_config(&plan.reading.books), &plan.reading);
        scheduler.initialize("", "").unwrap();
        SessionOrchestrator::new(
            plan,
            client,
            scheduler,
            BehaviorSimulator::new(HumanSimulationConfig::default()),
            sink,
            ShutdownContext::new(),
        )
    }

    #[test]
    fn test_plan_applies_user_overrides() {
        let mut config = Config::default();
        config.notification.include_statistics = false;
        let user = UserConfig {
            name: "alice".into(),
            file_path: None,
            content: None,
            reading_overrides: ReadingOverrides {
                reading_interval: Some(SpanRange::fixed(5.0)),
                ..Default::default()
            },
        };

        let plan = SessionPlan::for_user(&config, Some(&user));
        assert_eq!(plan.user, "alice");
        assert_eq!(plan.reading.reading_interval, SpanRange::fixed(5.0));
        assert_eq!(plan.reading.target_duration, config.reading.target_duration);
        assert!(!plan.report_statistics);

        let plan = SessionPlan::for_user(&config, None);
        assert_eq!(plan.user, "default");
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failure_is_fatal() {
        let sink = Arc::new(RecordingSink::new());
        let result = orchestrator(ScriptedClient::default(), sink.clone()).run().await;
        assert!(matches!(result, Err(Error::AuthExpired)));
        assert!(sink.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_session_reports_summary() {
        let sink = Arc::new(RecordingSink::new());
        let client = ScriptedClient {
            renew_ok: true,
            ..Default::default()
        };
        let stats = orchestrator(client, sink.clone()).run().await.unwrap();

        // 10 s pacing over a one-minute target
        assert_eq!(stats.successes, 6);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.books_read(), 1);
        assert!(stats.elapsed() >= Duration::from_secs(60));
        assert_eq!(sink.messages().len(), 1);
        assert!(sink.messages()[0].contains("User: tester"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_loop_begins_after_startup_delay() {
        let sink = Arc::new(RecordingSink::new());
        let began_at = Arc::new(Mutex::new(None));
        let client = ScriptedClient {
            renew_ok: true,
            began_at: Arc::clone(&began_at),
            ..Default::default()
        };
        let mut session = orchestrator(client, sink);
        session.plan.startup_delay = SpanRange::fixed(120.0);

        let start = Instant::now();
        session.run().await.unwrap();

        let began_at = began_at.lock().unwrap().expect("read loop started");
        assert_eq!(began_at - start, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_errors_cool_down() {
        let sink = Arc::new(RecordingSink::new());
        let client = ScriptedClient {
            renew_ok: true,
            fail_reads: true,
            ..Default::default()
        };
        let stats = orchestrator(client, sink).run().await.unwrap();

        // One attempt every 30 s cooldown until the minute is up
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let sink = Arc::new(RecordingSink::new());
        let client = ScriptedClient {
            renew_ok: true,
            ..Default::default()
        };
        let session = orchestrator(client, sink);
        session.shutdown.request();
        let stats = session.run().await.unwrap();
        assert_eq!(stats.attempts(), 0);
        assert!(stats.is_finished());
    }

    #[test]
    fn test_failure_reason_is_counted_not_fatal() {
        let outcome = ReadOutcome::RetryableFailure {
            reason: FailureReason::SyncKeyMissing,
            latency: Duration::from_millis(10),
        };
        assert!(!outcome.is_success());
        assert_eq!(outcome.latency(), Duration::from_millis(10));
    }
}
