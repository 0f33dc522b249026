//! Configuration management for weread-pacer
//!
//! This module handles loading and validating configuration from a TOML file
//! and environment variables. Environment values win over the file, and the
//! file wins over the built-in defaults.

pub mod range;

pub use range::{RangeError, SpanRange};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process startup behaviour
    pub app: AppConfig,

    /// Global captured-session source (single-user mode)
    pub curl: CurlConfig,

    /// Per-user captured sessions (multi-user mode when non-empty)
    pub users: Vec<UserConfig>,

    /// Reading policy and catalog
    pub reading: ReadingConfig,

    /// Transport policy
    pub network: NetworkConfig,

    /// Human behaviour simulation
    pub human_simulation: HumanSimulationConfig,

    /// Notification channels
    pub notification: NotificationConfig,

    /// Periodic schedule for `scheduled` mode
    pub schedule: ScheduleConfig,

    /// Daemon loop policy
    pub daemon: DaemonConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// How the process runs reading passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Run one pass and exit
    #[default]
    Immediate,
    /// Run passes on a cron-like schedule
    Scheduled,
    /// Run passes back to back with a daily cap
    Daemon,
}

impl StartupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Scheduled => "scheduled",
            Self::Daemon => "daemon",
        }
    }
}

impl FromStr for StartupMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "scheduled" => Ok(Self::Scheduled),
            "daemon" => Ok(Self::Daemon),
            other => Err(Error::config(format!("unknown startup mode: {other}"))),
        }
    }
}

impl fmt::Display for StartupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position selection policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMode {
    /// Chapter after chapter, book after book
    Sequential,
    /// Mostly sequential with occasional chapter jumps and book switches
    #[default]
    SmartRandom,
    /// Independent uniform draw every time
    PureRandom,
}

impl ReadingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::SmartRandom => "smart_random",
            Self::PureRandom => "pure_random",
        }
    }
}

impl FromStr for ReadingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "smart_random" => Ok(Self::SmartRandom),
            "pure_random" => Ok(Self::PureRandom),
            other => Err(Error::config(format!("unknown reading mode: {other}"))),
        }
    }
}

impl fmt::Display for ReadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub startup_mode: StartupMode,

    /// Random delay before a session starts, in seconds
    pub startup_delay: SpanRange,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            startup_mode: StartupMode::Immediate,
            startup_delay: SpanRange { min: 1.0, max: 10.0 },
        }
    }
}

/// Where the captured browser request (a "copy as cURL" command) comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CurlConfig {
    pub file_path: Option<PathBuf>,
    pub content: Option<String>,
}

/// One account in multi-user mode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub name: String,
    pub file_path: Option<PathBuf>,
    pub content: Option<String>,
    pub reading_overrides: ReadingOverrides,
}

/// Typed per-user overrides of the reading policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingOverrides {
    pub mode: Option<ReadingMode>,
    pub target_duration: Option<SpanRange>,
    pub reading_interval: Option<SpanRange>,
    pub use_curl_data_first: Option<bool>,
    pub fallback_to_config: Option<bool>,
}

impl ReadingOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge the set fields into a copy of `base`
    pub fn apply(&self, base: &ReadingConfig) -> ReadingConfig {
        let mut effective = base.clone();
        if let Some(mode) = self.mode {
            effective.mode = mode;
        }
        if let Some(range) = self.target_duration {
            effective.target_duration = range;
        }
        if let Some(range) = self.reading_interval {
            effective.reading_interval = range;
        }
        if let Some(flag) = self.use_curl_data_first {
            effective.use_curl_data_first = flag;
        }
        if let Some(flag) = self.fallback_to_config {
            effective.fallback_to_config = flag;
        }
        effective
    }
}

/// Reading policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    pub mode: ReadingMode,

    /// Session length in minutes
    pub target_duration: SpanRange,

    /// Pause between read pings in seconds
    pub reading_interval: SpanRange,

    /// Start from the book/chapter found in the captured request
    pub use_curl_data_first: bool,

    /// Start from the first configured book when the captured one is unusable
    pub fallback_to_config: bool,

    pub books: Vec<BookConfig>,

    pub smart_random: SmartRandomConfig,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            mode: ReadingMode::SmartRandom,
            target_duration: SpanRange { min: 60.0, max: 70.0 },
            reading_interval: SpanRange { min: 25.0, max: 35.0 },
            use_curl_data_first: true,
            fallback_to_config: true,
            books: Vec::new(),
            smart_random: SmartRandomConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConfig {
    pub name: String,
    pub book_id: String,
    #[serde(default)]
    pub chapters: Vec<ChapterEntry>,
}

/// A chapter given either as a bare id or with an explicit `ci` index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChapterEntry {
    Id(String),
    Detailed {
        #[serde(alias = "id")]
        chapter_id: String,
        #[serde(default, alias = "index")]
        chapter_index: Option<u32>,
    },
}

impl ChapterEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Detailed { chapter_id, .. } => chapter_id,
        }
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            Self::Id(_) => None,
            Self::Detailed { chapter_index, .. } => *chapter_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartRandomConfig {
    /// Probability of staying on the current book
    pub book_continuity: f64,

    /// Probability of reading the next chapter instead of jumping
    pub chapter_continuity: f64,

    /// Minimum seconds between two book switches
    pub book_switch_cooldown: u64,
}

impl Default for SmartRandomConfig {
    fn default() -> Self {
        Self {
            book_continuity: 0.8,
            chapter_continuity: 0.7,
            book_switch_cooldown: 300,
        }
    }
}

impl SmartRandomConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.book_switch_cooldown)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Request timeout in seconds
    pub timeout: u64,

    /// Extra attempts on retryable transport failures
    pub retry_times: u32,

    /// Requests per minute
    pub rate_limit: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: 30,
            retry_times: 3,
            rate_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanSimulationConfig {
    pub enabled: bool,
    pub reading_speed_variation: bool,
    pub break_probability: f64,

    /// Break length in seconds
    pub break_duration: SpanRange,

    /// Pick one User-Agent per session from the built-in pool
    pub rotate_user_agent: bool,
}

impl Default for HumanSimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reading_speed_variation: true,
            break_probability: 0.1,
            break_duration: SpanRange { min: 10.0, max: 20.0 },
            rotate_user_agent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,

    /// Send session and pass summaries, not only errors
    pub include_statistics: bool,

    pub channels: Vec<ChannelConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_statistics: true,
            channels: Vec::new(),
        }
    }
}

/// One notification channel; `settings` is interpreted by the channel named
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, alias = "config")]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Environment variables feeding channel settings: channel name,
/// `(variable, settings key)` pairs, and the keys a channel needs before it
/// can be created from the environment alone
type ChannelEnv = (&'static str, &'static [(&'static str, &'static str)], &'static [&'static str]);

const CHANNEL_ENV: &[ChannelEnv] = &[
    ("pushplus", &[("PUSHPLUS_TOKEN", "token")], &["token"]),
    (
        "telegram",
        &[("TELEGRAM_BOT_TOKEN", "bot_token"), ("TELEGRAM_CHAT_ID", "chat_id")],
        &["bot_token", "chat_id"],
    ),
    ("wxpusher", &[("WXPUSHER_SPT", "spt")], &["spt"]),
    (
        "bark",
        &[
            ("BARK_SERVER", "server"),
            ("BARK_DEVICE_KEY", "device_key"),
            ("BARK_SOUND", "sound"),
        ],
        &["server", "device_key"],
    ),
    (
        "ntfy",
        &[("NTFY_SERVER", "server"), ("NTFY_TOPIC", "topic"), ("NTFY_TOKEN", "token")],
        &["server", "topic"],
    ),
    (
        "feishu",
        &[("FEISHU_WEBHOOK_URL", "webhook_url"), ("FEISHU_MSG_TYPE", "msg_type")],
        &["webhook_url"],
    ),
    (
        "wework",
        &[("WEWORK_WEBHOOK_URL", "webhook_url"), ("WEWORK_MSG_TYPE", "msg_type")],
        &["webhook_url"],
    ),
    (
        "dingtalk",
        &[("DINGTALK_WEBHOOK_URL", "webhook_url"), ("DINGTALK_MSG_TYPE", "msg_type")],
        &["webhook_url"],
    ),
    (
        "gotify",
        &[
            ("GOTIFY_SERVER", "server"),
            ("GOTIFY_TOKEN", "token"),
            ("GOTIFY_PRIORITY", "priority"),
            ("GOTIFY_TITLE", "title"),
        ],
        &["server", "token"],
    ),
];

impl NotificationConfig {
    /// Fill channel settings from the environment
    ///
    /// Configured channels get their settings overwritten. With no channel
    /// configured at all, every channel whose required variables are set is
    /// created from the environment.
    pub fn apply_channel_env_overrides(&mut self) {
        let from_env = |vars: &[(&str, &str)]| {
            let mut settings = serde_json::Map::new();
            for (var, key) in vars {
                if let Some(value) = env_string(var) {
                    let value = match value.parse::<i64>() {
                        Ok(n) if *key == "priority" => serde_json::Value::from(n),
                        _ => serde_json::Value::String(value),
                    };
                    settings.insert((*key).to_string(), value);
                }
            }
            settings
        };

        if self.channels.is_empty() {
            for (name, vars, required) in CHANNEL_ENV {
                let settings = from_env(vars);
                if required.iter().all(|key| settings.contains_key(*key)) {
                    self.channels.push(ChannelConfig {
                        name: (*name).to_string(),
                        enabled: true,
                        settings,
                    });
                }
            }
            if !self.channels.is_empty() {
                tracing::info!(count = self.channels.len(), "Created notification channels from environment");
            }
            return;
        }

        for channel in &mut self.channels {
            if let Some((_, vars, _)) = CHANNEL_ENV.iter().find(|(name, _, _)| *name == channel.name) {
                channel.settings.extend(from_env(vars));
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub cron_expression: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron_expression: String::from("0 */2 * * *"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub enabled: bool,

    /// Pause between passes in minutes
    pub session_interval: SpanRange,

    pub max_daily_sessions: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            session_interval: SpanRange { min: 120.0, max: 180.0 },
            max_daily_sessions: 12,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load the file (defaults when it does not exist), apply environment
    /// overrides and validate the result
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let config = Self::from_file(path)?;
            tracing::info!(path = %path.display(), "Loaded configuration file");
            config
        } else {
            tracing::info!(
                path = %path.display(),
                "Configuration file not found, using defaults"
            );
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overwrite fields from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse("STARTUP_MODE")? {
            self.app.startup_mode = v;
        }
        if let Some(v) = env_parse("STARTUP_DELAY")? {
            self.app.startup_delay = v;
        }
        if let Some(v) = env_string("WEREAD_CURL_BASH_FILE_PATH") {
            self.curl.file_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("WEREAD_CURL_STRING") {
            self.curl.content = Some(v);
        }

        if let Some(v) = env_parse("READING_MODE")? {
            self.reading.mode = v;
        }
        if let Some(v) = env_parse("TARGET_DURATION")? {
            self.reading.target_duration = v;
        }
        if let Some(v) = env_parse("READING_INTERVAL")? {
            self.reading.reading_interval = v;
        }
        if let Some(v) = env_bool("USE_CURL_DATA_FIRST") {
            self.reading.use_curl_data_first = v;
        }
        if let Some(v) = env_bool("FALLBACK_TO_CONFIG") {
            self.reading.fallback_to_config = v;
        }
        if let Some(v) = env_parse("BOOK_CONTINUITY")? {
            self.reading.smart_random.book_continuity = v;
        }
        if let Some(v) = env_parse("CHAPTER_CONTINUITY")? {
            self.reading.smart_random.chapter_continuity = v;
        }
        if let Some(v) = env_parse("BOOK_SWITCH_COOLDOWN")? {
            self.reading.smart_random.book_switch_cooldown = v;
        }

        if let Some(v) = env_parse("NETWORK_TIMEOUT")? {
            self.network.timeout = v;
        }
        if let Some(v) = env_parse("RETRY_TIMES")? {
            self.network.retry_times = v;
        }
        if let Some(v) = env_parse("RATE_LIMIT")? {
            self.network.rate_limit = v;
        }

        if let Some(v) = env_bool("HUMAN_SIMULATION_ENABLED") {
            self.human_simulation.enabled = v;
        }
        if let Some(v) = env_bool("READING_SPEED_VARIATION") {
            self.human_simulation.reading_speed_variation = v;
        }
        if let Some(v) = env_parse("BREAK_PROBABILITY")? {
            self.human_simulation.break_probability = v;
        }
        if let Some(v) = env_parse("BREAK_DURATION")? {
            self.human_simulation.break_duration = v;
        }
        if let Some(v) = env_bool("ROTATE_USER_AGENT") {
            self.human_simulation.rotate_user_agent = v;
        }

        if let Some(v) = env_bool("NOTIFICATION_ENABLED") {
            self.notification.enabled = v;
        }
        if let Some(v) = env_bool("INCLUDE_STATISTICS") {
            self.notification.include_statistics = v;
        }
        self.notification.apply_channel_env_overrides();

        if let Some(v) = env_bool("SCHEDULE_ENABLED") {
            self.schedule.enabled = v;
        }
        if let Some(v) = env_string("CRON_EXPRESSION") {
            self.schedule.cron_expression = v;
        }

        if let Some(v) = env_bool("DAEMON_ENABLED") {
            self.daemon.enabled = v;
        }
        if let Some(v) = env_parse("SESSION_INTERVAL")? {
            self.daemon.session_interval = v;
        }
        if let Some(v) = env_parse("MAX_DAILY_SESSIONS")? {
            self.daemon.max_daily_sessions = v;
        }

        if let Some(v) = env_string("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = env_string("LOG_FORMAT") {
            self.logging.format = v.to_lowercase();
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let probabilities = [
            ("reading.smart_random.book_continuity", self.reading.smart_random.book_continuity),
            ("reading.smart_random.chapter_continuity", self.reading.smart_random.chapter_continuity),
            ("human_simulation.break_probability", self.human_simulation.break_probability),
        ];
        for (name, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::config(format!("{name} must be within [0, 1], got {value}")));
            }
        }

        if self.network.timeout == 0 {
            return Err(Error::config("network.timeout must be greater than 0"));
        }

        if self.network.rate_limit == 0 {
            return Err(Error::config("network.rate_limit must be greater than 0"));
        }

        if self.daemon.max_daily_sessions == 0 {
            return Err(Error::config("daemon.max_daily_sessions must be greater than 0"));
        }

        for book in &self.reading.books {
            if book.book_id.trim().is_empty() {
                return Err(Error::config(format!("book '{}' has an empty book_id", book.name)));
            }
            if book.chapters.is_empty() {
                return Err(Error::config(format!("book '{}' has no chapters", book.name)));
            }
        }

        for user in &self.users {
            if user.name.trim().is_empty() {
                return Err(Error::config("every [[users]] entry needs a name"));
            }
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout)
    }

    pub fn is_multi_user(&self) -> bool {
        !self.users.is_empty()
    }

    /// Human-readable banner logged once at startup
    pub fn startup_summary(&self) -> String {
        let curl_source = match (&self.curl.file_path, &self.curl.content) {
            (Some(path), _) => format!("file {}", path.display()),
            (None, Some(_)) => String::from("inline content (WEREAD_CURL_STRING)"),
            (None, None) => String::from("not configured"),
        };
        let enabled_channels = self.notification.channels.iter().filter(|c| c.enabled).count();
        let user_mode = if self.is_multi_user() { "multi-user" } else { "single-user" };

        let mut summary = format!(
            "weread-pacer {version}\n\
             \n\
             Run:\n  \
             startup mode: {mode}\n  \
             startup delay: {delay} s\n  \
             reading mode: {reading_mode}\n  \
             target duration: {target} min\n  \
             reading interval: {interval} s\n  \
             human simulation: {human}\n\
             \n\
             Network:\n  \
             timeout: {timeout} s\n  \
             retries: {retries}\n  \
             rate limit: {rate} req/min\n\
             \n\
             Notifications:\n  \
             enabled: {notify}\n  \
             channels: {channels} enabled\n  \
             statistics: {stats}\n\
             \n\
             Sources:\n  \
             captured session: {curl_source}\n  \
             users: {users} ({user_mode})\n  \
             books: {books}\n  \
             prefer captured position: {curl_first}\n  \
             fall back to catalog: {fallback}\n\
             \n\
             Logging:\n  \
             level: {level}\n  \
             format: {format}",
            version = env!("CARGO_PKG_VERSION"),
            mode = self.app.startup_mode,
            delay = self.app.startup_delay,
            reading_mode = self.reading.mode,
            target = self.reading.target_duration,
            interval = self.reading.reading_interval,
            human = on_off(self.human_simulation.enabled),
            timeout = self.network.timeout,
            retries = self.network.retry_times,
            rate = self.network.rate_limit,
            notify = on_off(self.notification.enabled),
            channels = enabled_channels,
            stats = on_off(self.notification.include_statistics),
            users = self.users.len(),
            books = self.reading.books.len(),
            curl_first = on_off(self.reading.use_curl_data_first),
            fallback = on_off(self.reading.fallback_to_config),
            level = self.logging.level,
            format = self.logging.format,
        );

        if self.app.startup_mode == StartupMode::Scheduled && self.schedule.enabled {
            summary.push_str(&format!("\n\nSchedule: {}", self.schedule.cron_expression));
        }
        if self.app.startup_mode == StartupMode::Daemon && self.daemon.enabled {
            summary.push_str(&format!(
                "\n\nDaemon: every {} min, at most {} passes per day",
                self.daemon.session_interval, self.daemon.max_daily_sessions
            ));
        }

        summary
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::config(format!("invalid value for {key}: {e}")))
        })
        .transpose()
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| parse_bool(&v))
}

/// Truthy strings: `true`, `1`, `yes`, `on` (case-insensitive)
pub fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reading.mode, ReadingMode::SmartRandom);
        assert_eq!(config.daemon.max_daily_sessions, 12);
        assert!(!config.human_simulation.enabled);
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let mut config = Config::default();
        config.reading.smart_random.book_continuity = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.human_simulation.break_probability = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = Config::default();
        config.network.rate_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.daemon.max_daily_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_book_without_chapters_rejected() {
        let config = Config::from_toml(
            r#"
            [[reading.books]]
            name = "Empty"
            book_id = "b1"
            chapters = []
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_full_toml() {
        let config = Config::from_toml(
            r#"
            [app]
            startup_mode = "daemon"
            startup_delay = "0"

            [reading]
            mode = "sequential"
            target_duration = "30-40"

            [[reading.books]]
            name = "Book One"
            book_id = "b1"
            chapters = ["c1", { chapter_id = "c2", chapter_index = 7 }]

            [[users]]
            name = "alice"
            content = "curl 'https://weread.qq.com/web/book/read'"

            [users.reading_overrides]
            mode = "pure_random"
            reading_interval = "5-6"

            [[notification.channels]]
            name = "pushplus"
            [notification.channels.settings]
            token = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.app.startup_mode, StartupMode::Daemon);
        assert_eq!(config.reading.mode, ReadingMode::Sequential);
        assert_eq!(config.reading.books[0].chapters[1].id(), "c2");
        assert_eq!(config.reading.books[0].chapters[1].index(), Some(7));
        assert_eq!(config.reading.books[0].chapters[0].index(), None);
        assert_eq!(config.users[0].reading_overrides.mode, Some(ReadingMode::PureRandom));
        assert!(config.notification.channels[0].enabled);
        assert_eq!(config.notification.channels[0].settings["token"], "abc");
    }

    #[test]
    fn test_overrides_merge_field_by_field() {
        let base = ReadingConfig::default();
        let overrides = ReadingOverrides {
            mode: Some(ReadingMode::Sequential),
            fallback_to_config: Some(false),
            ..Default::default()
        };
        let merged = overrides.apply(&base);
        assert_eq!(merged.mode, ReadingMode::Sequential);
        assert!(!merged.fallback_to_config);
        assert_eq!(merged.target_duration, base.target_duration);
        assert!(ReadingOverrides::default().is_empty());
        assert!(!overrides.is_empty());
    }

    #[test]
    #[serial]
    fn test_channels_created_from_env() {
        std::env::set_var("BARK_SERVER", "https://bark.example.com");
        std::env::set_var("BARK_DEVICE_KEY", "device");
        std::env::set_var("GOTIFY_SERVER", "https://gotify.example.com");
        std::env::set_var("GOTIFY_TOKEN", "secret");
        std::env::set_var("GOTIFY_PRIORITY", "8");
        std::env::set_var("NTFY_SERVER", "https://ntfy.sh");

        let mut notification = NotificationConfig::default();
        notification.apply_channel_env_overrides();

        for var in [
            "BARK_SERVER",
            "BARK_DEVICE_KEY",
            "GOTIFY_SERVER",
            "GOTIFY_TOKEN",
            "GOTIFY_PRIORITY",
            "NTFY_SERVER",
        ] {
            std::env::remove_var(var);
        }

        let names: Vec<_> = notification.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["bark", "gotify"]);
        assert_eq!(notification.channels[1].settings["priority"], 8);
        assert_eq!(notification.channels[0].settings["device_key"], "device");
    }

    #[test]
    #[serial]
    fn test_env_overrides_configured_channel() {
        std::env::set_var("PUSHPLUS_TOKEN", "from-env");
        let mut notification = NotificationConfig {
            channels: vec![ChannelConfig {
                name: "pushplus".into(),
                enabled: false,
                settings: serde_json::Map::new(),
            }],
            ..Default::default()
        };
        notification.apply_channel_env_overrides();
        std::env::remove_var("PUSHPLUS_TOKEN");

        assert_eq!(notification.channels.len(), 1);
        assert!(!notification.channels[0].enabled);
        assert_eq!(notification.channels[0].settings["token"], "from-env");
    }

    #[test]
    fn test_parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert!(parse_bool(v));
        }
        for v in ["false", "0", "no", "off", "maybe"] {
            assert!(!parse_bool(v));
        }
    }

    #[test]
    #[serial]
    fn test_env_overrides_win_over_file() {
        std::env::set_var("READING_MODE", "pure_random");
        std::env::set_var("MAX_DAILY_SESSIONS", "3");
        std::env::set_var("HUMAN_SIMULATION_ENABLED", "yes");
        std::env::set_var("TARGET_DURATION", "1-2");

        let mut config = Config::from_toml("[reading]\nmode = \"sequential\"").unwrap();
        let result = config.apply_env_overrides();

        std::env::remove_var("READING_MODE");
        std::env::remove_var("MAX_DAILY_SESSIONS");
        std::env::remove_var("HUMAN_SIMULATION_ENABLED");
        std::env::remove_var("TARGET_DURATION");

        result.unwrap();
        assert_eq!(config.reading.mode, ReadingMode::PureRandom);
        assert_eq!(config.daemon.max_daily_sessions, 3);
        assert!(config.human_simulation.enabled);
        assert_eq!(config.reading.target_duration, SpanRange { min: 1.0, max: 2.0 });
    }

    #[test]
    #[serial]
    fn test_malformed_env_value_is_config_error() {
        std::env::set_var("RATE_LIMIT", "fast");
        let mut config = Config::default();
        let result = config.apply_env_overrides();
        std::env::remove_var("RATE_LIMIT");

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_startup_summary_mentions_mode_and_cap() {
        let mut config = Config::default();
        config.app.startup_mode = StartupMode::Daemon;
        config.daemon.enabled = true;
        let summary = config.startup_summary();
        assert!(summary.contains("startup mode: daemon"));
        assert!(summary.contains("at most 12 passes per day"));
        assert!(summary.contains("target duration: 60-70 min"));
    }
}
