//! Notification channels for delivering reading reports
//!
//! Every channel is built from a [`ChannelConfig`]: its name selects the
//! implementation and its untyped settings are checked into a typed
//! configuration when the channel is built.

pub mod plain;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::config::ChannelConfig;

pub use plain::{NtfyChannel, WxPusherChannel};
pub use webhook::{WebhookChannel, WebhookKind};

/// Title shown on every report
pub const REPORT_TITLE: &str = "WeRead reading report";

/// Link attached to card-style messages
pub const REPORT_URL: &str = "https://weread.qq.com";

/// Longest description card-style messages carry before truncation
pub const DESCRIPTION_LIMIT: usize = 200;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel name with no implementation
    #[error("Unsupported channel: {0}")]
    Unsupported(String),

    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl ChannelError {
    /// Client errors are not worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => !(400..500).contains(status),
            Self::HttpError(_) => true,
            Self::InvalidConfig(_) | Self::Unsupported(_) => false,
        }
    }
}

/// Response from sending a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Whether the notification was successfully delivered
    pub success: bool,
    /// Channel that delivered (or failed to deliver) the notification
    pub channel: String,
    /// Optional message about the delivery
    pub message: Option<String>,
    /// Timestamp of delivery attempt
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeliveryStatus {
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.into(),
            message: Some(message.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "[{status}] {}", self.channel)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

/// A destination for reading reports
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `message`; delivery failures come back as a failed status
    async fn send(&self, message: &str) -> ChannelResult<DeliveryStatus>;
}

/// Build the channel a configuration entry names
pub fn build_channel(config: &ChannelConfig) -> ChannelResult<Box<dyn Channel>> {
    let settings = &config.settings;
    match config.name.as_str() {
        "ntfy" => Ok(Box::new(NtfyChannel::from_settings(settings)?)),
        "wxpusher" => Ok(Box::new(WxPusherChannel::from_settings(settings)?)),
        "apprise" => Err(ChannelError::Unsupported(
            "apprise has no native implementation".to_string(),
        )),
        name => {
            let kind = WebhookKind::from_settings(name, settings)?;
            Ok(Box::new(WebhookChannel::new(kind)?))
        }
    }
}

/// String setting, accepting numbers (chat ids are often numeric)
///
/// Empty strings count as missing.
pub(crate) fn setting(settings: &Map<String, Value>, key: &str) -> Option<String> {
    match settings.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn required_setting(
    settings: &Map<String, Value>,
    channel: &str,
    key: &str,
) -> ChannelResult<String> {
    setting(settings, key)
        .ok_or_else(|| ChannelError::InvalidConfig(format!("{channel} needs `{key}`")))
}

/// `message` cut to [`DESCRIPTION_LIMIT`] characters with `...` appended
pub(crate) fn short_description(message: &str) -> String {
    crate::utils::preview(message, DESCRIPTION_LIMIT)
}
