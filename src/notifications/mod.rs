//! Notification fan-out for reading reports
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │      NotificationService                   │
//! │  - channel construction from config        │
//! │  - fan-out to every enabled channel        │
//! └────────────────────────────────────────────┘
//!                     │
//!         ┌───────────┼───────────┐
//!         ▼           ▼           ▼
//!   ┌─────────┐ ┌─────────┐ ┌─────────┐
//!   │ Webhook │ │  Ntfy   │ │WxPusher │
//!   │ channels│ │ Channel │ │ Channel │
//!   └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! Sessions only see [`NotificationSink`], so tests can record messages
//! instead of sending them.

pub mod channels;

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::NotificationConfig;
use channels::{build_channel, Channel};

pub use channels::{ChannelError, DeliveryStatus};

/// Where session reports and error messages go
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `message`; `true` when at least one destination accepted it
    async fn send(&self, message: &str) -> bool;
}

/// Sink that keeps every message in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &str) -> bool {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
        true
    }
}

/// A configured channel, or the reason it could not be built
enum ChannelSlot {
    Ready(Box<dyn Channel>),
    Broken { name: String, reason: ChannelError },
}

/// Fans messages out to every enabled channel
pub struct NotificationService {
    enabled: bool,
    slots: Vec<ChannelSlot>,
}

impl NotificationService {
    pub fn new(config: &NotificationConfig) -> Self {
        let slots = config
            .channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| match build_channel(c) {
                Ok(channel) => ChannelSlot::Ready(channel),
                Err(reason) => {
                    warn!(channel = %c.name, error = %reason, "Notification channel unusable");
                    ChannelSlot::Broken {
                        name: c.name.clone(),
                        reason,
                    }
                }
            })
            .collect();

        Self {
            enabled: config.enabled,
            slots,
        }
    }

    /// Service over prebuilt channels
    pub fn with_channels(channels: Vec<Box<dyn Channel>>) -> Self {
        Self {
            enabled: true,
            slots: channels.into_iter().map(ChannelSlot::Ready).collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.slots.len()
    }

    /// Send to every enabled channel concurrently, results in channel order
    pub async fn deliver(&self, message: &str) -> Vec<DeliveryStatus> {
        let sends = self.slots.iter().map(|slot| async move {
            let status = match slot {
                ChannelSlot::Ready(channel) => match channel.send(message).await {
                    Ok(status) => status,
                    Err(e) => {
                        error!(channel = channel.name(), error = %e, "Notification channel error");
                        DeliveryStatus::failure(channel.name(), e.to_string())
                    }
                },
                ChannelSlot::Broken { name, reason } => {
                    warn!(channel = %name, "Skipping unusable notification channel");
                    DeliveryStatus::failure(name.as_str(), reason.to_string())
                }
            };
            if !status.success {
                warn!(status = %status, "Notification not delivered");
            }
            status
        });

        futures::future::join_all(sends).await
    }
}

#[async_trait]
impl NotificationSink for NotificationService {
    async fn send(&self, message: &str) -> bool {
        if !self.enabled {
            return true;
        }
        if self.slots.is_empty() {
            warn!("No notification channel enabled");
            return true;
        }

        let statuses = self.deliver(message).await;
        let delivered = statuses.iter().filter(|s| s.success).count();
        info!(delivered, total = statuses.len(), "Notification fan-out finished");
        delivered > 0
    }
}
