//! JSON webhook channels
//!
//! PushPlus, Telegram, Bark, Feishu, WeCom, DingTalk and Gotify all take a
//! JSON body POSTed to a URL. They share one delivery path with bounded
//! retry and differ only in endpoint, payload shape and headers.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::{
    required_setting, setting, short_description, Channel, ChannelError, ChannelResult,
    DeliveryStatus, REPORT_TITLE, REPORT_URL,
};
use crate::utils::retry::{with_retry_if, RetryConfig};

const PUSHPLUS_URL: &str = "https://www.pushplus.plus/send";
const TELEGRAM_API: &str = "https://api.telegram.org";

/// Default Gotify message priority
pub const GOTIFY_DEFAULT_PRIORITY: i64 = 5;

/// Default Gotify message title
pub const GOTIFY_DEFAULT_TITLE: &str = "WeRead Bot";

/// Message layout for the chat-bot webhooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Text,
    Markdown,
    /// Rich text post (Feishu `rich_text`)
    RichText,
    /// Article card (WeCom `news`, DingTalk `link`)
    Card,
}

impl MessageFormat {
    fn parse(channel: &str, raw: Option<String>) -> ChannelResult<Self> {
        let format = match (channel, raw.as_deref()) {
            (_, None | Some("text")) => Self::Text,
            ("feishu", Some("rich_text")) => Self::RichText,
            ("wework" | "dingtalk", Some("markdown")) => Self::Markdown,
            ("wework", Some("news")) | ("dingtalk", Some("link")) => Self::Card,
            (_, Some(other)) => {
                return Err(ChannelError::InvalidConfig(format!(
                    "{channel} does not support msg_type `{other}`"
                )))
            }
        };
        Ok(format)
    }
}

/// Endpoint-specific settings of a webhook channel
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookKind {
    PushPlus {
        token: String,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
    },
    Bark {
        server: String,
        device_key: String,
        sound: Option<String>,
    },
    Feishu {
        webhook_url: String,
        format: MessageFormat,
    },
    WeWork {
        webhook_url: String,
        format: MessageFormat,
    },
    DingTalk {
        webhook_url: String,
        format: MessageFormat,
    },
    Gotify {
        server: String,
        token: String,
        priority: i64,
        title: String,
    },
}

impl WebhookKind {
    /// Typed settings for the channel `name`
    pub fn from_settings(name: &str, settings: &Map<String, Value>) -> ChannelResult<Self> {
        let req = |key| required_setting(settings, name, key);
        let kind = match name {
            "pushplus" => Self::PushPlus { token: req("token")? },
            "telegram" => Self::Telegram {
                bot_token: req("bot_token")?,
                chat_id: req("chat_id")?,
            },
            "bark" => Self::Bark {
                server: req("server")?,
                device_key: req("device_key")?,
                sound: setting(settings, "sound"),
            },
            "feishu" => Self::Feishu {
                webhook_url: req("webhook_url")?,
                format: MessageFormat::parse(name, setting(settings, "msg_type"))?,
            },
            "wework" => Self::WeWork {
                webhook_url: req("webhook_url")?,
                format: MessageFormat::parse(name, setting(settings, "msg_type"))?,
            },
            "dingtalk" => Self::DingTalk {
                webhook_url: req("webhook_url")?,
                format: MessageFormat::parse(name, setting(settings, "msg_type"))?,
            },
            "gotify" => Self::Gotify {
                server: req("server")?,
                token: req("token")?,
                priority: settings
                    .get("priority")
                    .and_then(|p| p.as_i64().or_else(|| p.as_str()?.trim().parse().ok()))
                    .unwrap_or(GOTIFY_DEFAULT_PRIORITY),
                title: setting(settings, "title").unwrap_or_else(|| GOTIFY_DEFAULT_TITLE.to_string()),
            },
            other => return Err(ChannelError::Unsupported(other.to_string())),
        };
        Ok(kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PushPlus { .. } => "pushplus",
            Self::Telegram { .. } => "telegram",
            Self::Bark { .. } => "bark",
            Self::Feishu { .. } => "feishu",
            Self::WeWork { .. } => "wework",
            Self::DingTalk { .. } => "dingtalk",
            Self::Gotify { .. } => "gotify",
        }
    }

    pub fn endpoint(&self) -> String {
        match self {
            Self::PushPlus { .. } => PUSHPLUS_URL.to_string(),
            Self::Telegram { bot_token, .. } => format!("{TELEGRAM_API}/bot{bot_token}/sendMessage"),
            Self::Bark {
                server, device_key, ..
            } => format!("{}/{device_key}", server.trim_end_matches('/')),
            Self::Feishu { webhook_url, .. }
            | Self::WeWork { webhook_url, .. }
            | Self::DingTalk { webhook_url, .. } => webhook_url.clone(),
            Self::Gotify { server, .. } => format!("{}/message", server.trim_end_matches('/')),
        }
    }

    /// Extra request headers
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Gotify { token, .. } => vec![("X-Gotify-Key", token.clone())],
            _ => Vec::new(),
        }
    }

    /// JSON body carrying `message`
    pub fn payload(&self, message: &str) -> Value {
        let titled = format!("{REPORT_TITLE}\n\n{message}");
        match self {
            Self::PushPlus { token } => json!({
                "token": token,
                "title": REPORT_TITLE,
                "content": message,
            }),
            Self::Telegram { chat_id, .. } => json!({
                "chat_id": chat_id,
                "text": message,
            }),
            Self::Bark { sound, .. } => {
                let mut body = json!({ "title": REPORT_TITLE, "body": message });
                if let Some(sound) = sound {
                    body["sound"] = json!(sound);
                }
                body
            }
            Self::Feishu { format, .. } => match format {
                MessageFormat::RichText => json!({
                    "msg_type": "post",
                    "content": {
                        "post": {
                            "zh_cn": {
                                "title": REPORT_TITLE,
                                "content": [[{ "tag": "text", "text": message }]],
                            }
                        }
                    }
                }),
                _ => json!({ "msg_type": "text", "content": { "text": titled } }),
            },
            Self::WeWork { format, .. } => match format {
                MessageFormat::Markdown => json!({
                    "msgtype": "markdown",
                    "markdown": { "content": format!("## {REPORT_TITLE}\n\n{message}") },
                }),
                MessageFormat::Card => json!({
                    "msgtype": "news",
                    "news": {
                        "articles": [{
                            "title": REPORT_TITLE,
                            "description": short_description(message),
                            "url": REPORT_URL,
                        }]
                    }
                }),
                _ => json!({ "msgtype": "text", "text": { "content": titled } }),
            },
            Self::DingTalk { format, .. } => match format {
                MessageFormat::Markdown => json!({
                    "msgtype": "markdown",
                    "markdown": {
                        "title": REPORT_TITLE,
                        "text": format!("## {REPORT_TITLE}\n\n{message}"),
                    }
                }),
                MessageFormat::Card => json!({
                    "msgtype": "link",
                    "link": {
                        "text": short_description(message),
                        "title": REPORT_TITLE,
                        "messageUrl": REPORT_URL,
                    }
                }),
                _ => json!({ "msgtype": "text", "text": { "content": titled } }),
            },
            Self::Gotify { priority, title, .. } => json!({
                "message": message,
                "priority": priority,
                "title": title,
            }),
        }
    }
}

/// Webhook notification channel
///
/// Sends the report as a JSON POST, retrying server errors and connection
/// failures up to three more times.
pub struct WebhookChannel {
    kind: WebhookKind,
    client: Client,
    retry: RetryConfig,
}

impl WebhookChannel {
    pub fn new(kind: WebhookKind) -> ChannelResult<Self> {
        let endpoint = kind.endpoint();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ChannelError::InvalidConfig(format!(
                "{} URL must start with http:// or https://",
                kind.name()
            )));
        }

        let timeout = match kind {
            WebhookKind::Telegram { .. } => 30,
            _ => 10,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            kind,
            client,
            retry: RetryConfig::with_delays(2, 5_000, 15_000),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn kind(&self) -> &WebhookKind {
        &self.kind
    }

    async fn post_once(&self, url: &str, payload: &Value) -> ChannelResult<()> {
        let mut request = self.client.post(url).json(payload);
        for (name, value) in self.kind.headers() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(ChannelError::Rejected {
            status: status.as_u16(),
            body: crate::utils::preview(&body, 200),
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn send(&self, message: &str) -> ChannelResult<DeliveryStatus> {
        let url = self.kind.endpoint();
        let payload = self.kind.payload(message);

        let result = with_retry_if(
            &self.retry,
            || self.post_once(&url, &payload),
            ChannelError::is_retryable,
        )
        .await;

        match result {
            Ok(()) => {
                tracing::info!(channel = self.name(), "Notification delivered");
                Ok(DeliveryStatus::success(self.name()))
            }
            Err(e) => {
                tracing::error!(channel = self.name(), error = %e, "Notification delivery failed");
                Ok(DeliveryStatus::failure(self.name(), e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_pushplus_payload() {
        let kind = WebhookKind::from_settings("pushplus", &settings(json!({"token": "tk"}))).unwrap();
        assert_eq!(kind.endpoint(), "https://www.pushplus.plus/send");
        assert_eq!(
            kind.payload("done"),
            json!({"token": "tk", "title": REPORT_TITLE, "content": "done"})
        );
    }

    #[test]
    fn test_telegram_numeric_chat_id() {
        let kind = WebhookKind::from_settings(
            "telegram",
            &settings(json!({"bot_token": "123:abc", "chat_id": -100200})),
        )
        .unwrap();
        assert_eq!(kind.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(kind.payload("hi")["chat_id"], "-100200");
    }

    #[test]
    fn test_bark_endpoint_and_sound() {
        let kind = WebhookKind::from_settings(
            "bark",
            &settings(json!({"server": "https://api.day.app/", "device_key": "dev", "sound": "bell"})),
        )
        .unwrap();
        assert_eq!(kind.endpoint(), "https://api.day.app/dev");
        let payload = kind.payload("report");
        assert_eq!(payload["sound"], "bell");
        assert_eq!(payload["body"], "report");
    }

    #[test]
    fn test_feishu_formats() {
        let text = WebhookKind::from_settings("feishu", &settings(json!({"webhook_url": "https://f"}))).unwrap();
        assert_eq!(text.payload("m")["content"]["text"], format!("{REPORT_TITLE}\n\nm"));

        let rich = WebhookKind::from_settings(
            "feishu",
            &settings(json!({"webhook_url": "https://f", "msg_type": "rich_text"})),
        )
        .unwrap();
        let payload = rich.payload("m");
        assert_eq!(payload["msg_type"], "post");
        assert_eq!(payload["content"]["post"]["zh_cn"]["content"][0][0]["text"], "m");
    }

    #[test]
    fn test_wework_news_truncates() {
        let kind = WebhookKind::from_settings(
            "wework",
            &settings(json!({"webhook_url": "https://w", "msg_type": "news"})),
        )
        .unwrap();
        let message = "y".repeat(300);
        let payload = kind.payload(&message);
        let article = &payload["news"]["articles"][0];
        assert_eq!(article["url"], REPORT_URL);
        assert!(article["description"].as_str().unwrap().ends_with("..."));
        assert_eq!(article["description"].as_str().unwrap().len(), 203);
    }

    #[test]
    fn test_dingtalk_markdown_and_link() {
        let md = WebhookKind::from_settings(
            "dingtalk",
            &settings(json!({"webhook_url": "https://d", "msg_type": "markdown"})),
        )
        .unwrap();
        assert_eq!(md.payload("m")["markdown"]["text"], format!("## {REPORT_TITLE}\n\nm"));

        let link = WebhookKind::from_settings(
            "dingtalk",
            &settings(json!({"webhook_url": "https://d", "msg_type": "link"})),
        )
        .unwrap();
        assert_eq!(link.payload("m")["link"]["messageUrl"], REPORT_URL);
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let err = WebhookKind::from_settings(
            "feishu",
            &settings(json!({"webhook_url": "https://f", "msg_type": "news"})),
        )
        .err();
        assert!(matches!(err, Some(ChannelError::InvalidConfig(_))));
    }

    #[test]
    fn test_gotify_defaults_and_header() {
        let kind = WebhookKind::from_settings(
            "gotify",
            &settings(json!({"server": "https://g/", "token": "secret"})),
        )
        .unwrap();
        assert_eq!(kind.endpoint(), "https://g/message");
        assert_eq!(kind.headers(), vec![("X-Gotify-Key", "secret".to_string())]);
        let payload = kind.payload("m");
        assert_eq!(payload["priority"], GOTIFY_DEFAULT_PRIORITY);
        assert_eq!(payload["title"], GOTIFY_DEFAULT_TITLE);

        let kind = WebhookKind::from_settings(
            "gotify",
            &settings(json!({"server": "https://g", "token": "t", "priority": "8"})),
        )
        .unwrap();
        assert_eq!(kind.payload("m")["priority"], 8);
    }

    #[test]
    fn test_non_http_url_rejected() {
        let kind = WebhookKind::from_settings("feishu", &settings(json!({"webhook_url": "ftp://x"}))).unwrap();
        assert!(WebhookChannel::new(kind).is_err());
    }
}
