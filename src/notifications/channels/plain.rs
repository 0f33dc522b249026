//! Channels that do not take a JSON body: ntfy (plain text POST) and
//! WxPusher (message carried in the URL path). Both make a single attempt.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;

use super::{required_setting, setting, Channel, ChannelError, ChannelResult, DeliveryStatus, REPORT_TITLE};

const WXPUSHER_API: &str = "https://wxpusher.zjiecode.com/api/send/message";
const PLAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Unreserved characters stay, everything else (`/` included) is escaped
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

async fn deliver(name: &str, request: reqwest::RequestBuilder) -> ChannelResult<DeliveryStatus> {
    let outcome = match request.send().await {
        Ok(response) if response.status().is_success() => Ok(()),
        Ok(response) => Err(ChannelError::Rejected {
            status: response.status().as_u16(),
            body: response.text().await.unwrap_or_default(),
        }),
        Err(e) => Err(ChannelError::HttpError(e)),
    };

    match outcome {
        Ok(()) => {
            tracing::info!(channel = name, "Notification delivered");
            Ok(DeliveryStatus::success(name))
        }
        Err(e) => {
            tracing::error!(channel = name, error = %e, "Notification delivery failed");
            Ok(DeliveryStatus::failure(name, e.to_string()))
        }
    }
}

/// ntfy topic publisher
pub struct NtfyChannel {
    server: String,
    topic: String,
    token: Option<String>,
    client: Client,
}

impl NtfyChannel {
    pub fn from_settings(settings: &Map<String, Value>) -> ChannelResult<Self> {
        Ok(Self {
            server: required_setting(settings, "ntfy", "server")?,
            topic: required_setting(settings, "ntfy", "topic")?,
            token: setting(settings, "token"),
            client: Client::builder().timeout(PLAIN_TIMEOUT).build()?,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.server.trim_end_matches('/'), self.topic)
    }
}

#[async_trait]
impl Channel for NtfyChannel {
    fn name(&self) -> &str {
        "ntfy"
    }

    async fn send(&self, message: &str) -> ChannelResult<DeliveryStatus> {
        let mut request = self
            .client
            .post(self.endpoint())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header("Title", REPORT_TITLE)
            .body(message.to_string());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        deliver(self.name(), request).await
    }
}

/// WxPusher simple push (SPT token)
pub struct WxPusherChannel {
    spt: String,
    api: String,
    client: Client,
}

impl WxPusherChannel {
    pub fn from_settings(settings: &Map<String, Value>) -> ChannelResult<Self> {
        Ok(Self {
            spt: required_setting(settings, "wxpusher", "spt")?,
            api: WXPUSHER_API.to_string(),
            client: Client::builder().timeout(PLAIN_TIMEOUT).build()?,
        })
    }

    /// Point at another API root, e.g. a mock server
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self
    }

    /// URL carrying `message`, percent-encoded into the path
    pub fn message_url(&self, message: &str) -> String {
        let encoded = utf8_percent_encode(message, PATH_SEGMENT);
        format!("{}/{}/{encoded}", self.api.trim_end_matches('/'), self.spt)
    }
}

#[async_trait]
impl Channel for WxPusherChannel {
    fn name(&self) -> &str {
        "wxpusher"
    }

    async fn send(&self, message: &str) -> ChannelResult<DeliveryStatus> {
        let request = self.client.get(self.message_url(message));
        deliver(self.name(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_ntfy_endpoint() {
        let channel =
            NtfyChannel::from_settings(&settings(json!({"server": "https://ntfy.sh/", "topic": "books"})))
                .unwrap();
        assert_eq!(channel.endpoint(), "https://ntfy.sh/books");
        assert!(channel.token.is_none());
    }

    #[test]
    fn test_ntfy_requires_topic() {
        assert!(NtfyChannel::from_settings(&settings(json!({"server": "https://ntfy.sh"}))).is_err());
    }

    #[test]
    fn test_wxpusher_url_encodes_message() {
        let channel = WxPusherChannel::from_settings(&settings(json!({"spt": "SPT_abc"}))).unwrap();
        assert_eq!(
            channel.message_url("read 5/5 ok"),
            "https://wxpusher.zjiecode.com/api/send/message/SPT_abc/read%205%2F5%20ok"
        );
    }
}
