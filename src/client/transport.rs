//! HTTP transport with rate limiting and bounded retry
//!
//! Every call to the reading service goes through [`Transport`]:
//! - a governor rate limiter (requests per minute)
//! - bounded retry with exponential backoff on 429/500/502/503/504,
//!   timeouts and connection failures
//! - latency measurement

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{header::HeaderMap, Client, Response};
use serde::Serialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::config::NetworkConfig;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Production origin of the reading service
pub const DEFAULT_BASE_URL: &str = "https://weread.qq.com";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Client-side HTTP failure (connect, body, decode)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    /// Non-success status code
    #[error("Server returned status {0}")]
    ServerError(u16),

    /// Body was not the expected JSON
    #[error("Invalid response body: {0}")]
    InvalidBody(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Whether another attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::ServerError(status) => should_retry(*status),
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::InvalidBody(_) | Self::InvalidUrl(_) => false,
        }
    }
}

/// Status codes worth another attempt
pub fn should_retry(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Response plus the time it took, retries included
#[derive(Debug)]
pub struct TimedResponse {
    pub response: Response,
    pub latency: Duration,
}

pub struct Transport {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    retry: RetryConfig,

    base_url: Url,
}

impl Transport {
    /// Transport against the production service
    pub fn new(config: &NetworkConfig) -> Result<Self, TransportError> {
        Self::with_base_url(DEFAULT_BASE_URL, config)
    }

    /// Transport against another origin, e.g. a mock server in tests
    pub fn with_base_url(base_url: &str, config: &NetworkConfig) -> Result<Self, TransportError> {
        let base_url =
            Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .gzip(true)
            .build()?;

        let rate = NonZeroU32::new(config.rate_limit).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rate));

        Ok(Self {
            client,
            rate_limiter,
            retry: RetryConfig::new(config.retry_times),
            base_url,
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for an endpoint path
    pub fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{path}: {e}")))
    }

    /// POST a JSON body, waiting for the rate limiter and retrying
    /// transient failures
    ///
    /// Non-success statuses become [`TransportError::ServerError`].
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        headers: &HeaderMap,
        body: &B,
    ) -> Result<TimedResponse, TransportError> {
        let url = self.url(path)?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| TransportError::InvalidBody(format!("cannot encode request: {e}")))?;

        let started = Instant::now();
        let response = with_retry_if(
            &self.retry,
            || self.send_once(url.clone(), headers, payload.clone()),
            TransportError::is_recoverable,
        )
        .await?;

        Ok(TimedResponse {
            response,
            latency: started.elapsed(),
        })
    }

    async fn send_once(
        &self,
        url: Url,
        headers: &HeaderMap,
        payload: Vec<u8>,
    ) -> Result<Response, TransportError> {
        self.rate_limiter.until_ready().await;

        let result = self
            .client
            .post(url)
            .headers(headers.clone())
            .body(payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => Err(TransportError::ServerError(response.status().as_u16())),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) => Err(TransportError::Http(e)),
        }
    }
}

/// Read a response body as JSON
pub async fn json_body(response: Response) -> Result<serde_json::Value, TransportError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        let preview = crate::utils::preview(&text, 120);
        TransportError::InvalidBody(format!("{e}: {preview}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry() {
        // Retryable errors
        assert!(should_retry(429));
        assert!(should_retry(500));
        assert!(should_retry(502));
        assert!(should_retry(503));
        assert!(should_retry(504));

        // Non-retryable errors
        assert!(!should_retry(400));
        assert!(!should_retry(401));
        assert!(!should_retry(404));
    }

    #[test]
    fn test_error_recoverability() {
        assert!(TransportError::Timeout.is_recoverable());
        assert!(TransportError::ServerError(502).is_recoverable());
        assert!(!TransportError::ServerError(403).is_recoverable());
        assert!(!TransportError::InvalidBody("x".into()).is_recoverable());
    }

    #[test]
    fn test_url_join() {
        let transport = Transport::new(&NetworkConfig::default()).unwrap();
        assert_eq!(
            transport.url("/web/book/read").unwrap().as_str(),
            "https://weread.qq.com/web/book/read"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = Transport::with_base_url("not a url", &NetworkConfig::default()).err();
        assert!(matches!(err, Some(TransportError::InvalidUrl(_))));
    }
}
