use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    HOST, USER_AGENT,
};
use std::collections::BTreeMap;

/// Pool of realistic User-Agent strings for per-session rotation
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1.1 Safari/605.1.15",
];

/// Pick one User-Agent from the pool
pub fn random_user_agent<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0])
}

/// Build the header set sent with every request of a session
///
/// Starts from the captured browser headers. Headers the HTTP client
/// manages itself (`Host`, `Content-Length`, `Accept-Encoding`, `Cookie`)
/// are dropped, and `user_agent` replaces the captured one when given.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use weread_pacer::client::headers::build_session_headers;
///
/// let mut captured = BTreeMap::new();
/// captured.insert("user-agent".to_string(), "Mozilla/5.0".to_string());
/// let headers = build_session_headers(&captured, None);
/// assert_eq!(headers["user-agent"], "Mozilla/5.0");
/// assert_eq!(headers["content-type"], "application/json");
/// ```
pub fn build_session_headers(
    captured: &BTreeMap<String, String>,
    user_agent: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in captured {
        let parsed = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        );
        match parsed {
            (Ok(name), Ok(value)) => {
                if [HOST, CONTENT_LENGTH, ACCEPT_ENCODING, COOKIE].contains(&name) {
                    continue;
                }
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping captured header that is not valid HTTP"),
        }
    }

    if let Some(ua) = user_agent {
        match HeaderValue::from_str(ua) {
            Ok(value) => {
                headers.insert(USER_AGENT, value);
            }
            Err(_) => tracing::warn!("Rotated User-Agent is not a valid header value"),
        }
    }

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    headers
}

/// Render a cookie jar as a `Cookie` header value
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<HeaderValue> {
    if cookies.is_empty() {
        return None;
    }
    let joined = cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ");
    HeaderValue::from_str(&joined).ok()
}
