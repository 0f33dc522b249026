//! Session client for the reading service
//!
//! [`SessionClient`] owns everything one user's session needs to talk to
//! the service: the captured headers, the cookie jar, the immutable user
//! identity and the request-field template. It signs read requests,
//! renews the session key and classifies read responses.
//!
//! The orchestrator only sees the [`ReadingClient`] trait so sessions can
//! be driven against a scripted client in tests.

pub mod credentials;
pub mod headers;
pub mod signing;
pub mod transport;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::reading::Position;
use crate::utils::preview;
use credentials::{CapturedSession, UserIdentity, SESSION_KEY_COOKIE};
use signing::{seal, signature, RequestFields, SIGNING_KEY};
use transport::{json_body, Transport};

pub use credentials::CredentialsError;
pub use transport::TransportError;

/// Read ping endpoint
pub const READ_PATH: &str = "/web/book/read";

/// Session key renewal endpoint
pub const RENEW_PATH: &str = "/web/login/renewal";

/// Endpoint poked when a read comes back without a sync key
pub const SYNC_REPAIR_PATH: &str = "/web/book/chapterInfos";

/// Book id sent to the sync-key repair endpoint
pub const SYNC_REPAIR_BOOK_ID: &str = "3300060341";

/// Path the renewal payload claims to come from, already URL-encoded
const RENEW_REFERRER: &str = "%2Fweb%2Fbook%2Fread";

/// Length of the session key kept from a renewal
const SESSION_KEY_LEN: usize = 8;

/// Baseline for `rt` before the first successful read
const INITIAL_READ_GAP_SECS: i64 = 30;

/// Why a read did not count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No success marker; the session key was renewed
    AuthExpired,
    /// Success marker without a sync key; a repair call was made
    SyncKeyMissing,
    /// Transport failure after bounded retries
    Transport,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthExpired => "auth_expired",
            Self::SyncKeyMissing => "sync_key_missing",
            Self::Transport => "transport",
        }
    }
}

/// Classified result of one read ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Success {
        latency: Duration,
    },
    RetryableFailure {
        reason: FailureReason,
        latency: Duration,
    },
}

impl ReadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn latency(&self) -> Duration {
        match self {
            Self::Success { latency } | Self::RetryableFailure { latency, .. } => *latency,
        }
    }
}

/// What the session orchestrator needs from a client
#[async_trait]
pub trait ReadingClient: Send {
    /// Renew the session key; `false` when no new key was obtained
    async fn renew_cookie(&mut self) -> bool;

    /// Mark the start of the read loop, after the startup delay and renewal
    fn begin_session(&mut self) {}

    /// Report `position` as being read
    ///
    /// Per-request failures come back as [`ReadOutcome::RetryableFailure`];
    /// `Err` is reserved for unexpected failures.
    async fn read(&mut self, position: &Position) -> Result<ReadOutcome>;
}

/// Authenticated client for one user's session
pub struct SessionClient {
    transport: Transport,
    user: String,
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
    template: RequestFields,
    identity: UserIdentity,
    signing_key: String,
    last_success_secs: i64,
    rng: ChaCha8Rng,
}

impl SessionClient {
    /// Build a client from a validated capture
    ///
    /// `user_agent` replaces the captured User-Agent for the whole session.
    pub fn new(
        user: impl Into<String>,
        captured: CapturedSession,
        transport: Transport,
        user_agent: Option<&str>,
    ) -> Self {
        let user = user.into();
        let identity = captured.identity();
        info!(
            user = %user,
            ps = %preview(&identity.user_id, 8),
            pc = %preview(&identity.device_id, 8),
            app_id = %preview(&identity.app_id, 8),
            "Captured user identity"
        );
        if identity.user_id.is_empty() || identity.device_id.is_empty() {
            warn!(user = %user, "Captured request has no ps/pc identity fields");
        }

        let mut template = default_template();
        template.extend(captured.request_fields.clone());

        Self {
            headers: headers::build_session_headers(&captured.headers, user_agent),
            cookies: captured.cookies,
            transport,
            user,
            template,
            identity,
            signing_key: SIGNING_KEY.to_string(),
            last_success_secs: chrono::Utc::now().timestamp() - INITIAL_READ_GAP_SECS,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Restart the `rt` baseline at `now_secs` minus the initial gap
    pub fn begin_session_at(&mut self, now_secs: i64) {
        self.last_success_secs = now_secs - INITIAL_READ_GAP_SECS;
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Signed request body for `position`, stamped with the current time
    pub fn build_signed_request(&mut self, position: &Position) -> RequestFields {
        self.build_signed_request_at(position, chrono::Utc::now().timestamp_millis())
    }

    /// Signed request body for `position` at `now_ms` (unix milliseconds)
    pub fn build_signed_request_at(&mut self, position: &Position, now_ms: i64) -> RequestFields {
        let mut fields = self.template.clone();

        fields.insert("b".into(), Value::String(position.book_id.clone()));
        fields.insert("c".into(), Value::String(position.chapter_id.clone()));
        fields.insert("ci".into(), json!(position.chapter_ci));

        let now_secs = now_ms.div_euclid(1000);
        let ts = now_ms.max(0) as u64 + self.rng.gen_range(0..1000u64);
        let rn: u32 = self.rng.gen_range(0..1000);
        fields.insert("ct".into(), json!(now_secs));
        fields.insert("rt".into(), json!((now_secs - self.last_success_secs).max(0)));
        fields.insert("ts".into(), json!(ts));
        fields.insert("rn".into(), json!(rn));
        fields.insert("sg".into(), Value::String(signature(ts, rn, &self.signing_key)));

        self.identity.apply(&mut fields);
        seal(&mut fields);
        fields
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(cookie) = headers::cookie_header(&self.cookies) {
            headers.insert(COOKIE, cookie);
        }
        headers
    }

    /// Send a signed request and classify the response
    pub async fn send(&mut self, request: &RequestFields) -> ReadOutcome {
        let timed = match self
            .transport
            .post_json(READ_PATH, &self.request_headers(), request)
            .await
        {
            Ok(timed) => timed,
            Err(e) => {
                error!(user = %self.user, error = %e, "Read request failed");
                return ReadOutcome::RetryableFailure {
                    reason: FailureReason::Transport,
                    latency: Duration::ZERO,
                };
            }
        };
        let latency = timed.latency;

        let body = match json_body(timed.response).await {
            Ok(body) => body,
            Err(e) => {
                error!(user = %self.user, error = %e, "Read response was not JSON");
                return ReadOutcome::RetryableFailure {
                    reason: FailureReason::Transport,
                    latency: Duration::ZERO,
                };
            }
        };
        debug!(user = %self.user, response = %body, "Read response");

        match classify_read_response(&body) {
            None => {
                self.last_success_secs = chrono::Utc::now().timestamp();
                ReadOutcome::Success { latency }
            }
            Some(FailureReason::SyncKeyMissing) => {
                warn!(user = %self.user, response = %body, "Read accepted without sync key, repairing");
                self.repair_sync_key().await;
                ReadOutcome::RetryableFailure {
                    reason: FailureReason::SyncKeyMissing,
                    latency,
                }
            }
            Some(reason) => {
                warn!(
                    user = %self.user,
                    response = %body,
                    book_id = ?request.get("b"),
                    chapter_id = ?request.get("c"),
                    "Read rejected, session key may have expired"
                );
                self.renew_cookie().await;
                ReadOutcome::RetryableFailure { reason, latency }
            }
        }
    }

    /// Renew the session key through the renewal endpoint
    pub async fn renew_cookie(&mut self) -> bool {
        info!(user = %self.user, "Renewing session key");

        let payload = json!({ "rq": RENEW_REFERRER });
        let timed = match self
            .transport
            .post_json(RENEW_PATH, &self.request_headers(), &payload)
            .await
        {
            Ok(timed) => timed,
            Err(e) => {
                error!(user = %self.user, error = %e, "Session key renewal failed");
                return false;
            }
        };

        let set_cookies = timed
            .response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect::<Vec<_>>();

        match extract_session_key(set_cookies.iter().map(String::as_str)) {
            Some(key) => {
                info!(user = %self.user, key = %preview(&key, 4), "Session key renewed");
                self.cookies.insert(SESSION_KEY_COOKIE.to_string(), key);
                true
            }
            None => {
                error!(user = %self.user, "Renewal response carried no usable session key");
                false
            }
        }
    }

    /// Best-effort call that nudges the server into issuing sync keys again
    async fn repair_sync_key(&self) {
        let payload = json!({ "bookIds": [SYNC_REPAIR_BOOK_ID] });
        if let Err(e) = self
            .transport
            .post_json(SYNC_REPAIR_PATH, &self.request_headers(), &payload)
            .await
        {
            error!(user = %self.user, error = %e, "Sync key repair failed");
        }
    }
}

#[async_trait]
impl ReadingClient for SessionClient {
    async fn renew_cookie(&mut self) -> bool {
        SessionClient::renew_cookie(self).await
    }

    fn begin_session(&mut self) {
        self.begin_session_at(chrono::Utc::now().timestamp());
    }

    async fn read(&mut self, position: &Position) -> Result<ReadOutcome> {
        let request = self.build_signed_request(position);
        Ok(self.send(&request).await)
    }
}

/// Fields every read request carries before the capture is overlaid
fn default_template() -> RequestFields {
    let mut fields = RequestFields::new();
    for (key, value) in [
        ("appId", json!("")),
        ("b", json!("")),
        ("c", json!("")),
        ("ci", json!(0)),
        ("co", json!(0)),
        ("sm", json!("")),
        ("pr", json!(0)),
        ("rt", json!(0)),
        ("ts", json!(0)),
        ("rn", json!(0)),
        ("sg", json!("")),
        ("ct", json!(0)),
        ("ps", json!("")),
        ("pc", json!("")),
    ] {
        fields.insert(key.to_string(), value);
    }
    fields
}

/// `None` for a full success, otherwise why the read did not count
pub fn classify_read_response(body: &Value) -> Option<FailureReason> {
    let has = |key: &str| body.as_object().is_some_and(|o| o.contains_key(key));
    match (has("succ"), has("synckey")) {
        (true, true) => None,
        (true, false) => Some(FailureReason::SyncKeyMissing),
        (false, _) => Some(FailureReason::AuthExpired),
    }
}

/// New session key from `Set-Cookie` values
///
/// Takes the first `;`-separated segment mentioning the session key cookie
/// and keeps the first 8 characters after its last `=`.
pub fn extract_session_key<'a>(set_cookies: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let segment = set_cookies
        .into_iter()
        .flat_map(|header| header.split(';'))
        .find(|segment| segment.contains(SESSION_KEY_COOKIE))?;

    let value = segment.rsplit('=').next().unwrap_or_default().trim();
    let key: String = value.chars().take(SESSION_KEY_LEN).collect();
    (!key.is_empty()).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use signing::{custom_hash, encode_fields};

    fn captured() -> CapturedSession {
        CapturedSession::parse(
            r#"curl 'https://weread.qq.com/web/book/read' -H 'user-agent: Mozilla/5.0' -b 'wr_skey=abcdefgh; wr_vid=7' --data-raw '{"appId":"wb1234","b":"oldbook","c":"oldchap","ps":"user1234","pc":"device12","sm":"summary","s":"36cc0815"}'"#,
        )
    }

    fn client() -> SessionClient {
        let transport = Transport::new(&NetworkConfig::default()).unwrap();
        SessionClient::new("tester", captured(), transport, None)
    }

    fn position() -> Position {
        Position {
            book_id: "book-1".into(),
            chapter_id: "chap-9".into(),
            chapter_offset: 3,
            chapter_ci: 3,
        }
    }

    #[test]
    fn test_classify_read_response() {
        assert_eq!(classify_read_response(&json!({"succ": 1, "synckey": 42})), None);
        assert_eq!(
            classify_read_response(&json!({"succ": 1})),
            Some(FailureReason::SyncKeyMissing)
        );
        assert_eq!(
            classify_read_response(&json!({"errCode": -2012})),
            Some(FailureReason::AuthExpired)
        );
        assert_eq!(
            classify_read_response(&json!([1, 2])),
            Some(FailureReason::AuthExpired)
        );
    }

    #[test]
    fn test_extract_session_key() {
        assert_eq!(
            extract_session_key(["wr_skey=ABCDEFGHIJKL; Path=/; HttpOnly"]),
            Some("ABCDEFGH".to_string())
        );
        assert_eq!(
            extract_session_key(["wr_vid=1; Path=/", "wr_skey=xyz; Domain=.qq.com"]),
            Some("xyz".to_string())
        );
        assert_eq!(extract_session_key(["wr_skey=; Path=/"]), None);
        assert_eq!(extract_session_key(["other=1"]), None);
        assert_eq!(extract_session_key(std::iter::empty()), None);
    }

    #[test]
    fn test_signed_request_fields() {
        let mut client = client();
        let now_ms = 1_700_000_000_123;
        let fields = client.build_signed_request_at(&position(), now_ms);

        assert_eq!(fields["b"], json!("book-1"));
        assert_eq!(fields["c"], json!("chap-9"));
        assert_eq!(fields["ci"], json!(3));
        assert_eq!(fields["ct"], json!(1_700_000_000));
        assert_eq!(fields["sm"], json!("summary"));

        let ts = fields["ts"].as_u64().unwrap();
        assert!((1_700_000_000_123..1_700_000_001_123).contains(&ts));
        let rn = fields["rn"].as_u64().unwrap();
        assert!(rn < 1000);
        assert_eq!(
            fields["sg"],
            json!(signature(ts, rn as u32, SIGNING_KEY))
        );

        let mut without_checksum = fields.clone();
        without_checksum.remove("s");
        assert_eq!(fields["s"], json!(custom_hash(&encode_fields(&without_checksum))));
    }

    #[test]
    fn test_identity_reapplied_every_request() {
        let mut client = client();
        client.template.insert("ps".into(), json!("tampered"));
        client.template.insert("appId".into(), json!("tampered"));

        let fields = client.build_signed_request_at(&position(), 1_700_000_000_000);
        assert_eq!(fields["ps"], json!("user1234"));
        assert_eq!(fields["pc"], json!("device12"));
        assert_eq!(fields["appId"], json!("wb1234"));
    }

    #[test]
    fn test_rt_counts_from_last_success() {
        let mut client = client();
        client.last_success_secs = 1_700_000_000 - 30;
        let fields = client.build_signed_request_at(&position(), 1_700_000_000_000);
        assert_eq!(fields["rt"], json!(30));
    }

    #[test]
    fn test_rt_baseline_restarts_when_session_begins() {
        let mut client = client();
        let built_at = chrono::Utc::now().timestamp();

        // Five minutes of startup delay pass before the loop starts
        let loop_start = built_at + 300;
        client.begin_session_at(loop_start);
        let fields = client.build_signed_request_at(&position(), loop_start * 1000);
        assert_eq!(fields["rt"], json!(30));
    }

    #[test]
    fn test_cookie_header_carries_jar() {
        let client = client();
        let headers = client.request_headers();
        assert_eq!(headers[COOKIE], "wr_skey=abcdefgh; wr_vid=7");
        assert_eq!(headers["user-agent"], "Mozilla/5.0");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = ReadOutcome::Success {
            latency: Duration::from_millis(120),
        };
        assert!(ok.is_success());
        assert_eq!(ok.latency(), Duration::from_millis(120));

        let failed = ReadOutcome::RetryableFailure {
            reason: FailureReason::Transport,
            latency: Duration::ZERO,
        };
        assert!(!failed.is_success());
        assert_eq!(FailureReason::AuthExpired.as_str(), "auth_expired");
    }
}
