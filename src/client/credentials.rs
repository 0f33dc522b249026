//! Captured browser sessions
//!
//! A session is captured by copying a read request from the browser's
//! developer tools as a bash cURL command. This module extracts headers,
//! cookies and the JSON body from that text, validates them, and resolves
//! which capture a user should run with.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::signing::{field_text, RequestFields};
use crate::config::{CurlConfig, UserConfig};

static HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-H '([^:]+): ([^']+)'").expect("header pattern is valid"));
static COOKIE_FLAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-b '([^']+)'").expect("cookie pattern is valid"));
static DATA_RAW_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--data-raw '([^']+)'").expect("data pattern is valid"));

/// Session key cookie name
pub const SESSION_KEY_COOKIE: &str = "wr_skey";

const MIN_SESSION_KEY_LEN: usize = 8;
const MIN_IDENTITY_FIELD_LEN: usize = 4;
const IDENTITY_FIELDS: [&str; 3] = ["appId", "ps", "pc"];

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// No capture configured for the user
    #[error("no captured session found for user '{0}' (set WEREAD_CURL_BASH_FILE_PATH or WEREAD_CURL_STRING)")]
    NotFound(String),

    /// Capture file could not be read
    #[error("failed to read captured session {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Capture is missing required pieces
    #[error("captured session for user '{user}' is invalid: {}", problems.join("; "))]
    Invalid { user: String, problems: Vec<String> },
}

/// Immutable identity fields reapplied to every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// `ps`
    pub user_id: String,
    /// `pc`
    pub device_id: String,
    /// `appId`
    pub app_id: String,
}

impl UserIdentity {
    /// Write the identity into a request field set
    pub fn apply(&self, fields: &mut RequestFields) {
        fields.insert("ps".into(), Value::String(self.user_id.clone()));
        fields.insert("pc".into(), Value::String(self.device_id.clone()));
        fields.insert("appId".into(), Value::String(self.app_id.clone()));
    }
}

/// Headers, cookies and request body extracted from a cURL command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedSession {
    /// Request headers without `Cookie`
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub request_fields: RequestFields,
}

impl CapturedSession {
    /// Parse a bash cURL command
    ///
    /// Cookies come from `-b '...'` when present, otherwise from the
    /// `Cookie` header. A body that is not valid JSON yields no fields.
    pub fn parse(command: &str) -> Self {
        let mut headers = BTreeMap::new();
        for caps in HEADER_REGEX.captures_iter(command) {
            headers.insert(caps[1].to_string(), caps[2].to_string());
        }

        let cookie_header = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("cookie"))
            .map(|(_, value)| value.clone());
        let cookie_string = COOKIE_FLAG_REGEX
            .captures(command)
            .map(|caps| caps[1].to_string())
            .or(cookie_header)
            .unwrap_or_default();
        headers.retain(|name, _| !name.eq_ignore_ascii_case("cookie"));

        let cookies = cookie_string
            .split("; ")
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        let request_fields = match DATA_RAW_REGEX.captures(command) {
            Some(caps) => match serde_json::from_str::<RequestFields>(&caps[1]) {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(error = %e, "Captured request body is not a JSON object, ignoring it");
                    RequestFields::new()
                }
            },
            None => RequestFields::new(),
        };

        Self {
            headers,
            cookies,
            request_fields,
        }
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent").filter(|ua| !ua.is_empty())
    }

    fn field(&self, name: &str) -> Option<String> {
        self.request_fields.get(name).map(field_text)
    }

    /// Problems that make the capture unusable; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.cookies.get(SESSION_KEY_COOKIE) {
            None => problems.push(format!("missing required cookie: {SESSION_KEY_COOKIE}")),
            Some(key) if key.chars().count() < MIN_SESSION_KEY_LEN => problems.push(format!(
                "{SESSION_KEY_COOKIE} is only {} characters long",
                key.chars().count()
            )),
            Some(_) => {}
        }

        if self.user_agent().is_none() {
            problems.push(String::from("missing User-Agent header"));
        }

        let missing: Vec<&str> = IDENTITY_FIELDS
            .iter()
            .copied()
            .filter(|f| !self.request_fields.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            problems.push(format!("request body is missing: {}", missing.join(", ")));
        }

        for name in IDENTITY_FIELDS {
            if let Some(value) = self.field(name) {
                if value.chars().count() < MIN_IDENTITY_FIELD_LEN {
                    problems.push(format!("field {name} looks truncated: '{value}'"));
                }
            }
        }

        problems
    }

    /// Validate, turning problems into an error
    pub fn validated(self, user: &str) -> Result<Self, CredentialsError> {
        let problems = self.validate();
        if problems.is_empty() {
            tracing::info!(user, "Captured session is valid");
            Ok(self)
        } else {
            for problem in &problems {
                tracing::error!(user, problem = %problem, "Captured session check failed");
            }
            Err(CredentialsError::Invalid {
                user: user.to_string(),
                problems,
            })
        }
    }

    /// Identity fields, captured once per session
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            user_id: self.field("ps").unwrap_or_default(),
            device_id: self.field("pc").unwrap_or_default(),
            app_id: self.field("appId").unwrap_or_default(),
        }
    }

    /// Captured `(b, c)` when the body has `appId`, `b` and `c`
    pub fn seed(&self) -> Option<(String, String)> {
        if !self.request_fields.contains_key("appId") {
            return None;
        }
        let book = self.field("b")?;
        let chapter = self.field("c")?;
        Some((book, chapter))
    }
}

/// Read the capture text for a user
///
/// Order: the user's file, the user's inline content, the global file,
/// then the global content.
pub fn resolve_source(
    user: Option<&UserConfig>,
    global: &CurlConfig,
) -> Result<String, CredentialsError> {
    let label = user.map_or("default", |u| u.name.as_str());

    if let Some(user) = user {
        if let Some(text) = read_existing(user.file_path.as_deref(), label)? {
            return Ok(text);
        }
        if let Some(content) = non_empty(user.content.as_deref()) {
            tracing::info!(user = label, "Using inline captured session");
            return Ok(content);
        }
    }

    if let Some(text) = read_existing(global.file_path.as_deref(), label)? {
        return Ok(text);
    }
    if let Some(content) = non_empty(global.content.as_deref()) {
        tracing::info!(user = label, "Using global inline captured session");
        return Ok(content);
    }

    Err(CredentialsError::NotFound(label.to_string()))
}

/// Resolve, parse and validate the capture for a user
pub fn load(
    user: Option<&UserConfig>,
    global: &CurlConfig,
) -> Result<CapturedSession, CredentialsError> {
    let label = user.map_or("default", |u| u.name.as_str());
    let text = resolve_source(user, global)?;
    CapturedSession::parse(&text).validated(label)
}

fn read_existing(path: Option<&Path>, user: &str) -> Result<Option<String>, CredentialsError> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty() && p.exists()) else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path).map_err(|source| CredentialsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(user, path = %path.display(), "Loaded captured session file");
    Ok(non_empty(Some(&text)))
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CAPTURE: &str = r#"curl 'https://weread.qq.com/web/book/read' \
  -H 'accept: application/json, text/plain, */*' \
  -H 'content-type: application/json;charset=UTF-8' \
  -H 'user-agent: Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36' \
  -b 'wr_vid=12345678; wr_skey=abcdEFGH1234; wr_name=reader' \
  --data-raw '{"appId":"wb182564874663h776775553","b":"ce032b305a9bc1ce0b0dd2a","c":"0723244023c072b030ba601","ci":27,"co":389,"sm":"x","pr":74,"rt":15,"ts":1700000000000,"rn":421,"sg":"old","ct":1700000000,"ps":"4ee326507a65a465g015fae","pc":"aab32e207a65a466g010615","s":"36cc0815"}'"#;

    #[test]
    fn test_parse_extracts_headers_cookies_and_body() {
        let session = CapturedSession::parse(CAPTURE);
        assert_eq!(session.headers.len(), 3);
        assert!(session.user_agent().unwrap().starts_with("Mozilla/5.0"));
        assert_eq!(session.cookies["wr_skey"], "abcdEFGH1234");
        assert_eq!(session.cookies.len(), 3);
        assert_eq!(session.request_fields["ci"], serde_json::json!(27));
        assert!(session.validate().is_empty());
    }

    #[test]
    fn test_cookie_header_used_without_b_flag_and_removed() {
        let cmd = "curl 'x' -H 'Cookie: wr_skey=12345678; wr_vid=1' -H 'User-Agent: Mozilla'";
        let session = CapturedSession::parse(cmd);
        assert_eq!(session.cookies["wr_skey"], "12345678");
        assert!(session.header("cookie").is_none());
        assert_eq!(session.user_agent(), Some("Mozilla"));
    }

    #[test]
    fn test_b_flag_wins_over_cookie_header() {
        let cmd = "curl 'x' -H 'Cookie: wr_skey=fromheader' -b 'wr_skey=fromflag1'";
        let session = CapturedSession::parse(cmd);
        assert_eq!(session.cookies["wr_skey"], "fromflag1");
    }

    #[test]
    fn test_invalid_json_body_yields_no_fields() {
        let cmd = "curl 'x' --data-raw '{not json}'";
        let session = CapturedSession::parse(cmd);
        assert!(session.request_fields.is_empty());
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let cmd = r#"curl 'x' -b 'wr_skey=short' --data-raw '{"appId":"wb1","ps":"abcd"}'"#;
        let problems = CapturedSession::parse(cmd).validate();
        assert!(problems.iter().any(|p| p.contains("wr_skey")));
        assert!(problems.iter().any(|p| p.contains("User-Agent")));
        assert!(problems.iter().any(|p| p.contains("missing: pc")));
        assert!(problems.iter().any(|p| p.contains("appId looks truncated")));
        assert!(!problems.iter().any(|p| p.contains("field ps")));
    }

    #[test]
    fn test_validated_returns_invalid_error() {
        let err = CapturedSession::parse("curl 'x'").validated("bob").unwrap_err();
        match err {
            CredentialsError::Invalid { user, problems } => {
                assert_eq!(user, "bob");
                assert_eq!(problems.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_identity_and_seed() {
        let session = CapturedSession::parse(CAPTURE);
        let identity = session.identity();
        assert_eq!(identity.user_id, "4ee326507a65a465g015fae");
        assert_eq!(identity.device_id, "aab32e207a65a466g010615");
        assert_eq!(identity.app_id, "wb182564874663h776775553");
        assert_eq!(
            session.seed(),
            Some((
                "ce032b305a9bc1ce0b0dd2a".to_string(),
                "0723244023c072b030ba601".to_string()
            ))
        );

        let mut fields = RequestFields::new();
        identity.apply(&mut fields);
        assert_eq!(fields["ps"], serde_json::json!("4ee326507a65a465g015fae"));
    }

    #[test]
    fn test_seed_requires_app_id() {
        let cmd = r#"curl 'x' --data-raw '{"b":"book","c":"chapter"}'"#;
        assert_eq!(CapturedSession::parse(cmd).seed(), None);
    }

    #[test]
    fn test_resolve_source_order() {
        let mut user_file = tempfile::NamedTempFile::new().unwrap();
        write!(user_file, "  user-file  ").unwrap();
        let mut global_file = tempfile::NamedTempFile::new().unwrap();
        write!(global_file, "global-file").unwrap();

        let global = CurlConfig {
            file_path: Some(global_file.path().to_path_buf()),
            content: Some("global-content".into()),
        };
        let mut user = UserConfig {
            name: "alice".into(),
            file_path: Some(user_file.path().to_path_buf()),
            content: Some("user-content".into()),
            ..Default::default()
        };

        assert_eq!(resolve_source(Some(&user), &global).unwrap(), "user-file");

        user.file_path = Some(PathBuf::from("/definitely/not/here.curl"));
        assert_eq!(resolve_source(Some(&user), &global).unwrap(), "user-content");

        user.content = None;
        assert_eq!(resolve_source(Some(&user), &global).unwrap(), "global-file");
        assert_eq!(resolve_source(None, &global).unwrap(), "global-file");

        let content_only = CurlConfig {
            file_path: None,
            content: Some("global-content".into()),
        };
        assert_eq!(resolve_source(None, &content_only).unwrap(), "global-content");

        let err = resolve_source(Some(&user), &CurlConfig::default()).unwrap_err();
        assert!(matches!(err, CredentialsError::NotFound(name) if name == "alice"));
    }
}
