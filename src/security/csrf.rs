//! CSRF token issuance and verification.
//!
//! # Responsibilities
//! - Keep one random secret per session, created on first use
//! - Issue salted tokens bound to that secret with HMAC-SHA256
//! - Verify tokens on state-changing requests
//!
//! # Design Decisions
//! - Token: `base64url(salt) "." base64url(HMAC(secret, salt))`. Any number
//!   of tokens can be valid for one secret at the same time
//! - Safe methods, excluded paths and bearer-authenticated requests skip the
//!   check
//! - Missing and invalid tokens are distinguished in logs and stats only;
//!   clients see the same rejection

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::config::{CsrfConfig, Environment};
use crate::http::request::{self, BodyKind};
use crate::http::response;
use crate::observability::metrics;
use crate::security::identity::ClientIdentity;
use crate::security::monitor::{EventSeverity, SecurityEventType};
use crate::security::pipeline::SecurityPipeline;
use crate::session::Session;

type HmacSha256 = Hmac<Sha256>;

/// Session key holding the hex-encoded secret.
pub const SECRET_KEY: &str = "csrf_secret";
pub const BODY_FIELD: &str = "_csrf";
pub const TOKEN_HEADERS: [&str; 3] = ["csrf-token", "x-csrf-token", "x-xsrf-token"];
pub const REJECTION_MESSAGE: &str = "Invalid CSRF token";
pub const REJECTION_CODE: &str = "EBADCSRFTOKEN";

const SECRET_BYTES: usize = 32;
const SALT_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    Missing,
    Invalid,
}

impl CsrfFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CsrfFailure::Missing => "missing",
            CsrfFailure::Invalid => "invalid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfStats {
    pub tokens_issued: u64,
    pub verifications_passed: u64,
    pub missing_tokens: u64,
    pub invalid_tokens: u64,
    pub skipped: u64,
}

/// Fresh hex-encoded secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn sign(secret: &str, salt: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(salt);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Token for `secret` using a caller-chosen salt.
pub fn token_with_salt(secret: &str, salt: &[u8]) -> Option<String> {
    let signature = sign(secret, salt)?;
    Some(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// New token for `secret` with a random salt.
pub fn create_token(secret: &str) -> Option<String> {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    token_with_salt(secret, &salt)
}

/// Constant-time check that `token` was issued for `secret`.
pub fn verify_token(secret: &str, token: &str) -> bool {
    let Some((salt, signature)) = token.split_once('.') else {
        return false;
    };
    let (Ok(salt), Ok(signature)) = (URL_SAFE_NO_PAD.decode(salt), URL_SAFE_NO_PAD.decode(signature)) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(&salt);
    mac.verify_slice(&signature).is_ok()
}

/// Token from body `_csrf`, query `_csrf`, then the three header variants.
pub fn extract_token(body: Option<&Value>, query: Option<&str>, headers: &HeaderMap) -> Option<String> {
    let from_body = body
        .and_then(|b| b.get(BODY_FIELD))
        .and_then(Value::as_str)
        .map(str::to_string);

    let from_query = || {
        request::parse_query(query)
            .get(BODY_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let from_headers = || {
        TOKEN_HEADERS.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
    };

    from_body
        .or_else(from_query)
        .or_else(from_headers)
        .filter(|t| !t.is_empty())
}

fn is_bearer(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.len() > 7 && v[..7].eq_ignore_ascii_case("bearer "))
        .unwrap_or(false)
}

#[derive(Default)]
struct CsrfCounters {
    issued: AtomicU64,
    passed: AtomicU64,
    missing: AtomicU64,
    invalid: AtomicU64,
    skipped: AtomicU64,
}

pub struct CsrfGuard {
    config: CsrfConfig,
    environment: Environment,
    counters: CsrfCounters,
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig, environment: Environment) -> Self {
        Self {
            config,
            environment,
            counters: CsrfCounters::default(),
        }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Secret for the session, created on first use.
    pub fn secret_for(&self, session: &Session) -> String {
        session.get_or_insert_with(SECRET_KEY, generate_secret)
    }

    pub fn issue_token(&self, session: &Session) -> Option<String> {
        let token = create_token(&self.secret_for(session))?;
        self.counters.issued.fetch_add(1, Ordering::Relaxed);
        Some(token)
    }

    pub fn verify(&self, session: &Session, token: &str) -> bool {
        session
            .get(SECRET_KEY)
            .map(|secret| verify_token(&secret, token))
            .unwrap_or(false)
    }

    /// False for safe methods, excluded paths and bearer-token requests.
    pub fn requires_check(&self, method: &Method, path: &str, headers: &HeaderMap) -> bool {
        if !self.config.enabled {
            return false;
        }
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            return false;
        }
        if self.config.exclude_paths.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        !is_bearer(headers)
    }

    /// Verify the token carried by a request and count the outcome.
    pub fn check(&self, session: Option<&Session>, supplied: Option<&str>) -> Result<(), CsrfFailure> {
        let Some(token) = supplied else {
            self.counters.missing.fetch_add(1, Ordering::Relaxed);
            return Err(CsrfFailure::Missing);
        };
        if session.map(|s| self.verify(s, token)).unwrap_or(false) {
            self.counters.passed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            Err(CsrfFailure::Invalid)
        }
    }

    fn note_skipped(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CsrfStats {
        CsrfStats {
            tokens_issued: self.counters.issued.load(Ordering::Relaxed),
            verifications_passed: self.counters.passed.load(Ordering::Relaxed),
            missing_tokens: self.counters.missing.load(Ordering::Relaxed),
            invalid_tokens: self.counters.invalid.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Same-host `Referer` path, else `/`.
fn back_location(headers: &HeaderMap) -> String {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(|r| url::Url::parse(r).ok())
        .filter(|u| {
            let authority = match u.port() {
                Some(port) => format!("{}:{}", u.host_str().unwrap_or(""), port),
                None => u.host_str().unwrap_or("").to_string(),
            };
            host == Some(authority.as_str())
        })
        .map(|u| match u.query() {
            Some(q) => format!("{}?{}", u.path(), q),
            None => u.path().to_string(),
        })
        .unwrap_or_else(|| "/".to_string())
}

pub async fn csrf_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let guard = &pipeline.csrf;
    let path = request.uri().path().to_string();
    if !guard.requires_check(request.method(), &path, request.headers()) {
        if guard.config().enabled {
            guard.note_skipped();
        }
        return next.run(request).await;
    }

    let kind = request::body_kind(request.headers());
    let limit = pipeline.config.listener.max_body_bytes;
    let (parts, bytes) = match request::buffer(request, limit).await {
        Ok(buffered) => buffered,
        Err(e) => return response::payload_too_large(e.limit),
    };

    let body = request::parse_body(kind, &bytes);
    let supplied = extract_token(body.as_ref(), parts.uri.query(), &parts.headers);
    let session = parts.extensions.get::<Session>().cloned();

    match guard.check(session.as_ref(), supplied.as_deref()) {
        Ok(()) => next.run(request::rebuild(parts, bytes)).await,
        Err(failure) => {
            let identity = parts
                .extensions
                .get::<ClientIdentity>()
                .map(|id| id.key())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(
                client = %identity,
                method = %parts.method,
                path = %path,
                reason = failure.as_str(),
                "CSRF validation failed"
            );
            metrics::record_csrf_rejection(failure.as_str());
            pipeline.monitor.record(
                SecurityEventType::CsrfViolation,
                EventSeverity::Warning,
                json!({
                    "identity": identity,
                    "method": parts.method.as_str(),
                    "path": path,
                    "reason": failure.as_str(),
                }),
            );

            if request::wants_json(&parts.headers, &path) || kind == BodyKind::Json {
                response::forbidden(REJECTION_MESSAGE, REJECTION_CODE)
            } else {
                if let Some(session) = &session {
                    session.flash("Your form has expired. Please try again.");
                }
                Redirect::to(&back_location(&parts.headers)).into_response()
            }
        }
    }
}

/// `GET /csrf-token`
pub async fn token_handler(
    State(pipeline): State<Arc<SecurityPipeline>>,
    Extension(session): Extension<Session>,
) -> Response {
    match pipeline.csrf.issue_token(&session) {
        Some(token) => Json(json!({ "token": token })).into_response(),
        None => response::json_rejection(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Could not issue CSRF token",
            "CSRF_ISSUE_FAILED",
        ),
    }
}

/// `GET /csrf-debug`, disabled in production.
pub async fn debug_handler(
    State(pipeline): State<Arc<SecurityPipeline>>,
    Extension(session): Extension<Session>,
) -> Response {
    let guard = &pipeline.csrf;
    if !guard.config().debug_endpoint || guard.environment.is_production() {
        return response::json_rejection(StatusCode::NOT_FOUND, "Not Found", "NOT_FOUND");
    }
    let has_secret = session.get(SECRET_KEY).is_some();
    let sample_valid = guard
        .issue_token(&session)
        .map(|token| guard.verify(&session, &token))
        .unwrap_or(false);
    Json(json!({
        "session_id": session.id(),
        "has_secret": has_secret,
        "token_sample_valid": sample_valid,
        "environment": guard.environment.as_str(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn session() -> Session {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let id = store.create();
        Session::new(id, store)
    }

    fn guard() -> CsrfGuard {
        CsrfGuard::new(CsrfConfig::default(), Environment::Development)
    }

    #[test]
    fn test_issue_then_verify() {
        let g = guard();
        let s = session();
        let token = g.issue_token(&s).unwrap();
        assert!(g.verify(&s, &token));
        assert!(g.check(Some(&s), Some(&token)).is_ok());
    }

    #[test]
    fn test_many_tokens_per_secret() {
        let g = guard();
        let s = session();
        let first = g.issue_token(&s).unwrap();
        let second = g.issue_token(&s).unwrap();
        assert_ne!(first, second);
        assert!(g.verify(&s, &first));
        assert!(g.verify(&s, &second));
    }

    #[test]
    fn test_token_from_other_session_rejected() {
        let g = guard();
        let a = session();
        let b = session();
        g.secret_for(&b);
        let token = g.issue_token(&a).unwrap();
        assert!(!g.verify(&b, &token));
        assert_eq!(g.check(Some(&b), Some(&token)), Err(CsrfFailure::Invalid));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let secret = generate_secret();
        assert!(!verify_token(&secret, "no-dot"));
        assert!(!verify_token(&secret, "!!!.???"));
        assert!(!verify_token(&secret, ""));
        let token = token_with_salt(&secret, b"fixed-salt").unwrap();
        assert!(verify_token(&secret, &token));
        assert!(!verify_token(&generate_secret(), &token));
    }

    #[test]
    fn test_safe_methods_skip() {
        let g = guard();
        let headers = HeaderMap::new();
        assert!(!g.requires_check(&Method::GET, "/artworks", &headers));
        assert!(!g.requires_check(&Method::HEAD, "/artworks", &headers));
        assert!(!g.requires_check(&Method::OPTIONS, "/artworks", &headers));
        assert!(g.requires_check(&Method::POST, "/artworks", &headers));
        assert!(!g.requires_check(&Method::POST, "/webhooks/payment", &headers));
    }

    #[test]
    fn test_bearer_requests_skip() {
        let g = guard();
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert!(!g.requires_check(&Method::POST, "/api/artworks", &headers));
    }

    #[test]
    fn test_token_lookup_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-xsrf-token", HeaderValue::from_static("from-header"));
        let body = json!({ "_csrf": "from-body" });

        assert_eq!(
            extract_token(Some(&body), Some("_csrf=from-query"), &headers).as_deref(),
            Some("from-body")
        );
        assert_eq!(
            extract_token(None, Some("_csrf=from-query"), &headers).as_deref(),
            Some("from-query")
        );
        assert_eq!(extract_token(None, None, &headers).as_deref(), Some("from-header"));
        assert_eq!(extract_token(None, None, &HeaderMap::new()), None);
    }

    #[test]
    fn test_missing_and_invalid_counted_separately() {
        let g = guard();
        let s = session();
        assert_eq!(g.check(Some(&s), None), Err(CsrfFailure::Missing));
        assert_eq!(g.check(Some(&s), Some("bogus")), Err(CsrfFailure::Invalid));
        let stats = g.stats();
        assert_eq!(stats.missing_tokens, 1);
        assert_eq!(stats.invalid_tokens, 1);
    }

    #[test]
    fn test_back_location_requires_same_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gallery.example:8080"));
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("http://gallery.example:8080/artworks/new?draft=1"),
        );
        assert_eq!(back_location(&headers), "/artworks/new?draft=1");

        headers.insert(header::REFERER, HeaderValue::from_static("https://evil.example/"));
        assert_eq!(back_location(&headers), "/");
    }
}
