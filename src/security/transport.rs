//! HTTPS enforcement and transport hardening.
//!
//! Stages, in order, per request:
//! 1. Classify the transport (direct TLS, `x-forwarded-proto`, `x-forwarded-ssl`)
//! 2. Record violations: plaintext requests to sensitive paths outside
//!    development, and secure pages referred from `http://` pages
//! 3. Redirect plaintext requests to `https://` (301) unless the path is a
//!    health check
//!
//! and on the way out, for secure requests:
//! 4. HSTS
//! 5. Mixed-content directives merged into the existing CSP header
//! 6. `Secure` / `SameSite=Strict` appended to every `Set-Cookie`
//!
//! Stages 4-6 operate on the finished response headers, so no handler
//! can bypass them by writing headers directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{Environment, HttpsConfig};
use crate::http::response;
use crate::observability::metrics;
use crate::security::monitor::{EventSeverity, SecurityEventType};
use crate::security::pipeline::SecurityPipeline;

/// Marks requests accepted on the TLS listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectTls;

pub const CSP: &str = "content-security-policy";
pub const CSP_REPORT_ONLY: &str = "content-security-policy-report-only";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpsStats {
    pub total_requests: u64,
    pub secure_requests: u64,
    pub insecure_requests: u64,
    pub redirects: u64,
    pub hsts_applied: u64,
    pub cookies_secured: u64,
    pub insecure_sensitive_requests: u64,
    pub mixed_content_referers: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportViolation {
    InsecureSensitive,
    MixedContentReferer,
}

#[derive(Default)]
struct HttpsCounters {
    total: AtomicU64,
    secure: AtomicU64,
    insecure: AtomicU64,
    redirects: AtomicU64,
    hsts: AtomicU64,
    cookies: AtomicU64,
    insecure_sensitive: AtomicU64,
    mixed_content: AtomicU64,
}

fn header_is(headers: &HeaderMap, name: &str, expected: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Secure iff direct TLS or a trusted proxy says so.
pub fn is_secure(headers: &HeaderMap, direct_tls: bool) -> bool {
    direct_tls
        || header_is(headers, "x-forwarded-proto", "https")
        || header_is(headers, "x-forwarded-ssl", "on")
}

/// Append `Secure` and `SameSite=Strict` unless already present.
pub fn secure_cookie(cookie: &str) -> String {
    let attributes: Vec<String> = cookie
        .split(';')
        .skip(1)
        .map(|a| a.trim().to_ascii_lowercase())
        .collect();
    let has_secure = attributes.iter().any(|a| a == "secure");
    let has_same_site = attributes.iter().any(|a| a.starts_with("samesite"));

    let mut out = cookie.trim_end().trim_end_matches(';').to_string();
    if !has_secure {
        out.push_str("; Secure");
    }
    if !has_same_site {
        out.push_str("; SameSite=Strict");
    }
    out
}

fn directive_names(policy: &str) -> Vec<String> {
    policy
        .split(';')
        .filter_map(|d| d.split_whitespace().next())
        .map(|name| name.to_ascii_lowercase())
        .collect()
}

/// Append `directives` missing from `policy`.
pub fn merge_directives(policy: &str, directives: &[&str]) -> String {
    let present = directive_names(policy);
    let mut parts: Vec<String> = policy
        .split(';')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect();
    for directive in directives {
        if !present.iter().any(|p| p == directive) {
            parts.push(directive.to_string());
        }
    }
    parts.join("; ")
}

pub struct TransportEnforcer {
    config: HttpsConfig,
    environment: Environment,
    counters: HttpsCounters,
}

impl TransportEnforcer {
    pub fn new(config: HttpsConfig, environment: Environment) -> Self {
        Self {
            config,
            environment,
            counters: HttpsCounters::default(),
        }
    }

    pub fn config(&self) -> &HttpsConfig {
        &self.config
    }

    pub fn is_health_path(&self, path: &str) -> bool {
        self.config.health_paths.iter().any(|p| p == path)
    }

    pub fn is_sensitive_path(&self, path: &str) -> bool {
        self.config
            .sensitive_paths
            .iter()
            .any(|p| path.starts_with(p.as_str()))
    }

    pub fn needs_redirect(&self, secure: bool, path: &str) -> bool {
        self.config.enforce_https && !secure && !self.is_health_path(path)
    }

    /// `https://` URL for `host` and the same path. `None` when the host is
    /// not a plain `name[:port]`.
    pub fn redirect_target(&self, host: &str, uri: &Uri) -> Option<String> {
        let plain = !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
        if !plain {
            return None;
        }
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Some(format!("https://{}{}", host, path))
    }

    pub fn detect_violations(&self, secure: bool, path: &str, headers: &HeaderMap) -> Vec<TransportViolation> {
        let mut found = Vec::new();
        if !secure && !self.environment.is_development() && self.is_sensitive_path(path) {
            found.push(TransportViolation::InsecureSensitive);
        }
        let http_referer = headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(|r| r.to_ascii_lowercase().starts_with("http://"))
            .unwrap_or(false);
        if secure && http_referer {
            found.push(TransportViolation::MixedContentReferer);
        }
        found
    }

    pub fn hsts_value(&self) -> Option<String> {
        if self.config.hsts_max_age_secs == 0 {
            return None;
        }
        let mut value = format!("max-age={}", self.config.hsts_max_age_secs);
        if self.config.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.config.hsts_preload {
            value.push_str("; preload");
        }
        Some(value)
    }

    fn mixed_content_directives(&self) -> Vec<&'static str> {
        let mut directives = Vec::new();
        if self.config.upgrade_insecure_requests {
            directives.push("upgrade-insecure-requests");
        }
        if self.config.block_all_mixed_content {
            directives.push("block-all-mixed-content");
        }
        directives
    }

    /// Record one inbound request.
    pub fn observe(&self, secure: bool) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if secure {
            self.counters.secure.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.insecure.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Apply HSTS, mixed-content CSP and cookie hardening to a response.
    pub fn decorate(&self, secure: bool, headers: &mut HeaderMap) {
        if !secure {
            return;
        }

        if let Some(hsts) = self.hsts_value().and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, hsts);
            self.counters.hsts.fetch_add(1, Ordering::Relaxed);
        }

        let directives = self.mixed_content_directives();
        if !directives.is_empty() {
            let target = if headers.contains_key(CSP) {
                CSP
            } else if headers.contains_key(CSP_REPORT_ONLY) {
                CSP_REPORT_ONLY
            } else {
                CSP
            };
            let existing = headers
                .get(target)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            if let Ok(value) = HeaderValue::from_str(&merge_directives(&existing, &directives)) {
                headers.insert(target, value);
            }
        }

        if self.config.secure_cookies {
            let cookies: Vec<HeaderValue> = headers
                .get_all(header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter_map(|v| HeaderValue::from_str(&secure_cookie(v)).ok())
                .collect();
            if !cookies.is_empty() {
                headers.remove(header::SET_COOKIE);
                for cookie in cookies {
                    headers.append(header::SET_COOKIE, cookie);
                    self.counters.cookies.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn stats(&self) -> HttpsStats {
        let c = &self.counters;
        HttpsStats {
            total_requests: c.total.load(Ordering::Relaxed),
            secure_requests: c.secure.load(Ordering::Relaxed),
            insecure_requests: c.insecure.load(Ordering::Relaxed),
            redirects: c.redirects.load(Ordering::Relaxed),
            hsts_applied: c.hsts.load(Ordering::Relaxed),
            cookies_secured: c.cookies.load(Ordering::Relaxed),
            insecure_sensitive_requests: c.insecure_sensitive.load(Ordering::Relaxed),
            mixed_content_referers: c.mixed_content.load(Ordering::Relaxed),
        }
    }
}

fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .filter(|h| !h.is_empty())
}

pub async fn transport_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let enforcer = &pipeline.transport;
    let direct_tls = request.extensions().get::<DirectTls>().is_some();
    let secure = is_secure(request.headers(), direct_tls);
    let path = request.uri().path().to_string();
    enforcer.observe(secure);

    for violation in enforcer.detect_violations(secure, &path, request.headers()) {
        let (event_type, counter) = match violation {
            TransportViolation::InsecureSensitive => (
                SecurityEventType::InsecureTransmission,
                &enforcer.counters.insecure_sensitive,
            ),
            TransportViolation::MixedContentReferer => {
                (SecurityEventType::MixedContent, &enforcer.counters.mixed_content)
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        pipeline.monitor.record(
            event_type,
            EventSeverity::Warning,
            json!({
                "method": request.method().as_str(),
                "path": path,
                "referer": request.headers().get(header::REFERER).and_then(|v| v.to_str().ok()),
            }),
        );
    }

    if enforcer.needs_redirect(secure, &path) {
        let host = request_host(request.headers(), request.uri());
        if !pipeline.headers.host_allowed(host.as_deref()) {
            pipeline.monitor.record(
                SecurityEventType::HostRejected,
                EventSeverity::Warning,
                json!({ "host": host, "path": path }),
            );
            return response::bad_request("Invalid Host header", "INVALID_HOST");
        }
        let Some(host) = host else {
            return response::bad_request("Missing Host header", "MISSING_HOST");
        };
        return match enforcer.redirect_target(&host, request.uri()) {
            Some(location) => {
                enforcer.counters.redirects.fetch_add(1, Ordering::Relaxed);
                metrics::record_https_redirect();
                tracing::debug!(path = %path, location = %location, "Redirecting to HTTPS");
                match HeaderValue::from_str(&location) {
                    Ok(value) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response(),
                    Err(_) => response::bad_request("Invalid Host header", "INVALID_HOST"),
                }
            }
            None => response::bad_request("Invalid Host header", "INVALID_HOST"),
        };
    }

    let mut response = next.run(request).await;
    enforcer.decorate(secure, response.headers_mut());
    response
}
