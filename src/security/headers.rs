//! Security response headers.
//!
//! # Responsibilities
//! - Build the Content-Security-Policy for the environment
//! - Set Permissions-Policy, cross-origin isolation and the static hardening
//!   headers
//! - Strip server fingerprinting headers
//! - Drop `Location` headers pointing at foreign domains (open redirects)
//! - Reject requests for unknown hosts in production
//!
//! # Design Decisions
//! - The policy is built once at startup and rendered to a single string
//! - Non-production environments emit the report-only header
//! - Header rewriting runs on the finished response, never inside handlers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{Environment, HeadersConfig};
use crate::http::response;
use crate::security::monitor::{EventSeverity, SecurityEventType};
use crate::security::pipeline::SecurityPipeline;
use crate::security::transport::{CSP, CSP_REPORT_ONLY};

pub const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=(), usb=(), \
bluetooth=(), accelerometer=(), gyroscope=(), magnetometer=(), fullscreen=(self), screen-wake-lock=(self)";

/// Removed from every response.
pub const FINGERPRINT_HEADERS: [&str; 6] = [
    "server",
    "x-powered-by",
    "x-aspnet-version",
    "x-aspnetmvc-version",
    "x-runtime",
    "x-version",
];

const STATIC_HEADERS: [(&str, &str); 7] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-permitted-cross-domain-policies", "none"),
    ("origin-agent-cluster", "?1"),
];

/// Ordered CSP directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CspPolicy {
    directives: Vec<(String, Vec<String>)>,
}

impl CspPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directive(mut self, name: &str, sources: &[&str]) -> Self {
        self.merge(name, sources.iter().map(|s| s.to_string()));
        self
    }

    /// Union `sources` into `name`, appending the directive if new.
    pub fn merge(&mut self, name: &str, sources: impl IntoIterator<Item = String>) {
        let name = name.to_ascii_lowercase();
        let idx = match self.directives.iter().position(|(n, _)| *n == name) {
            Some(idx) => idx,
            None => {
                self.directives.push((name, Vec::new()));
                self.directives.len() - 1
            }
        };
        let existing = &mut self.directives[idx].1;
        for source in sources {
            if !existing.contains(&source) {
                existing.push(source);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.directives
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.as_slice())
    }

    /// Production and staging.
    pub fn strict() -> Self {
        Self::new()
            .directive("default-src", &["'self'"])
            .directive("script-src", &["'self'"])
            .directive("style-src", &["'self'", "'unsafe-inline'", "https://fonts.googleapis.com"])
            .directive("font-src", &["'self'", "https://fonts.gstatic.com"])
            .directive("img-src", &["'self'", "data:", "https:", "blob:"])
            .directive("connect-src", &["'self'"])
            .directive("media-src", &["'self'"])
            .directive("object-src", &["'none'"])
            .directive("frame-src", &["'none'"])
            .directive("frame-ancestors", &["'none'"])
            .directive("base-uri", &["'self'"])
            .directive("form-action", &["'self'"])
            .directive("upgrade-insecure-requests", &[])
    }

    /// Development and test: allows eval and local dev servers.
    pub fn relaxed() -> Self {
        Self::new()
            .directive("default-src", &["'self'"])
            .directive(
                "script-src",
                &["'self'", "'unsafe-inline'", "'unsafe-eval'", "http://localhost:*", "ws://localhost:*"],
            )
            .directive("style-src", &["'self'", "'unsafe-inline'", "https://fonts.googleapis.com"])
            .directive("font-src", &["'self'", "https://fonts.gstatic.com", "data:"])
            .directive("img-src", &["'self'", "data:", "https:", "http:", "blob:"])
            .directive("connect-src", &["'self'", "http://localhost:*", "ws://localhost:*"])
            .directive("media-src", &["'self'"])
            .directive("object-src", &["'none'"])
            .directive("frame-src", &["'self'"])
            .directive("frame-ancestors", &["'self'"])
            .directive("base-uri", &["'self'"])
            .directive("form-action", &["'self'"])
    }

    pub fn for_environment(env: Environment) -> Self {
        if env.is_hardened() {
            Self::strict()
        } else {
            Self::relaxed()
        }
    }

    pub fn render(&self) -> String {
        self.directives
            .iter()
            .map(|(name, sources)| {
                if sources.is_empty() {
                    name.clone()
                } else {
                    format!("{} {}", name, sources.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderStats {
    pub responses_processed: u64,
    pub csp_applied: u64,
    pub report_only: bool,
    pub headers_stripped: u64,
    pub redirects_blocked: u64,
    pub hosts_rejected: u64,
}

#[derive(Default)]
struct HeaderCounters {
    processed: AtomicU64,
    csp: AtomicU64,
    stripped: AtomicU64,
    redirects_blocked: AtomicU64,
    hosts_rejected: AtomicU64,
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split(']').next().map(|h| h.trim_start_matches('[')).unwrap_or(host);
    }
    host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
}

/// `/path` with no scheme-relative (`//`, `/\\`) prefix, backslash or control
/// character anywhere.
fn is_local_path(location: &str) -> bool {
    let mut chars = location.chars();
    chars.next() == Some('/')
        && !matches!(chars.next(), Some('/') | Some('\\'))
        && !location.chars().any(|c| c == '\\' || c.is_control())
}

pub struct HeaderComposer {
    config: HeadersConfig,
    environment: Environment,
    policy: CspPolicy,
    rendered: Option<HeaderValue>,
    counters: HeaderCounters,
}

impl HeaderComposer {
    pub fn new(config: HeadersConfig, environment: Environment) -> Self {
        let mut policy = CspPolicy::for_environment(environment);
        for directive in &config.csp_overrides {
            policy.merge(&directive.name, directive.sources.iter().cloned());
        }
        if let Some(uri) = &config.csp_report_uri {
            policy.merge("report-uri", [uri.clone()]);
        }
        let rendered = HeaderValue::from_str(&policy.render()).ok();
        if rendered.is_none() {
            tracing::error!("Content-Security-Policy contains invalid header characters; CSP disabled");
        }
        Self {
            config,
            environment,
            policy,
            rendered,
            counters: HeaderCounters::default(),
        }
    }

    pub fn policy(&self) -> &CspPolicy {
        &self.policy
    }

    pub fn csp_header_name(&self) -> &'static str {
        if self.config.csp_report_only {
            CSP_REPORT_ONLY
        } else {
            CSP
        }
    }

    pub fn is_strict_path(&self, path: &str) -> bool {
        self.config
            .strict_paths
            .iter()
            .any(|p| path.starts_with(p.as_str()))
    }

    /// False only in production with a non-empty allow-list and a host
    /// outside it.
    pub fn host_allowed(&self, host: Option<&str>) -> bool {
        if !self.environment.is_production() || self.config.allowed_hosts.is_empty() {
            return true;
        }
        let Some(host) = host else {
            return false;
        };
        let bare = strip_port(host);
        self.config
            .allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host) || allowed.eq_ignore_ascii_case(bare))
    }

    /// Same-origin paths, the request host and allow-listed domains pass.
    pub fn redirect_allowed(&self, location: &str, request_host: Option<&str>) -> bool {
        if is_local_path(location) {
            return true;
        }
        // Browsers read `\` as `/`, so these are never safe to forward.
        if location.chars().any(|c| c == '\\' || c.is_control()) {
            return false;
        }
        let absolute = if location.starts_with("//") {
            format!("https:{}", location)
        } else {
            location.to_string()
        };
        let url = match url::Url::parse(&absolute) {
            Ok(url) => url,
            Err(_) => return false,
        };
        let Some(target) = url.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };

        if let Some(host) = request_host {
            if strip_port(host).eq_ignore_ascii_case(&target) {
                return true;
            }
        }
        self.config.allowed_redirect_domains.iter().any(|domain| {
            let domain = domain.to_ascii_lowercase();
            target == domain || target.ends_with(&format!(".{}", domain))
        })
    }

    /// Rewrite response headers. Returns the dropped `Location`, if any.
    pub fn apply(&self, path: &str, request_host: Option<&str>, headers: &mut HeaderMap) -> Option<String> {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        for name in FINGERPRINT_HEADERS {
            if headers.remove(name).is_some() {
                self.counters.stripped.fetch_add(1, Ordering::Relaxed);
            }
        }

        for (name, value) in STATIC_HEADERS {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        headers.insert(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static(PERMISSIONS_POLICY),
        );

        let (coop, corp) = if self.is_strict_path(path) {
            ("same-origin", "same-origin")
        } else {
            ("same-origin-allow-popups", "cross-origin")
        };
        headers.insert(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static(coop),
        );
        headers.insert(
            HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static(corp),
        );

        if let Some(csp) = &self.rendered {
            headers.insert(HeaderName::from_static(self.csp_header_name()), csp.clone());
            self.counters.csp.fetch_add(1, Ordering::Relaxed);
        }

        let location = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match location {
            Some(location) if !self.redirect_allowed(&location, request_host) => {
                headers.remove(header::LOCATION);
                self.counters.redirects_blocked.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(location = %location, "Blocked redirect to disallowed domain");
                Some(location)
            }
            _ => None,
        }
    }

    pub fn stats(&self) -> HeaderStats {
        let c = &self.counters;
        HeaderStats {
            responses_processed: c.processed.load(Ordering::Relaxed),
            csp_applied: c.csp.load(Ordering::Relaxed),
            report_only: self.config.csp_report_only,
            headers_stripped: c.stripped.load(Ordering::Relaxed),
            redirects_blocked: c.redirects_blocked.load(Ordering::Relaxed),
            hosts_rejected: c.hosts_rejected.load(Ordering::Relaxed),
        }
    }
}

pub async fn headers_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let composer = &pipeline.headers;
    if !composer.config.enabled {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let path = request.uri().path().to_string();

    if !composer.host_allowed(host.as_deref()) {
        composer.counters.hosts_rejected.fetch_add(1, Ordering::Relaxed);
        pipeline.monitor.record(
            SecurityEventType::HostRejected,
            EventSeverity::Warning,
            json!({ "host": host, "path": path }),
        );
        let mut rejected = response::bad_request("Invalid Host header", "INVALID_HOST");
        composer.apply(&path, None, rejected.headers_mut());
        return rejected;
    }

    let mut response = next.run(request).await;
    if let Some(blocked) = composer.apply(&path, host.as_deref(), response.headers_mut()) {
        pipeline.monitor.record(
            SecurityEventType::RedirectBlocked,
            EventSeverity::Warning,
            json!({ "location": blocked, "path": path }),
        );
    }
    response
}
