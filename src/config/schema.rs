//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so a minimal (or empty) file is valid.
//!
//! Environment-specific defaults come from [`GuardConfig::for_environment`];
//! operator files are deep-merged over that preset by the loader.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment environment selecting the default policy preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    #[serde(alias = "testing")]
    Test,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }

    /// Staging and production enforce transport security.
    pub fn is_hardened(&self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" | "testing" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

/// Root configuration for the security pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Environment the presets were built for.
    pub environment: Environment,

    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Client identity derivation.
    pub identity: IdentityConfig,

    /// Fixed-window rate limiting per route class.
    pub rate_limit: RateLimitConfig,

    /// Per-IP burst detection.
    pub ddos: DdosConfig,

    /// Trust-scored adaptive limiting.
    pub adaptive: AdaptiveConfig,

    /// CSRF token issuance and verification.
    pub csrf: CsrfConfig,

    /// HTTPS enforcement, HSTS and cookie hardening.
    pub https: HttpsConfig,

    /// Response security headers and CSP.
    pub headers: HeadersConfig,

    /// Input sanitization.
    pub sanitizer: SanitizerConfig,

    /// Error classification and reporting.
    pub errors: ErrorConfig,

    /// Security event log.
    pub monitor: MonitorConfig,

    /// Cookie-backed sessions.
    pub session: SessionConfig,

    /// Periodic pruning of in-memory state.
    pub maintenance: MaintenanceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator stats API.
    pub admin: AdminConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

impl GuardConfig {
    /// Documented defaults for an environment.
    pub fn for_environment(env: Environment) -> Self {
        Self {
            environment: env,
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            identity: IdentityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            ddos: DdosConfig::default(),
            adaptive: AdaptiveConfig::default(),
            csrf: CsrfConfig::for_environment(env),
            https: HttpsConfig::for_environment(env),
            headers: HeadersConfig::for_environment(env),
            sanitizer: SanitizerConfig::default(),
            errors: ErrorConfig::for_environment(env),
            monitor: MonitorConfig::default(),
            session: SessionConfig::default(),
            maintenance: MaintenanceConfig::default(),
            observability: ObservabilityConfig::for_environment(env),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Optional TLS listener served alongside the plain one.
    pub tls: Option<TlsConfig>,

    /// Maximum request body size accepted by the pipeline.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            tls: None,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// TLS configuration for the secure listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Bind address for the TLS listener (e.g., "0.0.0.0:3443").
    pub bind_address: String,

    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Honour X-Forwarded-For / X-Real-IP style headers. Only enable behind
    /// a proxy that overwrites them.
    pub trust_proxy_headers: bool,
    /// Peer addresses whose proxy headers are honoured.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            trust_proxy_headers: false,
            trusted_proxies: Vec::new(),
        }
    }
}

impl IdentityConfig {
    /// Whether proxy headers on a request from `peer` may name the client.
    pub fn trusts(&self, peer: Option<SocketAddr>) -> bool {
        self.trust_proxy_headers
            && peer.is_some_and(|addr| self.trusted_proxies.contains(&addr.ip()))
    }
}

/// Route classes with independent rate-limit policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    General,
    Api,
    Auth,
    PasswordReset,
    Upload,
    Search,
    StaticAssets,
}

impl RouteClass {
    pub const ALL: [RouteClass; 7] = [
        RouteClass::General,
        RouteClass::Api,
        RouteClass::Auth,
        RouteClass::PasswordReset,
        RouteClass::Upload,
        RouteClass::Search,
        RouteClass::StaticAssets,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::General => "general",
            RouteClass::Api => "api",
            RouteClass::Auth => "auth",
            RouteClass::PasswordReset => "password_reset",
            RouteClass::Upload => "upload",
            RouteClass::Search => "search",
            RouteClass::StaticAssets => "static_assets",
        }
    }
}

/// Window and budget for one route class.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassPolicy {
    pub window_ms: u64,
    pub max: u32,
    /// Refund the hit when the response status is below 400.
    pub skip_successful_requests: bool,
}

impl ClassPolicy {
    fn new(window_ms: u64, max: u32) -> Self {
        Self {
            window_ms,
            max,
            skip_successful_requests: false,
        }
    }
}

impl Default for ClassPolicy {
    fn default() -> Self {
        Self::new(15 * 60 * 1000, 1000)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassPolicies {
    pub general: ClassPolicy,
    pub api: ClassPolicy,
    pub auth: ClassPolicy,
    pub password_reset: ClassPolicy,
    pub upload: ClassPolicy,
    pub search: ClassPolicy,
    pub static_assets: ClassPolicy,
}

impl ClassPolicies {
    pub fn get(&self, class: RouteClass) -> &ClassPolicy {
        match class {
            RouteClass::General => &self.general,
            RouteClass::Api => &self.api,
            RouteClass::Auth => &self.auth,
            RouteClass::PasswordReset => &self.password_reset,
            RouteClass::Upload => &self.upload,
            RouteClass::Search => &self.search,
            RouteClass::StaticAssets => &self.static_assets,
        }
    }
}

impl Default for ClassPolicies {
    fn default() -> Self {
        const MINUTE: u64 = 60 * 1000;
        Self {
            general: ClassPolicy::new(15 * MINUTE, 1000),
            api: ClassPolicy::new(15 * MINUTE, 300),
            auth: ClassPolicy {
                skip_successful_requests: true,
                ..ClassPolicy::new(15 * MINUTE, 10)
            },
            password_reset: ClassPolicy::new(60 * MINUTE, 3),
            upload: ClassPolicy::new(60 * MINUTE, 20),
            search: ClassPolicy::new(MINUTE, 30),
            static_assets: ClassPolicy::new(5 * MINUTE, 1000),
        }
    }
}

/// Path prefix assigned to a route class.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassPrefix {
    pub prefix: String,
    pub class: RouteClass,
}

impl ClassPrefix {
    fn new(prefix: &str, class: RouteClass) -> Self {
        Self {
            prefix: prefix.to_string(),
            class,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the fixed-window limiter.
    pub enabled: bool,

    /// Identities (IPs or `user:<id>` keys) that bypass every admission check.
    pub allow_list: Vec<String>,

    /// Per-class windows.
    pub classes: ClassPolicies,

    /// Longest matching prefix selects the class; unmatched paths are `general`.
    pub class_prefixes: Vec<ClassPrefix>,

    /// Windows idle for longer than this are dropped by maintenance.
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_list: Vec::new(),
            classes: ClassPolicies::default(),
            class_prefixes: vec![
                ClassPrefix::new("/api/", RouteClass::Api),
                ClassPrefix::new("/api/search", RouteClass::Search),
                ClassPrefix::new("/search", RouteClass::Search),
                ClassPrefix::new("/user/login", RouteClass::Auth),
                ClassPrefix::new("/user/register", RouteClass::Auth),
                ClassPrefix::new("/auth/", RouteClass::Auth),
                ClassPrefix::new("/user/password", RouteClass::PasswordReset),
                ClassPrefix::new("/password-reset", RouteClass::PasswordReset),
                ClassPrefix::new("/upload", RouteClass::Upload),
                ClassPrefix::new("/artworks/upload", RouteClass::Upload),
                ClassPrefix::new("/public/", RouteClass::StaticAssets),
                ClassPrefix::new("/static/", RouteClass::StaticAssets),
                ClassPrefix::new("/uploads/", RouteClass::StaticAssets),
                ClassPrefix::new("/css/", RouteClass::StaticAssets),
                ClassPrefix::new("/js/", RouteClass::StaticAssets),
                ClassPrefix::new("/images/", RouteClass::StaticAssets),
            ],
            idle_ttl_secs: 60 * 60,
        }
    }
}

/// Per-IP burst detection thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DdosConfig {
    pub enabled: bool,
    pub window_secs: u64,
    /// More than this many requests in the window emits a warning event.
    pub warn_threshold: u32,
    /// More than this many requests in the window blocks the request.
    pub block_threshold: u32,
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            warn_threshold: 50,
            block_threshold: 100,
        }
    }
}

/// Trust-scored adaptive limiter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Requests per window allowed at the default trust of 50.
    pub base_limit: u32,
    pub window_secs: u64,
    pub initial_trust: u8,
    pub violation_penalty: u8,
    /// Every Nth clean request raises trust by one.
    pub recovery_interval: u64,
    /// Profiles idle for longer than this are dropped by maintenance.
    pub trust_idle_ttl_secs: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_limit: 500,
            window_secs: 15 * 60,
            initial_trust: 50,
            violation_penalty: 10,
            recovery_interval: 50,
            trust_idle_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub enabled: bool,
    /// Path prefixes that never require a token (e.g. webhooks).
    pub exclude_paths: Vec<String>,
    /// Expose `/csrf-debug`. Always off in production.
    pub debug_endpoint: bool,
}

impl CsrfConfig {
    pub fn for_environment(env: Environment) -> Self {
        Self {
            enabled: true,
            exclude_paths: vec!["/webhooks/".to_string()],
            debug_endpoint: !env.is_production(),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

/// Transport security policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpsConfig {
    pub enforce_https: bool,
    pub hsts_max_age_secs: u64,
    pub hsts_include_subdomains: bool,
    pub hsts_preload: bool,
    pub upgrade_insecure_requests: bool,
    pub block_all_mixed_content: bool,
    pub secure_cookies: bool,
    /// Paths never redirected (load balancer health checks).
    pub health_paths: Vec<String>,
    /// Prefixes whose plaintext use is reported as insecure transmission.
    pub sensitive_paths: Vec<String>,
}

impl HttpsConfig {
    pub fn for_environment(env: Environment) -> Self {
        let (max_age, subdomains, preload) = match env {
            Environment::Production => (31_536_000, true, true),
            Environment::Staging => (86_400, true, false),
            Environment::Development | Environment::Test => (0, false, false),
        };
        Self {
            enforce_https: env.is_hardened(),
            hsts_max_age_secs: max_age,
            hsts_include_subdomains: subdomains,
            hsts_preload: preload,
            upgrade_insecure_requests: env.is_hardened(),
            block_all_mixed_content: env.is_production(),
            secure_cookies: env.is_hardened(),
            health_paths: vec!["/health".to_string(), "/healthz".to_string()],
            sensitive_paths: ["/login", "/register", "/password", "/admin", "/api", "/profile", "/user/login", "/user/register", "/user/password", "/user/profile"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

/// One CSP directive supplied by an operator.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CspDirectiveConfig {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    pub enabled: bool,
    /// Emit `Content-Security-Policy-Report-Only` instead of enforcing.
    pub csp_report_only: bool,
    /// Merged over the environment preset.
    pub csp_overrides: Vec<CspDirectiveConfig>,
    pub csp_report_uri: Option<String>,
    /// Accepted Host header values. Enforced in production when non-empty.
    pub allowed_hosts: Vec<String>,
    /// Domains absolute `Location` headers may point to.
    pub allowed_redirect_domains: Vec<String>,
    /// Prefixes receiving strict cross-origin isolation headers.
    pub strict_paths: Vec<String>,
}

impl HeadersConfig {
    pub fn for_environment(env: Environment) -> Self {
        Self {
            enabled: true,
            csp_report_only: !env.is_production(),
            csp_overrides: Vec::new(),
            csp_report_uri: None,
            allowed_hosts: Vec::new(),
            allowed_redirect_domains: Vec::new(),
            strict_paths: vec!["/admin".to_string(), "/api".to_string(), "/user".to_string()],
        }
    }
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

/// Named sanitization presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizePreset {
    /// HTML allowed (descriptions, notices).
    UserContent,
    /// No HTML; body and query.
    FormInput,
    /// No HTML; body, query and path params.
    ApiInput,
    /// No HTML; query only.
    SearchInput,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresetRoute {
    pub prefix: String,
    pub preset: SanitizePreset,
}

impl PresetRoute {
    fn new(prefix: &str, preset: SanitizePreset) -> Self {
        Self {
            prefix: prefix.to_string(),
            preset,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SanitizerConfig {
    pub enabled: bool,
    /// Structures nested deeper than this are passed through unmodified.
    pub max_depth: usize,
    /// Longest matching prefix selects the preset.
    pub routes: Vec<PresetRoute>,
    pub default_preset: SanitizePreset,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 32,
            routes: vec![
                PresetRoute::new("/api/", SanitizePreset::ApiInput),
                PresetRoute::new("/search", SanitizePreset::SearchInput),
                PresetRoute::new("/api/search", SanitizePreset::SearchInput),
                PresetRoute::new("/artworks", SanitizePreset::UserContent),
                PresetRoute::new("/exhibitions", SanitizePreset::UserContent),
                PresetRoute::new("/notices", SanitizePreset::UserContent),
            ],
            default_preset: SanitizePreset::FormInput,
        }
    }
}

/// Regex rewrite applied to error messages or codes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorConfig {
    /// Include internal detail in JSON error payloads.
    pub expose_details: bool,
    pub dedup_ttl_secs: u64,
    pub notify_cooldown_secs: u64,
    pub pattern_threshold: u32,
    pub pattern_window_secs: u64,
    /// Status codes that are never reported.
    pub ignore_status: Vec<u16>,
    /// When non-empty, only these status codes are reported.
    pub only_status: Vec<u16>,
    /// URL regexes whose errors are never reported.
    pub ignore_url_patterns: Vec<String>,
    /// User-Agent substrings (case-insensitive) whose errors are never reported.
    pub ignore_user_agents: Vec<String>,
    /// User-Agent regexes whose errors are never reported.
    pub ignore_user_agent_patterns: Vec<String>,
    pub message_rules: Vec<RewriteRule>,
    pub code_rules: Vec<RewriteRule>,
    /// POST high-severity reports here when set.
    pub webhook_url: Option<String>,
}

impl ErrorConfig {
    pub fn for_environment(env: Environment) -> Self {
        Self {
            expose_details: env.is_development(),
            dedup_ttl_secs: 60 * 60,
            notify_cooldown_secs: 15 * 60,
            pattern_threshold: 5,
            pattern_window_secs: 5 * 60,
            ignore_status: Vec::new(),
            only_status: Vec::new(),
            ignore_url_patterns: vec![r"^/favicon\.ico$".to_string(), r"\.map$".to_string()],
            ignore_user_agents: ["bot", "crawler", "spider", "slurp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_user_agent_patterns: Vec::new(),
            message_rules: Vec::new(),
            code_rules: Vec::new(),
            webhook_url: None,
        }
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub max_events: usize,
    pub max_alerts: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_events: 1000,
            max_alerts: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub idle_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "gg.sid".to_string(),
            idle_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the pretty format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl ObservabilityConfig {
    pub fn for_environment(env: Environment) -> Self {
        Self {
            log_level: if env.is_development() { "debug" } else { "info" }.to_string(),
            json_logs: env.is_production(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

/// Placeholder key rejected by validation in production.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin stats API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the `/admin` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: PLACEHOLDER_API_KEY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("Production".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!("testing".parse::<Environment>(), Ok(Environment::Test));
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_production_preset_is_hardened() {
        let config = GuardConfig::for_environment(Environment::Production);
        assert!(config.https.enforce_https);
        assert_eq!(config.https.hsts_max_age_secs, 31_536_000);
        assert!(!config.headers.csp_report_only);
        assert!(!config.csrf.debug_endpoint);
        assert!(!config.errors.expose_details);
    }

    #[test]
    fn test_development_preset_is_relaxed() {
        let config = GuardConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert!(!config.https.enforce_https);
        assert_eq!(config.https.hsts_max_age_secs, 0);
        assert!(config.headers.csp_report_only);
        assert!(config.errors.expose_details);
    }

    #[test]
    fn test_auth_class_skips_successful_requests() {
        let policies = ClassPolicies::default();
        assert!(policies.get(RouteClass::Auth).skip_successful_requests);
        assert_eq!(policies.get(RouteClass::Auth).max, 10);
        assert_eq!(policies.get(RouteClass::StaticAssets).max, 1000);
    }
}
