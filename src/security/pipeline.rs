//! The composed security pipeline.
//!
//! One `SecurityPipeline` is built per process and shared through `Arc` by
//! every middleware stage. `wrap` layers the stages around an application
//! router in this order (outermost first):
//!
//! ```text
//! trace → request id → timeout → body limit → identity → transport
//!     → headers → admission → session → csrf → sanitize
//!     → error boundary → catch panic → application
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GuardConfig;
use crate::error::handler::{error_boundary, not_found, panic_response};
use crate::error::report::ErrorReporter;
use crate::error::{ErrorHandler, ErrorStats};
use crate::observability::metrics;
use crate::security::adaptive::AdaptiveLimiter;
use crate::security::admission::admission_middleware;
use crate::security::csrf::{self, csrf_middleware, CsrfGuard, CsrfStats};
use crate::security::ddos::DdosDetector;
use crate::security::headers::{headers_middleware, HeaderComposer, HeaderStats};
use crate::security::identity::identity_middleware;
use crate::security::monitor::{SecurityMonitor, SecurityStats};
use crate::security::rate_limit::{RateLimitEngine, RateLimitStats};
use crate::security::sanitize::{sanitize_middleware, Sanitizer};
use crate::security::transport::{transport_middleware, HttpsStats, TransportEnforcer};
use crate::session::{session_middleware, SessionManager};

pub struct SecurityPipeline {
    pub config: Arc<GuardConfig>,
    pub monitor: Arc<SecurityMonitor>,
    pub rate_limit: RateLimitEngine,
    pub ddos: DdosDetector,
    pub adaptive: AdaptiveLimiter,
    pub csrf: CsrfGuard,
    pub transport: TransportEnforcer,
    pub headers: HeaderComposer,
    pub sanitizer: Sanitizer,
    pub errors: ErrorHandler,
    pub sessions: Arc<SessionManager>,
    started_at: Instant,
}

/// Every component's stats in one record.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub environment: &'static str,
    pub uptime_secs: u64,
    pub rate_limit: RateLimitStats,
    pub https: HttpsStats,
    pub headers: HeaderStats,
    pub csrf: CsrfStats,
    pub security: SecurityStats,
    pub errors: ErrorStats,
    pub ddos_tracked: usize,
    pub sessions: usize,
}

/// Entries dropped by one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub rate_windows: usize,
    pub trust_profiles: usize,
    pub ddos_windows: usize,
    pub error_entries: usize,
    pub sessions: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.rate_windows + self.trust_profiles + self.ddos_windows + self.error_entries + self.sessions
    }
}

impl SecurityPipeline {
    pub fn new(config: GuardConfig) -> Self {
        let env = config.environment;
        let monitor = Arc::new(SecurityMonitor::new(config.monitor.clone()));
        let reporter = ErrorReporter::new(config.errors.clone()).with_monitor(monitor.clone());

        tracing::info!(
            environment = env.as_str(),
            enforce_https = config.https.enforce_https,
            csrf = config.csrf.enabled,
            rate_limit = config.rate_limit.enabled,
            "Security pipeline initialized"
        );

        Self {
            rate_limit: RateLimitEngine::new(config.rate_limit.clone()),
            ddos: DdosDetector::new(config.ddos.clone(), monitor.clone()),
            adaptive: AdaptiveLimiter::new(config.adaptive.clone()),
            csrf: CsrfGuard::new(config.csrf.clone(), env),
            transport: TransportEnforcer::new(config.https.clone(), env),
            headers: HeaderComposer::new(config.headers.clone(), env),
            sanitizer: Sanitizer::new(config.sanitizer.clone()),
            errors: ErrorHandler::new(reporter),
            sessions: Arc::new(SessionManager::new(config.session.clone())),
            monitor,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Replace the error sink, e.g. to register custom handlers or a renderer.
    pub fn with_error_handler(mut self, errors: ErrorHandler) -> Self {
        self.errors = errors;
        self
    }

    /// Pipeline-owned endpoints: CSRF token issuance, CSRF debug, health.
    pub fn routes(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/csrf-token", get(csrf::token_handler))
            .route("/csrf-debug", get(csrf::debug_handler))
            .route("/health", get(health))
            .route("/healthz", get(health))
            .with_state(self.clone())
    }

    /// Layer every stage around `app`. Unknown routes become `NotFound`.
    #[allow(deprecated)]
    pub fn wrap(self: &Arc<Self>, app: Router) -> Router {
        let identity = Arc::new(self.config.identity.clone());
        app.merge(self.routes())
            .fallback(not_found)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(from_fn_with_state(self.clone(), error_boundary))
            .layer(from_fn_with_state(self.clone(), sanitize_middleware))
            .layer(from_fn_with_state(self.clone(), csrf_middleware))
            .layer(from_fn_with_state(self.sessions.clone(), session_middleware))
            .layer(from_fn_with_state(self.clone(), admission_middleware))
            .layer(from_fn_with_state(self.clone(), headers_middleware))
            .layer(from_fn_with_state(self.clone(), transport_middleware))
            .layer(from_fn_with_state(identity, identity_middleware))
            .layer(DefaultBodyLimit::max(self.config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        let mut stats = self.rate_limit.stats();
        stats.tracked_profiles = self.adaptive.tracked();
        stats
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            environment: self.config.environment.as_str(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            rate_limit: self.rate_limit_stats(),
            https: self.transport.stats(),
            headers: self.headers.stats(),
            csrf: self.csrf.stats(),
            security: self.monitor.stats(),
            errors: self.errors.reporter().stats(),
            ddos_tracked: self.ddos.tracked(),
            sessions: self.sessions.store().len(),
        }
    }

    /// Drop idle per-identity state everywhere. Called by the maintenance timer.
    pub fn prune(&self, now: Instant) -> PruneReport {
        let report = PruneReport {
            rate_windows: self.rate_limit.prune(now),
            trust_profiles: self.adaptive.prune(now),
            ddos_windows: self.ddos.prune(now),
            error_entries: self.errors.reporter().prune(now),
            sessions: self.sessions.prune(now),
        };
        metrics::record_tracked_identities(self.adaptive.tracked());
        report
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
