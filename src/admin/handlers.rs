use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ErrorReport, ErrorStats};
use crate::security::csrf::CsrfStats;
use crate::security::headers::HeaderStats;
use crate::security::monitor::{SecurityEvent, SecurityStats};
use crate::security::pipeline::SecurityPipeline;
use crate::security::rate_limit::RateLimitStats;
use crate::security::transport::HttpsStats;

type AdminState = State<Arc<SecurityPipeline>>;

const DEFAULT_EVENT_LIMIT: usize = 50;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub environment: &'static str,
    pub uptime_secs: u64,
    pub blocked_identities: usize,
    pub tracked_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub identity: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "manual block".to_string()
}

pub async fn get_status(State(pipeline): AdminState) -> Json<SystemStatus> {
    let stats = pipeline.stats();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        environment: stats.environment,
        uptime_secs: stats.uptime_secs,
        blocked_identities: stats.security.blocked_identities.len(),
        tracked_sessions: stats.sessions,
    })
}

pub async fn get_rate_limit_stats(State(pipeline): AdminState) -> Json<RateLimitStats> {
    Json(pipeline.rate_limit_stats())
}

pub async fn get_https_stats(State(pipeline): AdminState) -> Json<HttpsStats> {
    Json(pipeline.transport.stats())
}

pub async fn get_header_stats(State(pipeline): AdminState) -> Json<HeaderStats> {
    Json(pipeline.headers.stats())
}

pub async fn get_security_stats(State(pipeline): AdminState) -> Json<SecurityStats> {
    Json(pipeline.monitor.stats())
}

pub async fn get_error_stats(State(pipeline): AdminState) -> Json<ErrorStats> {
    Json(pipeline.errors.reporter().stats())
}

pub async fn get_csrf_stats(State(pipeline): AdminState) -> Json<CsrfStats> {
    Json(pipeline.csrf.stats())
}

pub async fn get_error_reports(State(pipeline): AdminState) -> Json<Vec<ErrorReport>> {
    Json(pipeline.errors.reporter().reports())
}

pub async fn get_events(
    State(pipeline): AdminState,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<SecurityEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(pipeline.monitor.recent_events(limit))
}

pub async fn get_alerts(State(pipeline): AdminState) -> Json<Vec<SecurityEvent>> {
    Json(pipeline.monitor.alerts())
}

pub async fn post_block(
    State(pipeline): AdminState,
    Json(request): Json<BlockRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let identity = request.identity.trim();
    if identity.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "identity is required" })),
        ));
    }
    pipeline.monitor.block_ip(identity, &request.reason);
    tracing::info!(identity = %identity, reason = %request.reason, "Identity blocked by operator");
    Ok(Json(json!({ "success": true, "identity": identity })))
}

pub async fn delete_block(
    State(pipeline): AdminState,
    Path(identity): Path<String>,
) -> (StatusCode, Json<Value>) {
    if pipeline.monitor.unblock(&identity) {
        tracing::info!(identity = %identity, "Identity unblocked by operator");
        (StatusCode::OK, Json(json!({ "success": true, "identity": identity })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "message": "identity is not blocked" })),
        )
    }
}
