//! Operator API under `/admin`, guarded by a bearer API key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::security::pipeline::SecurityPipeline;

pub fn admin_router(pipeline: Arc<SecurityPipeline>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats/rate-limit", get(get_rate_limit_stats))
        .route("/admin/stats/https", get(get_https_stats))
        .route("/admin/stats/headers", get(get_header_stats))
        .route("/admin/stats/security", get(get_security_stats))
        .route("/admin/stats/errors", get(get_error_stats))
        .route("/admin/stats/csrf", get(get_csrf_stats))
        .route("/admin/errors", get(get_error_reports))
        .route("/admin/events", get(get_events))
        .route("/admin/alerts", get(get_alerts))
        .route("/admin/block", post(post_block))
        .route("/admin/block/{identity}", delete(delete_block))
        .route_layer(middleware::from_fn_with_state(pipeline.clone(), admin_auth_middleware))
        .with_state(pipeline)
}
