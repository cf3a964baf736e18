//! Admission control middleware.
//!
//! Gates, in order: allow-list bypass, blocked identities (403), DDoS burst
//! detection (429), fixed window per route class (429), adaptive trust
//! limit (429). A request must pass every gate. Successful responses on
//! classes with `skip_successful_requests` give their window slot back.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use serde_json::json;

use crate::http::response;
use crate::observability::metrics;
use crate::security::identity::ClientIdentity;
use crate::security::monitor::{EventSeverity, SecurityEventType};
use crate::security::pipeline::SecurityPipeline;
use crate::security::rate_limit::{Admission, AttackType};

fn set_rate_headers(headers: &mut HeaderMap, admission: &Admission) {
    headers.insert("ratelimit-limit", HeaderValue::from(admission.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(admission.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(admission.reset_secs));
}

pub async fn admission_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let engine = &pipeline.rate_limit;
    let identity = ClientIdentity::of(&request);
    let key = identity.key();
    engine.note_request();
    metrics::record_request();

    if engine.is_allow_listed(&identity) {
        return next.run(request).await;
    }

    if pipeline.monitor.is_blocked(&key) || pipeline.monitor.is_blocked(identity.ip()) {
        tracing::warn!(client = %key, "Refusing blocked identity");
        return response::forbidden("Access denied", "IDENTITY_BLOCKED");
    }

    // Every request counts toward the burst window, including ones a class
    // window would reject.
    let ddos = pipeline.ddos.inspect(&identity);
    if ddos.blocked {
        engine.record_block(AttackType::Ddos, &key, None);
        metrics::record_rate_limited(AttackType::Ddos.as_str());
        return response::too_many_requests(
            "Too many requests, please try again later.",
            "DDOS_PROTECTION",
            pipeline.config.ddos.window_secs,
        );
    }

    let class = engine.classify(request.uri().path());
    let admission = engine.admit(&identity, class);
    if !admission.allowed {
        metrics::record_rate_limited(AttackType::RateLimit.as_str());
        pipeline.monitor.mark_suspicious(&key);
        pipeline.monitor.record(
            SecurityEventType::RateLimitExceeded,
            EventSeverity::Warning,
            json!({
                "identity": key,
                "class": class.as_str(),
                "limit": admission.limit,
                "path": request.uri().path(),
            }),
        );
        let mut rejected = response::too_many_requests(
            "Too many requests, please try again later.",
            "RATE_LIMIT_EXCEEDED",
            admission.retry_after_secs,
        );
        set_rate_headers(rejected.headers_mut(), &admission);
        return rejected;
    }

    let adaptive = pipeline.adaptive.check(&identity);
    if !adaptive.allowed {
        engine.record_block(AttackType::Adaptive, &key, None);
        metrics::record_rate_limited(AttackType::Adaptive.as_str());
        pipeline.monitor.record(
            SecurityEventType::AdaptiveLimitExceeded,
            EventSeverity::Warning,
            json!({
                "identity": key,
                "trustScore": adaptive.trust_score,
                "limit": adaptive.limit,
            }),
        );
        return response::too_many_requests(
            "Request limit exceeded for your current trust level.",
            "ADAPTIVE_RATE_LIMIT",
            pipeline.config.adaptive.window_secs,
        );
    }

    let mut response = next.run(request).await;

    if let Some(at) = admission.recorded_at {
        if engine.skips_successful(class) && response.status().as_u16() < 400 {
            engine.refund(&identity, class, at);
        }
    }
    if engine.config().enabled {
        set_rate_headers(response.headers_mut(), &admission);
    }
    response
}
