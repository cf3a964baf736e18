//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests seen by admission control
//! - `guard_rate_limited_total{layer}` (counter): rejections per limiter layer
//! - `guard_ddos_events_total{tier}` (counter): warning / blocked bursts
//! - `guard_csrf_rejections_total{reason}` (counter): missing / invalid tokens
//! - `guard_https_redirects_total` (counter)
//! - `guard_security_events_total{type,severity}` (counter)
//! - `guard_errors_total{severity,category}` (counter)
//! - `guard_notifications_total{outcome}` (counter)
//! - `guard_tracked_identities` / `guard_blocked_identities` (gauges)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus exporter only when enabled in config

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request() {
    counter!("guard_requests_total").increment(1);
}

pub fn record_rate_limited(layer: &'static str) {
    counter!("guard_rate_limited_total", "layer" => layer).increment(1);
}

pub fn record_ddos_event(tier: &'static str) {
    counter!("guard_ddos_events_total", "tier" => tier).increment(1);
}

pub fn record_csrf_rejection(reason: &'static str) {
    counter!("guard_csrf_rejections_total", "reason" => reason).increment(1);
}

pub fn record_https_redirect() {
    counter!("guard_https_redirects_total").increment(1);
}

pub fn record_security_event(event_type: &'static str, severity: &'static str) {
    counter!("guard_security_events_total", "type" => event_type, "severity" => severity)
        .increment(1);
}

pub fn record_error(severity: &'static str, category: &'static str) {
    counter!("guard_errors_total", "severity" => severity, "category" => category).increment(1);
}

pub fn record_notification(outcome: &'static str) {
    counter!("guard_notifications_total", "outcome" => outcome).increment(1);
}

pub fn record_tracked_identities(count: usize) {
    gauge!("guard_tracked_identities").set(count as f64);
}

pub fn record_blocked_identities(count: usize) {
    gauge!("guard_blocked_identities").set(count as f64);
}
