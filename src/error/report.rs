//! Error reporting: deduplication, pattern detection, notification throttling.
//!
//! # Responsibilities
//! - Collapse repeated `(name, message, code)` errors into one counted report
//! - Flag bursts of the same `(name, message, path)` within a rolling window
//! - Gate notifications by severity and a per-error cooldown
//!
//! # Design Decisions
//! - The dedup buffer, cooldowns and pattern counters are separate
//!   `ExpiringMap`s so each has its own TTL
//! - Notifications are spawned and never delay the response

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::classify::{compile_rules, rewrite_all, Classification, ErrorFilter, FilterInput, Rewrite};
use super::notify::{LogNotifier, Notifier, WebhookNotifier};
use super::{AppError, Category, Severity};
use crate::config::ErrorConfig;
use crate::observability::metrics;
use crate::security::monitor::{EventSeverity, SecurityEventType, SecurityMonitor};
use crate::store::{ExpiringMap, RateWindow};

/// Last request an error was seen on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportContext {
    pub method: String,
    pub path: String,
    pub request_id: Option<String>,
    pub client: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub error_id: String,
    pub name: String,
    pub message: String,
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    pub status_code: u16,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub context: ReportContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub by_severity: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
    pub unique_errors: usize,
    pub notifications_sent: u64,
    pub notifications_suppressed: u64,
    pub patterns_detected: u64,
    pub filtered: u64,
}

/// What `report` did with one occurrence.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub error_id: String,
    pub first_occurrence: bool,
    pub occurrences: u64,
    pub notified: bool,
    pub pattern_detected: bool,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_suppressed: AtomicU64,
    patterns_detected: AtomicU64,
    filtered: AtomicU64,
}

#[derive(Default)]
struct Breakdown {
    by_severity: BTreeMap<String, u64>,
    by_category: BTreeMap<String, u64>,
}

/// Stable id: first 16 hex chars of SHA-256 over `name|message|code`.
pub fn error_id(name: &str, message: &str, code: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(message.as_bytes());
    hasher.update(b"|");
    hasher.update(code.unwrap_or("").as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

pub struct ErrorReporter {
    config: ErrorConfig,
    filter: ErrorFilter,
    message_rules: Vec<Rewrite>,
    code_rules: Vec<Rewrite>,
    reports: ExpiringMap<String, ErrorReport>,
    cooldowns: ExpiringMap<String, Option<Instant>>,
    patterns: ExpiringMap<String, RateWindow>,
    notifier: Arc<dyn Notifier>,
    monitor: Option<Arc<SecurityMonitor>>,
    counters: Arc<Counters>,
    breakdown: Mutex<Breakdown>,
}

impl ErrorReporter {
    pub fn new(config: ErrorConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.webhook_url {
            Some(url) => match WebhookNotifier::new(url.clone()) {
                Ok(webhook) => Arc::new(webhook),
                Err(e) => {
                    tracing::warn!(error = %e, "Webhook notifier unavailable, falling back to log");
                    Arc::new(LogNotifier)
                }
            },
            None => Arc::new(LogNotifier),
        };

        Self {
            filter: ErrorFilter::new(&config),
            message_rules: compile_rules(&config.message_rules),
            code_rules: compile_rules(&config.code_rules),
            reports: ExpiringMap::new(Duration::from_secs(config.dedup_ttl_secs)),
            cooldowns: ExpiringMap::new(Duration::from_secs(config.notify_cooldown_secs)),
            patterns: ExpiringMap::new(Duration::from_secs(config.pattern_window_secs)),
            notifier,
            monitor: None,
            counters: Arc::new(Counters::default()),
            breakdown: Mutex::new(Breakdown::default()),
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Pattern bursts are also recorded as security events.
    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_message_rule(mut self, rule: Rewrite) -> Self {
        self.message_rules.push(rule);
        self
    }

    pub fn with_code_rule(mut self, rule: Rewrite) -> Self {
        self.code_rules.push(rule);
        self
    }

    pub fn config(&self) -> &ErrorConfig {
        &self.config
    }

    /// True when the error should bypass logging and reporting.
    pub fn is_filtered(&self, status: u16, path: &str, user_agent: Option<&str>) -> bool {
        let ignored = self.filter.should_ignore(&FilterInput {
            status,
            path,
            user_agent,
        });
        if ignored {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
        }
        ignored
    }

    /// `err` with message and code passed through the rewrite rules.
    pub fn transform(&self, err: &AppError) -> AppError {
        let message = rewrite_all(&self.message_rules, &err.message);
        let code = err.code.as_deref().map(|c| rewrite_all(&self.code_rules, c));
        err.rewritten(message, code)
    }

    pub fn report(&self, err: &AppError, class: Classification, context: ReportContext) -> ReportOutcome {
        self.report_at(err, class, context, Instant::now())
    }

    pub fn report_at(
        &self,
        err: &AppError,
        class: Classification,
        context: ReportContext,
        now: Instant,
    ) -> ReportOutcome {
        let name = err.name();
        let id = error_id(&name, &err.message, err.code.as_deref());
        let seen_at = Utc::now();

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        {
            let mut breakdown = self.breakdown.lock().unwrap_or_else(|p| p.into_inner());
            *breakdown.by_severity.entry(class.severity.as_str().to_string()).or_default() += 1;
            *breakdown.by_category.entry(class.category.as_str().to_string()).or_default() += 1;
        }
        metrics::record_error(class.severity.as_str(), class.category.as_str());

        let pattern_key = format!("{}|{}|{}", name, err.message, context.path);
        let path = context.path.clone();

        let report = self.reports.with_entry_at(
            id.clone(),
            now,
            || ErrorReport {
                error_id: id.clone(),
                name: name.clone(),
                message: err.message.clone(),
                code: err.code.clone(),
                severity: class.severity,
                category: class.category,
                status_code: class.status,
                first_seen: seen_at,
                last_seen: seen_at,
                occurrence_count: 0,
                context: ReportContext::default(),
            },
            |report| {
                report.occurrence_count += 1;
                report.last_seen = seen_at;
                report.context = context;
                report.clone()
            },
        );
        let first_occurrence = report.occurrence_count == 1;

        if first_occurrence {
            log_report(&report, err);
        } else {
            tracing::debug!(
                error_id = %id,
                occurrences = report.occurrence_count,
                "Repeated error"
            );
        }

        let pattern_detected = self.detect_pattern(pattern_key, now);
        if pattern_detected {
            self.counters.patterns_detected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error_id = %id,
                name = %name,
                path = %path,
                threshold = self.config.pattern_threshold,
                "Error pattern detected"
            );
            if let Some(monitor) = &self.monitor {
                monitor.record(
                    SecurityEventType::ErrorPattern,
                    EventSeverity::Warning,
                    json!({
                        "errorId": id,
                        "name": name,
                        "message": err.message,
                        "path": path,
                        "threshold": self.config.pattern_threshold,
                    }),
                );
            }
        }

        let notified = self.maybe_notify(&report, now);

        ReportOutcome {
            error_id: id,
            first_occurrence,
            occurrences: report.occurrence_count,
            notified,
            pattern_detected,
        }
    }

    /// One signal per burst: the counter restarts once the threshold is hit.
    fn detect_pattern(&self, key: String, now: Instant) -> bool {
        let window = Duration::from_secs(self.config.pattern_window_secs);
        let threshold = self.config.pattern_threshold;
        self.patterns.with_entry_at(
            key,
            now,
            || RateWindow::new(window),
            |w| {
                if w.record(now) >= threshold {
                    *w = RateWindow::new(window);
                    true
                } else {
                    false
                }
            },
        )
    }

    fn maybe_notify(&self, report: &ErrorReport, now: Instant) -> bool {
        if report.severity < Severity::High {
            return false;
        }
        let cooldown = Duration::from_secs(self.config.notify_cooldown_secs);
        let allowed = self.cooldowns.with_entry_at(
            report.error_id.clone(),
            now,
            || None,
            |last| match last {
                Some(at) if now.saturating_duration_since(*at) < cooldown => false,
                _ => {
                    *last = Some(now);
                    true
                }
            },
        );
        if !allowed {
            self.counters.notifications_suppressed.fetch_add(1, Ordering::Relaxed);
            metrics::record_notification("suppressed");
            return false;
        }
        self.dispatch(report.clone());
        true
    }

    fn dispatch(&self, report: ErrorReport) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(error_id = %report.error_id, "No runtime available, notification dropped");
                return;
            }
        };
        let notifier = self.notifier.clone();
        let counters = self.counters.clone();
        handle.spawn(async move {
            match notifier.send(&report).await {
                Ok(()) => {
                    counters.notifications_sent.fetch_add(1, Ordering::Relaxed);
                    metrics::record_notification("sent");
                }
                Err(e) => {
                    tracing::warn!(
                        notifier = notifier.name(),
                        error_id = %report.error_id,
                        error = %e,
                        "Error notification failed"
                    );
                    metrics::record_notification("failed");
                }
            }
        });
    }

    pub fn get(&self, error_id: &str) -> Option<ErrorReport> {
        self.reports.get(&error_id.to_string())
    }

    /// Live reports, most recently seen first.
    pub fn reports(&self) -> Vec<ErrorReport> {
        let mut reports: Vec<ErrorReport> = self.reports.snapshot().into_iter().map(|(_, r)| r).collect();
        reports.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        reports
    }

    /// Drop idle dedup entries, cooldowns and pattern counters.
    pub fn prune(&self, now: Instant) -> usize {
        self.reports.prune_at(now) + self.cooldowns.prune_at(now) + self.patterns.prune_at(now)
    }

    pub fn stats(&self) -> ErrorStats {
        let breakdown = self.breakdown.lock().unwrap_or_else(|p| p.into_inner());
        ErrorStats {
            total_errors: self.counters.total.load(Ordering::Relaxed),
            by_severity: breakdown.by_severity.clone(),
            by_category: breakdown.by_category.clone(),
            unique_errors: self.reports.len(),
            notifications_sent: self.counters.notifications_sent.load(Ordering::Relaxed),
            notifications_suppressed: self.counters.notifications_suppressed.load(Ordering::Relaxed),
            patterns_detected: self.counters.patterns_detected.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
        }
    }
}

fn log_report(report: &ErrorReport, err: &AppError) {
    let source = err.source.as_ref().map(|s| s.to_string());
    match report.severity {
        Severity::Low => tracing::info!(
            error_id = %report.error_id,
            name = %report.name,
            status = report.status_code,
            category = report.category.as_str(),
            path = %report.context.path,
            "{}",
            report.message
        ),
        Severity::Medium => tracing::warn!(
            error_id = %report.error_id,
            name = %report.name,
            status = report.status_code,
            category = report.category.as_str(),
            path = %report.context.path,
            "{}",
            report.message
        ),
        Severity::High | Severity::Critical => tracing::error!(
            error_id = %report.error_id,
            name = %report.name,
            status = report.status_code,
            severity = report.severity.as_str(),
            category = report.category.as_str(),
            path = %report.context.path,
            request_id = ?report.context.request_id,
            source = ?source,
            "{}",
            report.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify::classify;
    use crate::error::notify::NotifyError;
    use crate::error::ErrorKind;
    use futures_util::future::BoxFuture;
    use tokio::sync::mpsc;

    fn context(path: &str) -> ReportContext {
        ReportContext {
            method: "GET".into(),
            path: path.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_error_id_is_stable() {
        let a = error_id("DatabaseError", "timeout", Some("E1"));
        let b = error_id("DatabaseError", "timeout", Some("E1"));
        let c = error_id("DatabaseError", "timeout", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_dedup_counts_occurrences() {
        let reporter = ErrorReporter::new(ErrorConfig::default());
        let err = AppError::validation("title is required").with_code("E_TITLE");
        let class = classify(&err);

        let mut outcome = None;
        for _ in 0..5 {
            outcome = Some(reporter.report(&err, class, context("/artworks")));
        }
        let outcome = outcome.unwrap();

        assert_eq!(outcome.occurrences, 5);
        assert_eq!(reporter.stats().unique_errors, 1);
        assert_eq!(reporter.stats().total_errors, 5);
        assert_eq!(reporter.get(&outcome.error_id).unwrap().occurrence_count, 5);
    }

    #[test]
    fn test_pattern_signals_once_per_burst() {
        let reporter = ErrorReporter::new(ErrorConfig::default());
        let err = AppError::validation("bad input");
        let class = classify(&err);
        let start = Instant::now();

        let signals: Vec<bool> = (0..10)
            .map(|i| {
                reporter
                    .report_at(&err, class, context("/x"), start + Duration::from_secs(i))
                    .pattern_detected
            })
            .collect();

        assert_eq!(signals.iter().filter(|s| **s).count(), 2);
        assert!(signals[4]);
        assert!(signals[9]);
        assert_eq!(reporter.stats().patterns_detected, 2);
    }

    #[test]
    fn test_pattern_window_expires() {
        let reporter = ErrorReporter::new(ErrorConfig::default());
        let err = AppError::validation("bad input");
        let class = classify(&err);
        let start = Instant::now();

        for i in 0..4 {
            let outcome = reporter.report_at(&err, class, context("/x"), start + Duration::from_secs(i * 100));
            assert!(!outcome.pattern_detected);
        }
        // The first occurrence has left the 5 minute window.
        let outcome = reporter.report_at(&err, class, context("/x"), start + Duration::from_secs(400));
        assert!(!outcome.pattern_detected);
    }

    #[test]
    fn test_low_severity_never_notifies() {
        let reporter = ErrorReporter::new(ErrorConfig::default());
        let err = AppError::not_found("missing");
        let outcome = reporter.report(&err, classify(&err), context("/x"));
        assert!(!outcome.notified);
        assert_eq!(reporter.stats().notifications_suppressed, 0);
    }

    struct ChannelNotifier(mpsc::UnboundedSender<String>);

    impl Notifier for ChannelNotifier {
        fn name(&self) -> &'static str {
            "channel"
        }

        fn send<'a>(&'a self, report: &'a ErrorReport) -> BoxFuture<'a, Result<(), NotifyError>> {
            Box::pin(async move {
                let _ = self.0.send(report.error_id.clone());
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_notification_cooldown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ErrorReporter::new(ErrorConfig::default())
            .with_notifier(Arc::new(ChannelNotifier(tx)));
        let err = AppError::new(ErrorKind::Database, "connection reset");
        let class = classify(&err);
        let start = Instant::now();

        let first = reporter.report_at(&err, class, context("/x"), start);
        let second = reporter.report_at(&err, class, context("/x"), start + Duration::from_secs(60));
        let later = reporter.report_at(&err, class, context("/x"), start + Duration::from_secs(16 * 60));

        assert!(first.notified);
        assert!(!second.notified);
        assert!(later.notified);

        assert_eq!(rx.recv().await.unwrap(), first.error_id);
        assert_eq!(rx.recv().await.unwrap(), first.error_id);
        assert_eq!(reporter.stats().notifications_suppressed, 1);
    }

    #[test]
    fn test_transform_rewrites_message_and_code() {
        let reporter = ErrorReporter::new(ErrorConfig::default())
            .with_message_rule(Rewrite::literal(r"relation \S+ does not exist", "resource unavailable").unwrap())
            .with_code_rule(Rewrite::literal("^PG", "DB").unwrap());
        let err = AppError::new(ErrorKind::Database, "relation artworks does not exist").with_code("PG42P01");
        let shown = reporter.transform(&err);
        assert_eq!(shown.kind, ErrorKind::Database);
        assert_eq!(shown.message, "resource unavailable");
        assert_eq!(shown.code.as_deref(), Some("DB42P01"));
    }

    #[test]
    fn test_filtered_counter() {
        let reporter = ErrorReporter::new(ErrorConfig::default());
        assert!(reporter.is_filtered(404, "/favicon.ico", None));
        assert!(!reporter.is_filtered(404, "/missing", Some("Mozilla/5.0")));
        assert_eq!(reporter.stats().filtered, 1);
    }

    #[test]
    fn test_prune_drops_idle_reports() {
        let reporter = ErrorReporter::new(ErrorConfig::default());
        let err = AppError::validation("x");
        let start = Instant::now();
        reporter.report_at(&err, classify(&err), context("/x"), start);
        let removed = reporter.prune(start + Duration::from_secs(2 * 60 * 60));
        assert!(removed >= 1);
        assert_eq!(reporter.stats().unique_errors, 0);
    }
}
