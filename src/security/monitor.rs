//! Security event log.
//!
//! # Responsibilities
//! - Record events emitted by admission control, CSRF and transport checks
//! - Keep bounded FIFO rings of recent events and critical alerts
//! - Track blocked and suspicious identities for the stats surface
//! - Flag requests matching known attack patterns (detection only)
//!
//! # Design Decisions
//! - Oldest entries are evicted first once a ring is full
//! - Only `Critical` events enter the alerts ring
//! - Pattern hits are logged, never enforced, at this layer

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    RateLimitExceeded,
    AdaptiveLimitExceeded,
    DdosWarning,
    DdosBlocked,
    CsrfViolation,
    InsecureTransmission,
    MixedContent,
    SuspiciousRequest,
    HostRejected,
    RedirectBlocked,
    IpBlocked,
    ErrorPattern,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::AdaptiveLimitExceeded => "adaptive_limit_exceeded",
            SecurityEventType::DdosWarning => "ddos_warning",
            SecurityEventType::DdosBlocked => "ddos_blocked",
            SecurityEventType::CsrfViolation => "csrf_violation",
            SecurityEventType::InsecureTransmission => "insecure_transmission",
            SecurityEventType::MixedContent => "mixed_content",
            SecurityEventType::SuspiciousRequest => "suspicious_request",
            SecurityEventType::HostRejected => "host_rejected",
            SecurityEventType::RedirectBlocked => "redirect_blocked",
            SecurityEventType::IpBlocked => "ip_blocked",
            SecurityEventType::ErrorPattern => "error_pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Info => "INFO",
            EventSeverity::Warning => "WARNING",
            EventSeverity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub severity: EventSeverity,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedIdentity {
    pub identity: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}

/// Aggregated view for the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStats {
    pub total_events: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub alerts: usize,
    pub blocked_identities: Vec<BlockedIdentity>,
    pub suspicious_identities: usize,
    pub recent: Vec<SecurityEvent>,
}

#[derive(Default)]
struct EventCounts {
    total: u64,
    by_type: BTreeMap<String, u64>,
    by_severity: BTreeMap<String, u64>,
}

static SUSPICIOUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("path_traversal", r"(?i)\.\./|\.\.\\|%2e%2e%2f"),
        ("script_tag", r"(?i)<script"),
        ("sql_union", r"(?is)union.*select"),
        ("eval_call", r"(?i)eval\("),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
    .collect()
});

/// Name of the first attack pattern found in `url` or the serialized `body`.
pub fn detect_suspicious(url: &str, body: Option<&Value>) -> Option<&'static str> {
    let body_text = body.map(|b| b.to_string());
    SUSPICIOUS_PATTERNS.iter().find_map(|(name, re)| {
        let hit = re.is_match(url) || body_text.as_deref().map(|b| re.is_match(b)).unwrap_or(false);
        hit.then_some(*name)
    })
}

pub struct SecurityMonitor {
    config: MonitorConfig,
    events: Mutex<VecDeque<SecurityEvent>>,
    alerts: Mutex<VecDeque<SecurityEvent>>,
    counts: Mutex<EventCounts>,
    blocked: DashMap<String, BlockedIdentity>,
    suspicious: DashMap<String, u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn push_bounded(ring: &mut VecDeque<SecurityEvent>, event: SecurityEvent, cap: usize) {
    while ring.len() >= cap {
        ring.pop_front();
    }
    ring.push_back(event);
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            alerts: Mutex::new(VecDeque::new()),
            counts: Mutex::new(EventCounts::default()),
            blocked: DashMap::new(),
            suspicious: DashMap::new(),
        }
    }

    /// Append an event. Critical events are also copied to the alerts ring.
    pub fn record(
        &self,
        event_type: SecurityEventType,
        severity: EventSeverity,
        data: Value,
    ) -> SecurityEvent {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            event_type,
            severity,
            data,
            timestamp: Utc::now(),
        };

        match severity {
            EventSeverity::Critical => {
                tracing::error!(event = event_type.as_str(), data = %event.data, "Security alert")
            }
            EventSeverity::Warning => {
                tracing::warn!(event = event_type.as_str(), data = %event.data, "Security event")
            }
            EventSeverity::Info => {
                tracing::info!(event = event_type.as_str(), data = %event.data, "Security event")
            }
        }
        metrics::record_security_event(event_type.as_str(), severity.as_str());

        {
            let mut counts = lock(&self.counts);
            counts.total += 1;
            *counts.by_type.entry(event_type.as_str().to_string()).or_default() += 1;
            *counts.by_severity.entry(severity.as_str().to_string()).or_default() += 1;
        }

        if severity == EventSeverity::Critical {
            push_bounded(&mut lock(&self.alerts), event.clone(), self.config.max_alerts);
        }
        push_bounded(&mut lock(&self.events), event.clone(), self.config.max_events);
        event
    }

    /// Record a block-worthy event and refuse the identity from now on.
    pub fn block_ip(&self, identity: &str, reason: &str) {
        self.record(
            SecurityEventType::IpBlocked,
            EventSeverity::Critical,
            json!({ "identity": identity, "reason": reason }),
        );
        self.blocked.insert(
            identity.to_string(),
            BlockedIdentity {
                identity: identity.to_string(),
                reason: reason.to_string(),
                blocked_at: Utc::now(),
            },
        );
        metrics::record_blocked_identities(self.blocked.len());
    }

    pub fn unblock(&self, identity: &str) -> bool {
        let removed = self.blocked.remove(identity).is_some();
        metrics::record_blocked_identities(self.blocked.len());
        removed
    }

    pub fn is_blocked(&self, identity: &str) -> bool {
        self.blocked.contains_key(identity)
    }

    pub fn mark_suspicious(&self, identity: &str) {
        *self.suspicious.entry(identity.to_string()).or_insert(0) += 1;
    }

    pub fn is_suspicious(&self, identity: &str) -> bool {
        self.suspicious.contains_key(identity)
    }

    /// Passive inspection. Logs a `SuspiciousRequest` event on a pattern hit.
    pub fn inspect_request(
        &self,
        identity: &str,
        method: &str,
        url: &str,
        body: Option<&Value>,
    ) -> Option<&'static str> {
        let pattern = detect_suspicious(url, body)?;
        self.mark_suspicious(identity);
        self.record(
            SecurityEventType::SuspiciousRequest,
            EventSeverity::Warning,
            json!({ "identity": identity, "method": method, "url": url, "pattern": pattern }),
        );
        Some(pattern)
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        lock(&self.events).iter().rev().take(limit).cloned().collect()
    }

    /// Critical alerts, newest first.
    pub fn alerts(&self) -> Vec<SecurityEvent> {
        lock(&self.alerts).iter().rev().cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn stats(&self) -> SecurityStats {
        let counts = lock(&self.counts);
        let mut blocked: Vec<BlockedIdentity> =
            self.blocked.iter().map(|r| r.value().clone()).collect();
        blocked.sort_by(|a, b| a.blocked_at.cmp(&b.blocked_at));
        SecurityStats {
            total_events: counts.total,
            by_type: counts.by_type.clone(),
            by_severity: counts.by_severity.clone(),
            alerts: lock(&self.alerts).len(),
            blocked_identities: blocked,
            suspicious_identities: self.suspicious.len(),
            recent: self.recent_events(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(max_events: usize, max_alerts: usize) -> SecurityMonitor {
        SecurityMonitor::new(MonitorConfig {
            max_events,
            max_alerts,
        })
    }

    #[test]
    fn test_event_ring_evicts_oldest() {
        let m = monitor(3, 2);
        for i in 0..5 {
            m.record(SecurityEventType::SuspiciousRequest, EventSeverity::Info, json!({ "n": i }));
        }
        let recent = m.recent_events(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].data["n"], 4);
        assert_eq!(recent[2].data["n"], 2);
        assert_eq!(m.stats().total_events, 5);
    }

    #[test]
    fn test_only_critical_events_become_alerts() {
        let m = monitor(10, 2);
        m.record(SecurityEventType::DdosWarning, EventSeverity::Warning, Value::Null);
        for _ in 0..3 {
            m.record(SecurityEventType::DdosBlocked, EventSeverity::Critical, Value::Null);
        }
        assert_eq!(m.alerts().len(), 2);
        assert!(m.alerts().iter().all(|e| e.severity == EventSeverity::Critical));
    }

    #[test]
    fn test_block_ip_records_event_and_blocks() {
        let m = monitor(10, 10);
        m.block_ip("ip:10.0.0.1", "manual");

        assert!(m.is_blocked("ip:10.0.0.1"));
        let stats = m.stats();
        assert_eq!(stats.blocked_identities.len(), 1);
        assert_eq!(stats.blocked_identities[0].reason, "manual");
        assert_eq!(stats.by_type.get("ip_blocked"), Some(&1));
        assert_eq!(stats.alerts, 1);

        assert!(m.unblock("ip:10.0.0.1"));
        assert!(!m.is_blocked("ip:10.0.0.1"));
    }

    #[test]
    fn test_detects_attack_patterns() {
        assert_eq!(detect_suspicious("/files/../../etc/passwd", None), Some("path_traversal"));
        assert_eq!(
            detect_suspicious("/search?q=1 UNION ALL SELECT password", None),
            Some("sql_union")
        );
        let body = json!({ "bio": "<SCRIPT>alert(1)</SCRIPT>" });
        assert_eq!(detect_suspicious("/profile", Some(&body)), Some("script_tag"));
        assert_eq!(detect_suspicious("/run?x=eval(1)", None), Some("eval_call"));
        assert_eq!(detect_suspicious("/artworks/42", Some(&json!({ "title": "Sunset" }))), None);
    }

    #[test]
    fn test_inspect_request_logs_without_blocking() {
        let m = monitor(10, 10);
        let hit = m.inspect_request("ip:1.2.3.4", "GET", "/a/../b", None);
        assert_eq!(hit, Some("path_traversal"));
        assert!(m.is_suspicious("ip:1.2.3.4"));
        assert!(!m.is_blocked("ip:1.2.3.4"));
        assert_eq!(m.event_count(), 1);
    }
}
