//! Per-IP burst detection.
//!
//! A sliding window of request timestamps per IP, independent of the
//! route-class windows. Two tiers:
//! - more than `warn_threshold` in the window: warning event, request allowed
//! - more than `block_threshold`: critical event, identity marked suspicious,
//!   request rejected

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::config::DdosConfig;
use crate::observability::metrics;
use crate::security::identity::ClientIdentity;
use crate::security::monitor::{EventSeverity, SecurityEventType, SecurityMonitor};
use crate::store::{ExpiringMap, RateWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DdosTier {
    Normal,
    Warning,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdosVerdict {
    pub blocked: bool,
    pub tier: DdosTier,
    pub count: u32,
}

pub struct DdosDetector {
    config: DdosConfig,
    windows: ExpiringMap<String, RateWindow>,
    monitor: Arc<SecurityMonitor>,
}

impl DdosDetector {
    pub fn new(config: DdosConfig, monitor: Arc<SecurityMonitor>) -> Self {
        let window = Duration::from_secs(config.window_secs);
        Self {
            config,
            windows: ExpiringMap::new(window),
            monitor,
        }
    }

    pub fn inspect(&self, identity: &ClientIdentity) -> DdosVerdict {
        self.inspect_at(identity, Instant::now())
    }

    pub fn inspect_at(&self, identity: &ClientIdentity, now: Instant) -> DdosVerdict {
        if !self.config.enabled {
            return DdosVerdict {
                blocked: false,
                tier: DdosTier::Normal,
                count: 0,
            };
        }

        let window = Duration::from_secs(self.config.window_secs);
        let count = self.windows.with_entry_at(
            identity.ip().to_string(),
            now,
            || RateWindow::new(window),
            |w| w.record(now),
        );

        let tier = if count > self.config.block_threshold {
            DdosTier::Blocked
        } else if count > self.config.warn_threshold {
            DdosTier::Warning
        } else {
            DdosTier::Normal
        };

        match tier {
            DdosTier::Blocked => {
                self.monitor.mark_suspicious(&identity.key());
                self.monitor.record(
                    SecurityEventType::DdosBlocked,
                    EventSeverity::Critical,
                    json!({ "ip": identity.ip(), "count": count, "windowSecs": self.config.window_secs }),
                );
                metrics::record_ddos_event("blocked");
            }
            DdosTier::Warning => {
                self.monitor.record(
                    SecurityEventType::DdosWarning,
                    EventSeverity::Warning,
                    json!({ "ip": identity.ip(), "count": count, "windowSecs": self.config.window_secs }),
                );
                metrics::record_ddos_event("warning");
            }
            DdosTier::Normal => {}
        }

        DdosVerdict {
            blocked: tier == DdosTier::Blocked,
            tier,
            count,
        }
    }

    pub fn prune(&self, now: Instant) -> usize {
        self.windows.prune_at(now)
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    fn detector() -> (DdosDetector, Arc<SecurityMonitor>) {
        let monitor = Arc::new(SecurityMonitor::new(MonitorConfig::default()));
        (DdosDetector::new(DdosConfig::default(), monitor.clone()), monitor)
    }

    #[test]
    fn test_fifty_requests_emit_nothing() {
        let (d, monitor) = detector();
        let id = ClientIdentity::new("10.1.1.1", None);
        let now = Instant::now();
        for _ in 0..50 {
            assert_eq!(d.inspect_at(&id, now).tier, DdosTier::Normal);
        }
        assert_eq!(monitor.event_count(), 0);
    }

    #[test]
    fn test_warning_tier_allows() {
        let (d, monitor) = detector();
        let id = ClientIdentity::new("10.1.1.2", None);
        let now = Instant::now();
        let verdicts: Vec<DdosVerdict> = (0..100).map(|_| d.inspect_at(&id, now)).collect();

        assert!(verdicts.iter().all(|v| !v.blocked));
        assert_eq!(verdicts[50].tier, DdosTier::Warning);
        assert_eq!(verdicts[99].tier, DdosTier::Warning);
        assert_eq!(monitor.stats().by_type.get("ddos_warning"), Some(&50));
    }

    #[test]
    fn test_hundred_and_first_request_blocked() {
        let (d, monitor) = detector();
        let id = ClientIdentity::new("10.1.1.3", None);
        let now = Instant::now();
        for _ in 0..100 {
            d.inspect_at(&id, now);
        }
        let verdict = d.inspect_at(&id, now);
        assert!(verdict.blocked);
        assert_eq!(verdict.count, 101);
        assert!(monitor.is_suspicious("ip:10.1.1.3"));
        assert_eq!(monitor.alerts().len(), 1);
    }

    #[test]
    fn test_window_slides() {
        let (d, _) = detector();
        let id = ClientIdentity::new("10.1.1.4", None);
        let start = Instant::now();
        for _ in 0..60 {
            d.inspect_at(&id, start);
        }
        let later = start + Duration::from_secs(61);
        let verdict = d.inspect_at(&id, later);
        assert_eq!(verdict.count, 1);
        assert_eq!(verdict.tier, DdosTier::Normal);
    }

    #[test]
    fn test_keyed_by_ip_not_user() {
        let (d, _) = detector();
        let now = Instant::now();
        d.inspect_at(&ClientIdentity::new("10.1.1.5", Some("1".into())), now);
        let v = d.inspect_at(&ClientIdentity::new("10.1.1.5", Some("2".into())), now);
        assert_eq!(v.count, 2);
    }
}
