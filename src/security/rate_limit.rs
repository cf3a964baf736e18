//! Fixed-window rate limiting per route class.
//!
//! # Responsibilities
//! - Resolve the route class of a request path
//! - Admit or reject per `(identity, class)` sliding window
//! - Keep global counters shared with the DDoS and adaptive layers
//!
//! # Design Decisions
//! - Windows live in a swappable `RateStore`; the in-memory store is the
//!   default and is correct for a single process only
//! - Allow-listed identities bypass every check
//! - Rejections report `Retry-After = ceil(window / 1s)`

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{ClassPrefix, RateLimitConfig, RouteClass};
use crate::security::identity::ClientIdentity;
use crate::store::{MemoryRateStore, RateStore};

/// Which admission layer rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    RateLimit,
    Ddos,
    Adaptive,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::RateLimit => "rate_limit",
            AttackType::Ddos => "ddos",
            AttackType::Adaptive => "adaptive",
        }
    }
}

/// Outcome of a fixed-window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub class: RouteClass,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
    pub retry_after_secs: u64,
    /// Timestamp recorded in the window, for refunds.
    pub recorded_at: Option<Instant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offender {
    pub identity: String,
    pub blocked: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub blocked_by_class: BTreeMap<String, u64>,
    pub attack_types: BTreeMap<String, u64>,
    pub suspicious_identities: usize,
    pub tracked_windows: usize,
    pub tracked_profiles: usize,
    pub top_offenders: Vec<Offender>,
}

#[derive(Default)]
struct RateCounters {
    total: u64,
    blocked: u64,
    by_class: BTreeMap<RouteClass, u64>,
    attack_types: BTreeMap<AttackType, u64>,
    offenders: HashMap<String, u64>,
}

pub struct RateLimitEngine {
    config: RateLimitConfig,
    store: Arc<dyn RateStore>,
    prefixes: Vec<ClassPrefix>,
    counters: Mutex<RateCounters>,
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

impl RateLimitEngine {
    pub fn new(config: RateLimitConfig) -> Self {
        let store = Arc::new(MemoryRateStore::new(Duration::from_secs(config.idle_ttl_secs)));
        Self::with_store(config, store)
    }

    /// Use an external store (e.g. shared across instances).
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn RateStore>) -> Self {
        let mut prefixes = config.class_prefixes.clone();
        prefixes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self {
            config,
            store,
            prefixes,
            counters: Mutex::new(RateCounters::default()),
        }
    }

    fn counters(&self) -> MutexGuard<'_, RateCounters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Longest matching prefix wins; unmatched paths are `General`.
    pub fn classify(&self, path: &str) -> RouteClass {
        self.prefixes
            .iter()
            .find(|p| path.starts_with(&p.prefix))
            .map(|p| p.class)
            .unwrap_or(RouteClass::General)
    }

    pub fn is_allow_listed(&self, identity: &ClientIdentity) -> bool {
        identity.matches_any(&self.config.allow_list)
    }

    /// Count one inbound request.
    pub fn note_request(&self) {
        self.counters().total += 1;
    }

    pub fn admit(&self, identity: &ClientIdentity, class: RouteClass) -> Admission {
        self.admit_at(identity, class, Instant::now())
    }

    pub fn admit_at(&self, identity: &ClientIdentity, class: RouteClass, now: Instant) -> Admission {
        let policy = self.config.classes.get(class);
        let retry_after_secs = ceil_secs(policy.window_ms);

        if !self.config.enabled || self.is_allow_listed(identity) {
            return Admission {
                allowed: true,
                class,
                limit: policy.max,
                remaining: policy.max,
                reset_secs: 0,
                retry_after_secs: 0,
                recorded_at: None,
            };
        }

        let key = format!("{}|{}", identity.key(), class.as_str());
        let state = self
            .store
            .hit(&key, Duration::from_millis(policy.window_ms), policy.max, now);

        if !state.admitted {
            self.record_block(AttackType::RateLimit, &identity.key(), Some(class));
            tracing::warn!(
                client = %identity.key(),
                class = class.as_str(),
                limit = policy.max,
                "Rate limit exceeded"
            );
        }

        Admission {
            allowed: state.admitted,
            class,
            limit: policy.max,
            remaining: policy.max.saturating_sub(state.count),
            reset_secs: state.reset_in.as_secs_f64().ceil() as u64,
            retry_after_secs,
            recorded_at: state.admitted.then_some(now),
        }
    }

    /// Give back an admitted hit (successful auth requests).
    pub fn refund(&self, identity: &ClientIdentity, class: RouteClass, at: Instant) {
        let key = format!("{}|{}", identity.key(), class.as_str());
        self.store.refund(&key, at);
    }

    /// True when responses of this class with status < 400 are refunded.
    pub fn skips_successful(&self, class: RouteClass) -> bool {
        self.config.classes.get(class).skip_successful_requests
    }

    /// Count a rejection from any admission layer.
    pub fn record_block(&self, attack: AttackType, identity_key: &str, class: Option<RouteClass>) {
        let mut counters = self.counters();
        counters.blocked += 1;
        *counters.attack_types.entry(attack).or_default() += 1;
        if let Some(class) = class {
            *counters.by_class.entry(class).or_default() += 1;
        }
        *counters.offenders.entry(identity_key.to_string()).or_default() += 1;
    }

    pub fn prune(&self, now: Instant) -> usize {
        self.store.prune(now)
    }

    pub fn tracked_windows(&self) -> usize {
        self.store.tracked()
    }

    pub fn stats(&self) -> RateLimitStats {
        let counters = self.counters();
        let mut offenders: Vec<Offender> = counters
            .offenders
            .iter()
            .map(|(identity, blocked)| Offender {
                identity: identity.clone(),
                blocked: *blocked,
            })
            .collect();
        offenders.sort_by(|a, b| b.blocked.cmp(&a.blocked).then_with(|| a.identity.cmp(&b.identity)));
        offenders.truncate(10);

        RateLimitStats {
            total_requests: counters.total,
            blocked_requests: counters.blocked,
            blocked_by_class: counters
                .by_class
                .iter()
                .map(|(class, n)| (class.as_str().to_string(), *n))
                .collect(),
            attack_types: counters
                .attack_types
                .iter()
                .map(|(attack, n)| (attack.as_str().to_string(), *n))
                .collect(),
            suspicious_identities: counters.offenders.len(),
            tracked_windows: self.store.tracked(),
            tracked_profiles: 0,
            top_offenders: offenders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassPolicy;

    fn engine_with_general(window_ms: u64, max: u32) -> RateLimitEngine {
        let mut config = RateLimitConfig::default();
        config.classes.general = ClassPolicy {
            window_ms,
            max,
            skip_successful_requests: false,
        };
        RateLimitEngine::new(config)
    }

    fn client(ip: &str) -> ClientIdentity {
        ClientIdentity::new(ip, None)
    }

    #[test]
    fn test_window_admits_three_then_rejects() {
        let engine = engine_with_general(1000, 3);
        let id = client("10.0.0.1");
        let now = Instant::now();

        let allowed: Vec<bool> = (0..4)
            .map(|_| engine.admit_at(&id, RouteClass::General, now).allowed)
            .collect();
        assert_eq!(allowed, vec![true, true, true, false]);

        let later = now + Duration::from_millis(1001);
        assert!(engine.admit_at(&id, RouteClass::General, later).allowed);
    }

    #[test]
    fn test_rejection_reports_retry_after() {
        let engine = engine_with_general(1500, 1);
        let id = client("10.0.0.2");
        let now = Instant::now();
        engine.admit_at(&id, RouteClass::General, now);
        let rejected = engine.admit_at(&id, RouteClass::General, now);

        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after_secs, 2);
        assert_eq!(rejected.remaining, 0);
        assert!(rejected.recorded_at.is_none());
    }

    #[test]
    fn test_classes_are_independent() {
        let engine = RateLimitEngine::new(RateLimitConfig::default());
        let id = client("10.0.0.3");
        let now = Instant::now();

        for _ in 0..3 {
            assert!(engine.admit_at(&id, RouteClass::PasswordReset, now).allowed);
        }
        assert!(!engine.admit_at(&id, RouteClass::PasswordReset, now).allowed);
        assert!(engine.admit_at(&id, RouteClass::General, now).allowed);
    }

    #[test]
    fn test_allow_list_bypasses() {
        let mut config = RateLimitConfig::default();
        config.classes.general.max = 1;
        config.allow_list = vec!["10.0.0.9".to_string()];
        let engine = RateLimitEngine::new(config);
        let id = client("10.0.0.9");
        for _ in 0..5 {
            assert!(engine.admit(&id, RouteClass::General).allowed);
        }
        assert_eq!(engine.stats().blocked_requests, 0);
    }

    #[test]
    fn test_refund_restores_budget() {
        let mut config = RateLimitConfig::default();
        config.classes.auth.max = 1;
        let engine = RateLimitEngine::new(config);
        let id = client("10.0.0.4");
        let now = Instant::now();

        let first = engine.admit_at(&id, RouteClass::Auth, now);
        assert!(first.allowed);
        engine.refund(&id, RouteClass::Auth, first.recorded_at.unwrap());
        assert!(engine.admit_at(&id, RouteClass::Auth, now).allowed);
        assert!(engine.skips_successful(RouteClass::Auth));
    }

    #[test]
    fn test_classify_prefers_longest_prefix() {
        let engine = RateLimitEngine::new(RateLimitConfig::default());
        assert_eq!(engine.classify("/api/artworks"), RouteClass::Api);
        assert_eq!(engine.classify("/api/search?q=x"), RouteClass::Search);
        assert_eq!(engine.classify("/user/login"), RouteClass::Auth);
        assert_eq!(engine.classify("/user/password/reset"), RouteClass::PasswordReset);
        assert_eq!(engine.classify("/static/app.css"), RouteClass::StaticAssets);
        assert_eq!(engine.classify("/exhibitions"), RouteClass::General);
    }

    #[test]
    fn test_stats_track_blocks() {
        let engine = engine_with_general(60_000, 1);
        let id = client("10.0.0.5");
        let now = Instant::now();
        engine.note_request();
        engine.admit_at(&id, RouteClass::General, now);
        engine.note_request();
        engine.admit_at(&id, RouteClass::General, now);

        let stats = engine.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.blocked_requests, 1);
        assert_eq!(stats.blocked_by_class.get("general"), Some(&1));
        assert_eq!(stats.attack_types.get("rate_limit"), Some(&1));
        assert_eq!(stats.top_offenders[0].identity, "ip:10.0.0.5");
    }
}
