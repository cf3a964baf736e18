//! Trust-scored adaptive limiter.
//!
//! Each identity carries a trust score in `[0, 100]` that scales its request
//! budget: `limit = floor(base_limit * trust / 50)`. Exceeding the budget
//! inside the current window costs `violation_penalty` trust points. An
//! identity with no violations gains one point every `recovery_interval`
//! requests, capped at 100.
//!
//! This gate runs after, and independently of, the fixed-window limiter.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::AdaptiveConfig;
use crate::security::identity::ClientIdentity;
use crate::store::ExpiringMap;

pub const MAX_TRUST: u8 = 100;

#[derive(Debug, Clone)]
pub struct TrustProfile {
    pub first_seen: Instant,
    pub last_activity: Instant,
    /// Lifetime request count.
    pub request_count: u64,
    pub window_start: Instant,
    pub window_count: u32,
    pub trust_score: u8,
    pub violations: u32,
}

impl TrustProfile {
    fn new(now: Instant, initial_trust: u8) -> Self {
        Self {
            first_seen: now,
            last_activity: now,
            request_count: 0,
            window_start: now,
            window_count: 0,
            trust_score: initial_trust.min(MAX_TRUST),
            violations: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdaptiveVerdict {
    pub allowed: bool,
    pub trust_score: u8,
    pub limit: u32,
    pub window_count: u32,
}

pub struct AdaptiveLimiter {
    config: AdaptiveConfig,
    profiles: ExpiringMap<String, TrustProfile>,
}

impl AdaptiveLimiter {
    pub fn new(config: AdaptiveConfig) -> Self {
        let ttl = Duration::from_secs(config.trust_idle_ttl_secs);
        Self {
            config,
            profiles: ExpiringMap::new(ttl),
        }
    }

    /// Budget for a given trust score.
    pub fn limit_for(&self, trust: u8) -> u32 {
        (u64::from(self.config.base_limit) * u64::from(trust) / 50) as u32
    }

    pub fn check(&self, identity: &ClientIdentity) -> AdaptiveVerdict {
        self.check_at(identity, Instant::now())
    }

    pub fn check_at(&self, identity: &ClientIdentity, now: Instant) -> AdaptiveVerdict {
        let initial = self.config.initial_trust;
        if !self.config.enabled {
            return AdaptiveVerdict {
                allowed: true,
                trust_score: initial,
                limit: self.limit_for(initial),
                window_count: 0,
            };
        }

        let window = Duration::from_secs(self.config.window_secs);
        let penalty = self.config.violation_penalty;
        let interval = self.config.recovery_interval.max(1);

        self.profiles.with_entry_at(
            identity.key(),
            now,
            || TrustProfile::new(now, initial),
            |profile| {
                if now.saturating_duration_since(profile.window_start) >= window {
                    profile.window_start = now;
                    profile.window_count = 0;
                }
                profile.last_activity = now;
                profile.request_count += 1;
                profile.window_count += 1;

                let limit = self.limit_for(profile.trust_score);
                if profile.window_count > limit {
                    profile.violations += 1;
                    profile.trust_score = profile.trust_score.saturating_sub(penalty);
                    tracing::warn!(
                        client = %identity.key(),
                        trust = profile.trust_score,
                        limit,
                        "Adaptive limit exceeded"
                    );
                    return AdaptiveVerdict {
                        allowed: false,
                        trust_score: profile.trust_score,
                        limit,
                        window_count: profile.window_count,
                    };
                }

                if profile.violations == 0 && profile.request_count % interval == 0 {
                    profile.trust_score = (profile.trust_score + 1).min(MAX_TRUST);
                }

                AdaptiveVerdict {
                    allowed: true,
                    trust_score: profile.trust_score,
                    limit,
                    window_count: profile.window_count,
                }
            },
        )
    }

    pub fn profile(&self, identity: &ClientIdentity) -> Option<TrustProfile> {
        self.profiles.get(&identity.key())
    }

    pub fn prune(&self, now: Instant) -> usize {
        self.profiles.prune_at(now)
    }

    pub fn tracked(&self) -> usize {
        self.profiles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(base_limit: u32) -> AdaptiveLimiter {
        AdaptiveLimiter::new(AdaptiveConfig {
            base_limit,
            ..AdaptiveConfig::default()
        })
    }

    #[test]
    fn test_limit_scales_with_trust() {
        let l = limiter(500);
        assert_eq!(l.limit_for(50), 500);
        assert_eq!(l.limit_for(0), 0);
        assert_eq!(l.limit_for(100), 1000);
        assert_eq!(l.limit_for(40), 400);
    }

    #[test]
    fn test_single_violation_costs_ten() {
        let l = limiter(2);
        let id = ClientIdentity::new("10.2.0.1", None);
        let now = Instant::now();
        assert!(l.check_at(&id, now).allowed);
        assert!(l.check_at(&id, now).allowed);

        let denied = l.check_at(&id, now);
        assert!(!denied.allowed);
        assert_eq!(denied.trust_score, 40);
        assert_eq!(l.profile(&id).unwrap().violations, 1);
    }

    #[test]
    fn test_trust_floors_at_zero() {
        let l = limiter(1);
        let id = ClientIdentity::new("10.2.0.2", None);
        let now = Instant::now();
        for _ in 0..20 {
            l.check_at(&id, now);
        }
        assert_eq!(l.profile(&id).unwrap().trust_score, 0);
        assert!(!l.check_at(&id, now).allowed);
    }

    #[test]
    fn test_fifty_clean_requests_add_one() {
        let l = limiter(500);
        let id = ClientIdentity::new("10.2.0.3", None);
        let now = Instant::now();
        for _ in 0..49 {
            l.check_at(&id, now);
        }
        assert_eq!(l.profile(&id).unwrap().trust_score, 50);
        assert_eq!(l.check_at(&id, now).trust_score, 51);
    }

    #[test]
    fn test_trust_caps_at_hundred() {
        let l = AdaptiveLimiter::new(AdaptiveConfig {
            initial_trust: 100,
            recovery_interval: 1,
            ..AdaptiveConfig::default()
        });
        let id = ClientIdentity::new("10.2.0.4", None);
        let now = Instant::now();
        for _ in 0..5 {
            assert_eq!(l.check_at(&id, now).trust_score, 100);
        }
    }

    #[test]
    fn test_no_recovery_after_violation() {
        let l = AdaptiveLimiter::new(AdaptiveConfig {
            base_limit: 2,
            recovery_interval: 4,
            ..AdaptiveConfig::default()
        });
        let id = ClientIdentity::new("10.2.0.5", None);
        let start = Instant::now();
        for _ in 0..3 {
            l.check_at(&id, start);
        }
        let trust_after_violation = l.profile(&id).unwrap().trust_score;
        assert_eq!(trust_after_violation, 40);

        let next_window = start + Duration::from_secs(15 * 60);
        let verdict = l.check_at(&id, next_window);
        assert!(verdict.allowed);
        assert_eq!(verdict.trust_score, trust_after_violation);
    }

    #[test]
    fn test_window_resets_count() {
        let l = limiter(1);
        let id = ClientIdentity::new("10.2.0.6", None);
        let start = Instant::now();
        assert!(l.check_at(&id, start).allowed);
        let later = start + Duration::from_secs(15 * 60);
        let verdict = l.check_at(&id, later);
        assert!(verdict.allowed);
        assert_eq!(verdict.window_count, 1);
    }
}
