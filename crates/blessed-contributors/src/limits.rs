//! Anti-gaming enforcement at the submission boundary: per-contributor
//! token-bucket rate limits and cross-contributor duplicate-payload
//! detection within a sliding window.
//!
//! Both take the current time as an argument rather than reading a clock,
//! so the ingress boundary owns time and tests drive it explicitly.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use blessed_store_core::canonical::canonical_value_bytes;
use blessed_types::Role;

use crate::ContributorError;

//─────────────────────────────
//  Rate limiting
//─────────────────────────────

/// Token-bucket parameters for one contributor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum burst size.
    pub capacity: f64,
    /// Sustained refill rate, tokens per minute.
    pub refill_per_minute: f64,
}

impl RateLimitConfig {
    /// Per-role submission limits; testers are deliberately tight.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Operator => Self {
                capacity: 120.0,
                refill_per_minute: 60.0,
            },
            Role::Agent | Role::Curator => Self {
                capacity: 60.0,
                refill_per_minute: 30.0,
            },
            Role::Tester => Self {
                capacity: 5.0,
                refill_per_minute: 1.0,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Per-contributor token buckets.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    /// Fresh limiter with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token for `contributor_id`, or report how long until one
    /// is available.
    pub fn check(
        &self,
        contributor_id: &str,
        config: RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<(), ContributorError> {
        let mut bucket = self
            .buckets
            .entry(contributor_id.to_string())
            .or_insert_with(|| Bucket {
                tokens: config.capacity,
                last_refill: now,
            });

        let elapsed_secs = (now - bucket.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed_secs * config.refill_per_minute / 60.0)
            .min(config.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after_secs = (deficit * 60.0 / config.refill_per_minute).ceil() as u64;
            Err(ContributorError::RateLimited { retry_after_secs })
        }
    }
}

//─────────────────────────────
//  Duplicate-payload detection
//─────────────────────────────

#[derive(Debug, Clone)]
struct Seen {
    contributor_id: String,
    attribution_id: String,
    at: DateTime<Utc>,
}

/// Sliding-window detector for identical payloads across contributors.
///
/// A contributor resubmitting its own payload is the dedupe key's problem;
/// this detector only flags a payload that *another* contributor already
/// submitted inside the window.
#[derive(Debug)]
pub struct DuplicateDetector {
    window: Duration,
    seen: DashMap<String, Seen>,
}

impl DuplicateDetector {
    /// Detector with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: DashMap::new(),
        }
    }

    /// Record a submission and return the attribution id of the original
    /// when the payload clones another contributor's recent submission.
    pub fn observe(
        &self,
        contributor_id: &str,
        attribution_id: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let fingerprint = match canonical_value_bytes(payload) {
            Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
            Err(_) => return None,
        };

        if let Some(existing) = self.seen.get(&fingerprint) {
            let fresh = now - existing.at <= self.window;
            if fresh && existing.contributor_id != contributor_id {
                return Some(existing.attribution_id.clone());
            }
        }
        self.seen.insert(
            fingerprint,
            Seen {
                contributor_id: contributor_id.to_string(),
                attribution_id: attribution_id.to_string(),
                at: now,
            },
        );
        None
    }

    /// Drop entries older than the window; called opportunistically.
    pub fn evict_expired(&self, now: DateTime<Utc>) {
        self.seen.retain(|_, seen| now - seen.at <= self.window);
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(Duration::minutes(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn burst_then_limited_then_refilled() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::for_role(Role::Tester);

        for _ in 0..5 {
            limiter.check("c1", config, t0()).unwrap();
        }
        let err = limiter.check("c1", config, t0()).unwrap_err();
        assert!(matches!(err, ContributorError::RateLimited { .. }));

        // One token per minute: a minute later exactly one fits.
        let later = t0() + Duration::minutes(1);
        limiter.check("c1", config, later).unwrap();
        assert!(limiter.check("c1", config, later).is_err());
    }

    #[test]
    fn buckets_are_per_contributor() {
        let limiter = RateLimiter::new();
        let config = RateLimitConfig::for_role(Role::Tester);
        for _ in 0..5 {
            limiter.check("c1", config, t0()).unwrap();
        }
        assert!(limiter.check("c1", config, t0()).is_err());
        assert!(limiter.check("c2", config, t0()).is_ok());
    }

    #[test]
    fn cross_contributor_duplicate_flagged() {
        let detector = DuplicateDetector::new(Duration::minutes(10));
        let payload = json!({"asset": "BTC", "rsi": 24.1});

        assert!(detector.observe("c1", "a1", &payload, t0()).is_none());
        let hit = detector.observe("c2", "a2", &payload, t0() + Duration::minutes(1));
        assert_eq!(hit.as_deref(), Some("a1"));
    }

    #[test]
    fn own_resubmission_not_flagged() {
        let detector = DuplicateDetector::new(Duration::minutes(10));
        let payload = json!({"asset": "BTC", "rsi": 24.1});
        assert!(detector.observe("c1", "a1", &payload, t0()).is_none());
        assert!(detector
            .observe("c1", "a2", &payload, t0() + Duration::minutes(1))
            .is_none());
    }

    #[test]
    fn stale_originals_fall_out_of_the_window() {
        let detector = DuplicateDetector::new(Duration::minutes(10));
        let payload = json!({"asset": "BTC", "rsi": 24.1});
        assert!(detector.observe("c1", "a1", &payload, t0()).is_none());
        let hit = detector.observe("c2", "a2", &payload, t0() + Duration::minutes(30));
        assert!(hit.is_none());
    }

    #[test]
    fn key_order_does_not_defeat_detection() {
        let detector = DuplicateDetector::new(Duration::minutes(10));
        let a = json!({"asset": "BTC", "rsi": 24.1});
        let b = json!({"rsi": 24.1, "asset": "BTC"});
        assert!(detector.observe("c1", "a1", &a, t0()).is_none());
        assert!(detector.observe("c2", "a2", &b, t0()).is_some());
    }
}
