//! Rate limit windows, quotas and decisions.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};

use super::fingerprint::Fingerprint;
use crate::error::GatewayError;
use crate::store::CounterState;

/// The two limiting tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Short window catching bursts
    Burst,
    /// Longer window bounding sustained traffic
    Sustained,
}

impl Tier {
    /// Prefix of the counter key for this tier.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Tier::Burst => "burst:",
            Tier::Sustained => "rate:",
        }
    }
}

/// A fixed window with its hit budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Which tier this window implements
    pub tier: Tier,
    /// Maximum hits admitted per window
    pub limit: u64,
    /// Length of the window, anchored at the first hit
    pub window: Duration,
}

impl WindowSpec {
    /// Create a new window specification.
    pub fn new(tier: Tier, limit: u64, window: Duration) -> Self {
        Self {
            tier,
            limit,
            window,
        }
    }

    /// Counter key for a fingerprint in this tier.
    pub fn key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}{}", self.tier.key_prefix(), fingerprint.to_key())
    }

    /// Whether the post-increment state is over budget.
    pub fn exceeded(&self, state: &CounterState) -> bool {
        state.count > self.limit
    }

    /// Quota hints derived from a counter state.
    pub fn quota(&self, state: &CounterState, now: DateTime<Utc>) -> Quota {
        let reset_after = state.remaining_ttl(now);
        // Round up so clients never retry a fraction of a second early.
        let reset_after_secs = reset_after.as_secs() + u64::from(reset_after.subsec_nanos() > 0);
        Quota {
            limit: self.limit,
            remaining: self.limit.saturating_sub(state.count),
            reset_at: state.expires_at,
            reset_after_secs,
        }
    }
}

/// Informational quota attached to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Hit budget of the window
    pub limit: u64,
    /// Hits left in the window
    pub remaining: u64,
    /// When the window closes
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window closes
    pub reset_after_secs: u64,
}

impl Quota {
    /// Write `RateLimit-Limit`, `RateLimit-Remaining` and `RateLimit-Reset`.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        headers.insert("ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("ratelimit-reset", HeaderValue::from(self.reset_after_secs));
    }
}

/// Why the limiter refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyKind {
    /// Burst window budget spent
    BurstExceeded(Quota),
    /// Sustained window budget spent
    RateExceeded(Quota),
    /// Counter store failed and the limiter fails closed
    Unavailable,
}

impl From<DenyKind> for GatewayError {
    fn from(kind: DenyKind) -> Self {
        match kind {
            DenyKind::BurstExceeded(quota) => GatewayError::BurstExceeded(quota),
            DenyKind::RateExceeded(quota) => GatewayError::RateExceeded(quota),
            DenyKind::Unavailable => GatewayError::Unavailable,
        }
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted. The quota is absent when the store failed and the limiter failed open.
    Admit(Option<Quota>),
    /// Refused.
    Deny(DenyKind),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(count: u64, secs: i64, now: DateTime<Utc>) -> CounterState {
        CounterState {
            count,
            expires_at: now + chrono::Duration::seconds(secs),
        }
    }

    #[test]
    fn test_tier_keys() {
        let fp = Fingerprint::new("1.2.3.4", "ua");
        let burst = WindowSpec::new(Tier::Burst, 10, Duration::from_secs(10));
        let sustained = WindowSpec::new(Tier::Sustained, 100, Duration::from_secs(65));

        assert_eq!(burst.key(&fp), "burst:1.2.3.4::ua");
        assert_eq!(sustained.key(&fp), "rate:1.2.3.4::ua");
    }

    #[test]
    fn test_exceeded_is_strictly_over_limit() {
        let now = Utc::now();
        let window = WindowSpec::new(Tier::Burst, 10, Duration::from_secs(10));

        assert!(!window.exceeded(&state(10, 5, now)));
        assert!(window.exceeded(&state(11, 5, now)));
    }

    #[test]
    fn test_quota_remaining_saturates() {
        let now = Utc::now();
        let window = WindowSpec::new(Tier::Sustained, 100, Duration::from_secs(65));

        let quota = window.quota(&state(40, 30, now), now);
        assert_eq!(quota.limit, 100);
        assert_eq!(quota.remaining, 60);
        assert_eq!(quota.reset_after_secs, 30);

        let quota = window.quota(&state(150, 30, now), now);
        assert_eq!(quota.remaining, 0);
    }

    #[test]
    fn test_quota_reset_rounds_up() {
        let now = Utc::now();
        let window = WindowSpec::new(Tier::Sustained, 5, Duration::from_secs(65));
        let st = CounterState {
            count: 1,
            expires_at: now + chrono::Duration::milliseconds(1500),
        };
        assert_eq!(window.quota(&st, now).reset_after_secs, 2);
    }
}
