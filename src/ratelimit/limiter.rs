//! Two-tier fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use super::fingerprint::Fingerprint;
use super::window::{Decision, DenyKind, Tier, WindowSpec};
use crate::config::RateLimitingConfig;
use crate::store::{CounterStore, StoreError};

/// What the limiter does when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and log the failure.
    #[default]
    Open,
    /// Deny the request with 503.
    Closed,
}

/// Burst + sustained limiter over a shared [`CounterStore`].
///
/// The burst tier is charged first; the sustained tier is only charged when the
/// burst tier passes. A burst charge is never refunded when the sustained tier
/// denies. Both windows are fixed: a client may see up to twice the limit across
/// a window boundary.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    burst: WindowSpec,
    sustained: WindowSpec,
    failure_policy: FailurePolicy,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    pub fn new(store: Arc<dyn CounterStore>, config: &RateLimitingConfig) -> Self {
        Self::with_windows(
            store,
            WindowSpec::new(
                Tier::Burst,
                config.burst_limit,
                Duration::from_secs(config.burst_window_secs),
            ),
            WindowSpec::new(
                Tier::Sustained,
                config.sustained_limit,
                Duration::from_secs(config.sustained_window_secs),
            ),
            config.failure_policy,
        )
    }

    /// Create a limiter with explicit windows.
    pub fn with_windows(
        store: Arc<dyn CounterStore>,
        burst: WindowSpec,
        sustained: WindowSpec,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            burst,
            sustained,
            failure_policy,
        }
    }

    /// Charge one hit to both tiers and decide.
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub async fn admit(&self, fingerprint: &Fingerprint) -> Decision {
        let burst_state = match self
            .store
            .increment(&self.burst.key(fingerprint), self.burst.window)
            .await
        {
            Ok(state) => state,
            Err(e) => return self.on_store_failure(Tier::Burst, e),
        };

        if self.burst.exceeded(&burst_state) {
            debug!(
                count = burst_state.count,
                limit = self.burst.limit,
                "Burst limit exceeded"
            );
            return Decision::Deny(DenyKind::BurstExceeded(
                self.burst.quota(&burst_state, Utc::now()),
            ));
        }

        let sustained_state = match self
            .store
            .increment(&self.sustained.key(fingerprint), self.sustained.window)
            .await
        {
            Ok(state) => state,
            Err(e) => return self.on_store_failure(Tier::Sustained, e),
        };

        let quota = self.sustained.quota(&sustained_state, Utc::now());

        if self.sustained.exceeded(&sustained_state) {
            debug!(
                count = sustained_state.count,
                limit = self.sustained.limit,
                "Sustained rate limit exceeded"
            );
            return Decision::Deny(DenyKind::RateExceeded(quota));
        }

        trace!(remaining = quota.remaining, "Request admitted");
        Decision::Admit(Some(quota))
    }

    /// Give back the sustained-tier hit of a request that failed downstream validation.
    pub async fn refund(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.store
            .decrement(&self.sustained.key(fingerprint))
            .await
    }

    /// Clear both tiers for a fingerprint.
    pub async fn reset(&self, fingerprint: &Fingerprint) -> Result<(), StoreError> {
        self.store.reset_key(&self.burst.key(fingerprint)).await?;
        self.store
            .reset_key(&self.sustained.key(fingerprint))
            .await
    }

    /// The burst window in use.
    pub fn burst(&self) -> &WindowSpec {
        &self.burst
    }

    /// The sustained window in use.
    pub fn sustained(&self) -> &WindowSpec {
        &self.sustained
    }

    /// The configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    fn on_store_failure(&self, tier: Tier, error: StoreError) -> Decision {
        match self.failure_policy {
            FailurePolicy::Open => {
                warn!(
                    tier = ?tier,
                    backend = self.store.backend_name(),
                    error = %error,
                    "Counter store unavailable, failing open"
                );
                Decision::Admit(None)
            }
            FailurePolicy::Closed => {
                warn!(
                    tier = ?tier,
                    backend = self.store.backend_name(),
                    error = %error,
                    "Counter store unavailable, failing closed"
                );
                Decision::Deny(DenyKind::Unavailable)
            }
        }
    }
}
