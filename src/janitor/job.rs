//! Object and counter sweeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::JanitorConfig;
use crate::objects::{ExpiryIndex, ObjectStore, ObjectStoreError};
use crate::store::{ttl_delta, CounterStore, StoreError};

/// Summary of one object sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectSweepReport {
    /// Objects listed under the sweep prefix
    pub scanned: usize,
    /// Objects past retention kept alive by a future expiry record
    pub retained: usize,
    /// Keys removed in the deletion batch
    pub deleted: Vec<String>,
}

/// Summary of one counter sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSweepReport {
    /// Counter keys removed
    pub deleted: Vec<String>,
}

/// Outcome of one sweep inside a [`JanitorReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SweepOutcome<T> {
    /// The sweep finished with this report
    Ok(T),
    /// The sweep failed
    Failed {
        /// Error text, for operators only
        error: String,
    },
}

impl<T> SweepOutcome<T> {
    /// Whether the sweep finished.
    pub fn is_ok(&self) -> bool {
        matches!(self, SweepOutcome::Ok(_))
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for SweepOutcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(report) => SweepOutcome::Ok(report),
            Err(e) => SweepOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Result of running both sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JanitorReport {
    /// Bucket sweep outcome
    pub objects: SweepOutcome<ObjectSweepReport>,
    /// Counter sweep outcome
    pub counters: SweepOutcome<CounterSweepReport>,
}

/// Periodic cleanup of stale objects and expired limiter records.
///
/// Shares the bucket and counter store with the request path but holds no
/// in-process state of its own. A counter recreated by live traffic between
/// listing and deletion simply survives the sweep.
pub struct Janitor {
    objects: Arc<dyn ObjectStore>,
    expiries: Arc<dyn ExpiryIndex>,
    counters: Arc<dyn CounterStore>,
    sweep_prefix: String,
    object_retention: Duration,
    counter_grace: Duration,
}

impl Janitor {
    /// Create a janitor from configuration.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        expiries: Arc<dyn ExpiryIndex>,
        counters: Arc<dyn CounterStore>,
        config: &JanitorConfig,
    ) -> Self {
        Self {
            objects,
            expiries,
            counters,
            sweep_prefix: config.sweep_prefix.clone(),
            object_retention: Duration::from_secs(config.object_retention_secs),
            counter_grace: Duration::from_secs(config.counter_grace_secs),
        }
    }

    /// Delete objects past retention that have no live expiry record.
    #[instrument(skip(self), fields(prefix = %self.sweep_prefix))]
    pub async fn sweep_objects(&self) -> Result<ObjectSweepReport, ObjectStoreError> {
        let now = Utc::now();
        let threshold = now - ttl_delta(self.object_retention);

        let listing = self.objects.list(&self.sweep_prefix, usize::MAX).await?;
        let mut report = ObjectSweepReport {
            scanned: listing.objects.len(),
            ..Default::default()
        };

        let mut batch = Vec::new();
        for object in listing.objects {
            if object.uploaded_at > threshold {
                continue;
            }
            match self.expiries.expiry_for(&object.key).await {
                Ok(Some(expires_at)) if expires_at > now => report.retained += 1,
                Ok(_) => batch.push(object.key),
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Expiry lookup failed, keeping object");
                }
            }
        }

        if !batch.is_empty() {
            self.objects.delete(&batch).await?;
            if let Err(e) = self.expiries.remove(&batch).await {
                warn!(error = %e, "Failed to drop expiry records of swept objects");
            }
        }

        debug!(
            scanned = report.scanned,
            retained = report.retained,
            deleted = batch.len(),
            "Object sweep finished"
        );
        report.deleted = batch;
        Ok(report)
    }

    /// Delete counter records that expired more than the grace period ago.
    #[instrument(skip(self))]
    pub async fn sweep_counters(&self) -> Result<CounterSweepReport, StoreError> {
        let cutoff = Utc::now() - ttl_delta(self.counter_grace);
        let deleted = self.counters.purge_expired(cutoff).await?;
        debug!(deleted = deleted.len(), "Counter sweep finished");
        Ok(CounterSweepReport { deleted })
    }

    /// Run both sweeps. A failure in one does not stop the other.
    pub async fn run(&self) -> JanitorReport {
        let (objects, counters) = tokio::join!(self.sweep_objects(), self.sweep_counters());

        match &objects {
            Ok(report) => info!(
                scanned = report.scanned,
                deleted = report.deleted.len(),
                "Object sweep completed"
            ),
            Err(e) => error!(error = %e, "Object sweep failed"),
        }
        match &counters {
            Ok(report) => info!(deleted = report.deleted.len(), "Counter sweep completed"),
            Err(e) => error!(error = %e, "Counter sweep failed"),
        }

        JanitorReport {
            objects: objects.into(),
            counters: counters.into(),
        }
    }

    /// Run on a timer until `shutdown` changes or its sender is dropped.
    pub fn spawn(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately
            ticker.tick().await;

            info!(interval_secs = every.as_secs(), "Janitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run().await;
                    }
                    _ = shutdown.changed() => {
                        info!("Janitor stopping");
                        break;
                    }
                }
            }
        })
    }
}
