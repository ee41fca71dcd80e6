// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Orphaned backing resource collection.
//!
//! A sweep lists every backing claim managed by the provisioner and decides,
//! claim by claim, whether the volume it serves still exists:
//!
//! 1. volumes in the [`ProvisioningTracker`] are skipped
//! 2. claims without a complete owner back-reference are skipped
//! 3. an owning claim with the recorded uid keeps the volume alive
//! 4. an upstream `PersistentVolume` for the volume keeps it alive
//! 5. anything else is orphaned and torn down through
//!    [`LifecycleManager::delete_all`]
//!
//! Errors on a single claim are logged and do not abort the sweep.

use crate::config::ProvisionerConfig;
use crate::errors::{LifecycleError, StoreError};
use crate::labels::{
    backing_claim_selector, backing_name, volume_id_from_backing_name, OWNER_NAMESPACE_LABEL,
    OWNER_NAME_LABEL, OWNER_UID_LABEL,
};
use crate::metrics;
use crate::provisioner::lifecycle::LifecycleManager;
use crate::provisioner::tracker::ProvisioningTracker;
use crate::store::{ClusterStore, ObjectStore};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of judging one backing claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The claim name does not follow the backing naming scheme
    Unmanaged,
    /// A create or delete sequence is in flight for the volume
    Tracked,
    /// The owner back-reference labels are incomplete
    MissingOwnerLabels,
    /// The owning claim still exists with the recorded uid
    OwnerInUse,
    /// The upstream volume still exists
    VolumeExists,
    /// Nothing references the backing resources any more
    Orphaned,
}

/// Counts gathered during one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Periodically removes backing resources whose volume is gone.
pub struct GarbageCollector {
    store: Arc<dyn ClusterStore>,
    tracker: Arc<ProvisioningTracker>,
    lifecycle: Arc<LifecycleManager>,
    config: Arc<ProvisionerConfig>,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        tracker: Arc<ProvisioningTracker>,
        lifecycle: Arc<LifecycleManager>,
        config: Arc<ProvisionerConfig>,
    ) -> Self {
        Self {
            store,
            tracker,
            lifecycle,
            config,
        }
    }

    /// Sweep immediately, then every configured interval, until `shutdown`
    /// flips to `true` or its sender is dropped.
    ///
    /// Shutdown is observed between sweeps; a running sweep always completes.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.gc_interval.as_secs(),
            namespace = %self.config.namespace,
            "Starting garbage collector"
        );

        let mut ticker = tokio::time::interval(self.config.gc_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.sweep().await {
                        Ok(report) => {
                            metrics::record_gc_sweep(report.deleted, started.elapsed());
                            info!(
                                scanned = report.scanned,
                                deleted = report.deleted,
                                skipped = report.skipped,
                                errors = report.errors,
                                "Garbage collection sweep finished"
                            );
                        }
                        Err(e) => {
                            metrics::record_gc_sweep_error(started.elapsed());
                            error!(error = %e, "Garbage collection sweep failed to list backing claims");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Garbage collector stopped");
    }

    /// Run one full sweep over every backing claim.
    ///
    /// # Errors
    ///
    /// Only listing the backing claims is fatal; per-claim failures are counted
    /// in the report.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let claims = ObjectStore::<PersistentVolumeClaim>::list(
            &*self.store,
            Some(&self.config.namespace),
            &backing_claim_selector(),
        )
        .await?;

        let mut report = SweepReport {
            scanned: claims.len(),
            ..SweepReport::default()
        };
        if !self.tracker.is_empty() {
            debug!(in_flight = self.tracker.len(), "Sweeping while volumes are in flight");
        }

        for claim in &claims {
            let name = claim.name_any();
            match self.collect(claim).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(claim = %name, error = %e, "Skipping backing claim after error");
                }
            }
        }

        Ok(report)
    }

    /// Judge one claim and tear it down if orphaned. Returns whether it was deleted.
    async fn collect(&self, claim: &PersistentVolumeClaim) -> Result<bool, ItemError> {
        let verdict = self.judge(claim).await?;
        let name = claim.name_any();

        if verdict != Verdict::Orphaned {
            debug!(claim = %name, verdict = ?verdict, "Backing claim kept");
            return Ok(false);
        }

        let Some(volume_id) = volume_id_from_backing_name(&name) else {
            return Ok(false);
        };

        // A provision may have started since the verdict
        let Some(guard) = self.tracker.try_track(volume_id) else {
            debug!(volume = %volume_id, "Volume became tracked, skipping");
            return Ok(false);
        };

        info!(volume = %guard.volume_id(), claim = %name, "Deleting orphaned backing resources");
        self.lifecycle.delete_all(guard.volume_id()).await?;
        Ok(true)
    }

    /// Decide whether the volume served by `claim` still exists.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the owner or volume lookups fail.
    pub async fn judge(&self, claim: &PersistentVolumeClaim) -> Result<Verdict, StoreError> {
        let name = claim.name_any();
        let Some(volume_id) = volume_id_from_backing_name(&name) else {
            return Ok(Verdict::Unmanaged);
        };

        if self.tracker.is_tracked(volume_id) {
            return Ok(Verdict::Tracked);
        }

        let labels = claim.labels();
        let owner = |key: &str| {
            labels
                .get(key)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
        };
        let (Some(owner_namespace), Some(owner_name), Some(owner_uid)) = (
            owner(OWNER_NAMESPACE_LABEL),
            owner(OWNER_NAME_LABEL),
            owner(OWNER_UID_LABEL),
        ) else {
            return Ok(Verdict::MissingOwnerLabels);
        };

        let owning_claim = ObjectStore::<PersistentVolumeClaim>::get(
            &*self.store,
            Some(owner_namespace),
            owner_name,
        )
        .await?;
        if owning_claim.is_some_and(|c| c.uid().as_deref() == Some(owner_uid)) {
            return Ok(Verdict::OwnerInUse);
        }

        // Upstream volumes are named after the volume id or its backing name
        for volume_name in [volume_id.to_string(), backing_name(volume_id)] {
            let volume =
                ObjectStore::<PersistentVolume>::get(&*self.store, None, &volume_name).await?;
            if volume.is_some() {
                return Ok(Verdict::VolumeExists);
            }
        }

        Ok(Verdict::Orphaned)
    }
}

#[cfg(test)]
#[path = "gc_tests.rs"]
mod gc_tests;
