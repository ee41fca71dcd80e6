// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Volume provisioning.
//!
//! [`Provisioner`] implements the two calls a provisioning controller makes:
//!
//! - [`Provisioner::provision`] resolves the volume configuration, creates the
//!   backing resources and returns the `PersistentVolume` to publish
//! - [`Provisioner::delete`] tears the backing resources of a volume down
//!
//! Both are idempotent and safe to retry after any failure. While either runs
//! the volume is held in the [`ProvisioningTracker`], which keeps the
//! [`GarbageCollector`] away from it.

pub mod gc;
pub mod lifecycle;
pub mod tracker;
pub mod volume_config;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use self::gc::{GarbageCollector, SweepReport, Verdict};
pub use self::lifecycle::LifecycleManager;
pub use self::tracker::{ProvisioningTracker, TrackingGuard};
pub use self::volume_config::{EffectiveVolumeConfig, VolumeConfigResolver};

use crate::config::ProvisionerConfig;
use crate::constants::ANNOTATION_PROVISIONED_BY;
use crate::errors::{ProvisionError, StoreError};
use crate::hooks::{HookEngine, HookEvent, HookTarget, ResourceKind};
use crate::metrics::{self, OPERATION_DELETE, OPERATION_PROVISION};
use crate::nfs_resources::build_persistent_volume;
use crate::store::{qualified_name, ClusterStore, ObjectStore};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A request to provision one volume for one claim.
#[derive(Clone, Debug)]
pub struct ProvisionRequest {
    /// Name of the `PersistentVolume` to create; also the volume identifier
    pub volume_name: String,
    /// Claim asking for the volume
    pub claim: PersistentVolumeClaim,
    /// Class of the claim when the caller already fetched it
    pub storage_class: Option<StorageClass>,
}

/// Category label of an error for metrics.
fn error_type(error: &ProvisionError) -> &'static str {
    match error {
        ProvisionError::UnsupportedClaim { .. } => "unsupported_claim",
        ProvisionError::InvalidVolume { .. } => "invalid_volume",
        ProvisionError::Config(_) => "config",
        ProvisionError::Lifecycle(_) => "lifecycle",
        ProvisionError::Hook(_) => "hook",
        ProvisionError::Store(_) => "store",
    }
}

fn validate_claim(claim: &PersistentVolumeClaim) -> Result<(), ProvisionError> {
    let unsupported = |reason: &str| ProvisionError::UnsupportedClaim {
        claim: qualified_name(claim.namespace().as_deref(), &claim.name_any()),
        reason: reason.to_string(),
    };

    let Some(spec) = claim.spec.as_ref() else {
        return Err(unsupported("claim has no spec"));
    };
    if spec.selector.is_some() {
        return Err(unsupported("claim selectors are not supported"));
    }
    if spec.data_source.is_some() || spec.data_source_ref.is_some() {
        return Err(unsupported("claim data sources are not supported"));
    }
    Ok(())
}

/// Entry points for provisioning and deleting NFS volumes.
pub struct Provisioner {
    store: Arc<dyn ClusterStore>,
    config: Arc<ProvisionerConfig>,
    hooks: Arc<HookEngine>,
    resolver: VolumeConfigResolver,
    lifecycle: Arc<LifecycleManager>,
    tracker: Arc<ProvisioningTracker>,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        hooks: Arc<HookEngine>,
        config: Arc<ProvisionerConfig>,
    ) -> Self {
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            hooks.clone(),
            config.clone(),
        ));
        Self {
            resolver: VolumeConfigResolver::new(store.clone(), config.clone()),
            tracker: Arc::new(ProvisioningTracker::new()),
            store,
            config,
            hooks,
            lifecycle,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<ProvisioningTracker> {
        self.tracker.clone()
    }

    /// Garbage collector sharing this provisioner's tracker and lifecycle.
    #[must_use]
    pub fn garbage_collector(&self) -> GarbageCollector {
        GarbageCollector::new(
            self.store.clone(),
            self.tracker.clone(),
            self.lifecycle.clone(),
            self.config.clone(),
        )
    }

    /// Provision the volume described by `request`.
    ///
    /// # Errors
    ///
    /// Fails without creating anything when the claim is unsupported or its
    /// configuration cannot be resolved. Later failures leave the resources
    /// created so far in place for the next attempt.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<PersistentVolume, ProvisionError> {
        let started = Instant::now();
        let result = self.provision_inner(request).await;
        match &result {
            Ok(_) => metrics::record_operation_success(OPERATION_PROVISION, started.elapsed()),
            Err(e) => {
                metrics::record_operation_error(OPERATION_PROVISION, error_type(e), started.elapsed());
                error!(volume = %request.volume_name, error = %e, "Provisioning failed");
            }
        }
        result
    }

    async fn provision_inner(
        &self,
        request: &ProvisionRequest,
    ) -> Result<PersistentVolume, ProvisionError> {
        let volume_id = request.volume_name.as_str();
        if volume_id.is_empty() {
            return Err(ProvisionError::InvalidVolume {
                volume: String::new(),
                reason: "volume name is empty".to_string(),
            });
        }
        validate_claim(&request.claim)?;

        let (class, volume) = match &request.storage_class {
            Some(class) => {
                let volume = self.resolver.resolve_with_class(volume_id, &request.claim, class)?;
                (class.clone(), volume)
            }
            None => self.resolver.resolve(volume_id, &request.claim).await?,
        };

        let _guard = self.tracker.track(volume_id);
        info!(
            volume = %volume_id,
            claim = %qualified_name(request.claim.namespace().as_deref(), &request.claim.name_any()),
            storage_class = %volume.storage_class,
            "Provisioning volume"
        );

        let address = self.lifecycle.create_all(volume_id, &volume).await?;

        let mut pv = build_persistent_volume(
            &volume,
            &request.claim,
            &class,
            &address,
            &self.config.provisioner_name,
        );
        self.hooks.apply(
            ResourceKind::PersistentVolume,
            HookEvent::Create,
            HookTarget::PersistentVolume(&mut pv),
        )?;

        if self
            .hooks
            .has_configured_action(ResourceKind::PersistentVolumeClaim, HookEvent::Create)
        {
            self.apply_claim_hooks(&request.claim).await?;
        }

        info!(volume = %volume_id, server = %address, "Volume provisioned");
        Ok(pv)
    }

    /// Apply claim hooks to the live owning claim and persist them.
    async fn apply_claim_hooks(&self, claim: &PersistentVolumeClaim) -> Result<(), ProvisionError> {
        let namespace = claim.namespace();
        let name = claim.name_any();
        let Some(mut live) =
            ObjectStore::<PersistentVolumeClaim>::get(&*self.store, namespace.as_deref(), &name)
                .await?
        else {
            warn!(claim = %name, "Owning claim disappeared, skipping claim hooks");
            return Ok(());
        };

        self.hooks.apply(
            ResourceKind::PersistentVolumeClaim,
            HookEvent::Create,
            HookTarget::PersistentVolumeClaim(&mut live),
        )?;
        ObjectStore::<PersistentVolumeClaim>::replace(&*self.store, &live).await?;
        debug!(claim = %name, "Persisted claim hook changes");
        Ok(())
    }

    /// Delete the backing resources of `volume`.
    ///
    /// # Errors
    ///
    /// Rejects volumes provisioned by someone else. Missing backing resources
    /// are not an error.
    pub async fn delete(&self, volume: &PersistentVolume) -> Result<(), ProvisionError> {
        let started = Instant::now();
        let result = self.delete_inner(volume).await;
        match &result {
            Ok(()) => metrics::record_operation_success(OPERATION_DELETE, started.elapsed()),
            Err(e) => {
                metrics::record_operation_error(OPERATION_DELETE, error_type(e), started.elapsed());
                error!(volume = %volume.name_any(), error = %e, "Deleting volume failed");
            }
        }
        result
    }

    async fn delete_inner(&self, volume: &PersistentVolume) -> Result<(), ProvisionError> {
        let volume_id = volume.name_any();
        if volume_id.is_empty() {
            return Err(ProvisionError::InvalidVolume {
                volume: volume_id,
                reason: "volume has no name".to_string(),
            });
        }
        if let Some(owner) = volume.annotations().get(ANNOTATION_PROVISIONED_BY) {
            if *owner != self.config.provisioner_name {
                return Err(ProvisionError::InvalidVolume {
                    volume: volume_id,
                    reason: format!("provisioned by '{owner}'"),
                });
            }
        }

        let _guard = self.tracker.track(&volume_id);
        info!(volume = %volume_id, "Deleting volume");

        self.lifecycle.delete_all(&volume_id).await?;

        if self
            .hooks
            .has_configured_action(ResourceKind::PersistentVolume, HookEvent::Delete)
        {
            self.apply_volume_delete_hooks(&volume_id).await?;
        }

        info!(volume = %volume_id, "Volume deleted");
        Ok(())
    }

    /// Apply volume delete hooks to the live volume, if it still exists.
    async fn apply_volume_delete_hooks(&self, volume_id: &str) -> Result<(), ProvisionError> {
        let Some(mut live) =
            ObjectStore::<PersistentVolume>::get(&*self.store, None, volume_id).await?
        else {
            return Ok(());
        };

        self.hooks.apply(
            ResourceKind::PersistentVolume,
            HookEvent::Delete,
            HookTarget::PersistentVolume(&mut live),
        )?;
        match ObjectStore::<PersistentVolume>::replace(&*self.store, &live).await {
            Ok(_) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
