// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backing resource lifecycle.
//!
//! Every NFS volume is served by three resources in the provisioner's
//! namespace, all named `nfs-<volume>`:
//!
//! 1. a backing `PersistentVolumeClaim` holding the data
//! 2. a single-replica server `Deployment` mounting that claim
//! 3. a `Service` selecting the server pods
//!
//! [`LifecycleManager::create_all`] creates them in that order and
//! [`LifecycleManager::delete_all`] removes them in reverse. Each step reads
//! before writing, so an interrupted sequence is completed by calling it again.
//! Nothing is rolled back on failure; the error names the failed step.

use crate::config::ProvisionerConfig;
use crate::errors::{LifecycleError, LifecycleStep, StepCause};
use crate::hooks::{HookEngine, HookEvent, HookTarget, ResourceKind};
use crate::labels::backing_name;
use crate::metrics;
use crate::nfs_resources::{
    build_backing_claim, build_server_deployment, build_server_service, service_dns_name,
};
use crate::provisioner::volume_config::EffectiveVolumeConfig;
use crate::store::{ClusterStore, ObjectStore};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use kube::Resource;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates and deletes the backing resources of volumes.
pub struct LifecycleManager {
    store: Arc<dyn ClusterStore>,
    hooks: Arc<HookEngine>,
    config: Arc<ProvisionerConfig>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        hooks: Arc<HookEngine>,
        config: Arc<ProvisionerConfig>,
    ) -> Self {
        Self {
            store,
            hooks,
            config,
        }
    }

    /// Namespace holding every backing resource.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Create or adopt the backing claim, workload and endpoint of a volume.
    ///
    /// Returns the address clients mount the export from: the service cluster
    /// IP when configured, else its cluster-local DNS name.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] naming the first step that failed.
    pub async fn create_all(
        &self,
        volume_id: &str,
        volume: &EffectiveVolumeConfig,
    ) -> Result<String, LifecycleError> {
        let namespace = self.namespace();

        self.create_or_adopt(
            LifecycleStep::CreateBackingClaim,
            volume_id,
            ResourceKind::BackendPersistentVolumeClaim,
            build_backing_claim(namespace, volume),
            |claim: &mut PersistentVolumeClaim| HookTarget::BackendPersistentVolumeClaim(claim),
        )
        .await?;

        self.create_or_adopt(
            LifecycleStep::CreateServerWorkload,
            volume_id,
            ResourceKind::Deployment,
            build_server_deployment(namespace, &self.config.server_image, volume),
            |deployment: &mut Deployment| HookTarget::Deployment(deployment),
        )
        .await?;

        let service = self
            .create_or_adopt(
                LifecycleStep::CreateServerEndpoint,
                volume_id,
                ResourceKind::Service,
                build_server_service(namespace, volume),
                |service: &mut Service| HookTarget::Service(service),
            )
            .await?;

        let address = self.resolve_address(volume_id, &service)?;
        info!(
            volume = %volume_id,
            namespace = %namespace,
            address = %address,
            "Backing resources ready"
        );
        Ok(address)
    }

    /// Delete the endpoint, workload and backing claim of a volume.
    ///
    /// Resources that are already gone are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`LifecycleError`] naming the first step that failed.
    pub async fn delete_all(&self, volume_id: &str) -> Result<(), LifecycleError> {
        let name = backing_name(volume_id);

        self.delete_if_present(
            LifecycleStep::DeleteServerEndpoint,
            volume_id,
            ResourceKind::Service,
            &name,
            |service: &mut Service| HookTarget::Service(service),
        )
        .await?;

        self.delete_if_present(
            LifecycleStep::DeleteServerWorkload,
            volume_id,
            ResourceKind::Deployment,
            &name,
            |deployment: &mut Deployment| HookTarget::Deployment(deployment),
        )
        .await?;

        self.delete_if_present(
            LifecycleStep::DeleteBackingClaim,
            volume_id,
            ResourceKind::BackendPersistentVolumeClaim,
            &name,
            |claim: &mut PersistentVolumeClaim| HookTarget::BackendPersistentVolumeClaim(claim),
        )
        .await?;

        info!(volume = %volume_id, "Backing resources deleted");
        Ok(())
    }

    /// Address published in the volume's NFS source.
    fn resolve_address(&self, volume_id: &str, service: &Service) -> Result<String, LifecycleError> {
        if !self.config.use_cluster_ip {
            let name = service
                .meta()
                .name
                .clone()
                .unwrap_or_else(|| backing_name(volume_id));
            return Ok(service_dns_name(
                &name,
                self.namespace(),
                &self.config.cluster_domain,
            ));
        }

        service
            .spec
            .as_ref()
            .and_then(|spec| spec.cluster_ip.clone())
            .filter(|ip| !ip.is_empty() && ip != "None")
            .ok_or_else(|| {
                LifecycleError::new(LifecycleStep::ResolveAddress, volume_id, StepCause::NoClusterIp)
            })
    }

    /// Get `desired` by name and create it only when it does not exist yet.
    ///
    /// Hooks for `kind` run on the object right before it is created. An
    /// existing object is returned unchanged.
    async fn create_or_adopt<K>(
        &self,
        step: LifecycleStep,
        volume_id: &str,
        kind: ResourceKind,
        mut desired: K,
        as_target: impl for<'a> Fn(&'a mut K) -> HookTarget<'a> + Send + Sync,
    ) -> Result<K, LifecycleError>
    where
        K: Resource + Clone + Send + Sync + 'static,
        dyn ClusterStore: ObjectStore<K>,
    {
        let store: &dyn ClusterStore = &*self.store;
        let namespace = self.namespace();
        let name = desired.meta().name.clone().unwrap_or_default();
        let fail = |cause: StepCause| LifecycleError::new(step, volume_id, cause);

        if let Some(existing) = ObjectStore::<K>::get(store, Some(namespace), &name)
            .await
            .map_err(|e| fail(e.into()))?
        {
            debug!(
                step = %step,
                name = %name,
                namespace = %namespace,
                "Adopting existing backing resource"
            );
            return Ok(existing);
        }

        self.hooks
            .apply(kind, HookEvent::Create, as_target(&mut desired))
            .map_err(|e| fail(e.into()))?;

        match ObjectStore::<K>::create(store, &desired).await {
            Ok(created) => {
                metrics::record_resource_created(kind.as_str());
                info!(
                    step = %step,
                    name = %name,
                    namespace = %namespace,
                    "Created backing resource"
                );
                Ok(created)
            }
            Err(e) if e.is_already_exists() => {
                debug!(
                    step = %step,
                    name = %name,
                    "Backing resource appeared concurrently, adopting it"
                );
                ObjectStore::<K>::get(store, Some(namespace), &name)
                    .await
                    .map_err(|err| fail(err.into()))?
                    .ok_or_else(|| fail(e.into()))
            }
            Err(e) => Err(fail(e.into())),
        }
    }

    /// Delete the object called `name` if it exists.
    ///
    /// Hooks for `kind` run on the live object first and are persisted, so a
    /// hook that drops a finalizer lets the deletion complete.
    async fn delete_if_present<K>(
        &self,
        step: LifecycleStep,
        volume_id: &str,
        kind: ResourceKind,
        name: &str,
        as_target: impl for<'a> Fn(&'a mut K) -> HookTarget<'a> + Send + Sync,
    ) -> Result<(), LifecycleError>
    where
        K: Resource + Clone + Send + Sync + 'static,
        dyn ClusterStore: ObjectStore<K>,
    {
        let store: &dyn ClusterStore = &*self.store;
        let namespace = self.namespace();
        let fail = |cause: StepCause| LifecycleError::new(step, volume_id, cause);

        let Some(mut existing) = ObjectStore::<K>::get(store, Some(namespace), name)
            .await
            .map_err(|e| fail(e.into()))?
        else {
            debug!(step = %step, name = %name, "Backing resource already absent");
            return Ok(());
        };

        if self.hooks.has_configured_action(kind, HookEvent::Delete) {
            self.hooks
                .apply(kind, HookEvent::Delete, as_target(&mut existing))
                .map_err(|e| fail(e.into()))?;
            match ObjectStore::<K>::replace(store, &existing).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(fail(e.into())),
            }
        }

        match ObjectStore::<K>::delete(store, Some(namespace), name).await {
            Ok(()) => {
                metrics::record_resource_deleted(kind.as_str());
                info!(
                    step = %step,
                    name = %name,
                    namespace = %namespace,
                    "Deleted backing resource"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(fail(e.into())),
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod lifecycle_tests;
