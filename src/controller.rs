// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Claim and volume controllers.
//!
//! Two `kube::runtime` controllers drive the [`Provisioner`]:
//!
//! - the claim controller provisions pending, unbound claims whose
//!   `StorageClass` names this provisioner and publishes the returned volume
//! - the volume controller tears down `Released` volumes with reclaim policy
//!   `Delete` that this provisioner created, then deletes the volume
//!
//! Failed reconciliations are retried after the configured requeue delay.
//! kube-runtime never runs two reconciliations of the same object at once.

use crate::constants::{
    ANNOTATION_PROVISIONED_BY, ANNOTATION_SELECTED_NODE, BINDING_MODE_WAIT_FOR_FIRST_CONSUMER,
    CLAIM_PHASE_PENDING, RECLAIM_POLICY_DELETE, VOLUME_NAME_PREFIX, VOLUME_PHASE_RELEASED,
};
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::store::{qualified_name, ClusterStore, ObjectStore};
use anyhow::{Context as _, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] anyhow::Error);

/// Shared state handed to every reconciliation.
pub struct ControllerContext {
    store: Arc<dyn ClusterStore>,
    provisioner: Arc<Provisioner>,
}

impl ControllerContext {
    pub fn new(store: Arc<dyn ClusterStore>, provisioner: Arc<Provisioner>) -> Self {
        Self { store, provisioner }
    }
}

/// Name of the volume published for `claim`: `pvc-<claim uid>`.
#[must_use]
pub fn volume_name_for_claim(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .uid()
        .filter(|uid| !uid.is_empty())
        .map(|uid| format!("{VOLUME_NAME_PREFIX}{uid}"))
}

/// Whether `claim` is waiting for a dynamically provisioned volume.
#[must_use]
pub fn claim_is_pending(claim: &PersistentVolumeClaim) -> bool {
    if claim.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let phase = claim.status.as_ref().and_then(|s| s.phase.as_deref());
    if phase.is_some_and(|p| p != CLAIM_PHASE_PENDING) {
        return false;
    }
    claim
        .spec
        .as_ref()
        .is_some_and(|spec| spec.volume_name.as_deref().unwrap_or_default().is_empty())
}

/// Whether `claim` may be provisioned now under the binding mode of `class`.
#[must_use]
pub fn binding_allows_provisioning(claim: &PersistentVolumeClaim, class: &StorageClass) -> bool {
    class.volume_binding_mode.as_deref() != Some(BINDING_MODE_WAIT_FOR_FIRST_CONSUMER)
        || claim.annotations().contains_key(ANNOTATION_SELECTED_NODE)
}

/// Whether `volume` is a released volume of ours that should be deleted.
#[must_use]
pub fn volume_needs_delete(volume: &PersistentVolume, provisioner_name: &str) -> bool {
    if volume.metadata.deletion_timestamp.is_some() {
        return false;
    }
    let released = volume
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some(VOLUME_PHASE_RELEASED);
    let reclaim_delete = volume
        .spec
        .as_ref()
        .and_then(|s| s.persistent_volume_reclaim_policy.as_deref())
        == Some(RECLAIM_POLICY_DELETE);
    let ours = volume
        .annotations()
        .get(ANNOTATION_PROVISIONED_BY)
        .is_some_and(|name| name == provisioner_name);

    released && reclaim_delete && ours
}

/// Provision `claim` if it is pending and belongs to this provisioner.
///
/// Returns the name of the published volume, or `None` when the claim was
/// left alone.
///
/// # Errors
///
/// Returns an error when reading the class, provisioning or publishing the
/// volume fails.
pub async fn provision_claim(
    claim: &PersistentVolumeClaim,
    ctx: &ControllerContext,
) -> Result<Option<String>> {
    if !claim_is_pending(claim) {
        return Ok(None);
    }
    let claim_name = qualified_name(claim.namespace().as_deref(), &claim.name_any());

    let Some(class_name) = claim
        .spec
        .as_ref()
        .and_then(|spec| spec.storage_class_name.clone())
        .filter(|name| !name.is_empty())
    else {
        return Ok(None);
    };

    let Some(class) = ObjectStore::<StorageClass>::get(&*ctx.store, None, &class_name).await?
    else {
        debug!(claim = %claim_name, storage_class = %class_name, "StorageClass not found, ignoring claim");
        return Ok(None);
    };
    if class.provisioner != ctx.provisioner.config().provisioner_name {
        return Ok(None);
    }
    if !binding_allows_provisioning(claim, &class) {
        debug!(claim = %claim_name, "Waiting for a node to be selected");
        return Ok(None);
    }

    let volume_name = volume_name_for_claim(claim)
        .with_context(|| format!("claim {claim_name} has no uid"))?;

    if ObjectStore::<PersistentVolume>::get(&*ctx.store, None, &volume_name)
        .await?
        .is_some()
    {
        debug!(claim = %claim_name, volume = %volume_name, "Volume already published");
        return Ok(Some(volume_name));
    }

    let request = ProvisionRequest {
        volume_name: volume_name.clone(),
        claim: claim.clone(),
        storage_class: Some(class),
    };
    let volume = ctx.provisioner.provision(&request).await?;

    match ObjectStore::<PersistentVolume>::create(&*ctx.store, &volume).await {
        Ok(_) => info!(claim = %claim_name, volume = %volume_name, "Published volume"),
        Err(e) if e.is_already_exists() => {
            debug!(volume = %volume_name, "Volume published concurrently");
        }
        Err(e) => return Err(e).context(format!("failed to publish volume {volume_name}")),
    }
    Ok(Some(volume_name))
}

/// Delete `volume` and its backing resources if it is released and ours.
///
/// Returns whether the volume was handled.
///
/// # Errors
///
/// Returns an error when deleting the backing resources or the volume fails.
pub async fn release_volume(volume: &PersistentVolume, ctx: &ControllerContext) -> Result<bool> {
    if !volume_needs_delete(volume, &ctx.provisioner.config().provisioner_name) {
        return Ok(false);
    }
    let name = volume.name_any();

    ctx.provisioner.delete(volume).await?;

    match ObjectStore::<PersistentVolume>::delete(&*ctx.store, None, &name).await {
        Ok(()) => info!(volume = %name, "Deleted released volume"),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e).context(format!("failed to delete volume {name}")),
    }
    Ok(true)
}

async fn reconcile_claim(
    claim: Arc<PersistentVolumeClaim>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileError> {
    debug!(
        claim = %claim.name_any(),
        namespace = ?claim.namespace(),
        "Reconcile called for PersistentVolumeClaim"
    );

    match provision_claim(&claim, &ctx).await {
        Ok(_) => Ok(Action::await_change()),
        Err(e) => {
            error!("Failed to provision claim {}: {:#}", claim.name_any(), e);
            Err(e.into())
        }
    }
}

async fn reconcile_volume(
    volume: Arc<PersistentVolume>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileError> {
    debug!(volume = %volume.name_any(), "Reconcile called for PersistentVolume");

    match release_volume(&volume, &ctx).await {
        Ok(_) => Ok(Action::await_change()),
        Err(e) => {
            error!("Failed to delete volume {}: {:#}", volume.name_any(), e);
            Err(e.into())
        }
    }
}

/// Error policy shared by both controllers
fn error_policy<K>(resource: Arc<K>, err: &ReconcileError, ctx: Arc<ControllerContext>) -> Action
where
    K: kube::Resource,
{
    let delay = ctx.provisioner.config().requeue_delay;
    warn!(
        name = %resource.meta().name.as_deref().unwrap_or_default(),
        error = %err,
        requeue_secs = delay.as_secs(),
        "Reconciliation failed, requeueing"
    );
    Action::requeue(delay)
}

/// Run the `PersistentVolumeClaim` controller
///
/// # Errors
///
/// Never fails on reconciliation errors; those are requeued.
pub async fn run_claim_controller(client: Client, ctx: Arc<ControllerContext>) -> Result<()> {
    info!("Starting PersistentVolumeClaim controller");

    let api = Api::<PersistentVolumeClaim>::all(client);

    Controller::new(api, Config::default())
        .run(reconcile_claim, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `PersistentVolume` controller
///
/// # Errors
///
/// Never fails on reconciliation errors; those are requeued.
pub async fn run_volume_controller(client: Client, ctx: Arc<ControllerContext>) -> Result<()> {
    info!("Starting PersistentVolume controller");

    let api = Api::<PersistentVolume>::all(client);

    Controller::new(api, Config::default())
        .run(reconcile_volume, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
