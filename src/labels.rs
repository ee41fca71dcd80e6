// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across the provisioner.
//!
//! Backing resources carry the standard Kubernetes labels plus a back-reference
//! to the claim that owns them. The garbage collector relies on the latter to
//! decide whether a backing claim is orphaned.

use crate::constants::BACKING_NAME_PREFIX;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Short application label used as the server pod selector
pub const APP_LABEL: &str = "app";

// ============================================================================
// Standard Label Values
// ============================================================================

/// Application name for NFS servers
pub const APP_NAME_NFS_SERVER: &str = "nfs-server";

/// Component value for the backing claim
pub const COMPONENT_BACKING_CLAIM: &str = "backing-claim";

/// Component value for the server workload
pub const COMPONENT_SERVER: &str = "server";

/// Component value for the server endpoint
pub const COMPONENT_ENDPOINT: &str = "endpoint";

// ============================================================================
// Provisioner-Specific Labels
// ============================================================================

/// Label selecting the server pods of one volume
pub const NFS_VOLUME_LABEL: &str = "nfs-provisioner.io/volume";

/// Back-reference: namespace of the owning claim
pub const OWNER_NAMESPACE_LABEL: &str = "nfs-provisioner.io/owner-namespace";

/// Back-reference: name of the owning claim
pub const OWNER_NAME_LABEL: &str = "nfs-provisioner.io/owner-name";

/// Back-reference: uid of the owning claim
pub const OWNER_UID_LABEL: &str = "nfs-provisioner.io/owner-uid";

// ============================================================================
// Provisioner-Specific Annotations
// ============================================================================

/// `StorageClass` annotation carrying the declared per-class configuration
pub const CLASS_CONFIG_ANNOTATION: &str = "nfs-provisioner.io/config";

/// Derive the name shared by every backing resource of a volume.
#[must_use]
pub fn backing_name(volume_id: &str) -> String {
    format!("{BACKING_NAME_PREFIX}{volume_id}")
}

/// Recover the volume identifier from a backing resource name.
///
/// Returns `None` when the name was not produced by [`backing_name`].
#[must_use]
pub fn volume_id_from_backing_name(name: &str) -> Option<&str> {
    name.strip_prefix(BACKING_NAME_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Label selector matching every backing claim managed by this provisioner.
#[must_use]
pub fn backing_claim_selector() -> String {
    format!("{K8S_MANAGED_BY}={}", crate::constants::CONTROLLER_NAME)
}
