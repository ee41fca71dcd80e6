// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the NFS provisioner.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Provisioner Identity
// ============================================================================

/// Default provisioner name matched against `StorageClass.provisioner`
pub const DEFAULT_PROVISIONER_NAME: &str = "nfs-provisioner.io/nfs";

/// Default namespace holding the backing resources of every volume
pub const DEFAULT_NAMESPACE: &str = "nfs-provisioner";

/// Field manager / controller name used in logs and `managed-by` labels
pub const CONTROLLER_NAME: &str = "nfs-provisioner";

/// Prefix of every backing resource name (`nfs-<volume>`)
pub const BACKING_NAME_PREFIX: &str = "nfs-";

// ============================================================================
// Kind Names
// ============================================================================

/// Kind name for `PersistentVolume` resources
pub const KIND_PERSISTENT_VOLUME: &str = "PersistentVolume";

/// Kind name for `PersistentVolumeClaim` resources
pub const KIND_PERSISTENT_VOLUME_CLAIM: &str = "PersistentVolumeClaim";

/// Kind name for `Deployment` resources
pub const KIND_DEPLOYMENT: &str = "Deployment";

/// Kind name for `Service` resources
pub const KIND_SERVICE: &str = "Service";

// ============================================================================
// NFS Server Constants
// ============================================================================

/// Standard NFS port
pub const NFS_PORT: u16 = 2049;

/// Standard RPC port mapper port
pub const RPCBIND_PORT: u16 = 111;

/// Name of the NFS service port
pub const NFS_PORT_NAME: &str = "nfs";

/// Name of the port mapper service port
pub const RPCBIND_PORT_NAME: &str = "rpcbind";

/// Default NFS server image
pub const DEFAULT_SERVER_IMAGE: &str = "ghcr.io/nfs-provisioner/nfs-server:latest";

/// Container name of the NFS server
pub const CONTAINER_NAME_NFS_SERVER: &str = "nfs-server";

/// Volume name of the backing claim inside the server pod
pub const VOLUME_EXPORT: &str = "export";

/// Mount path of the exported directory inside the server pod
pub const EXPORT_MOUNT_PATH: &str = "/exports";

/// Path exported to clients (the NFSv4 pseudo root)
pub const EXPORT_PATH: &str = "/";

/// Default NFSv4 lease time in seconds
pub const DEFAULT_LEASE_SECONDS: u32 = 90;

/// Default NFSv4 grace time in seconds
pub const DEFAULT_GRACE_SECONDS: u32 = 90;

/// Environment variable carrying the lease time to the server
pub const ENV_LEASE_SECONDS: &str = "NFS_LEASE_SECONDS";

/// Environment variable carrying the grace time to the server
pub const ENV_GRACE_SECONDS: &str = "NFS_GRACE_SECONDS";

/// Environment variable carrying custom export text to the server
pub const ENV_EXPORTS: &str = "NFS_EXPORTS";

/// Environment variable carrying the owner of the exported directory
pub const ENV_EXPORT_OWNER: &str = "NFS_EXPORT_OWNER";

/// Environment variable carrying the mode of the exported directory
pub const ENV_EXPORT_MODE: &str = "NFS_EXPORT_MODE";

// ============================================================================
// Cluster Constants
// ============================================================================

/// Default cluster DNS domain used to build service addresses
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Annotation written by provisioners on volumes they created
pub const ANNOTATION_PROVISIONED_BY: &str = "pv.kubernetes.io/provisioned-by";

/// Storage request resource name
pub const RESOURCE_STORAGE: &str = "storage";

/// Access mode used by the backing claim
pub const ACCESS_MODE_RWO: &str = "ReadWriteOnce";

/// Deployment strategy of the server workload
pub const DEPLOYMENT_STRATEGY_RECREATE: &str = "Recreate";

/// Service type of the server endpoint
pub const SERVICE_TYPE_CLUSTER_IP: &str = "ClusterIP";

/// Reclaim policy of published volumes when the class names none
pub const RECLAIM_POLICY_DELETE: &str = "Delete";

// ============================================================================
// Controller Constants
// ============================================================================

/// Prefix of published volume names, followed by the claim uid
pub const VOLUME_NAME_PREFIX: &str = "pvc-";

/// Phase of a claim waiting for a volume
pub const CLAIM_PHASE_PENDING: &str = "Pending";

/// Phase of a volume whose claim was deleted
pub const VOLUME_PHASE_RELEASED: &str = "Released";

/// Binding mode that delays provisioning until a pod is scheduled
pub const BINDING_MODE_WAIT_FOR_FIRST_CONSUMER: &str = "WaitForFirstConsumer";

/// Annotation set by the scheduler on claims with delayed binding
pub const ANNOTATION_SELECTED_NODE: &str = "volume.kubernetes.io/selected-node";

// ============================================================================
// Kubernetes API Constants
// ============================================================================

/// Page size for paginated list operations
pub const KUBE_LIST_PAGE_SIZE: u32 = 100;

// ============================================================================
// Garbage Collection Constants
// ============================================================================

/// Default interval between garbage collection sweeps (5 minutes)
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 300;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

// ============================================================================
// Hook Constants
// ============================================================================

/// Hook document version understood by this build
pub const HOOK_DOCUMENT_VERSION: &str = "v1";

/// Template token replaced by the current RFC3339 timestamp in hook annotations
pub const HOOK_TIMESTAMP_TOKEN: &str = "${NOW}";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
