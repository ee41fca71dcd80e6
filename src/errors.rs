// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the NFS provisioner.
//!
//! This module provides specialized error types for:
//! - Cluster store operations (get/create/delete/list against the API server)
//! - Volume configuration resolution from `StorageClass` declarations
//! - Hook document parsing and application
//! - Backing resource lifecycle steps
//! - Provision/delete requests coming from the controller
//!
//! "Not found" on delete and "already exists" on create are surfaced as
//! [`StoreError`] variants so callers can treat them as success explicitly.

use std::fmt;
use thiserror::Error;

/// Errors returned by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested object does not exist (HTTP 404)
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Namespaced name of the missing object
        name: String,
    },

    /// An object with the same name already exists (HTTP 409)
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Kind of the conflicting object
        kind: String,
        /// Namespaced name of the conflicting object
        name: String,
    },

    /// The object handed to the store has no name
    #[error("{kind} has no name in its metadata")]
    MissingName {
        /// Kind of the nameless object
        kind: String,
    },

    /// Any other Kubernetes API failure (network, permission, conflict)
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The store refused the operation for a reason other than the API
    #[error("{operation} on {kind} '{name}' failed: {reason}")]
    Unavailable {
        /// Kind of the object
        kind: String,
        /// Namespaced name of the object
        name: String,
        /// Operation that failed (get, create, delete, list, replace)
        operation: String,
        /// Explanation of the failure
        reason: String,
    },
}

impl StoreError {
    /// Whether this error means the object is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error means the object is already present.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Errors raised while resolving the effective configuration of a volume.
///
/// All of these abort provisioning before any backing resource is created.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The claim references a `StorageClass` that does not exist
    #[error("StorageClass '{name}' not found")]
    StorageClassNotFound {
        /// Name of the missing class
        name: String,
    },

    /// The claim does not name a `StorageClass` at all
    #[error("claim {claim} has no storage class")]
    MissingStorageClass {
        /// Namespaced name of the claim
        claim: String,
    },

    /// The declared configuration annotation could not be decoded
    #[error("malformed configuration on StorageClass '{class}': {reason}")]
    MalformedClassConfig {
        /// Name of the class carrying the annotation
        class: String,
        /// Decoder error
        reason: String,
    },

    /// A configuration entry holds a value of the wrong shape
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Configuration key
        key: String,
        /// Explanation of what is invalid
        reason: String,
    },

    /// The requested server kind is not implemented
    #[error("unsupported server kind '{kind}'")]
    UnsupportedServerKind {
        /// Requested kind
        kind: String,
    },

    /// Reading the `StorageClass` failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the hook engine.
#[derive(Error, Debug)]
pub enum HookError {
    /// The hook document declares a version this build does not understand
    #[error("unsupported hook document version '{found}' (supported: '{supported}')")]
    UnsupportedVersion {
        /// Version declared by the document
        found: String,
        /// Version understood by this build
        supported: String,
    },

    /// The hook document is not valid YAML or does not match the schema
    #[error("failed to parse hook document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The hook document could not be read from disk
    #[error("failed to read hook document '{path}': {source}")]
    Io {
        /// Path of the document
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A hook configured for one kind was applied to an object of another kind
    #[error("hook target kind mismatch: got {actual}, expected {expected}")]
    KindMismatch {
        /// Kind of the object handed to the engine
        actual: String,
        /// Kind the hook was configured for
        expected: String,
    },
}

/// Individual steps of the backing resource lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleStep {
    CreateBackingClaim,
    CreateServerWorkload,
    CreateServerEndpoint,
    ResolveAddress,
    DeleteServerEndpoint,
    DeleteServerWorkload,
    DeleteBackingClaim,
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::CreateBackingClaim => "create backing claim",
            Self::CreateServerWorkload => "create server workload",
            Self::CreateServerEndpoint => "create server endpoint",
            Self::ResolveAddress => "resolve server address",
            Self::DeleteServerEndpoint => "delete server endpoint",
            Self::DeleteServerWorkload => "delete server workload",
            Self::DeleteBackingClaim => "delete backing claim",
        };
        f.write_str(step)
    }
}

/// Underlying cause of a failed lifecycle step.
#[derive(Error, Debug)]
pub enum StepCause {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hook(#[from] HookError),

    /// The endpoint exists but the API server has not assigned it an address
    #[error("service has no cluster IP assigned")]
    NoClusterIp,
}

/// A lifecycle step failed; carries the step and the affected volume.
#[derive(Error, Debug)]
#[error("{step} failed for volume '{volume}': {cause}")]
pub struct LifecycleError {
    /// Step that failed
    pub step: LifecycleStep,
    /// Volume identifier being created or deleted
    pub volume: String,
    /// What went wrong
    #[source]
    pub cause: StepCause,
}

impl LifecycleError {
    pub fn new(step: LifecycleStep, volume: &str, cause: impl Into<StepCause>) -> Self {
        Self {
            step,
            volume: volume.to_string(),
            cause: cause.into(),
        }
    }
}

/// Errors returned by the provision and delete entry points.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The claim asks for something this provisioner does not support
    #[error("unsupported claim {claim}: {reason}")]
    UnsupportedClaim {
        /// Namespaced name of the claim
        claim: String,
        /// What is unsupported
        reason: String,
    },

    /// The volume handed to delete was not produced by this provisioner
    #[error("invalid volume '{volume}': {reason}")]
    InvalidVolume {
        /// Name of the volume
        volume: String,
        /// Why it cannot be handled
        reason: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
