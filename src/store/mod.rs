// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster object store abstraction.
//!
//! The provisioner only needs four primitive operations per resource kind
//! (get, create, delete, list) plus a metadata write-back (`replace`) used when
//! hooks mutate an object that already exists. Abstracting them behind
//! [`ObjectStore`] keeps the lifecycle, garbage collection and orchestration
//! logic independent of a live API server:
//!
//! - [`KubeStore`] talks to the cluster through `kube::Api`
//! - [`MemoryStore`] keeps objects in process and is used by the test suite
//!
//! "Absent" and "already present" are reported as [`StoreError::NotFound`]
//! and [`StoreError::AlreadyExists`] so callers can turn them into success.

use crate::errors::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};
use k8s_openapi::api::storage::v1::StorageClass;

pub mod kube_store;
pub mod memory;

pub use self::kube_store::KubeStore;
pub use self::memory::MemoryStore;

/// CRUD access to one resource kind.
///
/// `namespace` is ignored for cluster-scoped kinds. For `list`, `None` means
/// all namespaces and an empty selector matches everything.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Fetch an object, `Ok(None)` when it does not exist.
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError>;

    /// Persist a new object.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] when an object with the same name exists.
    async fn create(&self, object: &K) -> Result<K, StoreError>;

    /// Delete an object.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the object does not exist.
    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError>;

    /// List objects matching an equality-based label selector.
    async fn list(&self, namespace: Option<&str>, label_selector: &str)
        -> Result<Vec<K>, StoreError>;

    /// Overwrite an existing object (used to persist hook metadata changes).
    async fn replace(&self, object: &K) -> Result<K, StoreError>;
}

/// Every kind the provisioner reads or writes.
pub trait ClusterStore:
    ObjectStore<PersistentVolumeClaim>
    + ObjectStore<PersistentVolume>
    + ObjectStore<Deployment>
    + ObjectStore<Service>
    + ObjectStore<StorageClass>
    + 'static
{
}

impl<T> ClusterStore for T where
    T: ObjectStore<PersistentVolumeClaim>
        + ObjectStore<PersistentVolume>
        + ObjectStore<Deployment>
        + ObjectStore<Service>
        + ObjectStore<StorageClass>
        + 'static
{
}

/// Render `namespace/name` (or just `name`) for logs and errors.
#[must_use]
pub fn qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}
