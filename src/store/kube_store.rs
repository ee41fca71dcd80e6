// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ObjectStore`] implementation backed by the Kubernetes API server.
//!
//! Namespaced kinds go through `Api::namespaced`, cluster-scoped kinds through
//! `Api::all`. HTTP 404 becomes [`StoreError::NotFound`] and an `AlreadyExists`
//! conflict on create becomes [`StoreError::AlreadyExists`]; everything else
//! is passed through as [`StoreError::Api`].

use super::{qualified_name, ObjectStore};
use crate::constants::KUBE_LIST_PAGE_SIZE;
use crate::errors::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

/// Bounds shared by every kind served through the API server.
trait KubeObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> KubeObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Store talking to a live cluster.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced_api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn cluster_api<K>(&self, _namespace: Option<&str>) -> Api<K>
    where
        K: Resource,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

fn kind_of<K: KubeObject>() -> String {
    K::kind(&()).to_string()
}

async fn get_object<K: KubeObject>(
    api: &Api<K>,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<K>, StoreError> {
    debug!(kind = %kind_of::<K>(), name = %qualified_name(namespace, name), "Getting object");
    Ok(api.get_opt(name).await?)
}

async fn create_object<K: KubeObject>(api: &Api<K>, object: &K) -> Result<K, StoreError> {
    let name = object.meta().name.clone().ok_or_else(|| StoreError::MissingName {
        kind: kind_of::<K>(),
    })?;
    let namespace = object.namespace();

    match api.create(&PostParams::default(), object).await {
        Ok(created) => Ok(created),
        Err(kube::Error::Api(ae)) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            Err(StoreError::AlreadyExists {
                kind: kind_of::<K>(),
                name: qualified_name(namespace.as_deref(), &name),
            })
        }
        Err(e) => Err(e.into()),
    }
}

async fn delete_object<K: KubeObject>(
    api: &Api<K>,
    namespace: Option<&str>,
    name: &str,
) -> Result<(), StoreError> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Err(StoreError::NotFound {
            kind: kind_of::<K>(),
            name: qualified_name(namespace, name),
        }),
        Err(e) => Err(e.into()),
    }
}

async fn replace_object<K: KubeObject>(api: &Api<K>, object: &K) -> Result<K, StoreError> {
    let name = object.meta().name.clone().ok_or_else(|| StoreError::MissingName {
        kind: kind_of::<K>(),
    })?;
    let namespace = object.namespace();

    match api.replace(&name, &PostParams::default(), object).await {
        Ok(replaced) => Ok(replaced),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Err(StoreError::NotFound {
            kind: kind_of::<K>(),
            name: qualified_name(namespace.as_deref(), &name),
        }),
        Err(e) => Err(e.into()),
    }
}

/// List all objects with automatic pagination.
///
/// Fetches resources in pages to keep memory usage and API server load low
/// when a provisioner manages many volumes.
async fn list_all_paginated<K: KubeObject>(
    api: &Api<K>,
    label_selector: &str,
) -> Result<Vec<K>, StoreError> {
    let mut list_params = ListParams::default();
    list_params.limit = Some(KUBE_LIST_PAGE_SIZE);
    if !label_selector.is_empty() {
        list_params.label_selector = Some(label_selector.to_string());
    }

    let mut all_items = Vec::new();
    let mut page_count = 0;

    loop {
        page_count += 1;
        let result = api.list(&list_params).await?;

        let item_count = result.items.len();
        all_items.extend(result.items);

        debug!(
            kind = %kind_of::<K>(),
            page = page_count,
            items_in_page = item_count,
            total_items = all_items.len(),
            "Fetched page from Kubernetes API"
        );

        match result.metadata.continue_ {
            Some(token) if !token.is_empty() => list_params.continue_token = Some(token),
            _ => break,
        }
    }

    Ok(all_items)
}

macro_rules! impl_object_store {
    ($kind:ty, $api:ident) => {
        #[async_trait]
        impl ObjectStore<$kind> for KubeStore {
            async fn get(
                &self,
                namespace: Option<&str>,
                name: &str,
            ) -> Result<Option<$kind>, StoreError> {
                get_object(&self.$api::<$kind>(namespace), namespace, name).await
            }

            async fn create(&self, object: &$kind) -> Result<$kind, StoreError> {
                let namespace = object.namespace();
                create_object(&self.$api::<$kind>(namespace.as_deref()), object).await
            }

            async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
                delete_object(&self.$api::<$kind>(namespace), namespace, name).await
            }

            async fn list(
                &self,
                namespace: Option<&str>,
                label_selector: &str,
            ) -> Result<Vec<$kind>, StoreError> {
                list_all_paginated(&self.$api::<$kind>(namespace), label_selector).await
            }

            async fn replace(&self, object: &$kind) -> Result<$kind, StoreError> {
                let namespace = object.namespace();
                replace_object(&self.$api::<$kind>(namespace.as_deref()), object).await
            }
        }
    };
}

impl_object_store!(PersistentVolumeClaim, namespaced_api);
impl_object_store!(Deployment, namespaced_api);
impl_object_store!(Service, namespaced_api);
impl_object_store!(PersistentVolume, cluster_api);
impl_object_store!(StorageClass, cluster_api);
