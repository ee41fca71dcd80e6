// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for the NFS provisioner against a live cluster
//!
//! Run with: cargo test --test provisioner_integration -- --ignored
//!
//! `TEST_BACKEND_STORAGE_CLASS` selects the class backing claims are created
//! on (default `standard`).

mod common;

use common::{cleanup_test_namespace, create_test_namespace, get_kube_client_or_skip, wait_until};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Service, ServicePort, ServiceSpec,
    VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use nfs_provisioner::config::ProvisionerConfig;
use nfs_provisioner::constants::DEFAULT_PROVISIONER_NAME;
use nfs_provisioner::errors::StoreError;
use nfs_provisioner::hooks::HookEngine;
use nfs_provisioner::provisioner::volume_config::merge_config;
use nfs_provisioner::provisioner::LifecycleManager;
use nfs_provisioner::store::{KubeStore, ObjectStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn backend_storage_class() -> String {
    std::env::var("TEST_BACKEND_STORAGE_CLASS").unwrap_or_else(|_| "standard".to_string())
}

fn probe_service(namespace: &str, name: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "test".to_string(),
                "store".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: 2049,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_kube_store_maps_conflicts_and_absence() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let namespace = "nfs-provisioner-store-test";
    create_test_namespace(&client, namespace).await.unwrap();

    let store = KubeStore::new(client.clone());
    let service = probe_service(namespace, "probe");

    let created: Service = store.create(&service).await.unwrap();
    assert!(created.metadata.uid.is_some());

    let conflict = ObjectStore::<Service>::create(&store, &service).await;
    assert!(matches!(conflict, Err(StoreError::AlreadyExists { .. })));

    let listed: Vec<Service> = store.list(Some(namespace), "test=store").await.unwrap();
    assert_eq!(listed.len(), 1);

    ObjectStore::<Service>::delete(&store, Some(namespace), "probe")
        .await
        .unwrap();
    let absent: Option<Service> = store.get(Some(namespace), "probe").await.unwrap();
    assert!(absent.is_none());

    let missing = ObjectStore::<Service>::delete(&store, Some(namespace), "probe").await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));

    cleanup_test_namespace(&client, namespace).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn test_lifecycle_creates_and_deletes_backing_resources() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let namespace = "nfs-provisioner-lifecycle-test";
    create_test_namespace(&client, namespace).await.unwrap();

    let config = Arc::new(ProvisionerConfig {
        namespace: namespace.to_string(),
        default_backend_storage_class: Some(backend_storage_class()),
        ..ProvisionerConfig::default()
    });
    let store = Arc::new(KubeStore::new(client.clone()));
    let lifecycle = LifecycleManager::new(
        store.clone(),
        Arc::new(HookEngine::default()),
        config.clone(),
    );

    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("integration-uid".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some("nfs".to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("1Gi".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    let class = StorageClass {
        metadata: ObjectMeta {
            name: Some("nfs".to_string()),
            ..Default::default()
        },
        provisioner: DEFAULT_PROVISIONER_NAME.to_string(),
        ..Default::default()
    };
    let volume = merge_config("pvc-integration", &claim, &class, &config).unwrap();

    let address = lifecycle.create_all("pvc-integration", &volume).await.unwrap();
    assert_eq!(
        address,
        format!("nfs-pvc-integration.{namespace}.svc.cluster.local")
    );

    // Second run adopts everything
    lifecycle.create_all("pvc-integration", &volume).await.unwrap();

    lifecycle.delete_all("pvc-integration").await.unwrap();

    let gone = wait_until(Duration::from_secs(60), || {
        let store = store.clone();
        async move {
            let deployment: Option<Deployment> = store
                .get(Some(namespace), "nfs-pvc-integration")
                .await
                .unwrap_or(None);
            deployment.is_none()
        }
    })
    .await;
    assert!(gone, "server deployment should be deleted");

    cleanup_test_namespace(&client, namespace).await.unwrap();
}
