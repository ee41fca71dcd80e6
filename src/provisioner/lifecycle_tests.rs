// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `lifecycle.rs`

use super::LifecycleManager;
use crate::config::ProvisionerConfig;
use crate::errors::{LifecycleStep, StepCause};
use crate::hooks::HookEngine;
use crate::provisioner::test_fixtures::{provisioner_config, shared_config, volume_config, NAMESPACE};
use crate::store::memory::Operation;
use crate::store::{MemoryStore, ObjectStore};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;

const HOOKS: &str = r#"
version: v1
hooks:
  - name: tag
    event: Create
    action: Add
    backendPersistentVolumeClaim:
      annotations:
        example.com/volume: "yes"
    service:
      finalizers:
        - example.com/keep
  - name: untag
    event: Delete
    action: Remove
    service:
      finalizers:
        - example.com/keep
"#;

fn manager(store: &Arc<MemoryStore>) -> LifecycleManager {
    LifecycleManager::new(
        store.clone(),
        Arc::new(HookEngine::default()),
        shared_config(),
    )
}

fn manager_with(
    store: &Arc<MemoryStore>,
    hooks: HookEngine,
    config: ProvisionerConfig,
) -> LifecycleManager {
    LifecycleManager::new(store.clone(), Arc::new(hooks), Arc::new(config))
}

fn assert_all_present(store: &MemoryStore, name: &str) {
    assert!(store.contains::<PersistentVolumeClaim>(Some(NAMESPACE), name));
    assert!(store.contains::<Deployment>(Some(NAMESPACE), name));
    assert!(store.contains::<Service>(Some(NAMESPACE), name));
}

#[tokio::test]
async fn test_create_all_creates_in_order() {
    let store = Arc::new(MemoryStore::new());
    let lifecycle = manager(&store);

    let address = lifecycle
        .create_all("pvc-1", &volume_config("pvc-1"))
        .await
        .unwrap();

    assert_eq!(address, "nfs-pvc-1.nfs-provisioner.svc.cluster.local");
    assert_all_present(&store, "nfs-pvc-1");
    assert_eq!(
        store.operations(),
        vec![
            "create PersistentVolumeClaim nfs-provisioner/nfs-pvc-1",
            "create Deployment nfs-provisioner/nfs-pvc-1",
            "create Service nfs-provisioner/nfs-pvc-1",
        ]
    );
}

#[tokio::test]
async fn test_create_all_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let lifecycle = manager(&store);
    let volume = volume_config("pvc-1");

    let first = lifecycle.create_all("pvc-1", &volume).await.unwrap();
    let second = lifecycle.create_all("pvc-1", &volume).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.count::<PersistentVolumeClaim>(), 1);
    assert_eq!(store.count::<Deployment>(), 1);
    assert_eq!(store.count::<Service>(), 1);
    assert_eq!(store.operations().len(), 3);
}

#[tokio::test]
async fn test_create_all_publishes_cluster_ip_when_configured() {
    let store = Arc::new(MemoryStore::new());
    let config = ProvisionerConfig {
        use_cluster_ip: true,
        ..provisioner_config()
    };
    let lifecycle = manager_with(&store, HookEngine::default(), config);
    let volume = volume_config("pvc-1");

    let first = lifecycle.create_all("pvc-1", &volume).await.unwrap();
    assert_eq!(first, "10.96.0.10");

    let second = lifecycle.create_all("pvc-1", &volume).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_cluster_ip_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    store.insert(Service {
        metadata: ObjectMeta {
            name: Some("nfs-pvc-1".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });
    let config = ProvisionerConfig {
        use_cluster_ip: true,
        ..provisioner_config()
    };
    let lifecycle = manager_with(&store, HookEngine::default(), config);

    let err = lifecycle
        .create_all("pvc-1", &volume_config("pvc-1"))
        .await
        .unwrap_err();
    assert_eq!(err.step, LifecycleStep::ResolveAddress);
    assert!(matches!(err.cause, StepCause::NoClusterIp));
}

#[tokio::test]
async fn test_existing_claim_is_adopted_unchanged() {
    let store = Arc::new(MemoryStore::new());
    store.insert(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("nfs-pvc-1".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                "pre-existing".to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    });
    let lifecycle = manager(&store);

    lifecycle
        .create_all("pvc-1", &volume_config("pvc-1"))
        .await
        .unwrap();

    let claim: PersistentVolumeClaim = store
        .get(Some(NAMESPACE), "nfs-pvc-1")
        .await
        .unwrap()
        .unwrap();
    let labels = claim.metadata.labels.unwrap();
    assert_eq!(labels.len(), 1);
    assert!(labels.contains_key("pre-existing"));
    assert!(!store
        .operations()
        .iter()
        .any(|op| op.starts_with("create PersistentVolumeClaim")));
}

#[tokio::test]
async fn test_failed_step_is_reported_and_retry_converges() {
    let store = Arc::new(MemoryStore::new());
    let lifecycle = manager(&store);
    let volume = volume_config("pvc-1");
    store.fail_on(Operation::Create, "Deployment", "quota exceeded");

    let err = lifecycle.create_all("pvc-1", &volume).await.unwrap_err();
    assert_eq!(err.step, LifecycleStep::CreateServerWorkload);
    assert_eq!(err.volume, "pvc-1");
    assert!(err.to_string().contains("create server workload failed for volume 'pvc-1'"));

    // No rollback of the claim created before the failure
    assert!(store.contains::<PersistentVolumeClaim>(Some(NAMESPACE), "nfs-pvc-1"));
    assert!(!store.contains::<Service>(Some(NAMESPACE), "nfs-pvc-1"));

    store.clear_failures();
    lifecycle.create_all("pvc-1", &volume).await.unwrap();
    assert_all_present(&store, "nfs-pvc-1");
    assert_eq!(store.count::<PersistentVolumeClaim>(), 1);
}

#[tokio::test]
async fn test_delete_all_without_resources_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let lifecycle = manager(&store);

    lifecycle.delete_all("pvc-404").await.unwrap();
    assert!(store.operations().is_empty());
}

#[tokio::test]
async fn test_delete_all_runs_in_reverse_order() {
    let store = Arc::new(MemoryStore::new());
    let lifecycle = manager(&store);
    lifecycle
        .create_all("pvc-1", &volume_config("pvc-1"))
        .await
        .unwrap();

    lifecycle.delete_all("pvc-1").await.unwrap();
    lifecycle.delete_all("pvc-1").await.unwrap();

    assert_eq!(
        store.operations()[3..],
        [
            "delete Service nfs-provisioner/nfs-pvc-1",
            "delete Deployment nfs-provisioner/nfs-pvc-1",
            "delete PersistentVolumeClaim nfs-provisioner/nfs-pvc-1",
        ]
    );
    assert_eq!(store.count::<PersistentVolumeClaim>(), 0);
    assert_eq!(store.count::<Deployment>(), 0);
    assert_eq!(store.count::<Service>(), 0);
}

#[tokio::test]
async fn test_delete_failure_stops_the_sequence() {
    let store = Arc::new(MemoryStore::new());
    let lifecycle = manager(&store);
    lifecycle
        .create_all("pvc-1", &volume_config("pvc-1"))
        .await
        .unwrap();
    store.fail_on(Operation::Delete, "Deployment", "forbidden");

    let err = lifecycle.delete_all("pvc-1").await.unwrap_err();
    assert_eq!(err.step, LifecycleStep::DeleteServerWorkload);

    assert!(!store.contains::<Service>(Some(NAMESPACE), "nfs-pvc-1"));
    assert!(store.contains::<Deployment>(Some(NAMESPACE), "nfs-pvc-1"));
    assert!(store.contains::<PersistentVolumeClaim>(Some(NAMESPACE), "nfs-pvc-1"));
}

#[tokio::test]
async fn test_hooks_run_around_create_and_delete() {
    let store = Arc::new(MemoryStore::new());
    let hooks = HookEngine::parse(HOOKS.as_bytes()).unwrap();
    let lifecycle = manager_with(&store, hooks, provisioner_config());

    lifecycle
        .create_all("pvc-1", &volume_config("pvc-1"))
        .await
        .unwrap();

    let claim: PersistentVolumeClaim = store
        .get(Some(NAMESPACE), "nfs-pvc-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        claim
            .metadata
            .annotations
            .unwrap()
            .get("example.com/volume")
            .map(String::as_str),
        Some("yes")
    );
    let service: Service = store
        .get(Some(NAMESPACE), "nfs-pvc-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        service.metadata.finalizers,
        Some(vec!["example.com/keep".to_string()])
    );

    lifecycle.delete_all("pvc-1").await.unwrap();
    let ops = store.operations();
    let replace = ops
        .iter()
        .position(|op| op == "replace Service nfs-provisioner/nfs-pvc-1")
        .unwrap();
    let delete = ops
        .iter()
        .position(|op| op == "delete Service nfs-provisioner/nfs-pvc-1")
        .unwrap();
    assert!(replace < delete);
    // No delete hooks for the workload, so it is deleted without a write-back
    assert!(!ops.iter().any(|op| op.starts_with("replace Deployment")));
}
