// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `memory.rs`

use super::{matches_selector, MemoryStore, Operation};
use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

fn claim(namespace: &str, name: &str, labels: &[(&str, &str)]) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_assigns_uid_and_rejects_duplicates() {
    let store = MemoryStore::new();

    let created = ObjectStore::<PersistentVolumeClaim>::create(&store, &claim("ns", "a", &[]))
        .await
        .unwrap();
    assert!(created.metadata.uid.is_some());
    assert!(created.metadata.resource_version.is_some());

    let err = ObjectStore::<PersistentVolumeClaim>::create(&store, &claim("ns", "a", &[]))
        .await
        .unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(store.count::<PersistentVolumeClaim>(), 1);
}

#[tokio::test]
async fn test_get_and_delete() {
    let store = MemoryStore::new();
    store.insert(claim("ns", "a", &[]));

    let found: Option<PersistentVolumeClaim> = store.get(Some("ns"), "a").await.unwrap();
    assert!(found.is_some());

    let missing: Option<PersistentVolumeClaim> = store.get(Some("other"), "a").await.unwrap();
    assert!(missing.is_none());

    ObjectStore::<PersistentVolumeClaim>::delete(&store, Some("ns"), "a")
        .await
        .unwrap();
    let err = ObjectStore::<PersistentVolumeClaim>::delete(&store, Some("ns"), "a")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_kinds_are_isolated() {
    let store = MemoryStore::new();
    store.insert(claim("ns", "a", &[]));

    assert!(store.contains::<PersistentVolumeClaim>(Some("ns"), "a"));
    assert!(!store.contains::<Service>(Some("ns"), "a"));
    assert!(!store.contains::<PersistentVolume>(None, "a"));
}

#[tokio::test]
async fn test_list_filters_by_namespace_and_selector() {
    let store = MemoryStore::new();
    store.insert(claim("ns1", "a", &[("app", "nfs")]));
    store.insert(claim("ns1", "b", &[("app", "other")]));
    store.insert(claim("ns2", "c", &[("app", "nfs")]));

    let all: Vec<PersistentVolumeClaim> = store.list(None, "app=nfs").await.unwrap();
    assert_eq!(all.len(), 2);

    let scoped: Vec<PersistentVolumeClaim> = store.list(Some("ns1"), "app=nfs").await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].metadata.name.as_deref(), Some("a"));

    let everything: Vec<PersistentVolumeClaim> = store.list(None, "").await.unwrap();
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn test_service_gets_cluster_ip() {
    let store = MemoryStore::new();
    let service = Service {
        metadata: ObjectMeta {
            name: Some("svc".to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec::default()),
        ..Default::default()
    };

    let created = ObjectStore::<Service>::create(&store, &service).await.unwrap();
    let ip = created.spec.and_then(|s| s.cluster_ip);
    assert!(ip.is_some_and(|ip| ip.starts_with("10.96.0.")));
}

#[tokio::test]
async fn test_injected_failure_and_clear() {
    let store = MemoryStore::new();
    store.fail_on(Operation::Create, "PersistentVolumeClaim", "boom");

    let err = ObjectStore::<PersistentVolumeClaim>::create(&store, &claim("ns", "a", &[]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"));

    store.clear_failures();
    ObjectStore::<PersistentVolumeClaim>::create(&store, &claim("ns", "a", &[]))
        .await
        .unwrap();
    assert_eq!(store.operations(), vec!["create PersistentVolumeClaim ns/a"]);
}

#[tokio::test]
async fn test_replace_requires_existing_object() {
    let store = MemoryStore::new();

    let err = ObjectStore::<PersistentVolumeClaim>::replace(&store, &claim("ns", "a", &[]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    store.insert(claim("ns", "a", &[]));
    let replaced = ObjectStore::<PersistentVolumeClaim>::replace(
        &store,
        &claim("ns", "a", &[("updated", "true")]),
    )
    .await
    .unwrap();
    assert_eq!(
        replaced.metadata.labels.unwrap().get("updated").map(String::as_str),
        Some("true")
    );
}

#[test]
fn test_matches_selector_forms() {
    let labels = BTreeMap::from([
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
    ]);

    assert!(matches_selector(&labels, ""));
    assert!(matches_selector(&labels, "a=1"));
    assert!(matches_selector(&labels, "a==1,b=2"));
    assert!(matches_selector(&labels, "a!=2"));
    assert!(matches_selector(&labels, "a"));
    assert!(matches_selector(&labels, "!c"));
    assert!(!matches_selector(&labels, "a=2"));
    assert!(!matches_selector(&labels, "c"));
    assert!(!matches_selector(&labels, "!a"));
}
