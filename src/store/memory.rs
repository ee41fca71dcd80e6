// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process [`ObjectStore`] used by tests and dry runs.
//!
//! Objects are kept as JSON keyed by `(kind, namespace, name)`. The store
//! mimics the API server closely enough for the provisioner's needs:
//!
//! - `create` assigns a `uid` and `resourceVersion`, and a cluster IP to
//!   Services that do not request one
//! - `create` of an existing name fails with `AlreadyExists`
//! - `delete` of a missing name fails with `NotFound`
//! - `list` understands equality-based label selectors (`k=v`, `k==v`,
//!   `k!=v`, `k`, `!k`)
//!
//! Failures can be injected per operation and kind, and every mutating call is
//! recorded so tests can assert on ordering.

use super::{qualified_name, ObjectStore};
use crate::constants::KIND_SERVICE;
use crate::errors::StoreError;
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Store operations, used for failure injection and the call log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Delete,
    List,
    Replace,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Replace => "replace",
        };
        f.write_str(op)
    }
}

type ObjectKey = (String, String, String);

struct InjectedFailure {
    operation: Operation,
    kind: String,
    reason: String,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    failures: Vec<InjectedFailure>,
    operations: Vec<String>,
    next_uid: u64,
    next_resource_version: u64,
    next_cluster_ip: u32,
}

/// Thread-safe in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn key_of(kind: &str, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        kind.to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn decode<K: DeserializeOwned>(kind: &str, name: &str, value: &Value) -> Result<K, StoreError> {
    serde_json::from_value(value.clone()).map_err(|e| StoreError::Unavailable {
        kind: kind.to_string(),
        name: name.to_string(),
        operation: "decode".to_string(),
        reason: e.to_string(),
    })
}

fn encode<K: Serialize>(kind: &str, name: &str, object: &K) -> Result<Value, StoreError> {
    serde_json::to_value(object).map_err(|e| StoreError::Unavailable {
        kind: kind.to_string(),
        name: name.to_string(),
        operation: "encode".to_string(),
        reason: e.to_string(),
    })
}

/// Evaluate an equality-based label selector.
fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) =
                term.split_once("==").or_else(|| term.split_once('='))
            {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                !labels.contains_key(key.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

impl Inner {
    fn check_failure(
        &mut self,
        operation: Operation,
        kind: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        if let Some(failure) = self
            .failures
            .iter()
            .find(|f| f.operation == operation && f.kind == kind)
        {
            return Err(StoreError::Unavailable {
                kind: kind.to_string(),
                name: name.to_string(),
                operation: operation.to_string(),
                reason: failure.reason.clone(),
            });
        }
        Ok(())
    }

    fn record(&mut self, operation: Operation, kind: &str, name: &str) {
        self.operations.push(format!("{operation} {kind} {name}"));
    }

    fn stamp<K: Resource>(&mut self, object: &mut K) {
        self.next_resource_version += 1;
        let meta = object.meta_mut();
        if meta.uid.is_none() {
            self.next_uid += 1;
            meta.uid = Some(format!("uid-{}", self.next_uid));
        }
        meta.resource_version = Some(self.next_resource_version.to_string());
    }

    fn assign_cluster_ip(&mut self, value: &mut Value) {
        if let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) {
            if !spec.contains_key("clusterIP") {
                self.next_cluster_ip += 1;
                spec.insert(
                    "clusterIP".to_string(),
                    Value::String(format!("10.96.0.{}", self.next_cluster_ip + 9)),
                );
            }
        }
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing failure injection and the call log.
    ///
    /// Existing objects with the same name are overwritten.
    pub fn insert<K>(&self, mut object: K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let kind = kind_of::<K>();
        let name = object.meta().name.clone().unwrap_or_default();
        let namespace = object.meta().namespace.clone();
        let mut inner = self.inner.lock();
        inner.stamp(&mut object);
        if let Ok(value) = encode(&kind, &name, &object) {
            inner
                .objects
                .insert(key_of(&kind, namespace.as_deref(), &name), value);
        }
    }

    /// Whether an object of kind `K` exists.
    #[must_use]
    pub fn contains<K: Resource<DynamicType = ()>>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> bool {
        self.inner
            .lock()
            .objects
            .contains_key(&key_of(&kind_of::<K>(), namespace, name))
    }

    /// Number of stored objects of kind `K` across all namespaces.
    #[must_use]
    pub fn count<K: Resource<DynamicType = ()>>(&self) -> usize {
        let kind = kind_of::<K>();
        self.inner
            .lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    /// Make every `operation` on `kind` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_on(&self, operation: Operation, kind: &str, reason: &str) {
        self.inner.lock().failures.push(InjectedFailure {
            operation,
            kind: kind.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// Mutating calls seen so far, formatted as `"<op> <Kind> <ns/name>"`.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.inner.lock().operations.clone()
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, StoreError> {
        let kind = kind_of::<K>();
        let qualified = qualified_name(namespace, name);
        let mut inner = self.inner.lock();
        inner.check_failure(Operation::Get, &kind, &qualified)?;

        inner
            .objects
            .get(&key_of(&kind, namespace, name))
            .map(|value| decode(&kind, &qualified, value))
            .transpose()
    }

    async fn create(&self, object: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::MissingName { kind: kind.clone() })?;
        let namespace = object.namespace();
        let qualified = qualified_name(namespace.as_deref(), &name);
        let key = key_of(&kind, namespace.as_deref(), &name);

        let mut inner = self.inner.lock();
        inner.check_failure(Operation::Create, &kind, &qualified)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind,
                name: qualified,
            });
        }

        let mut stored = object.clone();
        inner.stamp(&mut stored);
        let mut value = encode(&kind, &qualified, &stored)?;
        if kind == KIND_SERVICE {
            inner.assign_cluster_ip(&mut value);
        }
        let created = decode(&kind, &qualified, &value)?;

        inner.objects.insert(key, value);
        inner.record(Operation::Create, &kind, &qualified);
        Ok(created)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        let kind = kind_of::<K>();
        let qualified = qualified_name(namespace, name);
        let mut inner = self.inner.lock();
        inner.check_failure(Operation::Delete, &kind, &qualified)?;

        if inner
            .objects
            .remove(&key_of(&kind, namespace, name))
            .is_none()
        {
            return Err(StoreError::NotFound {
                kind,
                name: qualified,
            });
        }
        inner.record(Operation::Delete, &kind, &qualified);
        Ok(())
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let kind = kind_of::<K>();
        let mut inner = self.inner.lock();
        inner.check_failure(Operation::List, &kind, namespace.unwrap_or("*"))?;

        let mut items = Vec::new();
        for ((k, ns, name), value) in &inner.objects {
            if *k != kind || namespace.is_some_and(|wanted| wanted != ns.as_str()) {
                continue;
            }
            let object: K = decode(&kind, &qualified_name(Some(ns), name), value)?;
            if matches_selector(object.labels(), label_selector) {
                items.push(object);
            }
        }
        Ok(items)
    }

    async fn replace(&self, object: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| StoreError::MissingName { kind: kind.clone() })?;
        let namespace = object.namespace();
        let qualified = qualified_name(namespace.as_deref(), &name);
        let key = key_of(&kind, namespace.as_deref(), &name);

        let mut inner = self.inner.lock();
        inner.check_failure(Operation::Replace, &kind, &qualified)?;
        if !inner.objects.contains_key(&key) {
            return Err(StoreError::NotFound {
                kind,
                name: qualified,
            });
        }

        let mut stored = object.clone();
        inner.stamp(&mut stored);
        let value = encode(&kind, &qualified, &stored)?;
        let replaced = decode(&kind, &qualified, &value)?;
        inner.objects.insert(key, value);
        inner.record(Operation::Replace, &kind, &qualified);
        Ok(replaced)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
