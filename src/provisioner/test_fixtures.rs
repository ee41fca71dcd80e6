// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared builders for provisioner unit tests.

use crate::config::{ProvisionerConfig, ServerKind};
use crate::constants::DEFAULT_PROVISIONER_NAME;
use crate::labels::CLASS_CONFIG_ANNOTATION;
use crate::provisioner::volume_config::{ClaimOwner, EffectiveVolumeConfig};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const NAMESPACE: &str = "nfs-provisioner";

pub fn provisioner_config() -> ProvisionerConfig {
    ProvisionerConfig {
        default_backend_storage_class: Some("standard".to_string()),
        ..ProvisionerConfig::default()
    }
}

pub fn shared_config() -> Arc<ProvisionerConfig> {
    Arc::new(provisioner_config())
}

pub fn volume_config(volume_id: &str) -> EffectiveVolumeConfig {
    EffectiveVolumeConfig {
        volume_id: volume_id.to_string(),
        owner_claim: ClaimOwner {
            namespace: "apps".to_string(),
            name: "data".to_string(),
            uid: "u1".to_string(),
        },
        storage_class: "nfs".to_string(),
        server_kind: ServerKind::Kernel,
        backend_storage_class: Some("standard".to_string()),
        exports: None,
        lease_seconds: 90,
        grace_seconds: 90,
        capacity: Some(Quantity("1Gi".to_string())),
        group_id: None,
        owner: None,
        mode: None,
        resources: None,
        node_affinity: Vec::new(),
    }
}

pub fn owning_claim(namespace: &str, name: &str, uid: &str, class: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(class.to_string()),
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
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
    }
}

pub fn storage_class(name: &str, config: Option<&str>) -> StorageClass {
    StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: config.map(|c| {
                BTreeMap::from([(CLASS_CONFIG_ANNOTATION.to_string(), c.to_string())])
            }),
            ..Default::default()
        },
        provisioner: DEFAULT_PROVISIONER_NAME.to_string(),
        ..Default::default()
    }
}
