// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! NFS backing resource builders
//!
//! This module provides functions to build the Kubernetes resources that make
//! up one NFS volume: the backing `PersistentVolumeClaim`, the server
//! `Deployment`, the `Service` in front of it, and the `PersistentVolume`
//! handed back to the claim's namespace. All functions are pure and easily
//! testable.

use crate::affinity::NodeAffinityRule;
use crate::constants::{
    ACCESS_MODE_RWO, ANNOTATION_PROVISIONED_BY, CONTAINER_NAME_NFS_SERVER,
    DEPLOYMENT_STRATEGY_RECREATE, ENV_EXPORTS, ENV_EXPORT_MODE, ENV_EXPORT_OWNER,
    ENV_GRACE_SECONDS, ENV_LEASE_SECONDS, EXPORT_MOUNT_PATH, EXPORT_PATH,
    KIND_PERSISTENT_VOLUME_CLAIM, NFS_PORT, NFS_PORT_NAME, RECLAIM_POLICY_DELETE, RESOURCE_STORAGE,
    RPCBIND_PORT, RPCBIND_PORT_NAME, SERVICE_TYPE_CLUSTER_IP, VOLUME_EXPORT,
};
use crate::labels::{
    backing_name, APP_LABEL, APP_NAME_NFS_SERVER, COMPONENT_BACKING_CLAIM, COMPONENT_ENDPOINT,
    COMPONENT_SERVER, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_NAME, NFS_VOLUME_LABEL,
    OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL, OWNER_UID_LABEL,
};
use crate::provisioner::volume_config::EffectiveVolumeConfig;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, NFSVolumeSource, NodeAffinity, NodeSelector,
    NodeSelectorTerm, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PersistentVolumeSpec,
    PodSecurityContext, PodSpec, PodTemplateSpec, SecurityContext, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Builds the labels shared by every backing resource of a volume.
///
/// # Arguments
///
/// * `volume_id` - Identifier of the volume
/// * `component` - Value of `app.kubernetes.io/component`
#[must_use]
pub fn build_common_labels(volume_id: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_NAME.to_string(), APP_NAME_NFS_SERVER.to_string()),
        (K8S_INSTANCE.to_string(), backing_name(volume_id)),
        (K8S_COMPONENT.to_string(), component.to_string()),
        (
            K8S_MANAGED_BY.to_string(),
            crate::constants::CONTROLLER_NAME.to_string(),
        ),
    ])
}

/// Labels selecting the server pods of one volume.
///
/// Used both on the pod template and as the `Service` selector, so they must
/// stay stable for the lifetime of the volume.
#[must_use]
pub fn build_selector_labels(volume_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), APP_NAME_NFS_SERVER.to_string()),
        (NFS_VOLUME_LABEL.to_string(), volume_id.to_string()),
    ])
}

/// Builds the back-reference labels pointing at the claim that owns a volume.
///
/// Empty fields are left out so the garbage collector treats the claim as
/// unjudgeable rather than orphaned.
#[must_use]
pub fn build_owner_labels(config: &EffectiveVolumeConfig) -> BTreeMap<String, String> {
    let owner = &config.owner_claim;
    [
        (OWNER_NAMESPACE_LABEL, &owner.namespace),
        (OWNER_NAME_LABEL, &owner.name),
        (OWNER_UID_LABEL, &owner.uid),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(key, value)| (key.to_string(), value.clone()))
    .collect()
}

/// Builds the backing `PersistentVolumeClaim` holding the exported data.
///
/// The claim requests the effective capacity from the backend storage class
/// and carries the owner back-reference labels the garbage collector reads.
#[must_use]
pub fn build_backing_claim(namespace: &str, config: &EffectiveVolumeConfig) -> PersistentVolumeClaim {
    let mut labels = build_common_labels(&config.volume_id, COMPONENT_BACKING_CLAIM);
    labels.extend(build_owner_labels(config));

    let resources = config.capacity.as_ref().map(|capacity| VolumeResourceRequirements {
        requests: Some(BTreeMap::from([(
            RESOURCE_STORAGE.to_string(),
            capacity.clone(),
        )])),
        ..Default::default()
    });

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(backing_name(&config.volume_id)),
            namespace: Some(namespace.into()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE_RWO.into()]),
            storage_class_name: config.backend_storage_class.clone(),
            resources,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Converts parsed node affinity rules into a required scheduling constraint.
///
/// Returns `None` when there are no rules. All rules land in one term, so a
/// node must satisfy every rule.
#[must_use]
pub fn build_node_affinity(rules: &[NodeAffinityRule]) -> Option<Affinity> {
    if rules.is_empty() {
        return None;
    }

    Some(Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(
                        rules.iter().map(NodeAffinityRule::to_requirement).collect(),
                    ),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Builds the server container environment from the effective configuration.
fn build_server_env(config: &EffectiveVolumeConfig) -> Vec<EnvVar> {
    let mut env = vec![
        env_var(ENV_LEASE_SECONDS, config.lease_seconds.to_string()),
        env_var(ENV_GRACE_SECONDS, config.grace_seconds.to_string()),
    ];
    if let Some(exports) = &config.exports {
        env.push(env_var(ENV_EXPORTS, exports.as_str()));
    }
    if let Some(owner) = &config.owner {
        env.push(env_var(ENV_EXPORT_OWNER, owner.as_str()));
    }
    if let Some(mode) = &config.mode {
        env.push(env_var(ENV_EXPORT_MODE, mode.as_str()));
    }
    env
}

/// Builds the pod specification of the NFS server.
fn build_pod_spec(image: &str, config: &EffectiveVolumeConfig) -> PodSpec {
    let container = Container {
        name: CONTAINER_NAME_NFS_SERVER.into(),
        image: Some(image.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        ports: Some(vec![
            ContainerPort {
                name: Some(NFS_PORT_NAME.into()),
                container_port: i32::from(NFS_PORT),
                protocol: Some("TCP".into()),
                ..Default::default()
            },
            ContainerPort {
                name: Some(RPCBIND_PORT_NAME.into()),
                container_port: i32::from(RPCBIND_PORT),
                protocol: Some("TCP".into()),
                ..Default::default()
            },
        ]),
        env: Some(build_server_env(config)),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_EXPORT.into(),
            mount_path: EXPORT_MOUNT_PATH.into(),
            ..Default::default()
        }]),
        resources: config.resources.clone(),
        // The in-kernel server needs access to nfsd
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    PodSpec {
        containers: vec![container],
        volumes: Some(vec![Volume {
            name: VOLUME_EXPORT.into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: backing_name(&config.volume_id),
                read_only: None,
            }),
            ..Default::default()
        }]),
        security_context: config.group_id.map(|gid| PodSecurityContext {
            fs_group: Some(gid),
            ..Default::default()
        }),
        affinity: build_node_affinity(&config.node_affinity),
        ..Default::default()
    }
}

/// Builds the single-replica server `Deployment` of a volume.
///
/// The `Recreate` strategy guarantees the old pod releases the backing claim
/// before a new one mounts it.
#[must_use]
pub fn build_server_deployment(
    namespace: &str,
    image: &str,
    config: &EffectiveVolumeConfig,
) -> Deployment {
    let name = backing_name(&config.volume_id);
    debug!(
        name = %name,
        namespace = %namespace,
        image = %image,
        "Building NFS server Deployment"
    );

    let selector = build_selector_labels(&config.volume_id);
    let mut labels = build_common_labels(&config.volume_id, COMPONENT_SERVER);
    labels.extend(selector.clone());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.into()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            strategy: Some(DeploymentStrategy {
                type_: Some(DEPLOYMENT_STRATEGY_RECREATE.into()),
                rolling_update: None,
            }),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(image, config)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds the `ClusterIP` service exposing the NFS and port mapper ports.
#[must_use]
pub fn build_server_service(namespace: &str, config: &EffectiveVolumeConfig) -> Service {
    let mut labels = build_common_labels(&config.volume_id, COMPONENT_ENDPOINT);
    labels.extend(build_selector_labels(&config.volume_id));

    let port = |name: &str, number: u16| ServicePort {
        name: Some(name.into()),
        port: i32::from(number),
        target_port: Some(IntOrString::Int(i32::from(number))),
        protocol: Some("TCP".into()),
        ..Default::default()
    };

    Service {
        metadata: ObjectMeta {
            name: Some(backing_name(&config.volume_id)),
            namespace: Some(namespace.into()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(build_selector_labels(&config.volume_id)),
            ports: Some(vec![
                port(NFS_PORT_NAME, NFS_PORT),
                port(RPCBIND_PORT_NAME, RPCBIND_PORT),
            ]),
            type_: Some(SERVICE_TYPE_CLUSTER_IP.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Cluster-local DNS name of a service.
#[must_use]
pub fn service_dns_name(service_name: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("{service_name}.{namespace}.svc.{cluster_domain}")
}

/// Builds the `PersistentVolume` returned to the requesting claim.
///
/// The volume is named after the volume identifier, pre-bound to the claim and
/// points at the NFS export root of `server`.
#[must_use]
pub fn build_persistent_volume(
    config: &EffectiveVolumeConfig,
    claim: &PersistentVolumeClaim,
    class: &StorageClass,
    server: &str,
    provisioner_name: &str,
) -> PersistentVolume {
    let access_modes = claim
        .spec
        .as_ref()
        .and_then(|spec| spec.access_modes.clone())
        .filter(|modes| !modes.is_empty());

    let capacity = config.capacity.as_ref().map(|capacity| {
        BTreeMap::from([(RESOURCE_STORAGE.to_string(), capacity.clone())])
    });

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(config.volume_id.clone()),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_PROVISIONED_BY.to_string(),
                provisioner_name.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity,
            access_modes,
            persistent_volume_reclaim_policy: Some(
                class
                    .reclaim_policy
                    .clone()
                    .unwrap_or_else(|| RECLAIM_POLICY_DELETE.to_string()),
            ),
            mount_options: class.mount_options.clone(),
            storage_class_name: Some(class.name_any()),
            claim_ref: Some(ObjectReference {
                api_version: Some("v1".into()),
                kind: Some(KIND_PERSISTENT_VOLUME_CLAIM.into()),
                namespace: claim.namespace(),
                name: Some(claim.name_any()),
                uid: claim.uid(),
                ..Default::default()
            }),
            nfs: Some(NFSVolumeSource {
                server: server.into(),
                path: EXPORT_PATH.into(),
                read_only: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "nfs_resources_tests.rs"]
mod nfs_resources_tests;
