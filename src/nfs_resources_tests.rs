// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `nfs_resources.rs`

#[cfg(test)]
mod tests {
    use crate::affinity::{parse_node_affinity, AffinityOperator};
    use crate::config::ServerKind;
    use crate::labels::{
        APP_LABEL, K8S_MANAGED_BY, NFS_VOLUME_LABEL, OWNER_NAMESPACE_LABEL, OWNER_NAME_LABEL,
        OWNER_UID_LABEL,
    };
    use crate::nfs_resources::{
        build_backing_claim, build_node_affinity, build_persistent_volume,
        build_server_deployment, build_server_service, service_dns_name,
    };
    use crate::provisioner::volume_config::{ClaimOwner, EffectiveVolumeConfig};
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec};
    use k8s_openapi::api::storage::v1::StorageClass;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config() -> EffectiveVolumeConfig {
        EffectiveVolumeConfig {
            volume_id: "pvc-123".to_string(),
            owner_claim: ClaimOwner {
                namespace: "apps".to_string(),
                name: "data".to_string(),
                uid: "u1".to_string(),
            },
            storage_class: "nfs".to_string(),
            server_kind: ServerKind::Kernel,
            backend_storage_class: Some("fast".to_string()),
            exports: None,
            lease_seconds: 90,
            grace_seconds: 90,
            capacity: Some(Quantity("5Gi".to_string())),
            group_id: None,
            owner: None,
            mode: None,
            resources: None,
            node_affinity: Vec::new(),
        }
    }

    #[test]
    fn test_backing_claim_carries_owner_labels() {
        let claim = build_backing_claim("nfs-system", &config());

        assert_eq!(claim.metadata.name.as_deref(), Some("nfs-pvc-123"));
        assert_eq!(claim.metadata.namespace.as_deref(), Some("nfs-system"));

        let labels = claim.metadata.labels.unwrap();
        assert_eq!(labels.get(OWNER_NAMESPACE_LABEL).map(String::as_str), Some("apps"));
        assert_eq!(labels.get(OWNER_NAME_LABEL).map(String::as_str), Some("data"));
        assert_eq!(labels.get(OWNER_UID_LABEL).map(String::as_str), Some("u1"));
        assert_eq!(
            labels.get(K8S_MANAGED_BY).map(String::as_str),
            Some("nfs-provisioner")
        );

        let spec = claim.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap().get("storage"),
            Some(&Quantity("5Gi".to_string()))
        );
    }

    #[test]
    fn test_backing_claim_omits_empty_owner_fields() {
        let mut cfg = config();
        cfg.owner_claim.uid = String::new();

        let labels = build_backing_claim("nfs-system", &cfg).metadata.labels.unwrap();
        assert!(!labels.contains_key(OWNER_UID_LABEL));
        assert!(labels.contains_key(OWNER_NAME_LABEL));
    }

    #[test]
    fn test_deployment_shape() {
        let mut cfg = config();
        cfg.lease_seconds = 30;
        cfg.exports = Some("/exports *(rw)".to_string());
        cfg.owner = Some("1000:1000".to_string());
        cfg.mode = Some("0775".to_string());
        cfg.group_id = Some(2000);

        let deployment = build_server_deployment("nfs-system", "nfs:1", &cfg);
        assert_eq!(deployment.metadata.name.as_deref(), Some("nfs-pvc-123"));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.strategy.and_then(|s| s.type_).as_deref(),
            Some("Recreate")
        );

        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector.get(APP_LABEL).map(String::as_str), Some("nfs-server"));
        assert_eq!(
            selector.get(NFS_VOLUME_LABEL).map(String::as_str),
            Some("pvc-123")
        );

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.security_context.unwrap().fs_group, Some(2000));
        assert!(pod.affinity.is_none());

        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(
            volume
                .persistent_volume_claim
                .as_ref()
                .map(|c| c.claim_name.as_str()),
            Some("nfs-pvc-123")
        );

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("nfs:1"));
        assert_eq!(
            container.security_context.as_ref().and_then(|s| s.privileged),
            Some(true)
        );

        let env: Vec<(String, String)> = container
            .env
            .clone()
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect();
        assert!(env.contains(&("NFS_LEASE_SECONDS".to_string(), "30".to_string())));
        assert!(env.contains(&("NFS_GRACE_SECONDS".to_string(), "90".to_string())));
        assert!(env.contains(&("NFS_EXPORTS".to_string(), "/exports *(rw)".to_string())));
        assert!(env.contains(&("NFS_EXPORT_OWNER".to_string(), "1000:1000".to_string())));
        assert!(env.contains(&("NFS_EXPORT_MODE".to_string(), "0775".to_string())));
    }

    #[test]
    fn test_deployment_without_optional_settings() {
        let pod = build_server_deployment("nfs-system", "nfs:1", &config())
            .spec
            .unwrap()
            .template
            .spec
            .unwrap();

        assert!(pod.security_context.is_none());
        let env = pod.containers[0].env.clone().unwrap();
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_service_exposes_both_ports() {
        let service = build_server_service("nfs-system", &config());
        let spec = service.spec.unwrap();

        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let ports: Vec<(Option<String>, i32)> = spec
            .ports
            .unwrap()
            .into_iter()
            .map(|p| (p.name, p.port))
            .collect();
        assert_eq!(
            ports,
            vec![
                (Some("nfs".to_string()), 2049),
                (Some("rpcbind".to_string()), 111)
            ]
        );
        assert_eq!(
            spec.selector
                .unwrap()
                .get(NFS_VOLUME_LABEL)
                .map(String::as_str),
            Some("pvc-123")
        );
    }

    #[test]
    fn test_node_affinity_from_rules() {
        assert!(build_node_affinity(&[]).is_none());

        let rules = parse_node_affinity("kubernetes.io/zone:[zone-a,zone-b],kubernetes.io/nfs-node");
        let affinity = build_node_affinity(&rules).unwrap();
        let terms = affinity
            .node_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms;

        assert_eq!(terms.len(), 1);
        let expressions = terms[0].match_expressions.clone().unwrap();
        assert_eq!(expressions.len(), 2);
        assert_eq!(expressions[0].key, "kubernetes.io/zone");
        assert_eq!(expressions[0].operator, AffinityOperator::In.to_string());
        assert_eq!(
            expressions[0].values,
            Some(vec!["zone-a".to_string(), "zone-b".to_string()])
        );
        assert_eq!(expressions[1].operator, AffinityOperator::Exists.to_string());
    }

    #[test]
    fn test_persistent_volume_descriptor() {
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                namespace: Some("apps".to_string()),
                uid: Some("u1".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteMany".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let class = StorageClass {
            metadata: ObjectMeta {
                name: Some("nfs".to_string()),
                ..Default::default()
            },
            provisioner: "nfs-provisioner.io/nfs".to_string(),
            reclaim_policy: Some("Retain".to_string()),
            mount_options: Some(vec!["nfsvers=4.1".to_string()]),
            ..Default::default()
        };

        let server = service_dns_name("nfs-pvc-123", "nfs-system", "cluster.local");
        let pv = build_persistent_volume(&config(), &claim, &class, &server, "nfs-provisioner.io/nfs");

        assert_eq!(pv.metadata.name.as_deref(), Some("pvc-123"));
        assert_eq!(
            pv.metadata
                .annotations
                .unwrap()
                .get("pv.kubernetes.io/provisioned-by")
                .map(String::as_str),
            Some("nfs-provisioner.io/nfs")
        );

        let spec = pv.spec.unwrap();
        let nfs = spec.nfs.unwrap();
        assert_eq!(nfs.server, "nfs-pvc-123.nfs-system.svc.cluster.local");
        assert_eq!(nfs.path, "/");
        assert_eq!(spec.persistent_volume_reclaim_policy.as_deref(), Some("Retain"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("nfs"));
        assert_eq!(spec.mount_options, Some(vec!["nfsvers=4.1".to_string()]));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
        assert_eq!(
            spec.capacity.unwrap().get("storage"),
            Some(&Quantity("5Gi".to_string()))
        );

        let claim_ref = spec.claim_ref.unwrap();
        assert_eq!(claim_ref.name.as_deref(), Some("data"));
        assert_eq!(claim_ref.uid.as_deref(), Some("u1"));
    }
}
