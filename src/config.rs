// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provisioner-wide configuration.
//!
//! Settings are read once at startup from command-line flags with environment
//! variable fallbacks, validated, and frozen into a [`ProvisionerConfig`] that
//! every component receives at construction time. Nothing reads the
//! environment after startup.
//!
//! | Flag | Environment | Default |
//! |------|-------------|---------|
//! | `--provisioner-name` | `PROVISIONER_NAME` | `nfs-provisioner.io/nfs` |
//! | `--namespace` | `POD_NAMESPACE` | `nfs-provisioner` |
//! | `--server-image` | `NFS_SERVER_IMAGE` | built-in image |
//! | `--default-server-kind` | `DEFAULT_SERVER_KIND` | `kernel` |
//! | `--default-backend-storage-class` | `DEFAULT_BACKEND_STORAGE_CLASS` | none |
//! | `--use-cluster-ip` | `USE_CLUSTER_IP` | `false` |
//! | `--cluster-domain` | `CLUSTER_DOMAIN` | `cluster.local` |
//! | `--node-affinity` | `NODE_AFFINITY` | empty |
//! | `--hooks-config` | `HOOKS_CONFIG` | none |
//! | `--gc-interval-seconds` | `GC_INTERVAL_SECONDS` | `300` |

use crate::affinity::{parse_node_affinity, NodeAffinityRule};
use crate::constants::{
    DEFAULT_CLUSTER_DOMAIN, DEFAULT_GC_INTERVAL_SECS, DEFAULT_NAMESPACE,
    DEFAULT_PROVISIONER_NAME, DEFAULT_SERVER_IMAGE, ERROR_REQUEUE_DURATION_SECS,
};
use crate::errors::ConfigError;
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Kind of NFS server run for a volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// In-kernel NFS server (the only supported kind)
    #[default]
    Kernel,
}

impl FromStr for ServerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kernel" => Ok(Self::Kernel),
            other => Err(ConfigError::UnsupportedServerKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => f.write_str("kernel"),
        }
    }
}

/// Raw startup settings.
#[derive(Debug, Clone, Parser)]
#[command(name = "nfs-provisioner", version, about = "Per-volume NFS export provisioner")]
pub struct Settings {
    /// Provisioner name matched against `StorageClass.provisioner`
    #[arg(long, env = "PROVISIONER_NAME", default_value = DEFAULT_PROVISIONER_NAME)]
    pub provisioner_name: String,

    /// Namespace holding the backing resources
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// NFS server image
    #[arg(long, env = "NFS_SERVER_IMAGE", default_value = DEFAULT_SERVER_IMAGE)]
    pub server_image: String,

    /// Server kind used when a class does not declare one
    #[arg(long, env = "DEFAULT_SERVER_KIND", default_value = "kernel")]
    pub default_server_kind: String,

    /// Backend storage class used when a class does not declare one
    #[arg(long, env = "DEFAULT_BACKEND_STORAGE_CLASS")]
    pub default_backend_storage_class: Option<String>,

    /// Publish the service cluster IP instead of its DNS name
    #[arg(long, env = "USE_CLUSTER_IP", action = ArgAction::Set, default_value_t = false)]
    pub use_cluster_ip: bool,

    /// Cluster DNS domain
    #[arg(long, env = "CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN)]
    pub cluster_domain: String,

    /// Node affinity rules, e.g. `zone:[a,b],kubernetes.io/nfs-node`
    #[arg(long, env = "NODE_AFFINITY", default_value = "")]
    pub node_affinity: String,

    /// Path of the hook document
    #[arg(long, env = "HOOKS_CONFIG")]
    pub hooks_config: Option<PathBuf>,

    /// Seconds between garbage collection sweeps
    #[arg(long, env = "GC_INTERVAL_SECONDS", default_value_t = DEFAULT_GC_INTERVAL_SECS)]
    pub gc_interval_seconds: u64,
}

/// Validated, immutable provisioner configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionerConfig {
    pub provisioner_name: String,
    pub namespace: String,
    pub server_image: String,
    pub default_server_kind: ServerKind,
    pub default_backend_storage_class: Option<String>,
    pub use_cluster_ip: bool,
    pub cluster_domain: String,
    pub node_affinity: Vec<NodeAffinityRule>,
    pub hooks_path: Option<PathBuf>,
    pub gc_interval: Duration,
    pub requeue_delay: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            provisioner_name: DEFAULT_PROVISIONER_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            server_image: DEFAULT_SERVER_IMAGE.to_string(),
            default_server_kind: ServerKind::Kernel,
            default_backend_storage_class: None,
            use_cluster_ip: false,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            node_affinity: Vec::new(),
            hooks_path: None,
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            requeue_delay: Duration::from_secs(ERROR_REQUEUE_DURATION_SECS),
        }
    }
}

impl TryFrom<Settings> for ProvisionerConfig {
    type Error = ConfigError;

    fn try_from(settings: Settings) -> Result<Self, Self::Error> {
        if settings.gc_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "gcIntervalSeconds".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            provisioner_name: settings.provisioner_name,
            namespace: settings.namespace,
            server_image: settings.server_image,
            default_server_kind: settings.default_server_kind.parse()?,
            default_backend_storage_class: settings
                .default_backend_storage_class
                .filter(|class| !class.trim().is_empty()),
            use_cluster_ip: settings.use_cluster_ip,
            cluster_domain: settings.cluster_domain,
            node_affinity: parse_node_affinity(&settings.node_affinity),
            hooks_path: settings.hooks_config,
            gc_interval: Duration::from_secs(settings.gc_interval_seconds),
            ..Self::default()
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
