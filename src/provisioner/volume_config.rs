// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Effective per-volume configuration.
//!
//! A `StorageClass` served by this provisioner may declare configuration in
//! the `nfs-provisioner.io/config` annotation as an ordered JSON list of
//! named entries:
//!
//! ```json
//! [
//!   {"name": "backendStorageClass", "value": "fast-ssd"},
//!   {"name": "leaseSeconds", "value": "30"},
//!   {"name": "resources", "value": {"limits": {"memory": "256Mi"}}}
//! ]
//! ```
//!
//! The list is decoded and validated once into a [`ClassConfig`], then merged
//! over the provisioner defaults into an [`EffectiveVolumeConfig`]. Later
//! entries win over earlier ones with the same name. Unknown names are logged
//! and ignored.
//!
//! Recognised entries:
//!
//! | Name | Value |
//! |------|-------|
//! | `serverKind` | `kernel` |
//! | `backendStorageClass` | class name |
//! | `exports` | custom export text |
//! | `leaseSeconds`, `graceSeconds` | positive integer (number or string) |
//! | `capacity` | quantity overriding the claim request |
//! | `groupId` | integer group id of the exported directory |
//! | `owner` | `uid` or `uid:gid` of the exported directory |
//! | `mode` | octal permission bits, e.g. `0775` |
//! | `resources` | requests/limits of the server container |

use crate::affinity::NodeAffinityRule;
use crate::config::{ProvisionerConfig, ServerKind};
use crate::constants::{DEFAULT_GRACE_SECONDS, DEFAULT_LEASE_SECONDS, RESOURCE_STORAGE};
use crate::errors::ConfigError;
use crate::labels::CLASS_CONFIG_ANNOTATION;
use crate::store::{qualified_name, ClusterStore, ObjectStore};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, ResourceRequirements};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// One named entry of the declared class configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ConfigEntry {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Typed view of a class's declared configuration. Every field is optional.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassConfig {
    pub server_kind: Option<ServerKind>,
    pub backend_storage_class: Option<String>,
    pub exports: Option<String>,
    pub lease_seconds: Option<u32>,
    pub grace_seconds: Option<u32>,
    pub capacity: Option<Quantity>,
    pub group_id: Option<i64>,
    pub owner: Option<String>,
    pub mode: Option<String>,
    pub resources: Option<ResourceRequirements>,
}

/// Identity of the claim a volume is provisioned for.
///
/// Written onto the backing claim as back-reference labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClaimOwner {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl ClaimOwner {
    #[must_use]
    pub fn from_claim(claim: &PersistentVolumeClaim) -> Self {
        Self {
            namespace: claim.namespace().unwrap_or_default(),
            name: claim.name_any(),
            uid: claim.uid().unwrap_or_default(),
        }
    }
}

/// Configuration of one volume, computed once per provisioning attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectiveVolumeConfig {
    pub volume_id: String,
    pub owner_claim: ClaimOwner,
    pub storage_class: String,
    pub server_kind: ServerKind,
    /// Class of the backing claim; the cluster default applies when unset
    pub backend_storage_class: Option<String>,
    pub exports: Option<String>,
    pub lease_seconds: u32,
    pub grace_seconds: u32,
    /// Size of the backing claim: class override, else the claim request
    pub capacity: Option<Quantity>,
    pub group_id: Option<i64>,
    pub owner: Option<String>,
    pub mode: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub node_affinity: Vec<NodeAffinityRule>,
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn as_text(key: &str, value: &Value) -> Result<String, ConfigError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::String(_) => Err(invalid(key, "must not be empty")),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid(key, format!("expected a string, got {other}"))),
    }
}

fn as_integer(key: &str, value: &Value) -> Result<i64, ConfigError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid(key, format!("'{n}' is not an integer"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(key, format!("'{s}' is not an integer"))),
        other => Err(invalid(key, format!("expected an integer, got {other}"))),
    }
}

fn as_seconds(key: &str, value: &Value) -> Result<u32, ConfigError> {
    let seconds = as_integer(key, value)?;
    u32::try_from(seconds)
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| invalid(key, format!("'{seconds}' is not a positive number of seconds")))
}

fn as_mode(key: &str, value: &Value) -> Result<String, ConfigError> {
    let mode = as_text(key, value)?;
    let valid = (3..=4).contains(&mode.len()) && mode.chars().all(|c| ('0'..='7').contains(&c));
    if valid {
        Ok(mode)
    } else {
        Err(invalid(key, format!("'{mode}' is not an octal mode")))
    }
}

fn as_owner(key: &str, value: &Value) -> Result<String, ConfigError> {
    let owner = as_text(key, value)?;
    let valid = owner
        .split(':')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
        && owner.split(':').count() <= 2;
    if valid {
        Ok(owner)
    } else {
        Err(invalid(key, format!("'{owner}' is not uid or uid:gid")))
    }
}

impl ClassConfig {
    /// Decode the declared configuration of a class.
    ///
    /// A class without the annotation yields an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedClassConfig`] when the annotation is not
    /// a list of `{name, value}` entries, and [`ConfigError::InvalidValue`] when
    /// an entry holds a value of the wrong shape.
    pub fn from_storage_class(class: &StorageClass) -> Result<Self, ConfigError> {
        let Some(raw) = class.annotations().get(CLASS_CONFIG_ANNOTATION) else {
            return Ok(Self::default());
        };

        let entries: Vec<ConfigEntry> =
            serde_json::from_str(raw).map_err(|e| ConfigError::MalformedClassConfig {
                class: class.name_any(),
                reason: e.to_string(),
            })?;

        Self::from_entries(&entries)
    }

    /// Fold an ordered list of entries into a typed configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for malformed values and
    /// [`ConfigError::UnsupportedServerKind`] for unknown server kinds.
    pub fn from_entries(entries: &[ConfigEntry]) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for entry in entries {
            let key = entry.name.as_str();
            let value = &entry.value;
            match key {
                "serverKind" => config.server_kind = Some(as_text(key, value)?.parse()?),
                "backendStorageClass" => {
                    config.backend_storage_class = Some(as_text(key, value)?);
                }
                "exports" => config.exports = Some(as_text(key, value)?),
                "leaseSeconds" => config.lease_seconds = Some(as_seconds(key, value)?),
                "graceSeconds" => config.grace_seconds = Some(as_seconds(key, value)?),
                "capacity" => config.capacity = Some(Quantity(as_text(key, value)?)),
                "groupId" => {
                    let gid = as_integer(key, value)?;
                    if gid < 0 {
                        return Err(invalid(key, format!("'{gid}' is negative")));
                    }
                    config.group_id = Some(gid);
                }
                "owner" => config.owner = Some(as_owner(key, value)?),
                "mode" => config.mode = Some(as_mode(key, value)?),
                "resources" => {
                    let resources: ResourceRequirements = serde_json::from_value(value.clone())
                        .map_err(|e| invalid(key, e.to_string()))?;
                    config.resources = Some(resources);
                }
                unknown => warn!(entry = %unknown, "Ignoring unknown class configuration entry"),
            }
        }

        Ok(config)
    }
}

/// Storage requested by a claim, if any.
#[must_use]
pub fn requested_capacity(claim: &PersistentVolumeClaim) -> Option<Quantity> {
    claim
        .spec
        .as_ref()
        .and_then(|spec| spec.resources.as_ref())
        .and_then(|resources| resources.requests.as_ref())
        .and_then(|requests| requests.get(RESOURCE_STORAGE))
        .cloned()
}

/// Merge provisioner defaults and class configuration for one volume.
///
/// # Errors
///
/// Returns any decoding error of the class configuration.
pub fn merge_config(
    volume_id: &str,
    claim: &PersistentVolumeClaim,
    class: &StorageClass,
    defaults: &ProvisionerConfig,
) -> Result<EffectiveVolumeConfig, ConfigError> {
    let declared = ClassConfig::from_storage_class(class)?;
    let class_name = class.name_any();

    let backend_storage_class = declared
        .backend_storage_class
        .or_else(|| defaults.default_backend_storage_class.clone())
        .filter(|name| !name.is_empty());

    Ok(EffectiveVolumeConfig {
        volume_id: volume_id.to_string(),
        owner_claim: ClaimOwner::from_claim(claim),
        storage_class: class_name,
        server_kind: declared.server_kind.unwrap_or(defaults.default_server_kind),
        backend_storage_class,
        exports: declared.exports,
        lease_seconds: declared.lease_seconds.unwrap_or(DEFAULT_LEASE_SECONDS),
        grace_seconds: declared.grace_seconds.unwrap_or(DEFAULT_GRACE_SECONDS),
        capacity: declared.capacity.or_else(|| requested_capacity(claim)),
        group_id: declared.group_id,
        owner: declared.owner,
        mode: declared.mode,
        resources: declared.resources,
        node_affinity: defaults.node_affinity.clone(),
    })
}

/// Resolves [`EffectiveVolumeConfig`] by reading the claim's `StorageClass`.
pub struct VolumeConfigResolver {
    store: Arc<dyn ClusterStore>,
    defaults: Arc<ProvisionerConfig>,
}

impl VolumeConfigResolver {
    pub fn new(store: Arc<dyn ClusterStore>, defaults: Arc<ProvisionerConfig>) -> Self {
        Self { store, defaults }
    }

    /// Resolve the configuration of `volume_id` requested by `claim`, along
    /// with the `StorageClass` it was read from.
    ///
    /// # Errors
    ///
    /// Fails when the claim names no class, the class does not exist, or its
    /// declared configuration is malformed. No backing resource may be created
    /// after a failure here.
    pub async fn resolve(
        &self,
        volume_id: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<(StorageClass, EffectiveVolumeConfig), ConfigError> {
        let class = self.storage_class_of(claim).await?;
        let config = self.resolve_with_class(volume_id, claim, &class)?;
        Ok((class, config))
    }

    /// Read the `StorageClass` named by `claim`.
    ///
    /// # Errors
    ///
    /// Fails when the claim names no class or the class does not exist.
    pub async fn storage_class_of(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<StorageClass, ConfigError> {
        let class_name = claim
            .spec
            .as_ref()
            .and_then(|spec| spec.storage_class_name.clone())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ConfigError::MissingStorageClass {
                claim: qualified_name(claim.namespace().as_deref(), &claim.name_any()),
            })?;

        ObjectStore::<StorageClass>::get(&*self.store, None, &class_name)
            .await?
            .ok_or(ConfigError::StorageClassNotFound { name: class_name })
    }

    /// Resolve against a class the caller already holds.
    ///
    /// # Errors
    ///
    /// Fails when the declared configuration of `class` is malformed.
    pub fn resolve_with_class(
        &self,
        volume_id: &str,
        claim: &PersistentVolumeClaim,
        class: &StorageClass,
    ) -> Result<EffectiveVolumeConfig, ConfigError> {
        let config = merge_config(volume_id, claim, class, &self.defaults)?;
        debug!(
            volume = %volume_id,
            storage_class = %config.storage_class,
            backend = config.backend_storage_class.as_deref().unwrap_or("<cluster default>"),
            server_kind = %config.server_kind,
            lease_seconds = config.lease_seconds,
            grace_seconds = config.grace_seconds,
            "Resolved effective volume configuration"
        );
        Ok(config)
    }
}

#[cfg(test)]
#[path = "volume_config_tests.rs"]
mod volume_config_tests;
