// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Declarative metadata hooks.
//!
//! A hook document lists metadata mutations to apply to the provisioner's
//! resources at lifecycle events:
//!
//! ```yaml
//! version: v1
//! hooks:
//!   - name: protect-volume
//!     event: Create
//!     action: Add
//!     persistentVolume:
//!       annotations:
//!         example.com/created-at: "${NOW}"
//!       finalizers:
//!         - example.com/protect
//!   - name: release-volume
//!     event: Delete
//!     action: Remove
//!     persistentVolume:
//!       finalizers:
//!         - example.com/protect
//! ```
//!
//! Each entry targets one or more resource kinds through its optional
//! sub-blocks (`persistentVolume`, `persistentVolumeClaim`,
//! `backendPersistentVolumeClaim`, `deployment`, `service`).
//!
//! `Add` sets annotations (last write wins) and adds missing finalizers.
//! `Remove` deletes the named annotation keys and finalizers. Both are
//! idempotent. The token `${NOW}` inside an annotation value is replaced by the
//! current UTC time in RFC3339 form when the hook is applied.

use crate::constants::{
    HOOK_DOCUMENT_VERSION, HOOK_TIMESTAMP_TOKEN, KIND_DEPLOYMENT, KIND_PERSISTENT_VOLUME,
    KIND_PERSISTENT_VOLUME_CLAIM, KIND_SERVICE,
};
use crate::errors::HookError;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Lifecycle event a hook reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    Create,
    Delete,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("Create"),
            Self::Delete => f.write_str("Delete"),
        }
    }
}

/// Whether a hook adds or removes its metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookAction {
    Add,
    Remove,
}

/// Resource kinds a hook can target.
///
/// The owning claim and the backing claim share a Kubernetes kind but are
/// configured separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    PersistentVolume,
    PersistentVolumeClaim,
    BackendPersistentVolumeClaim,
    Deployment,
    Service,
}

impl ResourceKind {
    pub const ALL: [Self; 5] = [
        Self::PersistentVolume,
        Self::PersistentVolumeClaim,
        Self::BackendPersistentVolumeClaim,
        Self::Deployment,
        Self::Service,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersistentVolume => KIND_PERSISTENT_VOLUME,
            Self::PersistentVolumeClaim => KIND_PERSISTENT_VOLUME_CLAIM,
            Self::BackendPersistentVolumeClaim => "BackendPersistentVolumeClaim",
            Self::Deployment => KIND_DEPLOYMENT,
            Self::Service => KIND_SERVICE,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Annotations and finalizers added or removed by a hook.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataChanges {
    pub annotations: BTreeMap<String, String>,
    pub finalizers: Vec<String>,
}

/// One entry of the hook document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HookConfig {
    pub name: String,
    pub event: HookEvent,
    pub action: HookAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume: Option<MetadataChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<MetadataChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_persistent_volume_claim: Option<MetadataChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<MetadataChanges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<MetadataChanges>,
}

impl HookConfig {
    /// Changes configured for `kind`, if this entry targets it.
    #[must_use]
    pub fn changes_for(&self, kind: ResourceKind) -> Option<&MetadataChanges> {
        match kind {
            ResourceKind::PersistentVolume => self.persistent_volume.as_ref(),
            ResourceKind::PersistentVolumeClaim => self.persistent_volume_claim.as_ref(),
            ResourceKind::BackendPersistentVolumeClaim => {
                self.backend_persistent_volume_claim.as_ref()
            }
            ResourceKind::Deployment => self.deployment.as_ref(),
            ResourceKind::Service => self.service.as_ref(),
        }
    }
}

/// Versioned list of hooks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookDocument {
    pub version: String,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

/// A resource handed to [`HookEngine::apply`].
///
/// Each variant fixes the kind of the borrowed object, so dispatch is checked
/// at compile time.
pub enum HookTarget<'a> {
    PersistentVolume(&'a mut PersistentVolume),
    PersistentVolumeClaim(&'a mut PersistentVolumeClaim),
    BackendPersistentVolumeClaim(&'a mut PersistentVolumeClaim),
    Deployment(&'a mut Deployment),
    Service(&'a mut Service),
}

impl HookTarget<'_> {
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::PersistentVolume(_) => ResourceKind::PersistentVolume,
            Self::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Self::BackendPersistentVolumeClaim(_) => ResourceKind::BackendPersistentVolumeClaim,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Service(_) => ResourceKind::Service,
        }
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::PersistentVolume(pv) => pv.meta_mut(),
            Self::PersistentVolumeClaim(pvc) | Self::BackendPersistentVolumeClaim(pvc) => {
                pvc.meta_mut()
            }
            Self::Deployment(deployment) => deployment.meta_mut(),
            Self::Service(service) => service.meta_mut(),
        }
    }
}

fn expand_template(value: &str, now: &str) -> String {
    value.replace(HOOK_TIMESTAMP_TOKEN, now)
}

fn add_metadata(meta: &mut ObjectMeta, changes: &MetadataChanges, now: &str) {
    if !changes.annotations.is_empty() {
        let annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
        for (key, value) in &changes.annotations {
            annotations.insert(key.clone(), expand_template(value, now));
        }
    }

    if !changes.finalizers.is_empty() {
        let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
        for finalizer in &changes.finalizers {
            if !finalizers.contains(finalizer) {
                finalizers.push(finalizer.clone());
            }
        }
    }
}

fn remove_metadata(meta: &mut ObjectMeta, changes: &MetadataChanges) {
    if let Some(annotations) = meta.annotations.as_mut() {
        for key in changes.annotations.keys() {
            annotations.remove(key);
        }
    }

    if let Some(finalizers) = meta.finalizers.as_mut() {
        finalizers.retain(|f| !changes.finalizers.contains(f));
    }
}

/// Applies a parsed hook document to resources.
#[derive(Clone, Debug)]
pub struct HookEngine {
    document: HookDocument,
    index: HashMap<HookEvent, HashSet<ResourceKind>>,
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::from_document(HookDocument {
            version: HOOK_DOCUMENT_VERSION.to_string(),
            hooks: Vec::new(),
        })
    }
}

impl HookEngine {
    fn from_document(document: HookDocument) -> Self {
        let mut index: HashMap<HookEvent, HashSet<ResourceKind>> = HashMap::new();
        for hook in &document.hooks {
            let kinds = index.entry(hook.event).or_default();
            kinds.extend(
                ResourceKind::ALL
                    .into_iter()
                    .filter(|kind| hook.changes_for(*kind).is_some()),
            );
        }
        Self { document, index }
    }

    /// Parse a YAML hook document.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Parse`] for invalid YAML and
    /// [`HookError::UnsupportedVersion`] when the declared version is not
    /// understood.
    pub fn parse(bytes: &[u8]) -> Result<Self, HookError> {
        let document: HookDocument = serde_yaml::from_slice(bytes)?;
        if document.version != HOOK_DOCUMENT_VERSION {
            return Err(HookError::UnsupportedVersion {
                found: document.version,
                supported: HOOK_DOCUMENT_VERSION.to_string(),
            });
        }
        Ok(Self::from_document(document))
    }

    /// Read and parse a hook document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::Io`] when the file cannot be read, plus any
    /// [`parse`](Self::parse) error.
    pub async fn load(path: &Path) -> Result<Self, HookError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| HookError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let engine = Self::parse(&bytes)?;
        info!(
            path = %path.display(),
            hooks = engine.hooks().len(),
            "Loaded hook document"
        );
        Ok(engine)
    }

    #[must_use]
    pub fn hooks(&self) -> &[HookConfig] {
        &self.document.hooks
    }

    /// Whether any hook targets `kind` on `event`.
    #[must_use]
    pub fn has_configured_action(&self, kind: ResourceKind, event: HookEvent) -> bool {
        self.index
            .get(&event)
            .is_some_and(|kinds| kinds.contains(&kind))
    }

    /// Apply every hook configured for (`kind`, `event`) to `target`.
    ///
    /// Only the object's metadata is changed; persisting it is up to the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::KindMismatch`] without touching the object when
    /// `target` is not of `kind`.
    pub fn apply(
        &self,
        kind: ResourceKind,
        event: HookEvent,
        mut target: HookTarget<'_>,
    ) -> Result<(), HookError> {
        let actual = target.kind();
        if actual != kind {
            return Err(HookError::KindMismatch {
                actual: actual.to_string(),
                expected: kind.to_string(),
            });
        }

        if !self.has_configured_action(kind, event) {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        for hook in self.document.hooks.iter().filter(|h| h.event == event) {
            let Some(changes) = hook.changes_for(kind) else {
                continue;
            };
            debug!(
                hook = %hook.name,
                kind = %kind,
                event = %event,
                action = ?hook.action,
                "Applying hook"
            );
            let meta = target.meta_mut();
            match hook.action {
                HookAction::Add => add_metadata(meta, changes, &now),
                HookAction::Remove => remove_metadata(meta, changes),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod hooks_tests;
