// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # nfs-provisioner - Per-volume NFS exports for Kubernetes
//!
//! Every `PersistentVolumeClaim` served by this provisioner gets its own NFS
//! server: a backing claim on a block storage class, a single-replica server
//! `Deployment` exporting it, and a `Service` in front of the server. The
//! returned `PersistentVolume` points at that service.
//!
//! ## Modules
//!
//! - [`config`] - Startup settings and the immutable [`config::ProvisionerConfig`]
//! - [`provisioner`] - Provision and delete entry points, configuration
//!   resolution, backing resource lifecycle, tracking and garbage collection
//! - [`hooks`] - Metadata hooks applied to created and deleted objects
//! - [`affinity`] - Node affinity rule parser
//! - [`nfs_resources`] - Builders for every Kubernetes object the provisioner writes
//! - [`store`] - Cluster object store abstraction over the Kubernetes API
//! - [`controller`] - kube-runtime controllers driving the provisioner
//! - [`metrics`] - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use nfs_provisioner::affinity::parse_node_affinity;
//!
//! let rules = parse_node_affinity("topology.kubernetes.io/zone:[a,b],kubernetes.io/nfs-node");
//! assert_eq!(rules.len(), 2);
//! ```

pub mod affinity;
pub mod config;
pub mod constants;
pub mod controller;
pub mod errors;
pub mod hooks;
pub mod labels;
pub mod metrics;
pub mod nfs_resources;
pub mod provisioner;
pub mod store;
