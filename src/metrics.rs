// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the NFS provisioner.
//!
//! All metrics use the namespace prefix `nfs_provisioner_` and live in
//! [`METRICS_REGISTRY`]. Exposing them is left to the embedding process; use
//! [`gather_metrics`] to render the text format.
//!
//! # Metrics Categories
//!
//! - **Operation Metrics** - Provision and delete requests and their outcomes
//! - **Resource Lifecycle Metrics** - Backing resources created and deleted
//! - **Garbage Collection Metrics** - Sweeps and orphans removed
//!
//! # Example
//!
//! ```rust,no_run
//! use nfs_provisioner::metrics::record_operation_success;
//!
//! record_operation_success("provision", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all provisioner metrics
const METRICS_NAMESPACE: &str = "nfs_provisioner";

/// Operation label value for provision requests
pub const OPERATION_PROVISION: &str = "provision";

/// Operation label value for delete requests
pub const OPERATION_DELETE: &str = "delete";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn register<C>(collector: C) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    METRICS_REGISTRY
        .register(Box::new(collector.clone()))
        .expect("metric names are unique within the registry");
    collector
}

// ============================================================================
// Operation Metrics
// ============================================================================

/// Total number of provision/delete requests by outcome
///
/// Labels:
/// - `operation`: `provision` or `delete`
/// - `status`: `success` or `error`
pub static OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_operations_total"),
        "Total number of provision and delete requests by status",
    );
    register(CounterVec::new(opts, &["operation", "status"]).expect("valid metric options"))
});

/// Duration of provision/delete requests in seconds
///
/// Labels:
/// - `operation`: `provision` or `delete`
pub static OPERATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_operation_duration_seconds"),
        "Duration of provision and delete requests in seconds",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    register(HistogramVec::new(opts, &["operation"]).expect("valid metric options"))
});

/// Total number of failed requests by error category
///
/// Labels:
/// - `operation`: `provision` or `delete`
/// - `error_type`: e.g. `config`, `lifecycle`, `hook`, `store`
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of failed requests by operation and error type",
    );
    register(CounterVec::new(opts, &["operation", "error_type"]).expect("valid metric options"))
});

// ============================================================================
// Resource Lifecycle Metrics
// ============================================================================

/// Total number of backing resources created
///
/// Labels:
/// - `resource_type`: Kind of resource created
pub static RESOURCES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_created_total"),
        "Total number of backing resources created by type",
    );
    register(CounterVec::new(opts, &["resource_type"]).expect("valid metric options"))
});

/// Total number of backing resources deleted
///
/// Labels:
/// - `resource_type`: Kind of resource deleted
pub static RESOURCES_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_deleted_total"),
        "Total number of backing resources deleted by type",
    );
    register(CounterVec::new(opts, &["resource_type"]).expect("valid metric options"))
});

// ============================================================================
// Garbage Collection Metrics
// ============================================================================

/// Total number of garbage collection sweeps
///
/// Labels:
/// - `status`: `success` or `error`
pub static GC_SWEEPS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_gc_sweeps_total"),
        "Total number of garbage collection sweeps by status",
    );
    register(CounterVec::new(opts, &["status"]).expect("valid metric options"))
});

/// Duration of garbage collection sweeps in seconds
pub static GC_SWEEP_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_gc_sweep_duration_seconds"),
        "Duration of garbage collection sweeps in seconds",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]);
    register(Histogram::with_opts(opts).expect("valid metric options"))
});

/// Total number of orphaned volumes whose backing resources were deleted
pub static GC_ORPHANS_DELETED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    register(
        Counter::new(
            format!("{METRICS_NAMESPACE}_gc_orphans_deleted_total"),
            "Total number of orphaned volumes cleaned up by the garbage collector",
        )
        .expect("valid metric options"),
    )
});

/// Record a successful provision or delete request
///
/// # Arguments
/// * `operation` - `provision` or `delete`
/// * `duration` - Duration of the request
pub fn record_operation_success(operation: &str, duration: Duration) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, "success"])
        .inc();
    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record a failed provision or delete request
///
/// # Arguments
/// * `operation` - `provision` or `delete`
/// * `error_type` - Category of the failure
/// * `duration` - Duration of the request before failure
pub fn record_operation_error(operation: &str, error_type: &str, duration: Duration) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, "error"])
        .inc();
    ERRORS_TOTAL
        .with_label_values(&[operation, error_type])
        .inc();
    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record backing resource creation
pub fn record_resource_created(resource_type: &str) {
    RESOURCES_CREATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record backing resource deletion
pub fn record_resource_deleted(resource_type: &str) {
    RESOURCES_DELETED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record a completed garbage collection sweep
///
/// # Arguments
/// * `orphans_deleted` - Number of volumes cleaned up during the sweep
/// * `duration` - Duration of the sweep
#[allow(clippy::cast_precision_loss)]
pub fn record_gc_sweep(orphans_deleted: usize, duration: Duration) {
    GC_SWEEPS_TOTAL.with_label_values(&["success"]).inc();
    GC_SWEEP_DURATION_SECONDS.observe(duration.as_secs_f64());
    GC_ORPHANS_DELETED_TOTAL.inc_by(orphans_deleted as f64);
}

/// Record a garbage collection sweep that could not list backing claims
pub fn record_gc_sweep_error(duration: Duration) {
    GC_SWEEPS_TOTAL.with_label_values(&["error"]).inc();
    GC_SWEEP_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
