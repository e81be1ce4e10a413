// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the vmconverge operator.
//!
//! All metrics carry the namespace prefix `vmconverge_io_` (prometheus-safe version
//! of "vmconverge.io").
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Reconcile outcomes, durations and requeues
//! - **Remote VM Lifecycle** - VMs created and deleted on the hypervisor
//! - **Hypervisor Metrics** - Remote call outcomes and latency
//! - **Admission Metrics** - Webhook decisions per resource kind
//!
//! # Example
//!
//! ```rust,no_run
//! use vmconverge::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("VirtualMachine", std::time::Duration::from_secs(1));
//! ```

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;

/// Prefix for every metric name, `vmconverge.io` made prometheus-safe
const METRICS_NAMESPACE: &str = "vmconverge_io";

/// Registry served on `/metrics`.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Panics on an invalid or duplicate definition.
fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let vec = CounterVec::new(Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help), labels)
        .expect("valid counter definition");
    METRICS_REGISTRY
        .register(Box::new(vec.clone()))
        .expect("counter registered once");
    vec
}

fn histogram(name: &str, help: &str, labels: &[&str], buckets: Vec<f64>) -> HistogramVec {
    let opts = HistogramOpts::new(format!("{METRICS_NAMESPACE}_{name}"), help).buckets(buckets);
    let vec = HistogramVec::new(opts, labels).expect("valid histogram definition");
    METRICS_REGISTRY
        .register(Box::new(vec.clone()))
        .expect("histogram registered once");
    vec
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Reconcile passes by `resource_type` and `status` (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter(
        "reconciliations_total",
        "Reconcile passes by resource type and outcome",
        &["resource_type", "status"],
    )
});

pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    histogram(
        "reconciliation_duration_seconds",
        "Wall time of one reconcile pass",
        &["resource_type"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0],
    )
});

/// Requeues by `reason`: `retriable` backs off, `terminal` waits for a spec change
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter(
        "requeues_total",
        "Requeues by resource type and reason",
        &["resource_type", "reason"],
    )
});

/// Failed passes by `error_type` (`retriable`, `terminal`, `already_satisfied`)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter(
        "errors_total",
        "Failed reconcile passes by resource type and error classification",
        &["resource_type", "error_type"],
    )
});

// ============================================================================
// Remote VM lifecycle
// ============================================================================

pub static RESOURCES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter(
        "vms_created_total",
        "Remote VMs created on the hypervisor",
        &["resource_type"],
    )
});

pub static RESOURCES_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter(
        "vms_deleted_total",
        "Remote VMs deleted from the hypervisor",
        &["resource_type"],
    )
});

// ============================================================================
// Hypervisor calls
// ============================================================================

/// Calls by provider `operation` and `outcome` (`success`, `not_found`, `timeout`, `error`)
pub static HYPERVISOR_CALLS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter(
        "hypervisor_calls_total",
        "Hypervisor calls by operation and outcome",
        &["operation", "outcome"],
    )
});

pub static HYPERVISOR_CALL_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    histogram(
        "hypervisor_call_duration_seconds",
        "Latency of hypervisor calls, timeouts included",
        &["operation"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0],
    )
});

// ============================================================================
// Admission
// ============================================================================

/// Webhook decisions by kind, `operation` and `decision` (`allowed`, `denied`)
pub static ADMISSION_DECISIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter(
        "admission_decisions_total",
        "Admission decisions by resource type, operation and outcome",
        &["resource_type", "operation", "decision"],
    )
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation and the kind of error that ended it
pub fn record_reconciliation_error(resource_type: &str, error_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation requeue
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

pub fn record_resource_created(resource_type: &str) {
    RESOURCES_CREATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

pub fn record_resource_deleted(resource_type: &str) {
    RESOURCES_DELETED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record one hypervisor call
///
/// # Arguments
/// * `operation` - Provider method name
/// * `outcome` - `success`, `not_found`, `timeout` or `error`
/// * `duration` - Wall time of the call, timeouts included
pub fn record_hypervisor_call(operation: &str, outcome: &str, duration: Duration) {
    HYPERVISOR_CALLS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    HYPERVISOR_CALL_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

/// Record an admission decision
pub fn record_admission(resource_type: &str, operation: &str, allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    ADMISSION_DECISIONS_TOTAL
        .with_label_values(&[resource_type, operation, decision])
        .inc();
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
