//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `gamestatefulset_reconciliations_total` - Total number of reconciliations
//! - `gamestatefulset_reconciliation_errors_total` - Total number of reconciliation errors
//! - `gamestatefulset_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `gamestatefulset_pod_operations_total` - Pod mutations issued, by verb
//! - `gamestatefulset_hook_runs_created_total` - Hook-runs created, by hook type
//! - `gamestatefulset_revisions_created_total` - ControllerRevisions created

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gamestatefulset_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gamestatefulset_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "gamestatefulset_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static POD_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gamestatefulset_pod_operations_total",
            "Total number of Pod mutations issued by verb",
        ),
        &["verb"],
    )
    .expect("Failed to create POD_OPERATIONS_TOTAL metric - this should never happen")
});

static HOOK_RUNS_CREATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gamestatefulset_hook_runs_created_total",
            "Total number of hook-runs created by hook type",
        ),
        &["hook_type"],
    )
    .expect("Failed to create HOOK_RUNS_CREATED_TOTAL metric - this should never happen")
});

static REVISIONS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gamestatefulset_revisions_created_total",
        "Total number of ControllerRevisions created",
    )
    .expect("Failed to create REVISIONS_CREATED_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(POD_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HOOK_RUNS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REVISIONS_CREATED_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

/// `verb` is one of create, update, delete, force-delete
pub fn increment_pod_operations(verb: &str) {
    POD_OPERATIONS_TOTAL.with_label_values(&[verb]).inc();
}

pub fn increment_hook_runs_created(hook_type: &str) {
    HOOK_RUNS_CREATED_TOTAL.with_label_values(&[hook_type]).inc();
}

pub fn increment_revisions_created() {
    REVISIONS_CREATED_TOTAL.inc();
}
