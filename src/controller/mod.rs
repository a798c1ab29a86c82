//! # Controller
//!
//! Reconciliation engine for GameStatefulSet workloads.
//!
//! - `identity`: ordinal, identity and storage helpers plus Pod status predicates
//! - `revision`: content-addressed template revisions and history truncation
//! - `ownership`: adoption and release of Pods and revisions
//! - `hooks`: pre-delete, in-place and canary step hook-runs
//! - `canary`: step index, partition and pause conditions
//! - `inplace`: in-place and hot-patch Pod mutations
//! - `pod_control`: Pod writes with events and metrics
//! - `pod_set`: the convergence pass over a workload's Pods
//! - `status`: status and operator-owned spec write-back
//! - `expectations`: scale-down expectations and requeue durations
//! - `backoff`: Fibonacci backoff for failed reconciliations
//! - `reconciler`: the reconcile entry point and its context
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod canary;
pub mod expectations;
pub mod hooks;
pub mod identity;
pub mod inplace;
pub mod ownership;
pub mod pod_control;
pub mod pod_set;
pub mod reconciler;
pub mod revision;
pub mod server;
pub mod status;
