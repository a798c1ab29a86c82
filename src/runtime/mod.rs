//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization`: crypto provider, tracing, metrics, HTTP server, client and context
//! - `watch_loop`: the kube-runtime `Controller` plus the Pod deletion watcher
//! - `error_policy`: per-workload Fibonacci backoff for failed reconciliations

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
