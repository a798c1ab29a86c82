//! GameStatefulSet Operator Library
//!
//! Reconciliation engine for GameStatefulSet workloads: ordered Pods with stable
//! identity, rolling, in-place and hot-patch updates, and canary rollouts gated
//! by hook-runs.
//!
//! ## Quick Start
//!
//! ```rust
//! use game_statefulset_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod client;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
