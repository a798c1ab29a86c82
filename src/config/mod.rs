//! # Configuration
//!
//! Operator configuration loaded from the environment at startup.
//!
//! - `controller`: reconcile concurrency, backoff, retry and logging settings

mod controller;

pub use controller::ControllerConfig;
