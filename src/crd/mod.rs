//! # Custom Resource Definitions
//!
//! CRD types for the GameStatefulSet operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - GameStatefulSet specification, update strategies, canary steps
//! - `status.rs` - Status types written by the operator
//! - `hook.rs` - HookRun and HookTemplate resources

mod hook;
mod spec;
mod status;

// Re-export all public types
pub use hook::{HookPhase, HookRun, HookRunSpec, HookRunStatus, HookTemplate, HookTemplateSpec};
pub use spec::{
    CanaryPause, CanaryStep, CanaryStrategy, GameStatefulSet, GameStatefulSetSpec, HookArgument,
    HookStep, HookStrategy, InPlaceUpdateStrategy, PodManagementPolicy, RollingUpdateStrategy,
    UpdateStrategy, UpdateStrategyType,
};
pub use status::{CanaryStatus, GameStatefulSetStatus, PauseCondition, PodHookCondition};
