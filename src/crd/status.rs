//! # GameStatefulSet Status
//!
//! Status types written exclusively by the operator.

use serde::{Deserialize, Serialize};

use super::hook::HookPhase;

/// Status of the GameStatefulSet resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameStatefulSetStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Pods observed (created, not yet deleted)
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    /// Pods on the current revision
    #[serde(default)]
    pub current_replicas: i32,
    /// Pods on the update revision
    #[serde(default)]
    pub updated_replicas: i32,
    /// Pods on the update revision that are Running and Ready
    #[serde(default)]
    pub updated_ready_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_revision: Option<String>,
    /// Bumped whenever a revision name collides with different content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<i32>,
    /// Serialized selector, used by the scale subresource and tooling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStatus>,
    /// Index into `spec.updateStrategy.canary.steps`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_index: Option<i32>,
    /// Hash of the canary step list the index refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pause_conditions: Vec<PauseCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_delete_hook_conditions: Vec<PodHookCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_inplace_hook_conditions: Vec<PodHookCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_inplace_hook_conditions: Vec<PodHookCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStatus {
    /// Revision the canary steps last ran to completion for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Why progression is blocked and since when (RFC3339)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PauseCondition {
    pub reason: String,
    pub start_time: String,
}

/// Phase of the hook-run gating an operation on one Pod
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodHookCondition {
    pub pod_name: String,
    /// RFC3339
    pub start_time: String,
    pub hook_phase: HookPhase,
}

impl GameStatefulSetStatus {
    /// Step index with the "unset means 0" default applied
    #[must_use]
    pub fn step_index(&self) -> i32 {
        self.current_step_index.unwrap_or(0).max(0)
    }

    #[must_use]
    pub fn has_pause_condition(&self, reason: &str) -> bool {
        self.pause_conditions.iter().any(|c| c.reason == reason)
    }

    #[must_use]
    pub fn pause_condition(&self, reason: &str) -> Option<&PauseCondition> {
        self.pause_conditions.iter().find(|c| c.reason == reason)
    }
}
