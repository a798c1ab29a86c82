//! # GameStatefulSet Spec
//!
//! Desired state of a GameStatefulSet: replica count, Pod template, update strategy,
//! canary steps and the hooks gating destructive Pod operations.

use crate::constants::DEFAULT_REVISION_HISTORY_LIMIT;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::GameStatefulSetStatus;

/// GameStatefulSet Custom Resource Definition
///
/// Ordered, identity-preserving Pods (`{name}-{ordinal}`) with pluggable update
/// strategies and hook-gated canary rollouts.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "tkex.tencent.com",
    version = "v1alpha1",
    kind = "GameStatefulSet",
    namespaced,
    status = "GameStatefulSetStatus",
    shortname = "gsts",
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Current","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Updated","type":"integer","jsonPath":".status.updatedReplicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GameStatefulSetSpec {
    /// Desired number of Pods (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Label query over Pods that should match the replica count
    pub selector: LabelSelector,
    /// Template every Pod is stamped from
    pub template: PodTemplateSpec,
    /// Claims each Pod receives, named `{template}-{workload}-{ordinal}`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,
    /// Governing headless service; used as the Pod subdomain
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub pod_management_policy: PodManagementPolicy,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    /// Hook consulted before a Pod is deleted (scale-down and rolling update)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_delete_update_strategy: Option<HookStrategy>,
    /// Hook consulted before a Pod's images are swapped in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_inplace_update_strategy: Option<HookStrategy>,
    /// Hook started after a Pod's images were swapped in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_inplace_update_strategy: Option<HookStrategy>,
    /// Number of non-live revisions retained (defaults to 10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
}

/// Pod management policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PodManagementPolicy {
    /// One ordinal at a time; each Pod must be Running and Ready before the next is touched
    #[default]
    OrderedReady,
    /// Create and delete Pods without waiting on their neighbours
    Parallel,
}

/// Update strategy type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum UpdateStrategyType {
    /// Delete outdated Pods so they are recreated from the update revision
    #[default]
    RollingUpdate,
    /// Pods move to the update revision only when deleted externally
    OnDelete,
    /// Swap container images in place, keeping the Pod object
    InplaceUpdate,
    /// Patch the running Pod in place for non-image changes
    HotPatchUpdate,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    #[serde(default, rename = "type")]
    pub type_: UpdateStrategyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_place_update_strategy: Option<InPlaceUpdateStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStrategy>,
    /// Halts automatic Pod updates; written back by the operator for pause steps
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateStrategy {
    /// Ordinals below the partition stay on the current revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    /// Defaults to 25%
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    /// Defaults to 0; only honoured under the Parallel policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<IntOrString>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InPlaceUpdateStrategy {
    /// Seconds between marking a Pod not-ready and swapping its images
    #[serde(default)]
    pub grace_period_seconds: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStrategy {
    #[serde(default)]
    pub steps: Vec<CanaryStep>,
}

/// One stage of a canary rollout
///
/// A step completes once every facet it declares has completed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CanaryStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<CanaryPause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CanaryPause {
    /// Seconds; absent means "until unpaused"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

/// Reference to a HookTemplate plus step-specific arguments
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HookStep {
    pub template_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<HookArgument>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HookArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HookStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookStep>,
    /// When set, an unsuccessful hook-run is replaced by a fresh one; reset to false afterwards
    #[serde(default)]
    pub retry_unexpected_hooks: bool,
}

impl GameStatefulSet {
    /// `namespace/name`, the key used by expectations, requeue and backoff maps
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    #[must_use]
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1).max(0)
    }

    #[must_use]
    pub fn revision_history_limit(&self) -> i32 {
        self.spec
            .revision_history_limit
            .unwrap_or(DEFAULT_REVISION_HISTORY_LIMIT)
            .max(0)
    }

    #[must_use]
    pub fn update_type(&self) -> UpdateStrategyType {
        self.spec.update_strategy.type_
    }

    /// Parallel policy allows burst; OrderedReady is monotonic
    #[must_use]
    pub fn allows_burst(&self) -> bool {
        self.spec.pod_management_policy == PodManagementPolicy::Parallel
    }

    #[must_use]
    pub fn canary_steps(&self) -> &[CanaryStep] {
        self.spec
            .update_strategy
            .canary
            .as_ref()
            .map_or(&[], |c| c.steps.as_slice())
    }

    #[must_use]
    pub fn in_place_grace_seconds(&self) -> i64 {
        self.spec
            .update_strategy
            .in_place_update_strategy
            .as_ref()
            .map_or(0, |s| s.grace_period_seconds.max(0))
    }
}
