//! # Hook Resources
//!
//! `HookTemplate` describes a parameterised check; `HookRun` is one execution of it.
//! The operator only creates, cancels and deletes hook-runs. Executing the metrics
//! and driving `status.phase` is the job of the hook-run controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::spec::HookArgument;

/// A single execution of a hook template
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "tkex.tencent.com",
    version = "v1alpha1",
    kind = "HookRun",
    namespaced,
    status = "HookRunStatus",
    shortname = "hr",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HookRunSpec {
    /// Metric definitions copied from the template; opaque to the operator
    #[serde(default)]
    #[schemars(schema_with = "opaque_objects")]
    pub metrics: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<HookArgument>,
    /// Set to stop a run that is no longer wanted
    #[serde(default)]
    pub terminate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HookRunStatus {
    #[serde(default)]
    pub phase: HookPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

/// Template a hook step refers to by name
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "tkex.tencent.com",
    version = "v1alpha1",
    kind = "HookTemplate",
    namespaced,
    shortname = "ht"
)]
#[serde(rename_all = "camelCase")]
pub struct HookTemplateSpec {
    #[serde(default)]
    #[schemars(schema_with = "opaque_objects")]
    pub metrics: Vec<Value>,
    /// Declared arguments; values here are defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<HookArgument>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum HookPhase {
    #[default]
    Pending,
    Running,
    Successful,
    Failed,
    Error,
    Inconclusive,
}

impl HookPhase {
    #[must_use]
    pub fn is_completed(self) -> bool {
        matches!(
            self,
            Self::Successful | Self::Failed | Self::Error | Self::Inconclusive
        )
    }

    /// Finished, but not with success
    #[must_use]
    pub fn is_unsuccessful(self) -> bool {
        matches!(self, Self::Failed | Self::Error | Self::Inconclusive)
    }
}

impl HookRun {
    #[must_use]
    pub fn phase(&self) -> HookPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

fn opaque_objects(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_phases() {
        assert!(!HookPhase::Pending.is_completed());
        assert!(!HookPhase::Running.is_completed());
        assert!(HookPhase::Successful.is_completed());
        assert!(!HookPhase::Successful.is_unsuccessful());
        for phase in [HookPhase::Failed, HookPhase::Error, HookPhase::Inconclusive] {
            assert!(phase.is_completed());
            assert!(phase.is_unsuccessful());
        }
    }

    #[test]
    fn test_hook_run_without_status_is_pending() {
        let run = HookRun::new("run", HookRunSpec::default());
        assert_eq!(run.phase(), HookPhase::Pending);
    }
}
