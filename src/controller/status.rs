//! # Status Updater
//!
//! Persists the status computed by a pass, plus the few spec fields the operator
//! owns: `updateStrategy.paused` and the `retryUnexpectedHooks` flags. Both are
//! sent as JSON merge patches carrying `metadata.resourceVersion`, so a write
//! against a stale object conflicts and is recomputed from a fresh read.

use crate::client::{create_merge_patch, retry_on_conflict, ClientError};
use crate::controller::reconciler::{Reconciler, ReconcilerError, SpecOverrides};
use crate::crd::{GameStatefulSet, GameStatefulSetStatus};
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Spec fields that differ between `live` and the requested overrides
#[must_use]
pub fn spec_patch(live: &GameStatefulSet, overrides: &SpecOverrides) -> Option<Value> {
    let mut spec = Map::new();
    if let Some(paused) = overrides.paused {
        if live.spec.update_strategy.paused != paused {
            spec.insert("updateStrategy".to_string(), json!({ "paused": paused }));
        }
    }
    let hook_strategies = [
        ("preDeleteUpdateStrategy", &live.spec.pre_delete_update_strategy, overrides.retry_pre_delete_hooks),
        ("preInplaceUpdateStrategy", &live.spec.pre_inplace_update_strategy, overrides.retry_pre_inplace_hooks),
        ("postInplaceUpdateStrategy", &live.spec.post_inplace_update_strategy, overrides.retry_post_inplace_hooks),
    ];
    for (field, strategy, retry) in hook_strategies {
        if let (Some(strategy), Some(retry)) = (strategy, retry) {
            if strategy.retry_unexpected_hooks != retry {
                spec.insert(field.to_string(), json!({ "retryUnexpectedHooks": retry }));
            }
        }
    }
    (!spec.is_empty()).then(|| Value::Object(spec))
}

/// Status fields that differ between `live` and `desired`
///
/// # Errors
///
/// Serialization failures.
pub fn status_patch(
    live: &GameStatefulSet,
    desired: &GameStatefulSetStatus,
) -> Result<Option<Value>, serde_json::Error> {
    let original = serde_json::to_value(live.status.clone().unwrap_or_default())?;
    let modified = serde_json::to_value(desired)?;
    Ok(create_merge_patch(&original, &modified))
}

/// Promote the update revision once every replica runs it and is ready
pub fn complete_rollout(set: &GameStatefulSet, status: &mut GameStatefulSetStatus) {
    let replicas = set.replicas();
    if status.update_revision.is_some()
        && status.replicas == replicas
        && status.updated_replicas == replicas
        && status.ready_replicas == replicas
    {
        status.current_revision.clone_from(&status.update_revision);
        status.current_replicas = status.updated_replicas;
    }
}

fn with_resource_version(mut patch: Value, resource_version: Option<&str>) -> Value {
    if let (Value::Object(map), Some(rv)) = (&mut patch, resource_version) {
        map.insert("metadata".to_string(), json!({ "resourceVersion": rv }));
    }
    patch
}

/// Write `status` and `overrides` to the workload, skipping empty patches
///
/// # Errors
///
/// Serialization failures, or API failures other than conflicts once the
/// configured retries are exhausted.
pub async fn update_status(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    status: &GameStatefulSetStatus,
    overrides: &SpecOverrides,
) -> Result<(), ReconcilerError> {
    let namespace = set.namespace().unwrap_or_default();
    let name = set.name_any();
    let workloads = ctx.workloads.as_ref();
    let (namespace_ref, name_ref) = (namespace.as_str(), name.as_str());

    let result = retry_on_conflict(ctx.config.status_update_retries, |_attempt| async move {
        let mut live = workloads.get(namespace_ref, name_ref).await?;

        if let Some(spec) = spec_patch(&live, overrides) {
            debug!(workload.name = name_ref, patch = %spec, "Patching operator-owned spec fields");
            let patch = with_resource_version(json!({ "spec": spec }), live.resource_version().as_deref());
            live = workloads.patch(namespace_ref, name_ref, &patch).await?;
        }

        let Some(diff) = status_patch(&live, status).map_err(ClientError::from)? else {
            return Ok(false);
        };
        let patch = with_resource_version(json!({ "status": diff }), live.resource_version().as_deref());
        workloads.patch_status(namespace_ref, name_ref, &patch).await?;
        Ok(true)
    })
    .await;

    match result {
        Ok(true) => {
            debug!(workload.name = name.as_str(), "Status updated");
            Ok(())
        }
        Ok(false) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(source) => Err(ReconcilerError::Status {
            workload: set.key(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GameStatefulSetSpec;

    fn workload(spec: Value) -> GameStatefulSet {
        GameStatefulSet::new("web", serde_json::from_value::<GameStatefulSetSpec>(spec).unwrap())
    }

    #[test]
    fn test_spec_patch_only_touches_whitelisted_fields() {
        let set = workload(json!({
            "replicas": 3,
            "selector": {},
            "template": {},
            "preDeleteUpdateStrategy": {"retryUnexpectedHooks": true}
        }));
        let overrides = SpecOverrides {
            paused: Some(true),
            retry_pre_delete_hooks: Some(false),
            retry_post_inplace_hooks: Some(false),
            ..SpecOverrides::default()
        };
        assert_eq!(
            spec_patch(&set, &overrides),
            Some(json!({
                "updateStrategy": {"paused": true},
                "preDeleteUpdateStrategy": {"retryUnexpectedHooks": false}
            }))
        );
        assert_eq!(spec_patch(&set, &SpecOverrides::default()), None);
    }

    #[test]
    fn test_unchanged_status_produces_no_patch() {
        let mut set = workload(json!({"selector": {}, "template": {}}));
        let status = GameStatefulSetStatus {
            replicas: 1,
            ..Default::default()
        };
        set.status = Some(status.clone());
        assert_eq!(status_patch(&set, &status).unwrap(), None);

        let changed = GameStatefulSetStatus {
            replicas: 2,
            ..status
        };
        assert_eq!(status_patch(&set, &changed).unwrap(), Some(json!({"replicas": 2})));
    }

    #[test]
    fn test_rollout_completes_when_all_replicas_updated() {
        let set = workload(json!({"replicas": 2, "selector": {}, "template": {}}));
        let mut status = GameStatefulSetStatus {
            replicas: 2,
            ready_replicas: 2,
            updated_replicas: 2,
            current_revision: Some("web-a".to_string()),
            update_revision: Some("web-b".to_string()),
            ..Default::default()
        };
        complete_rollout(&set, &mut status);
        assert_eq!(status.current_revision.as_deref(), Some("web-b"));
        assert_eq!(status.current_replicas, 2);

        status.current_revision = Some("web-a".to_string());
        status.ready_replicas = 1;
        complete_rollout(&set, &mut status);
        assert_eq!(status.current_revision.as_deref(), Some("web-a"));
    }
}
