//! # In-Place and Hot-Patch Updates
//!
//! In-place updates swap container images on the live Pod. Anything else that
//! differs between the Pod and the desired template cannot be applied this way
//! and is reported as an error. An optional grace period first marks the Pod
//! not-ready through the `InPlaceUpdateReady` readiness gate.
//!
//! Hot-patch updates rewrite the containers of the live Pod wholesale and leave
//! the restart to the node agent watching the hot-patch state annotation.

use crate::client::parse_time;
use crate::constants::{
    HOTPATCH_UPDATE_STATE_ANNOTATION, INPLACE_UPDATE_GRACE_ANNOTATION,
    INPLACE_UPDATE_READY_CONDITION, INPLACE_UPDATE_STATE_ANNOTATION,
};
use crate::controller::identity::{has_condition, set_pod_revision};
use crate::controller::reconciler::ReconcilerError;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Pod, PodCondition, PodReadinessGate, PodTemplateSpec};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// One container whose image changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChange {
    pub container: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateState {
    pub revision: String,
    pub update_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraceState {
    revision: String,
    start_time: String,
}

/// Where a Pod stands in its in-place grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracePhase {
    /// Not yet marked for this revision
    NotStarted,
    Waiting(Duration),
    Elapsed,
}

fn without_image(container: &Container) -> Value {
    let mut value = serde_json::to_value(container).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("image");
    }
    value
}

/// Every field set in `desired` holds the same value in `live`
///
/// Fields the API server defaults on the live object are ignored.
fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| v.is_null() || have.get(k).is_some_and(|h| is_subset(v, h))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| is_subset(w, h))
        }
        _ => desired == live,
    }
}

/// Image swaps turning `pod` into `template`
///
/// # Errors
///
/// `InPlaceUnsupported` when containers were added, removed or changed in a way
/// other than their image.
pub fn image_changes(pod: &Pod, template: &PodTemplateSpec) -> Result<Vec<ImageChange>, ReconcilerError> {
    let unsupported = |reason: String| ReconcilerError::InPlaceUnsupported {
        pod: pod.name_any(),
        reason,
    };
    let live = pod.spec.as_ref().map_or(&[][..], |s| s.containers.as_slice());
    let desired = template
        .spec
        .as_ref()
        .map_or(&[][..], |s| s.containers.as_slice());
    if live.len() != desired.len() {
        return Err(unsupported(format!(
            "container count changes from {} to {}",
            live.len(),
            desired.len()
        )));
    }

    let mut changes = Vec::new();
    for want in desired {
        let Some(have) = live.iter().find(|c| c.name == want.name) else {
            return Err(unsupported(format!("container {} is new", want.name)));
        };
        if !is_subset(&without_image(want), &without_image(have)) {
            return Err(unsupported(format!(
                "container {} changes beyond its image",
                want.name
            )));
        }
        if want.image != have.image {
            changes.push(ImageChange {
                container: want.name.clone(),
                image: want.image.clone(),
            });
        }
    }
    Ok(changes)
}

/// Grace period progress of `pod` towards `revision`
#[must_use]
pub fn grace_phase(pod: &Pod, revision: &str, grace_seconds: i64, now: DateTime<Utc>) -> GracePhase {
    let state = pod
        .annotations()
        .get(INPLACE_UPDATE_GRACE_ANNOTATION)
        .and_then(|raw| serde_json::from_str::<GraceState>(raw).ok())
        .filter(|s| s.revision == revision);
    let Some(started) = state.and_then(|s| parse_time(&s.start_time)) else {
        return GracePhase::NotStarted;
    };
    let elapsed = now.signed_duration_since(started).num_seconds();
    if elapsed >= grace_seconds {
        GracePhase::Elapsed
    } else {
        GracePhase::Waiting(Duration::from_secs(
            u64::try_from(grace_seconds - elapsed).unwrap_or(1),
        ))
    }
}

/// Record the start of the grace period for `revision`
pub fn start_grace(pod: &mut Pod, revision: &str, now: DateTime<Utc>) {
    let state = GraceState {
        revision: revision.to_string(),
        start_time: now.to_rfc3339(),
    };
    if let Ok(raw) = serde_json::to_string(&state) {
        pod.annotations_mut()
            .insert(INPLACE_UPDATE_GRACE_ANNOTATION.to_string(), raw);
    }
}

fn update_state(revision: &str, now: DateTime<Utc>) -> Option<String> {
    serde_json::to_string(&UpdateState {
        revision: revision.to_string(),
        update_timestamp: now.to_rfc3339(),
    })
    .ok()
}

/// Swap images, move the Pod to `revision` and end its grace period
pub fn apply_in_place(pod: &mut Pod, changes: &[ImageChange], revision: &str, now: DateTime<Utc>) {
    if let Some(spec) = pod.spec.as_mut() {
        for change in changes {
            if let Some(container) = spec.containers.iter_mut().find(|c| c.name == change.container) {
                container.image.clone_from(&change.image);
            }
        }
    }
    set_pod_revision(pod, revision);
    pod.annotations_mut().remove(INPLACE_UPDATE_GRACE_ANNOTATION);
    if let Some(state) = update_state(revision, now) {
        pod.annotations_mut()
            .insert(INPLACE_UPDATE_STATE_ANNOTATION.to_string(), state);
    }
}

/// Replace the Pod's containers with the template's and move it to `revision`
pub fn apply_hot_patch(pod: &mut Pod, template: &PodTemplateSpec, revision: &str, now: DateTime<Utc>) {
    if let (Some(spec), Some(desired)) = (pod.spec.as_mut(), template.spec.as_ref()) {
        for want in &desired.containers {
            match spec.containers.iter_mut().find(|c| c.name == want.name) {
                Some(container) => *container = want.clone(),
                None => spec.containers.push(want.clone()),
            }
        }
    }
    set_pod_revision(pod, revision);
    if let Some(state) = update_state(revision, now) {
        pod.annotations_mut()
            .insert(HOTPATCH_UPDATE_STATE_ANNOTATION.to_string(), state);
    }
}

/// Add the `InPlaceUpdateReady` readiness gate to a Pod about to be created
pub fn add_readiness_gate(pod: &mut Pod) {
    let spec = pod.spec.get_or_insert_with(Default::default);
    let gates = spec.readiness_gates.get_or_insert_with(Vec::new);
    if !gates.iter().any(|g| g.condition_type == INPLACE_UPDATE_READY_CONDITION) {
        gates.push(PodReadinessGate {
            condition_type: INPLACE_UPDATE_READY_CONDITION.to_string(),
        });
    }
}

#[must_use]
pub fn has_readiness_gate(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.readiness_gates.as_ref())
        .is_some_and(|gates| {
            gates
                .iter()
                .any(|g| g.condition_type == INPLACE_UPDATE_READY_CONDITION)
        })
}

/// Condition the readiness gate should carry, or `None` when it already does
///
/// The gate is False while a grace period is running and True otherwise.
#[must_use]
pub fn desired_ready_condition(pod: &Pod) -> Option<PodCondition> {
    if !has_readiness_gate(pod) {
        return None;
    }
    let pending = pod.annotations().contains_key(INPLACE_UPDATE_GRACE_ANNOTATION);
    let status = if pending { "False" } else { "True" };
    if has_condition(pod, INPLACE_UPDATE_READY_CONDITION, status) {
        return None;
    }
    Some(PodCondition {
        type_: INPLACE_UPDATE_READY_CONDITION.to_string(),
        status: status.to_string(),
        reason: pending.then(|| "StartInPlaceUpdate".to_string()),
        message: pending.then(|| "waiting for the in-place grace period".to_string()),
        ..PodCondition::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn pod(image: &str) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": "web-0", "labels": {"controller-revision-hash": "web-a"}},
            "spec": {"containers": [{
                "name": "game",
                "image": image,
                "imagePullPolicy": "IfNotPresent",
                "ports": [{"containerPort": 7777}]
            }]}
        }))
        .unwrap()
    }

    fn template(value: Value) -> PodTemplateSpec {
        serde_json::from_value(json!({ "spec": { "containers": [value] } })).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_image_only_change_is_accepted() {
        let desired = template(json!({
            "name": "game", "image": "game:v2", "ports": [{"containerPort": 7777}]
        }));
        let changes = image_changes(&pod("game:v1"), &desired).unwrap();
        assert_eq!(
            changes,
            vec![ImageChange {
                container: "game".to_string(),
                image: Some("game:v2".to_string())
            }]
        );
    }

    #[test]
    fn test_non_image_change_is_rejected() {
        let desired = template(json!({
            "name": "game", "image": "game:v2", "ports": [{"containerPort": 8888}]
        }));
        let err = image_changes(&pod("game:v1"), &desired).unwrap_err();
        assert!(matches!(err, ReconcilerError::InPlaceUnsupported { .. }));
    }

    #[test]
    fn test_apply_in_place_moves_revision() {
        let mut live = pod("game:v1");
        start_grace(&mut live, "web-b", now());
        let changes = vec![ImageChange {
            container: "game".to_string(),
            image: Some("game:v2".to_string()),
        }];
        apply_in_place(&mut live, &changes, "web-b", now());
        assert_eq!(
            live.spec.as_ref().unwrap().containers[0].image.as_deref(),
            Some("game:v2")
        );
        assert_eq!(
            live.labels().get("controller-revision-hash").map(String::as_str),
            Some("web-b")
        );
        assert!(!live.annotations().contains_key(INPLACE_UPDATE_GRACE_ANNOTATION));
        assert!(live.annotations().contains_key(INPLACE_UPDATE_STATE_ANNOTATION));
    }

    #[test]
    fn test_grace_phases() {
        let mut live = pod("game:v1");
        assert_eq!(grace_phase(&live, "web-b", 30, now()), GracePhase::NotStarted);

        start_grace(&mut live, "web-b", now());
        assert_eq!(
            grace_phase(&live, "web-b", 30, now() + chrono::Duration::seconds(10)),
            GracePhase::Waiting(Duration::from_secs(20))
        );
        assert_eq!(
            grace_phase(&live, "web-b", 30, now() + chrono::Duration::seconds(30)),
            GracePhase::Elapsed
        );
        // a grace period for another revision does not count
        assert_eq!(grace_phase(&live, "web-c", 30, now()), GracePhase::NotStarted);
    }

    #[test]
    fn test_readiness_gate_condition() {
        let mut live = pod("game:v1");
        assert!(desired_ready_condition(&live).is_none());

        add_readiness_gate(&mut live);
        let condition = desired_ready_condition(&live).unwrap();
        assert_eq!(condition.status, "True");

        start_grace(&mut live, "web-b", now());
        let condition = desired_ready_condition(&live).unwrap();
        assert_eq!(condition.status, "False");
    }

    #[test]
    fn test_hot_patch_rewrites_containers() {
        let mut live = pod("game:v1");
        let desired = template(json!({
            "name": "game", "image": "game:v1", "env": [{"name": "MODE", "value": "fast"}]
        }));
        apply_hot_patch(&mut live, &desired, "web-b", now());
        let container = &live.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.env.as_ref().map(Vec::len), Some(1));
        assert!(live.annotations().contains_key(HOTPATCH_UPDATE_STATE_ANNOTATION));
    }
}
