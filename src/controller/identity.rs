//! # Pod Identity
//!
//! Pure helpers deriving a managed Pod's ordinal, identity and storage, and the
//! status predicates the Pod set reconciler gates on. Call sites must use these
//! named predicates rather than re-deriving them, so "healthy" means the same
//! thing everywhere.

use crate::constants::{POD_NAME_LABEL, REVISION_LABEL};
use crate::crd::GameStatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaimVolumeSource, Pod, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use regex::Regex;
use std::sync::LazyLock;

static ORDINAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)-([0-9]+)$")
        .expect("Failed to compile ordinal pattern - this should never happen")
});

/// Parent workload name and ordinal parsed from a Pod name
#[must_use]
pub fn parent_and_ordinal(pod_name: &str) -> Option<(String, i32)> {
    let captures = ORDINAL_PATTERN.captures(pod_name)?;
    let parent = captures.get(1)?.as_str().to_string();
    let ordinal = captures.get(2)?.as_str().parse::<i32>().ok()?;
    Some((parent, ordinal))
}

/// Ordinal of a Pod name, or -1 when the name carries none
#[must_use]
pub fn ordinal_of(pod_name: &str) -> i32 {
    parent_and_ordinal(pod_name).map_or(-1, |(_, ordinal)| ordinal)
}

#[must_use]
pub fn pod_ordinal(pod: &Pod) -> i32 {
    ordinal_of(&pod.name_any())
}

#[must_use]
pub fn pod_name(set: &GameStatefulSet, ordinal: i32) -> String {
    format!("{}-{ordinal}", set.name_any())
}

/// Name of the claim backing `claim_template` for one ordinal
#[must_use]
pub fn claim_name(claim_template: &str, set: &GameStatefulSet, ordinal: i32) -> String {
    format!("{claim_template}-{}", pod_name(set, ordinal))
}

/// Whether the Pod name parses to this workload as parent
#[must_use]
pub fn is_member_of(set: &GameStatefulSet, pod: &Pod) -> bool {
    parent_and_ordinal(&pod.name_any()).is_some_and(|(parent, _)| parent == set.name_any())
}

#[must_use]
pub fn identity_matches(set: &GameStatefulSet, pod: &Pod) -> bool {
    let ordinal = pod_ordinal(pod);
    let name = pod.name_any();
    ordinal >= 0
        && name == pod_name(set, ordinal)
        && pod.namespace() == set.namespace()
        && pod.labels().get(POD_NAME_LABEL) == Some(&name)
}

#[must_use]
pub fn storage_matches(set: &GameStatefulSet, pod: &Pod) -> bool {
    let ordinal = pod_ordinal(pod);
    if ordinal < 0 {
        return false;
    }
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map_or(&[][..], Vec::as_slice);
    set.spec.volume_claim_templates.iter().all(|template| {
        let template_name = template.name_any();
        let expected = claim_name(&template_name, set, ordinal);
        volumes.iter().any(|v| {
            v.name == template_name
                && v
                    .persistent_volume_claim
                    .as_ref()
                    .is_some_and(|pvc| pvc.claim_name == expected)
        })
    })
}

/// Rewrite the identity label, hostname and subdomain
pub fn update_identity(set: &GameStatefulSet, pod: &mut Pod) {
    let name = pod.name_any();
    pod.labels_mut().insert(POD_NAME_LABEL.to_string(), name.clone());
    let spec = pod.spec.get_or_insert_with(Default::default);
    spec.hostname = Some(name);
    if !set.spec.service_name.is_empty() {
        spec.subdomain = Some(set.spec.service_name.clone());
    }
}

/// Point one volume per claim template at the ordinal's claim, keeping other volumes
pub fn update_storage(set: &GameStatefulSet, pod: &mut Pod) {
    let ordinal = pod_ordinal(pod);
    if ordinal < 0 || set.spec.volume_claim_templates.is_empty() {
        return;
    }
    let spec = pod.spec.get_or_insert_with(Default::default);
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    for template in &set.spec.volume_claim_templates {
        let template_name = template.name_any();
        let volume = Volume {
            name: template_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name(&template_name, set, ordinal),
                read_only: None,
            }),
            ..Volume::default()
        };
        match volumes.iter_mut().find(|v| v.name == template_name) {
            Some(existing) => *existing = volume,
            None => volumes.push(volume),
        }
    }
}

#[must_use]
pub fn pod_revision(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(REVISION_LABEL))
        .map(String::as_str)
}

pub fn set_pod_revision(pod: &mut Pod, revision: &str) {
    pod.labels_mut()
        .insert(REVISION_LABEL.to_string(), revision.to_string());
}

/// Controller reference pointing at the workload
#[must_use]
pub fn owner_reference(set: &GameStatefulSet) -> OwnerReference {
    OwnerReference {
        api_version: GameStatefulSet::api_version(&()).to_string(),
        kind: GameStatefulSet::kind(&()).to_string(),
        name: set.name_any(),
        uid: set.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether `meta` is controlled by the object with `uid`
#[must_use]
pub fn is_controlled_by(meta: &ObjectMeta, uid: &str) -> bool {
    controller_ref(meta).is_some_and(|r| r.uid == uid)
}

#[must_use]
pub fn controller_ref(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Stamp a Pod for `ordinal` from `set`'s template (already at `revision`)
#[must_use]
pub fn new_pod_from_template(set: &GameStatefulSet, revision: &str, ordinal: i32) -> Pod {
    let template = &set.spec.template;
    let template_meta = template.metadata.clone().unwrap_or_default();
    let mut pod = Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(set, ordinal)),
            namespace: set.namespace(),
            labels: template_meta.labels,
            annotations: template_meta.annotations,
            owner_references: Some(vec![owner_reference(set)]),
            ..ObjectMeta::default()
        },
        spec: template.spec.clone(),
        status: None,
    };
    update_identity(set, &mut pod);
    update_storage(set, &mut pod);
    set_pod_revision(&mut pod, revision);
    pod
}

/// The API server has accepted the Pod and assigned it a phase
#[must_use]
pub fn is_created(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_ref()).is_some()
}

#[must_use]
pub fn is_failed(pod: &Pod) -> bool {
    phase(pod) == Some("Failed")
}

#[must_use]
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

#[must_use]
pub fn is_running_and_ready(pod: &Pod) -> bool {
    phase(pod) == Some("Running") && has_condition(pod, "Ready", "True")
}

/// Running, ready and not on its way out
#[must_use]
pub fn is_healthy(pod: &Pod) -> bool {
    is_running_and_ready(pod) && !is_terminating(pod)
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

#[must_use]
pub fn has_condition(pod: &Pod, type_: &str, status: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == type_ && c.status == status)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GameStatefulSetSpec;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec};
    use serde_json::json;

    fn workload() -> GameStatefulSet {
        let mut set = GameStatefulSet::new(
            "web",
            GameStatefulSetSpec {
                replicas: Some(3),
                selector: Default::default(),
                template: PodTemplateSpec::default(),
                volume_claim_templates: vec![PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some("data".to_string()),
                        ..ObjectMeta::default()
                    },
                    ..PersistentVolumeClaim::default()
                }],
                service_name: "web-svc".to_string(),
                pod_management_policy: Default::default(),
                update_strategy: Default::default(),
                pre_delete_update_strategy: None,
                pre_inplace_update_strategy: None,
                post_inplace_update_strategy: None,
                revision_history_limit: None,
            },
        );
        set.metadata.namespace = Some("default".to_string());
        set.metadata.uid = Some("uid-1".to_string());
        set
    }

    fn pod_from_json(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ordinal_parsing() {
        assert_eq!(ordinal_of("web-0"), 0);
        assert_eq!(ordinal_of("web-12"), 12);
        assert_eq!(ordinal_of("my-game-server-3"), 3);
        assert_eq!(ordinal_of("web"), -1);
        assert_eq!(ordinal_of("web-abc"), -1);
        assert_eq!(
            parent_and_ordinal("my-game-server-3"),
            Some(("my-game-server".to_string(), 3))
        );
    }

    #[test]
    fn test_new_pod_matches_identity_and_storage() {
        let set = workload();
        let pod = new_pod_from_template(&set, "web-abc", 2);
        assert_eq!(pod.name_any(), "web-2");
        assert!(identity_matches(&set, &pod));
        assert!(storage_matches(&set, &pod));
        assert_eq!(pod_revision(&pod), Some("web-abc"));
        assert_eq!(
            pod.spec.as_ref().unwrap().subdomain.as_deref(),
            Some("web-svc")
        );
        assert!(is_controlled_by(&pod.metadata, "uid-1"));
        assert!(!is_created(&pod));
    }

    #[test]
    fn test_identity_mismatch_is_repaired() {
        let set = workload();
        let mut pod = new_pod_from_template(&set, "web-abc", 1);
        pod.labels_mut().remove(POD_NAME_LABEL);
        pod.spec.as_mut().unwrap().volumes = None;
        assert!(!identity_matches(&set, &pod));
        assert!(!storage_matches(&set, &pod));

        update_identity(&set, &mut pod);
        update_storage(&set, &mut pod);
        assert!(identity_matches(&set, &pod));
        assert!(storage_matches(&set, &pod));
    }

    #[test]
    fn test_status_predicates() {
        let ready = pod_from_json(json!({
            "metadata": {"name": "web-0"},
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
        }));
        assert!(is_created(&ready));
        assert!(is_running_and_ready(&ready));
        assert!(is_healthy(&ready));

        let terminating = pod_from_json(json!({
            "metadata": {"name": "web-0", "deletionTimestamp": "2024-01-01T00:00:00Z"},
            "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]}
        }));
        assert!(is_running_and_ready(&terminating));
        assert!(is_terminating(&terminating));
        assert!(!is_healthy(&terminating));

        let failed = pod_from_json(json!({
            "metadata": {"name": "web-0"},
            "status": {"phase": "Failed"}
        }));
        assert!(is_failed(&failed));
        assert!(!is_healthy(&failed));
    }
}
