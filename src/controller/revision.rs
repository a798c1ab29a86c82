//! # Revision Manager
//!
//! Content-addressed snapshots of the Pod template stored as `ControllerRevision`s.
//! Each revision's data is the patch `{"spec":{"template":{...,"$patch":"replace"}}}`;
//! two revisions with structurally equal patches are never both kept.

use crate::client::{ClientError, ObjectStore};
use crate::constants::MAX_COLLISION_RETRIES;
use crate::controller::identity::{owner_reference, pod_revision};
use crate::controller::reconciler::ReconcilerError;
use crate::crd::GameStatefulSet;
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info};

/// Outcome of `compute_revisions`
#[derive(Debug, Clone)]
pub struct RevisionPair {
    /// Revision of the lowest-ordinal Pod that still has one; `update` when no Pod does
    pub current: ControllerRevision,
    /// Revision matching the live template
    pub update: ControllerRevision,
    pub collision_count: i32,
    /// All owned revisions after this pass, sorted by revision number
    pub revisions: Vec<ControllerRevision>,
}

/// Serialize the Pod template into the replace patch stored in revisions
///
/// # Errors
///
/// Fails only if the template cannot be serialized.
pub fn template_patch(set: &GameStatefulSet) -> Result<Value, serde_json::Error> {
    let mut template = serde_json::to_value(&set.spec.template)?;
    if let Value::Object(map) = &mut template {
        map.insert("$patch".to_string(), Value::String("replace".to_string()));
    }
    Ok(json!({ "spec": { "template": template } }))
}

/// `{workload}-{hash}` where the hash covers the patch and the collision count
#[must_use]
pub fn revision_name(set: &GameStatefulSet, patch: &Value, collision_count: i32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(patch.to_string().as_bytes());
    hasher.update(collision_count.to_be_bytes());
    let digest = hasher.finalize();
    let hash: String = digest.iter().take(5).map(|b| format!("{b:02x}")).collect();
    format!("{}-{hash}", set.name_any())
}

#[must_use]
pub fn new_revision(
    set: &GameStatefulSet,
    patch: &Value,
    number: i64,
    collision_count: i32,
) -> ControllerRevision {
    let labels = set
        .spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone());
    ControllerRevision {
        metadata: ObjectMeta {
            name: Some(revision_name(set, patch, collision_count)),
            namespace: set.namespace(),
            labels,
            owner_references: Some(vec![owner_reference(set)]),
            ..ObjectMeta::default()
        },
        data: Some(RawExtension(patch.clone())),
        revision: number,
    }
}

/// Sort by revision number, then name, so ties are deterministic
pub fn sort_revisions(revisions: &mut [ControllerRevision]) {
    revisions.sort_by(|a, b| {
        a.revision
            .cmp(&b.revision)
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });
}

#[must_use]
pub fn next_revision_number(revisions: &[ControllerRevision]) -> i64 {
    revisions.iter().map(|r| r.revision).max().unwrap_or(0) + 1
}

fn revision_data(revision: &ControllerRevision) -> Option<&Value> {
    revision.data.as_ref().map(|d| &d.0)
}

fn revision_error(set: &GameStatefulSet, name: &str, op: &'static str, source: ClientError) -> ReconcilerError {
    ReconcilerError::Revision {
        workload: set.key(),
        name: name.to_string(),
        op,
        source,
    }
}

/// Find or create the update revision and resolve the current one
///
/// `pods` must be sorted by ordinal; the first Pod whose revision still exists
/// decides the current revision.
///
/// # Errors
///
/// Revision create/update failures abort the pass; a template that cannot be
/// serialized is reported as `ReconcilerError::Serialization`.
pub async fn compute_revisions(
    store: &dyn ObjectStore<ControllerRevision>,
    set: &GameStatefulSet,
    existing: Vec<ControllerRevision>,
    pods: &[Pod],
) -> Result<RevisionPair, ReconcilerError> {
    let namespace = set.namespace().unwrap_or_default();
    let mut revisions = existing;
    sort_revisions(&mut revisions);
    let mut collision_count = set
        .status
        .as_ref()
        .and_then(|s| s.collision_count)
        .unwrap_or(0);

    let patch = template_patch(set).map_err(|source| ReconcilerError::Serialization {
        what: format!("pod template of {}", set.key()),
        source,
    })?;
    let next_number = next_revision_number(&revisions);
    let newest_equal = revisions
        .iter()
        .rposition(|r| revision_data(r) == Some(&patch));

    let update = match newest_equal {
        Some(i) if i + 1 == revisions.len() => revisions[i].clone(),
        Some(i) => {
            // Rolling back to an older template: bump it to the head of history
            let mut bumped = revisions[i].clone();
            bumped.revision = next_number;
            let name = bumped.name_any();
            let updated = store
                .replace(&namespace, &name, &bumped)
                .await
                .map_err(|e| revision_error(set, &name, "update", e))?;
            info!(
                workload.name = set.name_any().as_str(),
                revision = name.as_str(),
                number = next_number,
                "Reusing equal revision as update revision"
            );
            revisions[i] = updated.clone();
            updated
        }
        None => {
            let created =
                create_revision(store, set, &namespace, &patch, next_number, &mut collision_count)
                    .await?;
            revisions.push(created.clone());
            created
        }
    };
    sort_revisions(&mut revisions);

    let current = pods
        .iter()
        .filter_map(pod_revision)
        .find_map(|name| revisions.iter().find(|r| r.name_any() == name))
        .cloned()
        .unwrap_or_else(|| update.clone());

    Ok(RevisionPair {
        current,
        update,
        collision_count,
        revisions,
    })
}

async fn create_revision(
    store: &dyn ObjectStore<ControllerRevision>,
    set: &GameStatefulSet,
    namespace: &str,
    patch: &Value,
    number: i64,
    collision_count: &mut i32,
) -> Result<ControllerRevision, ReconcilerError> {
    for _ in 0..MAX_COLLISION_RETRIES {
        let revision = new_revision(set, patch, number, *collision_count);
        let name = revision.name_any();
        match store.create(namespace, &revision).await {
            Ok(created) => {
                metrics::increment_revisions_created();
                info!(
                    workload.name = set.name_any().as_str(),
                    revision = name.as_str(),
                    number,
                    "Created revision"
                );
                return Ok(created);
            }
            Err(e) if e.is_already_exists() => {
                let existing = store
                    .get(namespace, &name)
                    .await
                    .map_err(|e| revision_error(set, &name, "get", e))?;
                if revision_data(&existing) == Some(patch) {
                    return Ok(existing);
                }
                *collision_count += 1;
                debug!(
                    revision = name.as_str(),
                    collision_count = *collision_count,
                    "Revision name collision, retrying"
                );
            }
            Err(e) => return Err(revision_error(set, &name, "create", e)),
        }
    }
    Err(ReconcilerError::CollisionLimit {
        workload: set.key(),
        kind: "ControllerRevision",
    })
}

/// Reconstruct the workload as it was at `revision`
///
/// The revision patch is applied over a copy of the live spec: objects carrying
/// `"$patch": "replace"` replace their target, everything else merges.
///
/// # Errors
///
/// Fails when the revision has no data or the result does not deserialize.
pub fn apply_revision(
    set: &GameStatefulSet,
    revision: &ControllerRevision,
) -> Result<GameStatefulSet, ReconcilerError> {
    let patch = revision_data(revision)
        .and_then(|d| d.get("spec"))
        .ok_or(ReconcilerError::MissingField {
            kind: "ControllerRevision",
            field: "data.spec",
        })?;
    let serialization = |source| ReconcilerError::Serialization {
        what: format!("revision {}", revision.name_any()),
        source,
    };
    let mut spec = serde_json::to_value(&set.spec).map_err(serialization)?;
    apply_with_directives(&mut spec, patch);
    let mut snapshot = set.clone();
    snapshot.spec = serde_json::from_value(spec).map_err(serialization)?;
    Ok(snapshot)
}

fn apply_with_directives(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if patch_map.get("$patch").and_then(Value::as_str) == Some("replace") {
        let mut replacement = patch_map.clone();
        replacement.remove("$patch");
        *target = Value::Object(replacement);
        return;
    }
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_with_directives(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Delete the oldest non-live revisions beyond the history limit
///
/// Live revisions (current, update, any referenced by a Pod) are never deleted.
/// Returns how many revisions were deleted.
///
/// # Errors
///
/// Delete failures other than "not found" abort the pass.
pub async fn truncate_history(
    store: &dyn ObjectStore<ControllerRevision>,
    set: &GameStatefulSet,
    pods: &[Pod],
    revisions: &[ControllerRevision],
    current: &ControllerRevision,
    update: &ControllerRevision,
) -> Result<usize, ReconcilerError> {
    let current_name = current.name_any();
    let update_name = update.name_any();
    let mut live: HashSet<&str> = pods.iter().filter_map(pod_revision).collect();
    live.insert(&current_name);
    live.insert(&update_name);

    let mut history: Vec<ControllerRevision> = revisions
        .iter()
        .filter(|r| !live.contains(r.name_any().as_str()))
        .cloned()
        .collect();
    sort_revisions(&mut history);

    let limit = usize::try_from(set.revision_history_limit()).unwrap_or(0);
    if history.len() <= limit {
        return Ok(0);
    }
    let excess = history.len() - limit;
    let namespace = set.namespace().unwrap_or_default();
    for revision in history.iter().take(excess) {
        let name = revision.name_any();
        match store.delete(&namespace, &name, None).await {
            Ok(()) => debug!(revision = name.as_str(), "Deleted revision beyond history limit"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(revision_error(set, &name, "delete", e)),
        }
    }
    Ok(excess)
}
