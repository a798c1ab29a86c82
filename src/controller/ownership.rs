//! # Ownership
//!
//! Adopt orphaned Pods and revisions that belong to a workload and release owned
//! objects that no longer do. Adoption re-reads the workload first so a workload
//! that was deleted or recreated under the same name never adopts anything.

use crate::client::{selector_matches, ObjectStore};
use crate::controller::identity::{controller_ref, is_member_of, owner_reference};
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::GameStatefulSet;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

/// How a listed object relates to the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Owned,
    Adopt,
    Release,
    Ignore,
}

/// Decide what to do with `meta`'s object
///
/// `belongs` says whether the object would be ours if nobody owned it.
#[must_use]
pub fn classify(set: &GameStatefulSet, meta: &kube::api::ObjectMeta, belongs: bool) -> Claim {
    let uid = set.uid().unwrap_or_default();
    match controller_ref(meta) {
        Some(owner) if owner.uid == uid => {
            if belongs {
                Claim::Owned
            } else {
                Claim::Release
            }
        }
        Some(_) => Claim::Ignore,
        None if belongs && set.metadata.deletion_timestamp.is_none() && meta.deletion_timestamp.is_none() => {
            Claim::Adopt
        }
        None => Claim::Ignore,
    }
}

/// The workload is still the one we were asked to reconcile
async fn can_adopt(ctx: &Reconciler, set: &GameStatefulSet) -> Result<bool, ReconcilerError> {
    let namespace = set.namespace().unwrap_or_default();
    let live = ctx
        .workloads
        .get(&namespace, &set.name_any())
        .await
        .map_err(|source| ReconcilerError::Workload {
            workload: set.key(),
            op: "re-read",
            source,
        })?;
    Ok(live.uid() == set.uid() && live.metadata.deletion_timestamp.is_none())
}

async fn claim<K>(
    ctx: &Reconciler,
    store: &dyn ObjectStore<K>,
    set: &GameStatefulSet,
    objects: Vec<K>,
    belongs: impl Fn(&K) -> bool,
    kind: &'static str,
) -> Result<Vec<K>, ReconcilerError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let namespace = set.namespace().unwrap_or_default();
    let uid = set.uid().unwrap_or_default();
    let mut claimed = Vec::with_capacity(objects.len());
    let mut adoption_checked: Option<bool> = None;
    let error = |name: String, source| match kind {
        "Pod" => ReconcilerError::Pod {
            namespace: namespace.clone(),
            pod: name,
            op: "claim",
            source,
        },
        _ => ReconcilerError::Revision {
            workload: set.key(),
            name,
            op: "claim",
            source,
        },
    };

    for obj in objects {
        let name = obj.meta().name.clone().unwrap_or_default();
        match classify(set, obj.meta(), belongs(&obj)) {
            Claim::Owned => claimed.push(obj),
            Claim::Ignore => {}
            Claim::Adopt => {
                let allowed = match adoption_checked {
                    Some(allowed) => allowed,
                    None => {
                        let allowed = can_adopt(ctx, set).await?;
                        adoption_checked = Some(allowed);
                        allowed
                    }
                };
                if !allowed {
                    continue;
                }
                let mut owners = obj.meta().owner_references.clone().unwrap_or_default();
                owners.push(owner_reference(set));
                let patch = json!({ "metadata": { "ownerReferences": owners } });
                match store.patch(&namespace, &name, &patch).await {
                    Ok(adopted) => {
                        info!(
                            workload.name = set.name_any().as_str(),
                            kind,
                            name = name.as_str(),
                            "Adopted orphan"
                        );
                        claimed.push(adopted);
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(error(name, e)),
                }
            }
            Claim::Release => {
                let owners: Vec<_> = obj
                    .meta()
                    .owner_references
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|o| o.uid != uid)
                    .collect();
                let patch = json!({ "metadata": { "ownerReferences": owners } });
                match store.patch(&namespace, &name, &patch).await {
                    Ok(_) => debug!(kind, name = name.as_str(), "Released object"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(error(name, e)),
                }
            }
        }
    }
    Ok(claimed)
}

/// Pods owned by the workload after adopting and releasing
///
/// # Errors
///
/// Workload re-read or Pod patch failures.
pub async fn claim_pods(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pods: Vec<Pod>,
) -> Result<Vec<Pod>, ReconcilerError> {
    let selector = set.spec.selector.clone();
    let belongs = |pod: &Pod| {
        is_member_of(set, pod) && selector_matches(&selector, pod.labels()).unwrap_or(false)
    };
    claim(ctx, ctx.pods.as_ref(), set, pods, belongs, "Pod").await
}

/// Revisions owned by the workload after adopting and releasing
///
/// # Errors
///
/// Workload re-read or revision patch failures.
pub async fn claim_revisions(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    revisions: Vec<ControllerRevision>,
) -> Result<Vec<ControllerRevision>, ReconcilerError> {
    let selector = set.spec.selector.clone();
    let belongs = |revision: &ControllerRevision| {
        selector_matches(&selector, revision.labels()).unwrap_or(false)
    };
    claim(ctx, ctx.revisions.as_ref(), set, revisions, belongs, "ControllerRevision").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GameStatefulSetSpec;
    use kube::api::ObjectMeta;

    fn workload() -> GameStatefulSet {
        let mut set = GameStatefulSet::new(
            "web",
            serde_json::from_value::<GameStatefulSetSpec>(json!({"selector": {}, "template": {}}))
                .unwrap(),
        );
        set.metadata.uid = Some("uid-1".to_string());
        set
    }

    fn meta_owned_by(uid: Option<&str>) -> ObjectMeta {
        let mut meta = ObjectMeta::default();
        if let Some(uid) = uid {
            let mut owner = owner_reference(&workload());
            owner.uid = uid.to_string();
            meta.owner_references = Some(vec![owner]);
        }
        meta
    }

    #[test]
    fn test_classification() {
        let set = workload();
        assert_eq!(classify(&set, &meta_owned_by(Some("uid-1")), true), Claim::Owned);
        assert_eq!(classify(&set, &meta_owned_by(Some("uid-1")), false), Claim::Release);
        assert_eq!(classify(&set, &meta_owned_by(Some("other")), true), Claim::Ignore);
        assert_eq!(classify(&set, &meta_owned_by(None), true), Claim::Adopt);
        assert_eq!(classify(&set, &meta_owned_by(None), false), Claim::Ignore);
    }
}
