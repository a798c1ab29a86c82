//! # Pod Control
//!
//! Pod mutations issued by the Pod set reconciler. Every write emits an event and
//! bumps the Pod operation metric; "already exists" on create and "not found" on
//! delete count as success.

use crate::client::{retry_on_conflict, ClientError, EventKind, EventRecorder, NodeLookup, ObjectStore};
use crate::constants::NODE_LOST_FORCE_DELETE_ANNOTATION;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::GameStatefulSet;
use crate::observability::metrics;
use k8s_openapi::api::core::v1::{Pod, PodCondition};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, warn};

pub struct PodControl<'a> {
    pods: &'a dyn ObjectStore<Pod>,
    nodes: &'a dyn NodeLookup,
    recorder: &'a dyn EventRecorder,
    retries: u32,
}

impl<'a> PodControl<'a> {
    #[must_use]
    pub fn new(ctx: &'a Reconciler) -> Self {
        Self {
            pods: ctx.pods.as_ref(),
            nodes: ctx.nodes.as_ref(),
            recorder: ctx.recorder.as_ref(),
            retries: ctx.config.pod_update_retries,
        }
    }

    fn error(pod: &Pod, op: &'static str, source: ClientError) -> ReconcilerError {
        ReconcilerError::Pod {
            namespace: pod.namespace().unwrap_or_default(),
            pod: pod.name_any(),
            op,
            source,
        }
    }

    /// # Errors
    ///
    /// Any API error other than "already exists".
    pub async fn create_pod(&self, set: &GameStatefulSet, pod: &Pod) -> Result<(), ReconcilerError> {
        let namespace = pod.namespace().unwrap_or_default();
        match self.pods.create(&namespace, pod).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                debug!(pod = pod.name_any().as_str(), "Pod already exists");
                return Ok(());
            }
            Err(e) => {
                self.recorder
                    .publish(
                        set,
                        EventKind::Warning,
                        "FailedCreate",
                        format!("create Pod {} in GameStatefulSet {} failed: {e}", pod.name_any(), set.name_any()),
                    )
                    .await;
                return Err(Self::error(pod, "create", e));
            }
        }
        metrics::increment_pod_operations("create");
        info!(
            workload.name = set.name_any().as_str(),
            pod = pod.name_any().as_str(),
            "Created pod"
        );
        self.recorder
            .publish(
                set,
                EventKind::Normal,
                "SuccessfulCreate",
                format!("create Pod {} in GameStatefulSet {} successful", pod.name_any(), set.name_any()),
            )
            .await;
        Ok(())
    }

    /// Re-read the Pod, apply `mutate` and write it back, retrying on conflicts
    ///
    /// # Errors
    ///
    /// The last API error once retries are exhausted, or any non-conflict error.
    pub async fn update_pod<F>(
        &self,
        set: &GameStatefulSet,
        pod: &Pod,
        mutate: F,
    ) -> Result<Pod, ReconcilerError>
    where
        F: Fn(&mut Pod) + Sync,
    {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        let pods = self.pods;
        let mutate = &mutate;
        let (namespace_ref, name_ref) = (namespace.as_str(), name.as_str());
        let result = retry_on_conflict(self.retries, move |attempt| async move {
            let mut fresh = if attempt == 0 {
                pod.clone()
            } else {
                pods.get(namespace_ref, name_ref).await?
            };
            mutate(&mut fresh);
            pods.replace(namespace_ref, name_ref, &fresh).await
        })
        .await;

        match result {
            Ok(updated) => {
                metrics::increment_pod_operations("update");
                debug!(
                    workload.name = set.name_any().as_str(),
                    pod = name.as_str(),
                    "Updated pod"
                );
                self.recorder
                    .publish(
                        set,
                        EventKind::Normal,
                        "SuccessfulUpdate",
                        format!("update Pod {name} in GameStatefulSet {} successful", set.name_any()),
                    )
                    .await;
                Ok(updated)
            }
            Err(e) => {
                self.recorder
                    .publish(
                        set,
                        EventKind::Warning,
                        "FailedUpdate",
                        format!("update Pod {name} in GameStatefulSet {} failed: {e}", set.name_any()),
                    )
                    .await;
                Err(Self::error(pod, "update", e))
            }
        }
    }

    /// # Errors
    ///
    /// Any API error other than "not found".
    pub async fn delete_pod(&self, set: &GameStatefulSet, pod: &Pod) -> Result<(), ReconcilerError> {
        self.delete_with_grace(set, pod, None, "delete").await
    }

    /// Force-delete a terminating Pod whose node is confirmed NotReady
    ///
    /// Only Pods carrying the node-lost annotation qualify. Returns whether the
    /// Pod was deleted.
    ///
    /// # Errors
    ///
    /// Node lookup or delete failures.
    pub async fn force_delete_pod(&self, set: &GameStatefulSet, pod: &Pod) -> Result<bool, ReconcilerError> {
        if pod.annotations().get(NODE_LOST_FORCE_DELETE_ANNOTATION).map(String::as_str) != Some("true") {
            return Ok(false);
        }
        let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) else {
            return Ok(false);
        };
        let ready = self
            .nodes
            .node_ready(node_name)
            .await
            .map_err(|e| Self::error(pod, "look up node of", e))?;
        if ready != Some(false) {
            return Ok(false);
        }
        warn!(
            workload.name = set.name_any().as_str(),
            pod = pod.name_any().as_str(),
            node = node_name,
            "Force deleting pod on lost node"
        );
        self.delete_with_grace(set, pod, Some(0), "force-delete").await?;
        Ok(true)
    }

    async fn delete_with_grace(
        &self,
        set: &GameStatefulSet,
        pod: &Pod,
        grace_period_seconds: Option<u32>,
        verb: &'static str,
    ) -> Result<(), ReconcilerError> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        match self.pods.delete(&namespace, &name, grace_period_seconds).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                self.recorder
                    .publish(
                        set,
                        EventKind::Warning,
                        "FailedDelete",
                        format!("delete Pod {name} in GameStatefulSet {} failed: {e}", set.name_any()),
                    )
                    .await;
                return Err(Self::error(pod, verb, e));
            }
        }
        metrics::increment_pod_operations(verb);
        info!(
            workload.name = set.name_any().as_str(),
            pod = name.as_str(),
            "Deleted pod"
        );
        self.recorder
            .publish(
                set,
                EventKind::Normal,
                "SuccessfulDelete",
                format!("delete Pod {name} in GameStatefulSet {} successful", set.name_any()),
            )
            .await;
        Ok(())
    }

    /// Set one status condition, leaving the others untouched
    ///
    /// Skips the write when type, status and reason already match.
    ///
    /// # Errors
    ///
    /// Any API error other than "not found".
    pub async fn update_pod_condition(
        &self,
        pod: &Pod,
        condition: PodCondition,
    ) -> Result<(), ReconcilerError> {
        let mut conditions = pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.clone())
            .unwrap_or_default();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing)
                if existing.status == condition.status && existing.reason == condition.reason =>
            {
                return Ok(());
            }
            Some(existing) => *existing = condition,
            None => conditions.push(condition),
        }
        let patch = json!({ "status": { "conditions": conditions } });
        let namespace = pod.namespace().unwrap_or_default();
        match self.pods.patch_status(&namespace, &pod.name_any(), &patch).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(Self::error(pod, "update condition of", e)),
        }
    }
}
