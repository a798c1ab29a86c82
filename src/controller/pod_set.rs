//! # Pod Set
//!
//! One convergence pass over the Pods of a GameStatefulSet.
//!
//! Observed Pods are split into in-range replicas (ordinal below the desired
//! count) and condemned Pods. Missing replicas are created, failed ones replaced,
//! condemned ones deleted highest ordinal first, and finally Pods that are not on
//! the update revision are moved there by the configured update strategy.
//!
//! Under `OrderedReady` management the pass stops at the first Pod that is not
//! settled and leaves the rest to a later pass. Under `Parallel` management it
//! skips such Pods and keeps going.

use crate::controller::canary;
use crate::controller::hooks;
use crate::controller::identity::{
    identity_matches, is_created, is_failed, is_healthy, is_running_and_ready, is_terminating,
    new_pod_from_template, pod_ordinal, pod_revision, storage_matches, update_identity,
    update_storage,
};
use crate::controller::inplace::{self, GracePhase};
use crate::controller::pod_control::PodControl;
use crate::controller::reconciler::{Reconciler, ReconcilerError, SyncState};
use crate::controller::revision::{apply_revision, RevisionPair};
use crate::crd::{GameStatefulSet, GameStatefulSetStatus, UpdateStrategyType};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_MAX_UNAVAILABLE: &str = "25%";

/// Resolve an absolute or percentage value against `total`, rounding up
#[must_use]
pub fn scaled_value(value: &IntOrString, total: i32) -> Option<i32> {
    match value {
        IntOrString::Int(v) => Some(*v),
        IntOrString::String(s) => {
            let percent = s.strip_suffix('%')?.trim().parse::<i64>().ok()?;
            let scaled = (percent * i64::from(total) + 99).div_euclid(100);
            i32::try_from(scaled).ok()
        }
    }
}

/// Pods that may be unavailable at once during an update, at least 1
#[must_use]
pub fn max_unavailable(set: &GameStatefulSet) -> i32 {
    let default = IntOrString::String(DEFAULT_MAX_UNAVAILABLE.to_string());
    let value = set
        .spec
        .update_strategy
        .rolling_update
        .as_ref()
        .and_then(|r| r.max_unavailable.as_ref())
        .unwrap_or(&default);
    scaled_value(value, set.replicas()).unwrap_or(1).max(1)
}

/// Extra Pods that may run above the desired count, never negative
#[must_use]
pub fn max_surge(set: &GameStatefulSet) -> i32 {
    set.spec
        .update_strategy
        .rolling_update
        .as_ref()
        .and_then(|r| r.max_surge.as_ref())
        .and_then(|v| scaled_value(v, set.replicas()))
        .unwrap_or(0)
        .max(0)
}

/// Rolling-update partition clamped to `[0, replicas]`
#[must_use]
pub fn effective_partition(set: &GameStatefulSet) -> i32 {
    canary::current_partition(set).clamp(0, set.replicas())
}

/// Reset the replica counters and recount them from `pods`
pub fn count_pods(status: &mut GameStatefulSetStatus, pods: &[Pod], current: &str, update: &str) {
    status.replicas = 0;
    status.ready_replicas = 0;
    status.current_replicas = 0;
    status.updated_replicas = 0;
    status.updated_ready_replicas = 0;
    for pod in pods {
        status.replicas += 1;
        let revision = pod_revision(pod);
        if is_running_and_ready(pod) {
            status.ready_replicas += 1;
            if revision == Some(update) {
                status.updated_ready_replicas += 1;
            }
        }
        if is_created(pod) && !is_terminating(pod) {
            if revision == Some(current) {
                status.current_replicas += 1;
            }
            if revision == Some(update) {
                status.updated_replicas += 1;
            }
        }
    }
}

fn adjust_counters(status: &mut GameStatefulSetStatus, pod: &Pod, current: &str, update: &str, delta: i32) {
    status.replicas += delta;
    let revision = pod_revision(pod);
    if revision == Some(current) {
        status.current_replicas += delta;
    }
    if revision == Some(update) {
        status.updated_replicas += delta;
    }
}

/// Shared context of one pass, handed to every update-strategy handler
struct PodSet<'a> {
    ctx: &'a Reconciler,
    control: PodControl<'a>,
    set: &'a GameStatefulSet,
    current_set: GameStatefulSet,
    update_set: GameStatefulSet,
    current_revision: String,
    update_revision: String,
    monotonic: bool,
    partition: i32,
}

/// What an update handler did with one Pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Touch {
    Updated,
    Blocked,
}

impl PodSet<'_> {
    /// Pod for `ordinal` from the current or update revision
    fn new_versioned_pod(&self, ordinal: i32) -> Pod {
        let use_current = self.monotonic
            && self.set.update_type() != UpdateStrategyType::OnDelete
            && ordinal < self.partition;
        let (template_set, revision) = if use_current {
            (&self.current_set, self.current_revision.as_str())
        } else {
            (&self.update_set, self.update_revision.as_str())
        };
        let mut pod = new_pod_from_template(template_set, revision, ordinal);
        if self.set.update_type() == UpdateStrategyType::InplaceUpdate {
            inplace::add_readiness_gate(&mut pod);
        }
        pod
    }

    fn requeue(&self, after: Duration) {
        self.ctx.requeue.push(&self.set.key(), after);
    }

    /// Keep the `InPlaceUpdateReady` condition in step with the grace annotation
    async fn refresh_readiness_gate(&self, pod: &Pod) -> Result<(), ReconcilerError> {
        match inplace::desired_ready_condition(pod) {
            Some(condition) => self.control.update_pod_condition(pod, condition).await,
            None => Ok(()),
        }
    }

    async fn update(&self, pod: &Pod, state: &mut SyncState) -> Result<Touch, ReconcilerError> {
        match self.set.update_type() {
            UpdateStrategyType::RollingUpdate => self.rolling_update(pod, state).await,
            UpdateStrategyType::InplaceUpdate => self.in_place_update(pod, state).await,
            UpdateStrategyType::HotPatchUpdate => self.hot_patch_update(pod).await,
            UpdateStrategyType::OnDelete => Ok(Touch::Blocked),
        }
    }

    async fn rolling_update(&self, pod: &Pod, state: &mut SyncState) -> Result<Touch, ReconcilerError> {
        if !hooks::check_delete(self.ctx, self.set, pod, state).await? {
            return Ok(Touch::Blocked);
        }
        info!(
            workload.name = self.set.name_any().as_str(),
            pod = pod.name_any().as_str(),
            revision = self.update_revision.as_str(),
            "Deleting pod for rolling update"
        );
        self.control.delete_pod(self.set, pod).await?;
        Ok(Touch::Updated)
    }

    async fn in_place_update(&self, pod: &Pod, state: &mut SyncState) -> Result<Touch, ReconcilerError> {
        let template = &self.update_set.spec.template;
        let changes = inplace::image_changes(pod, template)?;

        let has_pre_inplace_hook = self
            .set
            .spec
            .pre_inplace_update_strategy
            .as_ref()
            .is_some_and(|s| s.hook.is_some());
        let allowed = if has_pre_inplace_hook {
            hooks::check_inplace(self.ctx, self.set, pod, template, state).await?
        } else {
            hooks::check_delete(self.ctx, self.set, pod, state).await?
        };
        if !allowed {
            return Ok(Touch::Blocked);
        }

        let now = self.ctx.clock.now();
        let grace_seconds = self.set.in_place_grace_seconds();
        if grace_seconds > 0 {
            match inplace::grace_phase(pod, &self.update_revision, grace_seconds, now) {
                GracePhase::NotStarted => {
                    let revision = self.update_revision.as_str();
                    let marked = self
                        .control
                        .update_pod(self.set, pod, |p| inplace::start_grace(p, revision, now))
                        .await?;
                    self.refresh_readiness_gate(&marked).await?;
                    self.requeue(Duration::from_secs(grace_seconds.unsigned_abs()));
                    return Ok(Touch::Updated);
                }
                GracePhase::Waiting(remaining) => {
                    debug!(
                        pod = pod.name_any().as_str(),
                        remaining_secs = remaining.as_secs(),
                        "In-place grace period running"
                    );
                    self.requeue(remaining);
                    return Ok(Touch::Updated);
                }
                GracePhase::Elapsed => {}
            }
        }

        let revision = self.update_revision.as_str();
        let updated = self
            .control
            .update_pod(self.set, pod, |p| inplace::apply_in_place(p, &changes, revision, now))
            .await?;
        info!(
            workload.name = self.set.name_any().as_str(),
            pod = pod.name_any().as_str(),
            revision,
            containers = changes.len(),
            "Updated pod in place"
        );
        self.refresh_readiness_gate(&updated).await?;
        hooks::create_post_inplace_hook(self.ctx, self.set, &updated, state).await?;
        Ok(Touch::Updated)
    }

    async fn hot_patch_update(&self, pod: &Pod) -> Result<Touch, ReconcilerError> {
        let template = &self.update_set.spec.template;
        let revision = self.update_revision.as_str();
        let now = self.ctx.clock.now();
        self.control
            .update_pod(self.set, pod, |p| inplace::apply_hot_patch(p, template, revision, now))
            .await?;
        info!(
            workload.name = self.set.name_any().as_str(),
            pod = pod.name_any().as_str(),
            revision,
            "Hot-patched pod"
        );
        Ok(Touch::Updated)
    }
}

/// Converge the Pods of `set` one step towards its spec
///
/// `pods` are the claimed Pods of the workload. Counters in `state.status` are
/// recomputed from them and adjusted for every Pod created or replaced.
///
/// # Errors
///
/// Any Pod, hook-run or revision failure aborts the pass; work already written
/// stays and the next pass resumes from the observed state.
pub async fn sync_pods(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    revisions: &RevisionPair,
    pods: Vec<Pod>,
    state: &mut SyncState,
) -> Result<(), ReconcilerError> {
    let replica_count = set.replicas();
    let current_revision = revisions.current.name_any();
    let update_revision = revisions.update.name_any();
    let pass = PodSet {
        ctx,
        control: PodControl::new(ctx),
        set,
        current_set: apply_revision(set, &revisions.current)?,
        update_set: apply_revision(set, &revisions.update)?,
        monotonic: !set.allows_burst(),
        partition: effective_partition(set),
        current_revision,
        update_revision,
    };
    let (current, update) = (pass.current_revision.as_str(), pass.update_revision.as_str());
    let monotonic = pass.monotonic;
    let key = set.key();

    // Split observed Pods into replicas and condemned
    count_pods(&mut state.status, &pods, current, update);
    let mut slots: Vec<Option<Pod>> = vec![None; usize::try_from(replica_count).unwrap_or(0)];
    let mut condemned = Vec::new();
    let mut updated_ready_in_range = 0;
    for pod in pods {
        let ordinal = pod_ordinal(&pod);
        match usize::try_from(ordinal) {
            Ok(index) if ordinal < replica_count => {
                if is_running_and_ready(&pod) && pod_revision(&pod) == Some(update) {
                    updated_ready_in_range += 1;
                }
                slots[index] = Some(pod);
            }
            Ok(_) => condemned.push(pod),
            Err(_) => {}
        }
    }

    // Borrow condemned ordinals as extra slots while an update is in flight
    if !monotonic && set.update_type() != UpdateStrategyType::OnDelete && current != update {
        let not_updated = (replica_count - updated_ready_in_range - pass.partition).max(0);
        let surge = max_surge(set).min(not_updated);
        for ordinal in replica_count..replica_count + surge {
            let position = condemned.iter().position(|p| pod_ordinal(p) == ordinal);
            slots.push(position.map(|i| condemned.remove(i)));
        }
        if surge > 0 {
            debug!(workload.name = set.name_any().as_str(), surge, "Borrowing surge slots");
        }
    }
    condemned.sort_by_key(|p| std::cmp::Reverse(pod_ordinal(p)));

    let mut slots: Vec<Pod> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| pass.new_versioned_pod(i32::try_from(index).unwrap_or(i32::MAX)))
        })
        .collect();

    // The one unhealthy Pod allowed to be scaled down out of order
    let first_unhealthy = slots
        .iter()
        .chain(condemned.iter())
        .filter(|p| !is_healthy(p))
        .min_by_key(|p| pod_ordinal(p))
        .map(|p| p.name_any());

    for index in 0..slots.len() {
        let ordinal = i32::try_from(index).unwrap_or(i32::MAX);

        if is_failed(&slots[index]) {
            info!(
                workload.name = set.name_any().as_str(),
                pod = slots[index].name_any().as_str(),
                "Replacing failed pod"
            );
            pass.control.delete_pod(set, &slots[index]).await?;
            adjust_counters(&mut state.status, &slots[index], current, update, -1);
            slots[index] = pass.new_versioned_pod(ordinal);
        }
        if is_terminating(&slots[index]) && pass.control.force_delete_pod(set, &slots[index]).await? {
            adjust_counters(&mut state.status, &slots[index], current, update, -1);
            slots[index] = pass.new_versioned_pod(ordinal);
        }

        let pod = &slots[index];
        if !is_created(pod) {
            pass.control.create_pod(set, pod).await?;
            adjust_counters(&mut state.status, pod, current, update, 1);
            if monotonic {
                return Ok(());
            }
            continue;
        }
        if is_terminating(pod) {
            if monotonic {
                debug!(pod = pod.name_any().as_str(), "Waiting for pod to terminate");
                return Ok(());
            }
            continue;
        }

        pass.refresh_readiness_gate(pod).await?;
        hooks::update_post_inplace_hook(ctx, set, pod, state).await?;

        // Only Pods already on the update revision hold back ordered progress
        if pod_revision(pod) == Some(update) && !is_running_and_ready(pod) && monotonic {
            debug!(pod = pod.name_any().as_str(), "Waiting for pod to become ready");
            return Ok(());
        }
        if identity_matches(set, pod) && storage_matches(set, pod) {
            continue;
        }
        pass.control
            .update_pod(set, pod, |p| {
                update_identity(set, p);
                update_storage(set, p);
            })
            .await?;
    }

    for pod in &condemned {
        if is_terminating(pod) {
            if monotonic {
                return Ok(());
            }
            continue;
        }
        let exempt = first_unhealthy.as_deref() == Some(pod.name_any().as_str());
        if !is_running_and_ready(pod) && monotonic && !exempt {
            debug!(pod = pod.name_any().as_str(), "Condemned pod is unhealthy, waiting");
            return Ok(());
        }
        if !hooks::check_delete(ctx, set, pod, state).await? {
            if monotonic {
                return Ok(());
            }
            continue;
        }
        info!(
            workload.name = set.name_any().as_str(),
            pod = pod.name_any().as_str(),
            "Scaling down"
        );
        pass.control.delete_pod(set, pod).await?;
        ctx.expectations.expect_deletion(&key, pod);
        if monotonic {
            return Ok(());
        }
    }

    if state.paused(set) || set.update_type() == UpdateStrategyType::OnDelete {
        return Ok(());
    }

    let unavailable = i32::try_from(slots.iter().filter(|p| !is_healthy(p)).count()).unwrap_or(i32::MAX);
    let mut budget = max_unavailable(set) - unavailable;
    if budget <= 0 {
        debug!(
            workload.name = set.name_any().as_str(),
            unavailable, "Unavailable budget exhausted"
        );
        return Ok(());
    }
    let stop_after_one = monotonic || set.update_type() == UpdateStrategyType::HotPatchUpdate;
    let floor = usize::try_from(pass.partition).unwrap_or(0);
    for index in (floor..slots.len()).rev() {
        let pod = &slots[index];
        if pod_revision(pod) != Some(update) && !is_terminating(pod) {
            let touch = pass.update(pod, state).await?;
            debug!(pod = pod.name_any().as_str(), ?touch, "Update attempted");
            budget -= 1;
            if stop_after_one || budget <= 0 {
                return Ok(());
            }
            continue;
        }
        if !is_healthy(pod) && monotonic {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::GameStatefulSetSpec;
    use serde_json::json;

    fn workload(strategy: serde_json::Value) -> GameStatefulSet {
        GameStatefulSet::new(
            "web",
            serde_json::from_value::<GameStatefulSetSpec>(json!({
                "replicas": 4,
                "selector": {},
                "template": {},
                "updateStrategy": strategy,
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_scaled_values_round_up() {
        assert_eq!(scaled_value(&IntOrString::Int(2), 10), Some(2));
        assert_eq!(scaled_value(&IntOrString::String("25%".into()), 10), Some(3));
        assert_eq!(scaled_value(&IntOrString::String("25%".into()), 4), Some(1));
        assert_eq!(scaled_value(&IntOrString::String("half".into()), 4), None);
    }

    #[test]
    fn test_max_unavailable_defaults_and_floor() {
        assert_eq!(max_unavailable(&workload(json!({}))), 1);
        let set = workload(json!({"rollingUpdate": {"maxUnavailable": 0}}));
        assert_eq!(max_unavailable(&set), 1);
        let set = workload(json!({"rollingUpdate": {"maxUnavailable": "50%"}}));
        assert_eq!(max_unavailable(&set), 2);
    }

    #[test]
    fn test_negative_surge_is_clamped() {
        let set = workload(json!({"rollingUpdate": {"maxSurge": -3}}));
        assert_eq!(max_surge(&set), 0);
        let set = workload(json!({"rollingUpdate": {"maxSurge": "50%"}}));
        assert_eq!(max_surge(&set), 2);
    }

    #[test]
    fn test_partition_is_clamped_to_replicas() {
        let set = workload(json!({"rollingUpdate": {"partition": 9}}));
        assert_eq!(effective_partition(&set), 4);
        let set = workload(json!({"rollingUpdate": {"partition": -1}}));
        assert_eq!(effective_partition(&set), 0);
    }

    #[test]
    fn test_count_pods() {
        let pod = |name: &str, revision: &str, ready: bool| -> Pod {
            let ready = if ready { "True" } else { "False" };
            serde_json::from_value(json!({
                "metadata": {"name": name, "labels": {"controller-revision-hash": revision}},
                "status": {
                    "phase": "Running",
                    "conditions": [{"type": "Ready", "status": ready}]
                }
            }))
            .unwrap()
        };
        let pods = vec![pod("web-0", "a", true), pod("web-1", "b", true), pod("web-2", "b", false)];
        let mut status = GameStatefulSetStatus {
            replicas: 9,
            ..Default::default()
        };
        count_pods(&mut status, &pods, "a", "b");
        assert_eq!(status.replicas, 3);
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.current_replicas, 1);
        assert_eq!(status.updated_replicas, 2);
        assert_eq!(status.updated_ready_replicas, 1);
    }
}
