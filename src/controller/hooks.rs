//! # Hook Lifecycle
//!
//! Hook-runs gate destructive Pod operations (pre-delete, pre-in-place), follow up
//! on in-place updates (post-in-place) and drive canary steps. Every hook-run is
//! keyed by type, workload revision and either the Pod ordinal or the step index;
//! at most one live run exists per key.
//!
//! Runs are created under a deterministic name. When that name is taken, the
//! existing object is reused if it is an identical, unfinished run owned by this
//! workload; otherwise a numeric suffix is appended and creation retried.

use crate::client::{ClientError, EventKind};
use crate::constants::{
    HOOK_ORDINAL_LABEL, HOOK_REVISION_LABEL, HOOK_STEP_INDEX_LABEL, HOOK_TYPE_LABEL,
    HOOK_WORKLOAD_LABEL, MAX_COLLISION_RETRIES, PAUSE_REASON_STEP_HOOK,
};
use crate::controller::identity::{is_controlled_by, owner_reference, pod_ordinal, pod_revision};
use crate::controller::reconciler::{Reconciler, ReconcilerError, SyncState};
use crate::crd::{
    GameStatefulSet, GameStatefulSetStatus, HookArgument, HookPhase, HookRun, HookRunSpec,
    HookStep, HookStrategy, HookTemplate, PauseCondition, PodHookCondition,
};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    PreDelete,
    PreInplace,
    PostInplace,
    CanaryStep,
}

impl HookType {
    pub const POD_HOOKS: [HookType; 3] = [Self::PreDelete, Self::PreInplace, Self::PostInplace];

    /// Value of the hook type label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::PreDelete => "PreDelete",
            Self::PreInplace => "PreInplace",
            Self::PostInplace => "PostInplace",
            Self::CanaryStep => "Canary",
        }
    }

    fn name_part(self) -> &'static str {
        match self {
            Self::PreDelete => "predelete",
            Self::PreInplace => "preinplace",
            Self::PostInplace => "postinplace",
            Self::CanaryStep => "canary",
        }
    }

    fn strategy(self, set: &GameStatefulSet) -> Option<&HookStrategy> {
        match self {
            Self::PreDelete => set.spec.pre_delete_update_strategy.as_ref(),
            Self::PreInplace => set.spec.pre_inplace_update_strategy.as_ref(),
            Self::PostInplace => set.spec.post_inplace_update_strategy.as_ref(),
            Self::CanaryStep => None,
        }
    }

    fn conditions(self, status: &mut GameStatefulSetStatus) -> Option<&mut Vec<PodHookCondition>> {
        match self {
            Self::PreDelete => Some(&mut status.pre_delete_hook_conditions),
            Self::PreInplace => Some(&mut status.pre_inplace_hook_conditions),
            Self::PostInplace => Some(&mut status.post_inplace_hook_conditions),
            Self::CanaryStep => None,
        }
    }

    /// Whether an unsuccessful run should be replaced, honouring pending write-backs
    fn retry_requested(self, set: &GameStatefulSet, state: &SyncState) -> bool {
        let pending = match self {
            Self::PreDelete => state.overrides.retry_pre_delete_hooks,
            Self::PreInplace => state.overrides.retry_pre_inplace_hooks,
            Self::PostInplace => state.overrides.retry_post_inplace_hooks,
            Self::CanaryStep => return false,
        };
        pending.unwrap_or_else(|| self.strategy(set).is_some_and(|s| s.retry_unexpected_hooks))
    }

    fn clear_retry(self, state: &mut SyncState) {
        match self {
            Self::PreDelete => state.overrides.retry_pre_delete_hooks = Some(false),
            Self::PreInplace => state.overrides.retry_pre_inplace_hooks = Some(false),
            Self::PostInplace => state.overrides.retry_post_inplace_hooks = Some(false),
            Self::CanaryStep => {}
        }
    }

    fn key_label(self) -> &'static str {
        match self {
            Self::CanaryStep => HOOK_STEP_INDEX_LABEL,
            _ => HOOK_ORDINAL_LABEL,
        }
    }
}

fn hook_step(set: &GameStatefulSet, hook_type: HookType) -> Option<&HookStep> {
    hook_type.strategy(set).and_then(|s| s.hook.as_ref())
}

fn label<'a>(run: &'a HookRun, key: &str) -> Option<&'a str> {
    run.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

fn run_matches(run: &HookRun, hook_type: HookType, revision: &str, key: &str) -> bool {
    label(run, HOOK_TYPE_LABEL) == Some(hook_type.label())
        && label(run, HOOK_REVISION_LABEL) == Some(revision)
        && label(run, hook_type.key_label()) == Some(key)
}

/// The run for a key, preferring one that is neither cancelled nor being deleted
#[must_use]
pub fn find_hook_run<'a>(
    runs: &'a [HookRun],
    hook_type: HookType,
    revision: &str,
    key: &str,
) -> Option<&'a HookRun> {
    let all: Vec<&HookRun> = runs
        .iter()
        .filter(|r| run_matches(r, hook_type, revision, key))
        .collect();
    all.iter()
        .rev()
        .find(|r| !r.spec.terminate && r.metadata.deletion_timestamp.is_none())
        .or_else(|| all.last())
        .copied()
}

/// Template defaults, overridden by step arguments, overridden by `extra`
#[must_use]
pub fn build_args(
    template: &HookTemplate,
    step: &HookStep,
    extra: Vec<HookArgument>,
) -> Vec<HookArgument> {
    let mut args = template.spec.args.clone();
    for arg in step.args.iter().cloned().chain(extra) {
        match args.iter_mut().find(|a| a.name == arg.name) {
            Some(existing) => existing.value = arg.value,
            None => args.push(arg),
        }
    }
    args
}

/// Arguments describing the Pod a hook runs against
#[must_use]
pub fn pod_args(pod: &Pod) -> Vec<HookArgument> {
    let status = pod.status.as_ref();
    vec![
        HookArgument {
            name: "PodName".to_string(),
            value: Some(pod.name_any()),
        },
        HookArgument {
            name: "PodNamespace".to_string(),
            value: pod.namespace(),
        },
        HookArgument {
            name: "PodIP".to_string(),
            value: status.and_then(|s| s.pod_ip.clone()),
        },
        HookArgument {
            name: "HostIP".to_string(),
            value: status.and_then(|s| s.host_ip.clone()),
        },
    ]
}

/// Names of containers whose image differs from `template`
#[must_use]
pub fn modified_containers(pod: &Pod, template: &PodTemplateSpec) -> Vec<String> {
    let live = pod.spec.as_ref().map_or(&[][..], |s| s.containers.as_slice());
    template
        .spec
        .as_ref()
        .map_or(&[][..], |s| s.containers.as_slice())
        .iter()
        .filter(|desired| {
            live.iter()
                .find(|c| c.name == desired.name)
                .is_none_or(|c| c.image != desired.image)
        })
        .map(|c| c.name.clone())
        .collect()
}

fn hook_error(set: &GameStatefulSet, name: &str, op: &'static str, source: ClientError) -> ReconcilerError {
    ReconcilerError::HookRun {
        workload: set.key(),
        name: name.to_string(),
        op,
        source,
    }
}

async fn fetch_template(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    step: &HookStep,
) -> Result<HookTemplate, ReconcilerError> {
    let namespace = set.namespace().unwrap_or_default();
    ctx.hook_templates
        .get(&namespace, &step.template_name)
        .await
        .map_err(|e| hook_error(set, &step.template_name, "get template for", e))
}

/// Unsaved hook-run for `key` (Pod ordinal or step index)
#[must_use]
pub fn new_hook_run(
    set: &GameStatefulSet,
    hook_type: HookType,
    template: &HookTemplate,
    args: Vec<HookArgument>,
    revision: &str,
    key: &str,
) -> HookRun {
    let labels = BTreeMap::from([
        (HOOK_TYPE_LABEL.to_string(), hook_type.label().to_string()),
        (HOOK_WORKLOAD_LABEL.to_string(), set.name_any()),
        (HOOK_REVISION_LABEL.to_string(), revision.to_string()),
        (hook_type.key_label().to_string(), key.to_string()),
    ]);
    let mut run = HookRun::new(
        &format!("{revision}-{}-{key}", hook_type.name_part()),
        HookRunSpec {
            metrics: template.spec.metrics.clone(),
            args,
            terminate: false,
        },
    );
    run.metadata.namespace = set.namespace();
    run.metadata.labels = Some(labels);
    run.metadata.owner_references = Some(vec![owner_reference(set)]);
    run
}

/// Create `run`, resolving name collisions
///
/// # Errors
///
/// API errors other than a name collision, or too many collisions.
pub async fn create_hook_run(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    run: HookRun,
    hook_type: HookType,
) -> Result<HookRun, ReconcilerError> {
    let namespace = set.namespace().unwrap_or_default();
    let owner_uid = set.uid().unwrap_or_default();
    let base = run.name_any();
    let mut candidate = run;
    for attempt in 0..MAX_COLLISION_RETRIES {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        candidate.metadata.name = Some(name.clone());
        match ctx.hook_runs.create(&namespace, &candidate).await {
            Ok(created) => {
                metrics::increment_hook_runs_created(hook_type.label());
                info!(
                    workload.name = set.name_any().as_str(),
                    hook_run = name.as_str(),
                    hook_type = hook_type.label(),
                    "Created hook-run"
                );
                ctx.recorder
                    .publish(
                        set,
                        EventKind::Normal,
                        "SuccessfulCreateHookRun",
                        format!("created {} hook-run {name}", hook_type.label()),
                    )
                    .await;
                return Ok(created);
            }
            Err(e) if e.is_already_exists() => {
                let existing = match ctx.hook_runs.get(&namespace, &name).await {
                    Ok(existing) => existing,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(hook_error(set, &name, "get", e)),
                };
                if existing.spec == candidate.spec
                    && is_controlled_by(&existing.metadata, &owner_uid)
                    && !existing.phase().is_completed()
                {
                    debug!(hook_run = name.as_str(), "Reusing existing hook-run");
                    return Ok(existing);
                }
            }
            Err(e) => return Err(hook_error(set, &name, "create", e)),
        }
    }
    Err(ReconcilerError::CollisionLimit {
        workload: set.key(),
        kind: "HookRun",
    })
}

/// Stop a run that is no longer wanted; runs already cancelled or deleting are left alone
///
/// # Errors
///
/// API errors other than "not found".
pub async fn cancel_hook_run(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    run: &HookRun,
) -> Result<(), ReconcilerError> {
    if run.spec.terminate || run.metadata.deletion_timestamp.is_some() {
        return Ok(());
    }
    let name = run.name_any();
    let patch = json!({ "spec": { "terminate": true } });
    match ctx
        .hook_runs
        .patch(&set.namespace().unwrap_or_default(), &name, &patch)
        .await
    {
        Ok(_) => {
            debug!(hook_run = name.as_str(), "Cancelled hook-run");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(hook_error(set, &name, "cancel", e)),
    }
}

/// # Errors
///
/// API errors other than "not found".
pub async fn delete_hook_run(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    run: &HookRun,
    state: &mut SyncState,
) -> Result<(), ReconcilerError> {
    let name = run.name_any();
    match ctx
        .hook_runs
        .delete(&set.namespace().unwrap_or_default(), &name, None)
        .await
    {
        Ok(()) => debug!(hook_run = name.as_str(), "Deleted hook-run"),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(hook_error(set, &name, "delete", e)),
    }
    state.hook_runs.retain(|r| r.name_any() != name);
    Ok(())
}

fn upsert_condition(conditions: &mut Vec<PodHookCondition>, pod_name: &str, phase: HookPhase, now: &str) {
    match conditions.iter_mut().find(|c| c.pod_name == pod_name) {
        Some(existing) => existing.hook_phase = phase,
        None => conditions.push(PodHookCondition {
            pod_name: pod_name.to_string(),
            start_time: now.to_string(),
            hook_phase: phase,
        }),
    }
}

fn set_condition(state: &mut SyncState, hook_type: HookType, pod_name: &str, phase: HookPhase, now: &str) {
    if let Some(conditions) = hook_type.conditions(&mut state.status) {
        upsert_condition(conditions, pod_name, phase, now);
    }
}

fn clear_condition(state: &mut SyncState, hook_type: HookType, pod_name: &str) {
    if let Some(conditions) = hook_type.conditions(&mut state.status) {
        conditions.retain(|c| c.pod_name != pod_name);
    }
}

async fn create_pod_hook_run(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pod: &Pod,
    state: &mut SyncState,
    hook_type: HookType,
    step: &HookStep,
    extra: Vec<HookArgument>,
) -> Result<(), ReconcilerError> {
    let template = fetch_template(ctx, set, step).await?;
    let revision = pod_revision(pod).unwrap_or_default();
    let mut args = pod_args(pod);
    args.extend(extra);
    let run = new_hook_run(
        set,
        hook_type,
        &template,
        build_args(&template, step, args),
        revision,
        &pod_ordinal(pod).to_string(),
    );
    let created = create_hook_run(ctx, set, run, hook_type).await?;
    let now = ctx.clock.now().to_rfc3339();
    set_condition(state, hook_type, &pod.name_any(), created.phase(), &now);
    state.hook_runs.push(created);
    Ok(())
}

/// Shared shape of the pre-delete and pre-in-place gates
async fn check_pod_hook(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pod: &Pod,
    state: &mut SyncState,
    hook_type: HookType,
    extra: Vec<HookArgument>,
) -> Result<bool, ReconcilerError> {
    let Some(step) = hook_step(set, hook_type) else {
        return Ok(true);
    };
    let pod_name = pod.name_any();
    let revision = pod_revision(pod).unwrap_or_default();
    let ordinal = pod_ordinal(pod).to_string();
    let existing = find_hook_run(&state.hook_runs, hook_type, revision, &ordinal).cloned();

    let Some(run) = existing else {
        create_pod_hook_run(ctx, set, pod, state, hook_type, step, extra).await?;
        return Ok(false);
    };
    let phase = run.phase();
    if phase == HookPhase::Successful {
        clear_condition(state, hook_type, &pod_name);
        return Ok(true);
    }
    if phase.is_unsuccessful() && hook_type.retry_requested(set, state) {
        info!(
            workload.name = set.name_any().as_str(),
            pod = pod_name.as_str(),
            hook_type = hook_type.label(),
            "Retrying unsuccessful hook-run"
        );
        delete_hook_run(ctx, set, &run, state).await?;
        create_pod_hook_run(ctx, set, pod, state, hook_type, step, extra).await?;
        hook_type.clear_retry(state);
        return Ok(false);
    }
    let now = ctx.clock.now().to_rfc3339();
    set_condition(state, hook_type, &pod_name, phase, &now);
    Ok(false)
}

/// Whether `pod` may be deleted; starts the pre-delete hook when needed
///
/// # Errors
///
/// Hook-run or template API failures.
pub async fn check_delete(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pod: &Pod,
    state: &mut SyncState,
) -> Result<bool, ReconcilerError> {
    check_pod_hook(ctx, set, pod, state, HookType::PreDelete, Vec::new()).await
}

/// Whether `pod` may be updated in place to `template`
///
/// Pods that are not Running have nothing to protect and pass without a hook.
///
/// # Errors
///
/// Hook-run or template API failures.
pub async fn check_inplace(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pod: &Pod,
    template: &PodTemplateSpec,
    state: &mut SyncState,
) -> Result<bool, ReconcilerError> {
    let running = pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running");
    if !running {
        return Ok(true);
    }
    let modified = HookArgument {
        name: "ModifiedContainers".to_string(),
        value: Some(modified_containers(pod, template).join(",")),
    };
    check_pod_hook(ctx, set, pod, state, HookType::PreInplace, vec![modified]).await
}

/// Start the post-in-place hook for a Pod that was just updated
///
/// # Errors
///
/// Hook-run or template API failures.
pub async fn create_post_inplace_hook(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pod: &Pod,
    state: &mut SyncState,
) -> Result<(), ReconcilerError> {
    let Some(step) = hook_step(set, HookType::PostInplace) else {
        return Ok(());
    };
    let revision = pod_revision(pod).unwrap_or_default();
    let ordinal = pod_ordinal(pod).to_string();
    if find_hook_run(&state.hook_runs, HookType::PostInplace, revision, &ordinal).is_some() {
        return Ok(());
    }
    create_pod_hook_run(ctx, set, pod, state, HookType::PostInplace, step, Vec::new()).await
}

/// Mirror the post-in-place run into status; finished successful runs are removed
///
/// # Errors
///
/// Hook-run API failures.
pub async fn update_post_inplace_hook(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pod: &Pod,
    state: &mut SyncState,
) -> Result<(), ReconcilerError> {
    let Some(step) = hook_step(set, HookType::PostInplace) else {
        return Ok(());
    };
    let pod_name = pod.name_any();
    let revision = pod_revision(pod).unwrap_or_default();
    let ordinal = pod_ordinal(pod).to_string();
    let Some(run) = find_hook_run(&state.hook_runs, HookType::PostInplace, revision, &ordinal).cloned()
    else {
        return Ok(());
    };
    let phase = run.phase();
    if phase == HookPhase::Successful {
        delete_hook_run(ctx, set, &run, state).await?;
        clear_condition(state, HookType::PostInplace, &pod_name);
        return Ok(());
    }
    if phase.is_unsuccessful() && HookType::PostInplace.retry_requested(set, state) {
        delete_hook_run(ctx, set, &run, state).await?;
        create_pod_hook_run(ctx, set, pod, state, HookType::PostInplace, step, Vec::new()).await?;
        HookType::PostInplace.clear_retry(state);
        return Ok(());
    }
    let now = ctx.clock.now().to_rfc3339();
    set_condition(state, HookType::PostInplace, &pod_name, phase, &now);
    Ok(())
}

/// Phase of the current step's hook-run, if one exists
#[must_use]
pub fn step_hook_phase(state: &SyncState, update_revision: &str, index: i32) -> Option<HookPhase> {
    find_hook_run(
        &state.hook_runs,
        HookType::CanaryStep,
        update_revision,
        &index.to_string(),
    )
    .map(HookRun::phase)
}

/// Drive the hook of the current canary step
///
/// Runs of other steps or revisions are cancelled, then deleted once finished.
/// A run for the current step is started while a rollout is pending and progress
/// is not already halted, and an unsuccessful run pauses the rollout.
///
/// # Errors
///
/// Hook-run or template API failures.
pub async fn reconcile_step_hook_run(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    update_revision: &str,
    state: &mut SyncState,
) -> Result<(), ReconcilerError> {
    let index = state.status.step_index();
    let index_key = index.to_string();

    let stale: Vec<HookRun> = state
        .hook_runs
        .iter()
        .filter(|r| label(r, HOOK_TYPE_LABEL) == Some(HookType::CanaryStep.label()))
        .filter(|r| !run_matches(r, HookType::CanaryStep, update_revision, &index_key))
        .cloned()
        .collect();
    for run in &stale {
        if run.phase().is_completed() {
            delete_hook_run(ctx, set, run, state).await?;
        } else {
            cancel_hook_run(ctx, set, run).await?;
        }
    }

    let step = usize::try_from(index)
        .ok()
        .and_then(|i| set.canary_steps().get(i));
    let Some(hook) = step.and_then(|s| s.hook.as_ref()) else {
        return Ok(());
    };

    let existing = find_hook_run(&state.hook_runs, HookType::CanaryStep, update_revision, &index_key).cloned();
    match existing {
        None => {
            let rollout_pending = state.status.current_revision.as_deref() != Some(update_revision);
            if !rollout_pending
                || state.paused(set)
                || state.status.has_pause_condition(PAUSE_REASON_STEP_HOOK)
            {
                return Ok(());
            }
            let template = fetch_template(ctx, set, hook).await?;
            let args = build_args(&template, hook, Vec::new());
            let run = new_hook_run(set, HookType::CanaryStep, &template, args, update_revision, &index_key);
            let created = create_hook_run(ctx, set, run, HookType::CanaryStep).await?;
            state.hook_runs.push(created);
        }
        Some(run) if run.phase().is_unsuccessful() => {
            if !state.status.has_pause_condition(PAUSE_REASON_STEP_HOOK) {
                warn!(
                    workload.name = set.name_any().as_str(),
                    hook_run = run.name_any().as_str(),
                    phase = ?run.phase(),
                    "Canary step hook failed, pausing rollout"
                );
                state.status.pause_conditions.push(PauseCondition {
                    reason: PAUSE_REASON_STEP_HOOK.to_string(),
                    start_time: ctx.clock.now().to_rfc3339(),
                });
                state.overrides.paused = Some(true);
                ctx.recorder
                    .publish(
                        set,
                        EventKind::Warning,
                        PAUSE_REASON_STEP_HOOK,
                        format!("hook-run {} of canary step {index} finished {:?}", run.name_any(), run.phase()),
                    )
                    .await;
            }
        }
        Some(_) => {}
    }
    Ok(())
}

/// Remove Pod hook-runs whose (revision, ordinal) no longer matches a live Pod
/// and prune hook conditions of Pods that are gone
///
/// # Errors
///
/// Hook-run API failures.
pub async fn truncate_pod_hook_runs(
    ctx: &Reconciler,
    set: &GameStatefulSet,
    pods: &[Pod],
    state: &mut SyncState,
) -> Result<(), ReconcilerError> {
    let live: Vec<(String, String)> = pods
        .iter()
        .map(|p| {
            (
                pod_revision(p).unwrap_or_default().to_string(),
                pod_ordinal(p).to_string(),
            )
        })
        .collect();
    let orphaned: Vec<HookRun> = state
        .hook_runs
        .iter()
        .filter(|r| {
            HookType::POD_HOOKS
                .iter()
                .any(|t| label(r, HOOK_TYPE_LABEL) == Some(t.label()))
        })
        .filter(|r| {
            let key = (
                label(r, HOOK_REVISION_LABEL).unwrap_or_default().to_string(),
                label(r, HOOK_ORDINAL_LABEL).unwrap_or_default().to_string(),
            );
            !live.contains(&key)
        })
        .cloned()
        .collect();
    for run in &orphaned {
        delete_hook_run(ctx, set, run, state).await?;
    }

    let names: Vec<String> = pods.iter().map(ResourceExt::name_any).collect();
    for hook_type in HookType::POD_HOOKS {
        if let Some(conditions) = hook_type.conditions(&mut state.status) {
            conditions.retain(|c| names.contains(&c.pod_name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::HookTemplateSpec;

    fn template() -> HookTemplate {
        HookTemplate::new(
            "check",
            HookTemplateSpec {
                metrics: vec![json!({"name": "players"})],
                args: vec![
                    HookArgument {
                        name: "PodName".to_string(),
                        value: None,
                    },
                    HookArgument {
                        name: "threshold".to_string(),
                        value: Some("10".to_string()),
                    },
                ],
            },
        )
    }

    fn run_with_labels(name: &str, hook_type: HookType, revision: &str, key: &str) -> HookRun {
        let mut run = HookRun::new(name, HookRunSpec::default());
        run.metadata.labels = Some(BTreeMap::from([
            (HOOK_TYPE_LABEL.to_string(), hook_type.label().to_string()),
            (HOOK_REVISION_LABEL.to_string(), revision.to_string()),
            (hook_type.key_label().to_string(), key.to_string()),
        ]));
        run
    }

    #[test]
    fn test_args_layering() {
        let step = HookStep {
            template_name: "check".to_string(),
            args: vec![HookArgument {
                name: "threshold".to_string(),
                value: Some("20".to_string()),
            }],
        };
        let extra = vec![HookArgument {
            name: "PodName".to_string(),
            value: Some("web-0".to_string()),
        }];
        let args = build_args(&template(), &step, extra);
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].value.as_deref(), Some("web-0"));
        assert_eq!(args[1].value.as_deref(), Some("20"));
    }

    #[test]
    fn test_find_prefers_live_run() {
        let mut cancelled = run_with_labels("a", HookType::PreDelete, "web-1", "0");
        cancelled.spec.terminate = true;
        let live = run_with_labels("b", HookType::PreDelete, "web-1", "0");
        let other_ordinal = run_with_labels("c", HookType::PreDelete, "web-1", "1");
        let runs = vec![live, cancelled, other_ordinal];

        let found = find_hook_run(&runs, HookType::PreDelete, "web-1", "0").unwrap();
        assert_eq!(found.name_any(), "b");
        assert!(find_hook_run(&runs, HookType::PreInplace, "web-1", "0").is_none());
        assert!(find_hook_run(&runs, HookType::PreDelete, "web-2", "0").is_none());
    }

    #[test]
    fn test_new_hook_run_name_and_labels() {
        let set: GameStatefulSet = serde_json::from_value(json!({
            "apiVersion": "tkex.tencent.com/v1alpha1",
            "kind": "GameStatefulSet",
            "metadata": {"name": "web", "namespace": "default", "uid": "uid-1"},
            "spec": {"selector": {}, "template": {}}
        }))
        .unwrap();
        let run = new_hook_run(&set, HookType::CanaryStep, &template(), vec![], "web-abc", "2");
        assert_eq!(run.name_any(), "web-abc-canary-2");
        assert_eq!(label(&run, HOOK_STEP_INDEX_LABEL), Some("2"));
        assert_eq!(label(&run, HOOK_WORKLOAD_LABEL), Some("web"));
        assert!(is_controlled_by(&run.metadata, "uid-1"));
        assert_eq!(run.spec.metrics.len(), 1);
    }

    #[test]
    fn test_modified_containers() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "web-0"},
            "spec": {"containers": [
                {"name": "game", "image": "game:v1"},
                {"name": "sidecar", "image": "proxy:v1"}
            ]}
        }))
        .unwrap();
        let template: PodTemplateSpec = serde_json::from_value(json!({
            "spec": {"containers": [
                {"name": "game", "image": "game:v2"},
                {"name": "sidecar", "image": "proxy:v1"}
            ]}
        }))
        .unwrap();
        assert_eq!(modified_containers(&pod, &template), vec!["game".to_string()]);
    }
}
