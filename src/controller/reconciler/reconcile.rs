//! # Reconciliation Logic
//!
//! One pass over a GameStatefulSet: claim Pods and revisions, resolve the
//! current and update revisions, drive canary steps and hooks, converge the Pods
//! and persist status. Errors are handled by the error policy in the runtime.

use crate::client::{selector_from_labels, selector_to_string};
use crate::constants::{HOOK_WORKLOAD_LABEL, UNSATISFIED_EXPECTATIONS_REQUEUE_SECS};
use crate::controller::canary::{self, StepProgress};
use crate::controller::hooks;
use crate::controller::identity::{is_controlled_by, pod_ordinal};
use crate::controller::ownership::{claim_pods, claim_revisions};
use crate::controller::pod_set::sync_pods;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError, SyncState};
use crate::controller::revision::{compute_revisions, truncate_history};
use crate::controller::status::{complete_rollout, update_status};
use crate::crd::GameStatefulSet;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, Instrument};

/// Reconcile one GameStatefulSet
///
/// The returned action requeues after the shortest delay any step asked for
/// during the pass, or waits for the next change.
///
/// # Errors
///
/// Any failure that aborted the pass; the runtime retries with backoff.
pub async fn reconcile(
    set: Arc<GameStatefulSet>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let key = set.key();
    let span = tracing::info_span!(
        "controller.watch.reconcile",
        workload.name = set.name_any().as_str(),
        workload.namespace = set.namespace().unwrap_or_default().as_str(),
        workload.generation = set.metadata.generation.unwrap_or(0),
    );

    metrics::increment_reconciliations();
    let result = reconcile_internal(&set, &ctx).instrument(span).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result?;

    // Success resets the error backoff for this workload
    if let Ok(mut states) = ctx.backoff_states.lock() {
        if let Some(state) = states.get_mut(&key) {
            state.reset();
        }
    }

    Ok(match ctx.requeue.take(&key) {
        Some(after) => {
            debug!(workload = key.as_str(), requeue_secs = after.as_secs(), "Requeue requested");
            Action::requeue(after)
        }
        None => Action::await_change(),
    })
}

async fn reconcile_internal(set: &GameStatefulSet, ctx: &Reconciler) -> Result<(), ReconcilerError> {
    let key = set.key();
    let namespace = set.namespace().unwrap_or_default();

    if set.metadata.deletion_timestamp.is_some() {
        debug!(workload = key.as_str(), "Workload is being deleted, nothing to do");
        ctx.expectations.forget(&key);
        return Ok(());
    }
    info!(workload = key.as_str(), "🔄 Reconciling GameStatefulSet");

    let label_selector = selector_to_string(&set.spec.selector).map_err(|source| {
        ReconcilerError::InvalidSelector {
            workload: key.clone(),
            source,
        }
    })?;
    let list_error = |kind: &'static str| {
        let workload = key.clone();
        move |source| ReconcilerError::List {
            workload,
            kind,
            source,
        }
    };

    let pods = ctx
        .pods
        .list(&namespace, &set.spec.selector)
        .await
        .map_err(list_error("Pod"))?;
    let mut pods = claim_pods(ctx, set, pods).await?;
    pods.sort_by_key(pod_ordinal);

    ctx.expectations.observe_pods(&key, &pods);
    if !ctx.expectations.satisfied(&key) {
        debug!(workload = key.as_str(), "Waiting for scale-down deletions to be observed");
        ctx.requeue
            .push(&key, Duration::from_secs(UNSATISFIED_EXPECTATIONS_REQUEUE_SECS));
        return Ok(());
    }

    let revisions = ctx
        .revisions
        .list(&namespace, &set.spec.selector)
        .await
        .map_err(list_error("ControllerRevision"))?;
    let revisions = claim_revisions(ctx, set, revisions).await?;
    let pair = compute_revisions(ctx.revisions.as_ref(), set, revisions, &pods).await?;
    let current = pair.current.name_any();
    let update = pair.update.name_any();

    let uid = set.uid().unwrap_or_default();
    let hook_selector = selector_from_labels([(HOOK_WORKLOAD_LABEL, set.name_any())]);
    let hook_runs = ctx
        .hook_runs
        .list(&namespace, &hook_selector)
        .await
        .map_err(list_error("HookRun"))?
        .into_iter()
        .filter(|r| is_controlled_by(&r.metadata, &uid))
        .collect();

    let mut state = SyncState::new(set, hook_runs);
    state.status.observed_generation = set.metadata.generation;
    state.status.current_revision = Some(current.clone());
    state.status.update_revision = Some(update.clone());
    state.status.collision_count = Some(pair.collision_count);
    state.status.label_selector = Some(label_selector);

    let steps = set.canary_steps();
    if steps.is_empty() {
        state.status.current_step_index = None;
        state.status.current_step_hash = None;
    } else {
        if canary::step_hash_changed(set) || canary::revision_changed(set, &update) {
            info!(
                workload = key.as_str(),
                revision = update.as_str(),
                "Canary steps or update revision changed, restarting from the first step"
            );
            state.status.current_step_index = Some(0);
            state.status.current_step_hash = Some(canary::step_hash(steps));
            state.status.pause_conditions.clear();
            return update_status(ctx, set, &state.status, &state.overrides).await;
        }
        hooks::reconcile_step_hook_run(ctx, set, &update, &mut state).await?;
    }

    hooks::truncate_pod_hook_runs(ctx, set, &pods, &mut state).await?;
    sync_pods(ctx, set, &pair, pods.clone(), &mut state).await?;
    complete_rollout(set, &mut state.status);

    if !steps.is_empty() {
        let progress = StepProgress {
            now: ctx.clock.now(),
            paused: state.paused(set),
            replicas: set.replicas(),
            updated_ready_replicas: state.status.updated_ready_replicas,
            hook_phase: None,
        };
        let rollout_pending = state.status.current_revision != state.status.update_revision;
        let mut status = std::mem::take(&mut state.status);
        let advance = canary::advance_steps(set, &mut status, &progress, rollout_pending, &update, |index| {
            hooks::step_hook_phase(&state, &update, index)
        });
        state.status = status;
        if advance.pause {
            state.overrides.paused = Some(true);
        }
        if let Some(after) = advance.requeue_after {
            ctx.requeue.push(&key, after);
        }
    }

    update_status(ctx, set, &state.status, &state.overrides).await?;
    let deleted = truncate_history(
        ctx.revisions.as_ref(),
        set,
        &pods,
        &pair.revisions,
        &pair.current,
        &pair.update,
    )
    .await?;
    if deleted > 0 {
        debug!(workload = key.as_str(), deleted, "Truncated revision history");
    }
    Ok(())
}
