//! # Canary Steps
//!
//! Step index, partition and pause bookkeeping for canary rollouts.
//!
//! A step completes once every facet it declares has completed: its pause has
//! elapsed or been lifted, its partition target is reached, and its hook has
//! succeeded (or, after a failure, the rollout was manually unpaused). Pause
//! conditions are recomputed each pass, so a condition disappears as soon as the
//! step that requested it is left behind.

use crate::client::parse_time;
use crate::constants::{PAUSE_REASON_CANARY_STEP, PAUSE_REASON_STEP_HOOK};
use crate::crd::{CanaryStatus, CanaryStep, GameStatefulSet, GameStatefulSetStatus, HookPhase, PauseCondition};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// The step at the recorded index, or `None` once every step was consumed
#[must_use]
pub fn current_step(set: &GameStatefulSet) -> (Option<&CanaryStep>, i32) {
    let index = set.status.as_ref().map_or(0, GameStatefulSetStatus::step_index);
    let step = usize::try_from(index)
        .ok()
        .and_then(|i| set.canary_steps().get(i));
    (step, index)
}

/// Partition in force for this pass
///
/// Without canary steps this is the rolling-update partition. With steps, the
/// nearest explicit partition at or before the current step applies; when none
/// exists every replica is held back. Once all steps are consumed the partition is 0.
#[must_use]
pub fn current_partition(set: &GameStatefulSet) -> i32 {
    let steps = set.canary_steps();
    if steps.is_empty() {
        return set
            .spec
            .update_strategy
            .rolling_update
            .as_ref()
            .and_then(|r| r.partition)
            .unwrap_or(0);
    }
    let (_, index) = current_step(set);
    let Ok(index) = usize::try_from(index) else {
        return set.replicas();
    };
    if index >= steps.len() {
        return 0;
    }
    steps[..=index]
        .iter()
        .rev()
        .find_map(|s| s.partition)
        .unwrap_or_else(|| set.replicas())
}

#[must_use]
pub fn step_hash(steps: &[CanaryStep]) -> String {
    let encoded = serde_json::to_vec(steps).unwrap_or_default();
    let digest = Sha256::digest(&encoded);
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Whether the step list differs from the one the recorded index refers to
#[must_use]
pub fn step_hash_changed(set: &GameStatefulSet) -> bool {
    let recorded = set
        .status
        .as_ref()
        .and_then(|s| s.current_step_hash.as_deref());
    recorded != Some(step_hash(set.canary_steps()).as_str())
}

/// Whether a new update revision appeared since the last pass
#[must_use]
pub fn revision_changed(set: &GameStatefulSet, update_revision: &str) -> bool {
    set.status
        .as_ref()
        .and_then(|s| s.update_revision.as_deref())
        .is_some_and(|recorded| recorded != update_revision)
}

/// Observations a step's completion is judged against
#[derive(Debug, Clone, Copy)]
pub struct StepProgress {
    pub now: DateTime<Utc>,
    /// Effective `spec.updateStrategy.paused`
    pub paused: bool,
    pub replicas: i32,
    pub updated_ready_replicas: i32,
    /// Phase of this step's hook-run, when one exists
    pub hook_phase: Option<HookPhase>,
}

#[must_use]
pub fn step_complete(step: &CanaryStep, status: &GameStatefulSetStatus, progress: &StepProgress) -> bool {
    let pause_done = step.pause.as_ref().is_none_or(|pause| {
        let Some(condition) = status.pause_condition(PAUSE_REASON_CANARY_STEP) else {
            return false;
        };
        match pause.duration {
            Some(seconds) => parse_time(&condition.start_time).is_some_and(|started| {
                progress.now.signed_duration_since(started).num_seconds() >= seconds
            }),
            None => !progress.paused,
        }
    });
    let partition_done = step.partition.is_none_or(|partition| {
        progress.updated_ready_replicas >= progress.replicas - partition
    });
    let hook_done = step.hook.is_none() || progress.hook_phase == Some(HookPhase::Successful) || {
        status.has_pause_condition(PAUSE_REASON_STEP_HOOK) && !progress.paused
    };
    pause_done && partition_done && hook_done
}

/// Result of advancing the step index
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepAdvance {
    /// Write `spec.updateStrategy.paused = true`
    pub pause: bool,
    /// Wake up again when a timed pause runs out
    pub requeue_after: Option<Duration>,
}

/// Advance the step index over completed steps and recompute pause conditions
///
/// `hook_phase` reports the hook-run phase for a step index. When no rollout is
/// pending (`current == update`) the index jumps to the end and the canary
/// revision is promoted.
pub fn advance_steps<F>(
    set: &GameStatefulSet,
    status: &mut GameStatefulSetStatus,
    progress: &StepProgress,
    rollout_pending: bool,
    update_revision: &str,
    hook_phase: F,
) -> StepAdvance
where
    F: Fn(i32) -> Option<HookPhase>,
{
    let steps = set.canary_steps();
    let step_count = i32::try_from(steps.len()).unwrap_or(i32::MAX);
    let start = status.step_index();
    let mut index = start;

    if rollout_pending {
        // Pause conditions belong to the starting step; later steps have not been entered yet
        let entered = GameStatefulSetStatus {
            pause_conditions: Vec::new(),
            ..status.clone()
        };
        while let Some(step) = usize::try_from(index).ok().and_then(|i| steps.get(i)) {
            let progress = StepProgress {
                hook_phase: hook_phase(index),
                ..*progress
            };
            let observed = if index == start { &*status } else { &entered };
            if !step_complete(step, observed, &progress) {
                break;
            }
            index += 1;
        }
    } else {
        index = step_count;
    }
    let index = index.min(step_count);
    status.current_step_index = Some(index);
    status.current_step_hash = Some(step_hash(steps));
    if index >= step_count {
        status.canary = Some(CanaryStatus {
            revision: Some(update_revision.to_string()),
        });
    }

    let previous = if index == start {
        std::mem::take(&mut status.pause_conditions)
    } else {
        status.pause_conditions.clear();
        Vec::new()
    };
    let mut advance = StepAdvance::default();
    let Some(step) = usize::try_from(index).ok().and_then(|i| steps.get(i)) else {
        return advance;
    };

    if let Some(pause) = &step.pause {
        let existing = previous
            .iter()
            .find(|c| c.reason == PAUSE_REASON_CANARY_STEP)
            .cloned();
        let condition = existing.unwrap_or_else(|| {
            if pause.duration.is_none() {
                advance.pause = true;
            }
            PauseCondition {
                reason: PAUSE_REASON_CANARY_STEP.to_string(),
                start_time: progress.now.to_rfc3339(),
            }
        });
        if let Some(seconds) = pause.duration {
            let elapsed = parse_time(&condition.start_time)
                .map_or(0, |started| progress.now.signed_duration_since(started).num_seconds());
            let remaining = u64::try_from((seconds - elapsed).max(1)).unwrap_or(1);
            advance.requeue_after = Some(Duration::from_secs(remaining));
        }
        status.pause_conditions.push(condition);
    }
    if step.hook.is_some() {
        if let Some(failed) = previous.iter().find(|c| c.reason == PAUSE_REASON_STEP_HOOK) {
            status.pause_conditions.push(failed.clone());
        }
    }
    advance
}
