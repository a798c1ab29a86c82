//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.

use crate::client::{EventKind, EventRecorder};
use crate::constants::CONTROLLER_NAME;
use crate::controller::backoff::BackoffState;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::GameStatefulSet;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Next backoff for `key`, counting one more error
///
/// Returns the delay in seconds and the error count.
#[must_use]
pub fn next_backoff(ctx: &Reconciler, key: &str) -> (u64, u32) {
    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key.to_string()).or_insert_with(|| {
                BackoffState::new(
                    ctx.config.error_backoff_min_secs,
                    ctx.config.error_backoff_max_secs,
                )
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (ctx.config.error_backoff_max_secs, 0)
        }
    }
}

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per workload so one failing workload never slows
/// down another.
pub fn handle_reconciliation_error(
    set: Arc<GameStatefulSet>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = set.key();
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        workload.name = set.name_any().as_str(),
        workload.namespace = set.namespace().unwrap_or_default().as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    if error.is_permanent() {
        error!("❌ Reconciliation of {} failed and needs a spec change: {}", key, error);
    } else {
        error!("Reconciliation error for {}: {:?}", key, error);
    }
    observability::metrics::increment_reconciliation_errors();

    let recorder = Arc::clone(&ctx.recorder);
    let reason = error.reason();
    let message = error.to_string();
    let event_set = Arc::clone(&set);
    tokio::spawn(async move {
        recorder
            .publish(&event_set, EventKind::Warning, reason, message)
            .await;
    });

    let (backoff_seconds, error_count) = next_backoff(&ctx, &key);
    info!(
        "🔄 Retrying {} with Fibonacci backoff: {}s (error count: {})",
        key, backoff_seconds, error_count
    );
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Classify a watch stream error
///
/// Returns `None` when the stream should be dropped so the watch restarts, and
/// `Some(())` when the error is benign and the event can pass through.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    // 404s can mention WatchFailed too, so classify them first
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 = (error_string.contains("401") || error_string.contains("Unauthorized"))
        && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
        error!("   Check the ClusterRoleBinding for {} and its ServiceAccount", CONTROLLER_NAME);
        warn!(
            "⏳ Waiting {}s before retrying watch...",
            watch_restart_delay_secs
        );
        tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
        None
    } else if is_410 {
        warn!("Watch resource version expired (410), watch will restart");
        None
    } else if is_429 {
        let current_backoff = backoff.load(Ordering::Relaxed);
        warn!(
            "API server storage reinitializing (429), backing off for {}ms before restart...",
            current_backoff
        );
        tokio::time::sleep(Duration::from_millis(current_backoff)).await;
        backoff.store(
            current_backoff.saturating_mul(2).min(max_backoff_ms),
            Ordering::Relaxed,
        );
        None
    } else if is_not_found {
        warn!(
            "Resource not found (404) - normal when a GameStatefulSet was just deleted. Error: {}",
            error_string
        );
        Some(())
    } else {
        error!("Controller stream error: {}", error_string);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ManualClock, MemoryRecorder, MemoryStore, StaticNodes};
    use crate::config::ControllerConfig;
    use crate::controller::reconciler::Collaborators;
    use crate::crd::{HookRun, HookTemplate};
    use k8s_openapi::api::apps::v1::ControllerRevision;
    use k8s_openapi::api::core::v1::Pod;

    fn reconciler() -> Reconciler {
        let collaborators = Collaborators {
            workloads: Arc::new(MemoryStore::<GameStatefulSet>::new()),
            pods: Arc::new(MemoryStore::<Pod>::new()),
            revisions: Arc::new(MemoryStore::<ControllerRevision>::new()),
            hook_runs: Arc::new(MemoryStore::<HookRun>::new()),
            hook_templates: Arc::new(MemoryStore::<HookTemplate>::new()),
            nodes: Arc::new(StaticNodes::default()),
            recorder: Arc::new(MemoryRecorder::default()),
            clock: Arc::new(ManualClock::new(chrono::Utc::now())),
        };
        Reconciler::with_collaborators(collaborators, ControllerConfig::default())
    }

    #[test]
    fn test_backoff_grows_per_workload() {
        let ctx = reconciler();
        assert_eq!(next_backoff(&ctx, "default/web"), (1, 1));
        assert_eq!(next_backoff(&ctx, "default/web"), (1, 2));
        assert_eq!(next_backoff(&ctx, "default/web"), (2, 3));
        assert_eq!(next_backoff(&ctx, "default/other"), (1, 1));
    }

    #[tokio::test]
    async fn test_watch_errors_are_classified() {
        let backoff = Arc::new(AtomicU64::new(10));
        assert!(handle_watch_stream_error("WatchFailed: 410 Gone", &backoff, 100, 0)
            .await
            .is_none());
        assert!(handle_watch_stream_error("ObjectNotFound", &backoff, 100, 0)
            .await
            .is_some());

        assert!(handle_watch_stream_error("429 TooManyRequests", &backoff, 15, 0)
            .await
            .is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 15);
    }
}
