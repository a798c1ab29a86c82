//! # Hook Tests
//!
//! Pre-delete hook gating of scale-down and the retry write-back.

mod common;

use common::{workload, Harness, NAMESPACE};
use game_statefulset_operator::constants::{HOOK_ORDINAL_LABEL, HOOK_TYPE_LABEL};
use game_statefulset_operator::crd::HookPhase;
use kube::ResourceExt;
use serde_json::json;

/// Two ready Pods guarded by the `drain` pre-delete hook, scaled down to one
async fn scaled_down_with_hook() -> Harness {
    let h = Harness::new(workload(
        2,
        "game:v1",
        json!({"preDeleteUpdateStrategy": {"hook": {"templateName": "drain"}}}),
    ));
    h.add_hook_template("drain");
    h.converge(3).await;
    h.edit(|set| set.spec.replicas = Some(1));
    h.clear_actions();
    h
}

#[tokio::test]
async fn test_pre_delete_hook_gates_scale_down() {
    let h = scaled_down_with_hook().await;

    h.reconcile().await.unwrap();

    assert!(h.deleted_pods().is_empty());
    let runs = h.hook_run_names();
    assert_eq!(runs.len(), 1);
    let run = h.hook_runs.get_now(NAMESPACE, &runs[0]).unwrap();
    assert_eq!(run.labels().get(HOOK_TYPE_LABEL).map(String::as_str), Some("PreDelete"));
    assert_eq!(run.labels().get(HOOK_ORDINAL_LABEL).map(String::as_str), Some("1"));

    let status = h.set().status.unwrap();
    assert_eq!(status.pre_delete_hook_conditions.len(), 1);
    assert_eq!(status.pre_delete_hook_conditions[0].pod_name, "web-1");
    assert_eq!(status.pre_delete_hook_conditions[0].hook_phase, HookPhase::Pending);

    // A pending run keeps blocking and is not duplicated
    h.reconcile().await.unwrap();
    assert!(h.deleted_pods().is_empty());
    assert_eq!(h.hook_run_names(), runs);

    h.set_hook_phase(&runs[0], HookPhase::Successful);
    h.reconcile().await.unwrap();
    assert_eq!(h.deleted_pods(), vec!["web-1"]);
    assert!(h.set().status.unwrap().pre_delete_hook_conditions.is_empty());

    // Once the Pod is gone its hook-run is cleaned up
    h.reconcile().await.unwrap();
    assert_eq!(h.pod_names(), vec!["web-0"]);
    assert!(h.hook_run_names().is_empty());
}

#[tokio::test]
async fn test_failed_hook_blocks_until_retry_requested() {
    let h = scaled_down_with_hook().await;
    h.reconcile().await.unwrap();
    let run_name = h.hook_run_names()[0].clone();
    h.set_hook_phase(&run_name, HookPhase::Failed);

    h.reconcile().await.unwrap();
    assert!(h.deleted_pods().is_empty());
    let status = h.set().status.unwrap();
    assert_eq!(status.pre_delete_hook_conditions[0].hook_phase, HookPhase::Failed);

    h.edit(|set| {
        if let Some(strategy) = set.spec.pre_delete_update_strategy.as_mut() {
            strategy.retry_unexpected_hooks = true;
        }
    });
    h.reconcile().await.unwrap();

    assert!(h.deleted_pods().is_empty());
    assert_eq!(h.hook_run_names(), vec![run_name.clone()]);
    let rerun = h.hook_runs.get_now(NAMESPACE, &run_name).unwrap();
    assert_eq!(rerun.phase(), HookPhase::Pending);

    // The one-shot retry flag is written back to the spec
    let strategy = h.set().spec.pre_delete_update_strategy.unwrap();
    assert!(!strategy.retry_unexpected_hooks);
    assert!(strategy.hook.is_some());
}

#[tokio::test]
async fn test_missing_hook_template_fails_the_pass() {
    let h = Harness::new(workload(
        2,
        "game:v1",
        json!({"preDeleteUpdateStrategy": {"hook": {"templateName": "absent"}}}),
    ));
    h.converge(3).await;
    h.edit(|set| set.spec.replicas = Some(1));

    assert!(h.reconcile().await.is_err());
    assert_eq!(h.pod_names(), vec!["web-0", "web-1"]);
}
