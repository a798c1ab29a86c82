//! # Revision History Tests

mod common;

use common::{workload, Harness, NAMESPACE};
use game_statefulset_operator::client::Verb;
use serde_json::json;

fn update_revision(h: &Harness) -> String {
    h.set().status.unwrap().update_revision.unwrap()
}

#[tokio::test]
async fn test_history_truncation_keeps_revisions_in_use() {
    let h = Harness::new(workload(
        1,
        "game:v1",
        json!({"updateStrategy": {"type": "OnDelete"}, "revisionHistoryLimit": 0}),
    ));
    h.converge(2).await;
    let rev_a = update_revision(&h);

    h.set_image("game:v2");
    h.reconcile().await.unwrap();
    let rev_b = update_revision(&h);
    assert_eq!(h.revision_names().len(), 2);

    h.set_image("game:v3");
    h.reconcile().await.unwrap();
    let rev_c = update_revision(&h);

    let mut expected = vec![rev_a.clone(), rev_c];
    expected.sort();
    assert_eq!(h.revision_names(), expected);
    assert!(!h.revision_names().contains(&rev_b));
    assert_eq!(h.pod_revision("web-0"), rev_a);
    assert!(h.deleted_pods().is_empty());
}

#[tokio::test]
async fn test_reverted_template_reuses_its_revision() {
    let h = Harness::new(workload(0, "game:v1", json!({})));
    h.reconcile().await.unwrap();
    let rev_a = update_revision(&h);

    h.set_image("game:v2");
    h.reconcile().await.unwrap();
    assert_ne!(update_revision(&h), rev_a);

    h.clear_actions();
    h.set_image("game:v1");
    h.reconcile().await.unwrap();

    assert_eq!(h.revision_names().len(), 2);
    assert_eq!(update_revision(&h), rev_a);
    assert_eq!(h.revisions.actions_of(Verb::Replace).len(), 1);
    assert!(h.revisions.actions_of(Verb::Create).is_empty());
    let reused = h.revisions.get_now(NAMESPACE, &rev_a).unwrap();
    assert_eq!(reused.revision, 3);
}

#[tokio::test]
async fn test_revision_names_depend_only_on_the_template() {
    let first = Harness::new(workload(0, "game:v1", json!({})));
    let second = Harness::new(workload(
        0,
        "game:v1",
        json!({"podManagementPolicy": "Parallel"}),
    ));
    first.reconcile().await.unwrap();
    second.reconcile().await.unwrap();

    assert_eq!(update_revision(&first), update_revision(&second));
}
