//! Common test utilities for reconciler integration tests
//!
//! Wires a `Reconciler` to in-memory stores so a test can run reconcile passes,
//! play the part of the kubelet and hook-run controller between passes, and
//! inspect exactly which writes each pass issued.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use chrono::{DateTime, TimeZone, Utc};
use game_statefulset_operator::client::{ManualClock, MemoryRecorder, MemoryStore, StaticNodes, Verb};
use game_statefulset_operator::config::ControllerConfig;
use game_statefulset_operator::constants::REVISION_LABEL;
use game_statefulset_operator::controller::reconciler::{
    reconcile, Collaborators, Reconciler, ReconcilerError,
};
use game_statefulset_operator::crd::{
    GameStatefulSet, GameStatefulSetSpec, HookPhase, HookRun, HookRunStatus, HookTemplate,
    HookTemplateSpec,
};
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::{Pod, PodCondition};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use serde_json::{json, Value};
use std::sync::Arc;

pub const NAMESPACE: &str = "default";
pub const NAME: &str = "web";

#[must_use]
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Workload spec with one `game` container; `extra` is merged over the defaults
#[must_use]
pub fn workload(replicas: i32, image: &str, extra: Value) -> GameStatefulSet {
    let mut spec = json!({
        "replicas": replicas,
        "selector": {"matchLabels": {"app": NAME}},
        "serviceName": "web-svc",
        "template": {
            "metadata": {"labels": {"app": NAME}},
            "spec": {"containers": [{"name": "game", "image": image}]}
        }
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut spec, extra) {
        base.extend(extra);
    }
    let mut set = GameStatefulSet::new(
        NAME,
        serde_json::from_value::<GameStatefulSetSpec>(spec).unwrap(),
    );
    set.metadata.namespace = Some(NAMESPACE.to_string());
    set
}

pub struct Harness {
    pub workloads: Arc<MemoryStore<GameStatefulSet>>,
    pub pods: Arc<MemoryStore<Pod>>,
    pub revisions: Arc<MemoryStore<ControllerRevision>>,
    pub hook_runs: Arc<MemoryStore<HookRun>>,
    pub hook_templates: Arc<MemoryStore<HookTemplate>>,
    pub recorder: Arc<MemoryRecorder>,
    pub clock: Arc<ManualClock>,
    pub ctx: Arc<Reconciler>,
}

impl Harness {
    /// Store `set` and build a reconciler around fresh in-memory collaborators
    pub fn new(set: GameStatefulSet) -> Self {
        Self::with_nodes(set, StaticNodes::default())
    }

    /// Like `new`, with a fixed node readiness table
    pub fn with_nodes(set: GameStatefulSet, nodes: StaticNodes) -> Self {
        let workloads: Arc<MemoryStore<GameStatefulSet>> = Arc::new(MemoryStore::new());
        // The API server assigns a phase to every Pod it accepts
        let pods: Arc<MemoryStore<Pod>> = Arc::new(MemoryStore::new().with_defaulter(|pod: &mut Pod| {
            pod.status
                .get_or_insert_with(Default::default)
                .phase
                .get_or_insert_with(|| "Pending".to_string());
        }));
        let revisions: Arc<MemoryStore<ControllerRevision>> = Arc::new(MemoryStore::new());
        let hook_runs: Arc<MemoryStore<HookRun>> = Arc::new(MemoryStore::new());
        let hook_templates: Arc<MemoryStore<HookTemplate>> = Arc::new(MemoryStore::new());
        let recorder: Arc<MemoryRecorder> = Arc::new(MemoryRecorder::default());
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new(start_time()));

        workloads.insert(set);
        let collaborators = Collaborators {
            workloads: Arc::clone(&workloads) as _,
            pods: Arc::clone(&pods) as _,
            revisions: Arc::clone(&revisions) as _,
            hook_runs: Arc::clone(&hook_runs) as _,
            hook_templates: Arc::clone(&hook_templates) as _,
            nodes: Arc::new(nodes),
            recorder: Arc::clone(&recorder) as _,
            clock: Arc::clone(&clock) as _,
        };
        let ctx = Arc::new(Reconciler::with_collaborators(
            collaborators,
            ControllerConfig::default(),
        ));
        Self {
            workloads,
            pods,
            revisions,
            hook_runs,
            hook_templates,
            recorder,
            clock,
            ctx,
        }
    }

    #[must_use]
    pub fn set(&self) -> GameStatefulSet {
        self.workloads.get_now(NAMESPACE, NAME).unwrap()
    }

    /// One reconcile pass against the stored workload
    pub async fn reconcile(&self) -> Result<Action, ReconcilerError> {
        reconcile(Arc::new(self.set()), Arc::clone(&self.ctx)).await
    }

    /// Reconcile, then mark every Pod ready, `passes` times
    pub async fn converge(&self, passes: usize) {
        for _ in 0..passes {
            self.reconcile().await.unwrap();
            self.mark_all_ready();
        }
    }

    /// Edit the stored workload the way `kubectl apply` would
    pub fn edit(&self, change: impl FnOnce(&mut GameStatefulSet)) {
        let mut set = self.set();
        change(&mut set);
        set.metadata.generation = Some(set.metadata.generation.unwrap_or(1) + 1);
        self.workloads.insert(set);
    }

    pub fn set_image(&self, image: &str) {
        self.edit(|set| {
            if let Some(spec) = set.spec.template.spec.as_mut() {
                spec.containers[0].image = Some(image.to_string());
            }
        });
    }

    /// Pod names sorted
    #[must_use]
    pub fn pod_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pods.all().iter().map(|p| p.name_any()).collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn pod(&self, name: &str) -> Pod {
        self.pods.get_now(NAMESPACE, name).unwrap()
    }

    #[must_use]
    pub fn pod_revision(&self, name: &str) -> String {
        self.pod(name).labels().get(REVISION_LABEL).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn pod_image(&self, name: &str) -> Option<String> {
        self.pod(name).spec.and_then(|s| s.containers[0].image.clone())
    }

    #[must_use]
    pub fn revision_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .revisions
            .all()
            .iter()
            .map(|o| o.name_any())
            .collect();
        names.sort();
        names
    }

    /// Play the kubelet: Running with a True Ready condition, other conditions kept
    pub fn mark_ready(&self, name: &str) {
        let mut pod = self.pod(name);
        let status = pod.status.get_or_insert_with(Default::default);
        status.phase = Some("Running".to_string());
        let conditions = status.conditions.get_or_insert_with(Vec::new);
        conditions.retain(|c| c.type_ != "Ready");
        conditions.push(PodCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..PodCondition::default()
        });
        self.pods.insert(pod);
    }

    /// Play the kubelet failing a readiness check
    pub fn mark_unready(&self, name: &str) {
        let mut pod = self.pod(name);
        if let Some(conditions) = pod.status.as_mut().and_then(|s| s.conditions.as_mut()) {
            for condition in conditions.iter_mut().filter(|c| c.type_ == "Ready") {
                condition.status = "False".to_string();
            }
        }
        self.pods.insert(pod);
    }

    pub fn mark_all_ready(&self) {
        for name in self.pod_names() {
            self.mark_ready(&name);
        }
    }

    /// Names of pods deleted since the last `clear_actions`, in order
    #[must_use]
    pub fn deleted_pods(&self) -> Vec<String> {
        self.pods
            .actions_of(Verb::Delete)
            .into_iter()
            .map(|a| a.name)
            .collect()
    }

    /// Total writes issued against every store since the last `clear_actions`
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.workloads.actions().len()
            + self.pods.actions().len()
            + self.revisions.actions().len()
            + self.hook_runs.actions().len()
    }

    pub fn clear_actions(&self) {
        self.workloads.clear_actions();
        self.pods.clear_actions();
        self.revisions.clear_actions();
        self.hook_runs.clear_actions();
    }

    pub fn add_hook_template(&self, name: &str) {
        let mut template = HookTemplate::new(
            name,
            HookTemplateSpec {
                metrics: vec![json!({"name": "check", "provider": {"web": {"url": "http://gate.default.svc/healthz"}}})],
                args: Vec::new(),
            },
        );
        template.metadata.namespace = Some(NAMESPACE.to_string());
        self.hook_templates.insert(template);
    }

    /// Play the hook-run controller
    pub fn set_hook_phase(&self, run_name: &str, phase: HookPhase) {
        let mut run = self.hook_runs.get_now(NAMESPACE, run_name).unwrap();
        run.status = Some(HookRunStatus {
            phase,
            ..HookRunStatus::default()
        });
        self.hook_runs.insert(run);
    }

    #[must_use]
    pub fn hook_run_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .hook_runs
            .all()
            .iter()
            .map(|o| o.name_any())
            .collect();
        names.sort();
        names
    }
}
