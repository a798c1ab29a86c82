//! # Reconciler Types
//!
//! The shared reconciler context, its error type and the per-pass state.

use crate::client::{
    ClientError, Clock, EventRecorder, KubeEventRecorder, KubeNodeLookup, KubeStore, NodeLookup,
    ObjectStore, SystemClock,
};
use crate::config::ControllerConfig;
use crate::controller::backoff::BackoffState;
use crate::controller::expectations::{RequeueDurations, ScaleExpectations};
use crate::crd::{GameStatefulSet, GameStatefulSetStatus, HookRun, HookTemplate};
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to {op} pod {namespace}/{pod}: {source}")]
    Pod {
        namespace: String,
        pod: String,
        op: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("failed to {op} revision {name} of {workload}: {source}")]
    Revision {
        workload: String,
        name: String,
        op: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("failed to {op} hook-run {name} of {workload}: {source}")]
    HookRun {
        workload: String,
        name: String,
        op: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("failed to {op} {workload}: {source}")]
    Workload {
        workload: String,
        op: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("failed to update status of {workload}: {source}")]
    Status {
        workload: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to list {kind} for {workload}: {source}")]
    List {
        workload: String,
        kind: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("invalid selector on {workload}: {source}")]
    InvalidSelector {
        workload: String,
        #[source]
        source: ClientError,
    },

    #[error("pod {pod} cannot be updated in place: {reason}")]
    InPlaceUnsupported { pod: String, reason: String },

    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} is missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("gave up creating {kind} for {workload} after repeated name collisions")]
    CollisionLimit {
        workload: String,
        kind: &'static str,
    },
}

impl ReconcilerError {
    /// Errors a retry cannot fix without someone editing the workload
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::InvalidSelector { .. }
                | Self::InPlaceUnsupported { .. }
                | Self::Serialization { .. }
                | Self::MissingField { .. }
        )
    }

    /// Short reason used for Kubernetes events
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Pod { .. } => "FailedPodOperation",
            Self::Revision { .. } => "FailedRevisionOperation",
            Self::HookRun { .. } => "FailedHookRunOperation",
            Self::Workload { .. } | Self::Status { .. } => "FailedUpdateStatus",
            Self::List { .. } => "FailedList",
            Self::InvalidSelector { .. } => "InvalidSelector",
            Self::InPlaceUnsupported { .. } => "InPlaceUpdateUnsupported",
            Self::Serialization { .. } | Self::MissingField { .. } => "InvalidRevision",
            Self::CollisionLimit { .. } => "RevisionCollision",
        }
    }
}

/// Spec fields the operator writes back; `None` leaves the live value alone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecOverrides {
    pub paused: Option<bool>,
    pub retry_pre_delete_hooks: Option<bool>,
    pub retry_pre_inplace_hooks: Option<bool>,
    pub retry_post_inplace_hooks: Option<bool>,
}

/// State accumulated over one reconcile pass and flushed by the status updater
#[derive(Debug, Clone)]
pub struct SyncState {
    pub status: GameStatefulSetStatus,
    pub overrides: SpecOverrides,
    /// Hook-runs of this workload, kept current as runs are created and deleted
    pub hook_runs: Vec<HookRun>,
}

impl SyncState {
    #[must_use]
    pub fn new(set: &GameStatefulSet, hook_runs: Vec<HookRun>) -> Self {
        Self {
            status: set.status.clone().unwrap_or_default(),
            overrides: SpecOverrides::default(),
            hook_runs,
        }
    }

    /// Effective pause flag: a pending write-back wins over the observed spec
    #[must_use]
    pub fn paused(&self, set: &GameStatefulSet) -> bool {
        self.overrides
            .paused
            .unwrap_or(set.spec.update_strategy.paused)
    }
}

/// Injected collaborators
///
/// Production wires the Kubernetes-backed implementations via `Collaborators::kube`;
/// tests assemble in-memory ones.
#[derive(Clone)]
pub struct Collaborators {
    pub workloads: Arc<dyn ObjectStore<GameStatefulSet>>,
    pub pods: Arc<dyn ObjectStore<Pod>>,
    pub revisions: Arc<dyn ObjectStore<ControllerRevision>>,
    pub hook_runs: Arc<dyn ObjectStore<HookRun>>,
    pub hook_templates: Arc<dyn ObjectStore<HookTemplate>>,
    pub nodes: Arc<dyn NodeLookup>,
    pub recorder: Arc<dyn EventRecorder>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    #[must_use]
    pub fn kube(client: &Client) -> Self {
        Self {
            workloads: Arc::new(KubeStore::new(client.clone())),
            pods: Arc::new(KubeStore::new(client.clone())),
            revisions: Arc::new(KubeStore::new(client.clone())),
            hook_runs: Arc::new(KubeStore::new(client.clone())),
            hook_templates: Arc::new(KubeStore::new(client.clone())),
            nodes: Arc::new(KubeNodeLookup::new(client.clone())),
            recorder: Arc::new(KubeEventRecorder::new(client.clone())),
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    pub workloads: Arc<dyn ObjectStore<GameStatefulSet>>,
    pub pods: Arc<dyn ObjectStore<Pod>>,
    pub revisions: Arc<dyn ObjectStore<ControllerRevision>>,
    pub hook_runs: Arc<dyn ObjectStore<HookRun>>,
    pub hook_templates: Arc<dyn ObjectStore<HookTemplate>>,
    pub nodes: Arc<dyn NodeLookup>,
    pub recorder: Arc<dyn EventRecorder>,
    pub clock: Arc<dyn Clock>,
    pub expectations: Arc<ScaleExpectations>,
    pub requeue: Arc<RequeueDurations>,
    // Backoff state per workload (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: &Client, config: ControllerConfig) -> Self {
        Self::with_collaborators(Collaborators::kube(client), config)
    }

    #[must_use]
    pub fn with_collaborators(collaborators: Collaborators, config: ControllerConfig) -> Self {
        Self {
            workloads: collaborators.workloads,
            pods: collaborators.pods,
            revisions: collaborators.revisions,
            hook_runs: collaborators.hook_runs,
            hook_templates: collaborators.hook_templates,
            nodes: collaborators.nodes,
            recorder: collaborators.recorder,
            clock: collaborators.clock,
            expectations: Arc::new(ScaleExpectations::new(config.expectations_timeout())),
            requeue: Arc::new(RequeueDurations::new()),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        let in_place = ReconcilerError::InPlaceUnsupported {
            pod: "web-0".to_string(),
            reason: "env changed".to_string(),
        };
        assert!(in_place.is_permanent());
        assert_eq!(in_place.reason(), "InPlaceUpdateUnsupported");

        let conflict = ReconcilerError::Status {
            workload: "default/web".to_string(),
            source: ClientError::Conflict {
                kind: "GameStatefulSet".to_string(),
                name: "web".to_string(),
                message: "stale".to_string(),
            },
        };
        assert!(!conflict.is_permanent());
    }

    #[test]
    fn test_pod_error_message_carries_context() {
        let err = ReconcilerError::Pod {
            namespace: "default".to_string(),
            pod: "web-1".to_string(),
            op: "delete",
            source: ClientError::NotFound {
                kind: "Pod".to_string(),
                name: "web-1".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "failed to delete pod default/web-1: Pod web-1 not found"
        );
    }
}
