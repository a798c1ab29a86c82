//! # Event Recorder
//!
//! Fire-and-forget Kubernetes Events attached to the workload. Failures to emit
//! are logged and never change the outcome of a reconcile.

use crate::constants::CONTROLLER_NAME;
use crate::crd::GameStatefulSet;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, EventSource};
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Normal => "Normal",
            EventKind::Warning => "Warning",
        }
    }
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn publish(&self, set: &GameStatefulSet, kind: EventKind, reason: &str, message: String);
}

#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn publish(&self, set: &GameStatefulSet, kind: EventKind, reason: &str, message: String) {
        let namespace = set.namespace().unwrap_or_default();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", set.name_any())),
                namespace: Some(namespace.clone()),
                ..ObjectMeta::default()
            },
            involved_object: set.object_ref(&()),
            reason: Some(reason.to_string()),
            message: Some(message),
            type_: Some(kind.as_str().to_string()),
            count: Some(1),
            source: Some(EventSource {
                component: Some(CONTROLLER_NAME.to_string()),
                host: None,
            }),
            reporting_component: Some(CONTROLLER_NAME.to_string()),
            ..Event::default()
        };
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);
        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!(
                workload.name = set.name_any().as_str(),
                reason,
                error = %e,
                "Failed to publish event"
            );
        }
    }
}

/// Recorder that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<(EventKind, String, String)>>,
}

impl MemoryRecorder {
    /// `(kind, reason, message)` in emission order
    #[must_use]
    pub fn events(&self) -> Vec<(EventKind, String, String)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, reason, _)| reason).collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn publish(&self, _set: &GameStatefulSet, kind: EventKind, reason: &str, message: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push((kind, reason.to_string(), message));
        }
    }
}
