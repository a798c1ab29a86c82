//! # Node Lookup
//!
//! Node readiness, consulted before force-deleting a Pod stuck on a lost node.

use super::ClientError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use std::collections::HashMap;

#[async_trait]
pub trait NodeLookup: Send + Sync {
    /// `Some(ready)` for a known node, `None` when the node does not exist
    async fn node_ready(&self, name: &str) -> Result<Option<bool>, ClientError>;
}

#[derive(Clone)]
pub struct KubeNodeLookup {
    nodes: Api<Node>,
}

impl std::fmt::Debug for KubeNodeLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNodeLookup").finish_non_exhaustive()
    }
}

impl KubeNodeLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeLookup for KubeNodeLookup {
    async fn node_ready(&self, name: &str) -> Result<Option<bool>, ClientError> {
        let node = self
            .nodes
            .get_opt(name)
            .await
            .map_err(|e| ClientError::from_kube("Node", name, e))?;
        Ok(node.map(|n| is_node_ready(&n)))
    }
}

/// A node is ready when its `Ready` condition is `True`
#[must_use]
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}

/// Fixed node readiness table
#[derive(Debug, Default, Clone)]
pub struct StaticNodes {
    ready: HashMap<String, bool>,
}

impl StaticNodes {
    #[must_use]
    pub fn with_node(mut self, name: &str, ready: bool) -> Self {
        self.ready.insert(name.to_string(), ready);
        self
    }
}

#[async_trait]
impl NodeLookup for StaticNodes {
    async fn node_ready(&self, name: &str) -> Result<Option<bool>, ClientError> {
        Ok(self.ready.get(name).copied())
    }
}
