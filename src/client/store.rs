//! # Object Store
//!
//! The CRUD surface the reconciler consumes, plus the Kubernetes-backed implementation.
//! Reads hand back owned snapshots; callers clone before mutating and write back
//! through `replace`/`patch`, so no shared cache is ever mutated in place.

use super::{selector::selector_to_string, ClientError};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Namespaced CRUD over one resource kind
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError>;

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>, ClientError>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, ClientError>;

    /// Full update; fails with `Conflict` when `obj` carries a stale resourceVersion
    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K, ClientError>;

    /// JSON merge patch of the main resource
    ///
    /// A `metadata.resourceVersion` inside the patch acts as a precondition.
    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, ClientError>;

    /// JSON merge patch of the status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, ClientError>;

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), ClientError>;
}

/// `ObjectStore` backed by the Kubernetes API
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> Debug for KubeStore<K>
where
    K: Resource<DynamicType = ()>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &K::kind(&()))
            .finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn classify(name: &str, error: kube::Error) -> ClientError {
        ClientError::from_kube(&K::kind(&()), name, error)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| Self::classify(name, e))
    }

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>, ClientError> {
        let labels = selector_to_string(selector)?;
        let params = if labels.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&labels)
        };
        let list = self
            .api(namespace)
            .list(&params)
            .await
            .map_err(|e| Self::classify("(list)", e))?;
        Ok(list.items)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, ClientError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Self::classify(&name, e))
    }

    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K, ClientError> {
        self.api(namespace)
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| Self::classify(name, e))
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, ClientError> {
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Self::classify(name, e))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, ClientError> {
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Self::classify(name, e))
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: Option<u32>,
    ) -> Result<(), ClientError> {
        let params = DeleteParams {
            grace_period_seconds,
            ..DeleteParams::default()
        };
        self.api(namespace)
            .delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| Self::classify(name, e))
    }
}
