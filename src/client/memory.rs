//! # In-Memory Store
//!
//! An `ObjectStore` that keeps objects in a map and mimics the API semantics the
//! reconciler depends on: resourceVersion preconditions, `AlreadyExists` on
//! duplicate creates, `NotFound` on missing objects, and status subresource
//! isolation. Every mutation is appended to an action log so tests can assert
//! exactly which writes a reconcile pass issued.

use super::{
    patch::apply_merge_patch,
    selector::selector_matches,
    store::ObjectStore,
    ClientError,
};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Kind of write recorded in the action log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Replace,
    Patch,
    PatchStatus,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAction {
    pub verb: Verb,
    pub namespace: String,
    pub name: String,
}

type Defaulter<K> = Box<dyn Fn(&mut K) + Send + Sync>;

pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<(String, String), K>>,
    actions: Mutex<Vec<StoreAction>>,
    next_version: AtomicU64,
    forced_conflicts: AtomicU32,
    defaulter: Option<Defaulter<K>>,
}

impl<K> std::fmt::Debug for MemoryStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("next_version", &self.next_version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            actions: Mutex::new(Vec::new()),
            next_version: AtomicU64::new(1),
            forced_conflicts: AtomicU32::new(0),
            defaulter: None,
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `defaulter` on every created object, the way the API server defaults fields
    #[must_use]
    pub fn with_defaulter(mut self, defaulter: impl Fn(&mut K) + Send + Sync + 'static) -> Self {
        self.defaulter = Some(Box::new(defaulter));
        self
    }

    /// Seed an object without recording an action
    pub fn insert(&self, mut obj: K) -> K {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        self.stamp(&mut obj);
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((namespace, name), obj.clone());
        }
        obj
    }

    /// Make the next `count` replace/patch calls fail with `Conflict`
    pub fn force_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn get_now(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .ok()?
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    #[must_use]
    pub fn all(&self) -> Vec<K> {
        self.objects
            .lock()
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn actions(&self) -> Vec<StoreAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn actions_of(&self, verb: Verb) -> Vec<StoreAction> {
        self.actions()
            .into_iter()
            .filter(|a| a.verb == verb)
            .collect()
    }

    pub fn clear_actions(&self) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.clear();
        }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn record(&self, verb: Verb, namespace: &str, name: &str) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(StoreAction {
                verb,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
    }

    fn stamp(&self, obj: &mut K) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
    }

    fn take_forced_conflict(&self, name: &str) -> Result<(), ClientError> {
        let remaining = self.forced_conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.forced_conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(self.conflict(name, "injected conflict"));
        }
        Ok(())
    }

    fn conflict(&self, name: &str, message: &str) -> ClientError {
        ClientError::Conflict {
            kind: Self::kind(),
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    fn not_found(name: &str) -> ClientError {
        ClientError::NotFound {
            kind: Self::kind(),
            name: name.to_string(),
        }
    }

    fn check_precondition(
        &self,
        name: &str,
        stored: &K,
        expected: Option<&str>,
    ) -> Result<(), ClientError> {
        match expected {
            Some(expected) if stored.meta().resource_version.as_deref() != Some(expected) => {
                Err(self.conflict(name, "the object has been modified"))
            }
            _ => Ok(()),
        }
    }

    /// Apply `patch` to the stored object under the lock; `status_only` selects the subresource
    fn patch_stored(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
        status_only: bool,
    ) -> Result<K, ClientError> {
        self.take_forced_conflict(name)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| self.conflict(name, "store lock poisoned"))?;
        let key = (namespace.to_string(), name.to_string());
        let stored = objects.get(&key).ok_or_else(|| Self::not_found(name))?;
        let expected = patch
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str);
        self.check_precondition(name, stored, expected)?;

        let mut effective = patch.clone();
        if let Value::Object(map) = &mut effective {
            if status_only {
                map.retain(|k, _| k == "status");
            } else {
                map.remove("status");
            }
            if let Some(Value::Object(meta)) = map.get_mut("metadata") {
                meta.remove("resourceVersion");
            }
        }

        let mut value = serde_json::to_value(stored)?;
        apply_merge_patch(&mut value, &effective);
        let mut updated: K = serde_json::from_value(value)?;
        self.stamp(&mut updated);
        objects.insert(key, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        self.get_now(namespace, name)
            .ok_or_else(|| Self::not_found(name))
    }

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>, ClientError> {
        let objects = self.all();
        let mut matched = Vec::new();
        for obj in objects {
            if obj.meta().namespace.as_deref().unwrap_or_default() != namespace {
                continue;
            }
            let labels = obj.meta().labels.clone().unwrap_or_default();
            if selector_matches(selector, &labels)? {
                matched.push(obj);
            }
        }
        Ok(matched)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K, ClientError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut created = obj.clone();
        created.meta_mut().namespace = Some(namespace.to_string());
        created.meta_mut().resource_version = None;
        if let Some(defaulter) = &self.defaulter {
            defaulter(&mut created);
        }
        {
            let mut objects = self
                .objects
                .lock()
                .map_err(|_| self.conflict(&name, "store lock poisoned"))?;
            let key = (namespace.to_string(), name.clone());
            if objects.contains_key(&key) {
                return Err(ClientError::AlreadyExists {
                    kind: Self::kind(),
                    name,
                });
            }
            self.stamp(&mut created);
            objects.insert(key, created.clone());
        }
        self.record(Verb::Create, namespace, &name);
        Ok(created)
    }

    async fn replace(&self, namespace: &str, name: &str, obj: &K) -> Result<K, ClientError> {
        self.take_forced_conflict(name)?;
        let updated = {
            let mut objects = self
                .objects
                .lock()
                .map_err(|_| self.conflict(name, "store lock poisoned"))?;
            let key = (namespace.to_string(), name.to_string());
            let stored = objects.get(&key).ok_or_else(|| Self::not_found(name))?;
            self.check_precondition(name, stored, obj.meta().resource_version.as_deref())?;

            // status is only writable through the subresource
            let stored_status = serde_json::to_value(stored)?.get("status").cloned();
            let uid = stored.meta().uid.clone();
            let mut value = serde_json::to_value(obj)?;
            if let Value::Object(map) = &mut value {
                match stored_status {
                    Some(status) => map.insert("status".to_string(), status),
                    None => map.remove("status"),
                };
            }
            let mut updated: K = serde_json::from_value(value)?;
            updated.meta_mut().uid = uid;
            updated.meta_mut().namespace = Some(namespace.to_string());
            self.stamp(&mut updated);
            objects.insert(key, updated.clone());
            updated
        };
        self.record(Verb::Replace, namespace, name);
        Ok(updated)
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, ClientError> {
        let updated = self.patch_stored(namespace, name, patch, false)?;
        self.record(Verb::Patch, namespace, name);
        Ok(updated)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, ClientError> {
        let updated = self.patch_stored(namespace, name, patch, true)?;
        self.record(Verb::PatchStatus, namespace, name);
        Ok(updated)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_seconds: Option<u32>,
    ) -> Result<(), ClientError> {
        let removed = self
            .objects
            .lock()
            .map_err(|_| self.conflict(name, "store lock poisoned"))?
            .remove(&(namespace.to_string(), name.to_string()));
        if removed.is_none() {
            return Err(Self::not_found(name));
        }
        self.record(Verb::Delete, namespace, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some([("app".to_string(), "game".to_string())].into()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let store = MemoryStore::<ConfigMap>::new();
        store.create("default", &config_map("a")).await.unwrap();
        let err = store.create("default", &config_map("a")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.actions_of(Verb::Create).len(), 1);
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create("default", &config_map("a")).await.unwrap();
        let stale = created.metadata.resource_version.clone().unwrap();

        store
            .patch("default", "a", &json!({"data": {"k": "v1"}}))
            .await
            .unwrap();
        let err = store
            .patch(
                "default",
                "a",
                &json!({"metadata": {"resourceVersion": stale}, "data": {"k": "v2"}}),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let mut replaced = created.clone();
        replaced.data = Some([("k".to_string(), "v3".to_string())].into());
        assert!(store
            .replace("default", "a", &replaced)
            .await
            .unwrap_err()
            .is_conflict());
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_selector() {
        let store = MemoryStore::<ConfigMap>::new();
        store.insert(config_map("a"));
        let mut other = config_map("b");
        other.metadata.namespace = Some("other".to_string());
        store.insert(other);

        let selector = crate::client::selector_from_labels([("app", "game")]);
        let listed = store.list("default", &selector).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MemoryStore::<ConfigMap>::new();
        assert!(store
            .delete("default", "missing", None)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
