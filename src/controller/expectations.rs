//! # Expectations
//!
//! Process-wide, internally synchronised maps shared by reconcile workers and
//! watch handlers. Both are injected into the `Reconciler` rather than living in
//! statics, so independent reconcilers (e.g. in tests) never share state.
//!
//! - `ScaleExpectations`: scale-down deletions issued but not yet observed
//! - `RequeueDurations`: "reconcile me again within N" requests, minimum wins

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
struct PendingDeletion {
    pod_name: String,
    uid: Option<String>,
    recorded_at: Instant,
}

/// Tracks scale-down deletions per workload key until they are observed
#[derive(Debug)]
pub struct ScaleExpectations {
    pending: Mutex<HashMap<String, Vec<PendingDeletion>>>,
    timeout: Duration,
}

impl ScaleExpectations {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Lock the pending map, recovering it if a worker panicked while holding it
    fn pending(&self) -> MutexGuard<'_, HashMap<String, Vec<PendingDeletion>>> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            warn!("Scale expectations lock was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    pub fn expect_deletion(&self, key: &str, pod: &Pod) {
        self.pending()
            .entry(key.to_string())
            .or_default()
            .push(PendingDeletion {
                pod_name: pod.name_any(),
                uid: pod.uid(),
                recorded_at: Instant::now(),
            });
    }

    /// A delete event for `pod_name` arrived from the watch stream
    pub fn observe_deletion(&self, key: &str, pod_name: &str) {
        let mut pending = self.pending();
        if let Some(list) = pending.get_mut(key) {
            list.retain(|p| p.pod_name != pod_name);
            if list.is_empty() {
                pending.remove(key);
            }
        }
    }

    /// Settle expectations against a fresh Pod listing
    ///
    /// A deletion counts as observed once the Pod is gone, is terminating, or was
    /// replaced by a Pod with a different UID.
    pub fn observe_pods(&self, key: &str, pods: &[Pod]) {
        let mut pending = self.pending();
        if let Some(list) = pending.get_mut(key) {
            list.retain(|p| {
                pods.iter().any(|pod| {
                    pod.name_any() == p.pod_name
                        && pod.metadata.deletion_timestamp.is_none()
                        && (p.uid.is_none() || pod.uid() == p.uid)
                })
            });
            if list.is_empty() {
                pending.remove(key);
            }
        }
    }

    /// True when no unexpired deletion is outstanding; expired ones are dropped
    pub fn satisfied(&self, key: &str) -> bool {
        let mut pending = self.pending();
        let Some(list) = pending.get_mut(key) else {
            return true;
        };
        let timeout = self.timeout;
        list.retain(|p| {
            let expired = p.recorded_at.elapsed() >= timeout;
            if expired {
                warn!(
                    workload = key,
                    pod = p.pod_name.as_str(),
                    "Scale-down expectation timed out, dropping it"
                );
            }
            !expired
        });
        if list.is_empty() {
            pending.remove(key);
            true
        } else {
            false
        }
    }

    pub fn forget(&self, key: &str) {
        self.pending().remove(key);
    }
}

/// Minimum requested requeue delay per workload key, consumed once
#[derive(Debug, Default)]
pub struct RequeueDurations {
    durations: Mutex<HashMap<String, Duration>>,
}

impl RequeueDurations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wake-up; shorter requests replace longer ones
    pub fn push(&self, key: &str, after: Duration) {
        if let Ok(mut durations) = self.durations.lock() {
            durations
                .entry(key.to_string())
                .and_modify(|d| *d = (*d).min(after))
                .or_insert(after);
        }
    }

    /// Read and clear the pending wake-up for `key`
    pub fn take(&self, key: &str) -> Option<Duration> {
        self.durations.lock().ok()?.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(name: &str, uid: &str) -> Pod {
        serde_json::from_value(json!({"metadata": {"name": name, "uid": uid}})).unwrap()
    }

    #[test]
    fn test_deletion_is_pending_until_observed() {
        let expectations = ScaleExpectations::new(Duration::from_secs(300));
        let doomed = pod("web-2", "u2");
        expectations.expect_deletion("default/web", &doomed);
        assert!(!expectations.satisfied("default/web"));

        // still listed with the same uid: not yet observed
        expectations.observe_pods("default/web", std::slice::from_ref(&doomed));
        assert!(!expectations.satisfied("default/web"));

        expectations.observe_pods("default/web", &[pod("web-0", "u0")]);
        assert!(expectations.satisfied("default/web"));
    }

    #[test]
    fn test_watch_deletion_settles_expectation() {
        let expectations = ScaleExpectations::new(Duration::from_secs(300));
        expectations.expect_deletion("default/web", &pod("web-1", "u1"));
        expectations.observe_deletion("default/web", "web-1");
        assert!(expectations.satisfied("default/web"));
    }

    #[test]
    fn test_expired_expectations_are_dropped() {
        let expectations = ScaleExpectations::new(Duration::ZERO);
        expectations.expect_deletion("default/web", &pod("web-1", "u1"));
        assert!(expectations.satisfied("default/web"));
    }

    #[test]
    fn test_poisoned_lock_keeps_outstanding_deletions() {
        let expectations = ScaleExpectations::new(Duration::from_secs(300));
        expectations.expect_deletion("default/web", &pod("web-1", "u1"));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = expectations.pending.lock().unwrap();
            panic!("worker died holding the lock");
        }));
        assert!(result.is_err());
        assert!(expectations.pending.is_poisoned());

        assert!(!expectations.satisfied("default/web"));
        expectations.observe_deletion("default/web", "web-1");
        assert!(expectations.satisfied("default/web"));
    }

    #[test]
    fn test_requeue_keeps_minimum_and_clears_on_take() {
        let requeue = RequeueDurations::new();
        requeue.push("default/web", Duration::from_secs(30));
        requeue.push("default/web", Duration::from_secs(5));
        requeue.push("default/web", Duration::from_secs(60));
        assert_eq!(requeue.take("default/web"), Some(Duration::from_secs(5)));
        assert_eq!(requeue.take("default/web"), None);
    }
}
