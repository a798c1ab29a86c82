//! # Reconciler
//!
//! Reconciliation of `GameStatefulSet` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Validate the selector, list and claim Pods
//! 2. Wait for outstanding scale-down deletions to be observed
//! 3. List and claim revisions, resolve the current and update revisions
//! 4. Restart canary steps when the step list or update revision changed
//! 5. Drive the current step's hook and drop hook-runs of vanished Pods
//! 6. Converge the Pods (`pod_set::sync_pods`)
//! 7. Advance canary steps, persist status, truncate revision history

pub mod reconcile;
pub mod types;

pub use reconcile::reconcile;
pub use types::{Collaborators, Reconciler, ReconcilerError, SpecOverrides, SyncState};
