//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use game_statefulset_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Reconciler types
pub use crate::controller::backoff::{BackoffState, FibonacciBackoff};
pub use crate::controller::reconciler::{
    reconcile, Collaborators, Reconciler, ReconcilerError, SpecOverrides, SyncState,
};

// Collaborator seams and their in-memory implementations
pub use crate::client::{
    ClientError, Clock, EventKind, EventRecorder, ManualClock, MemoryRecorder, MemoryStore,
    NodeLookup, ObjectStore, StaticNodes,
};

pub use crate::config::ControllerConfig;
