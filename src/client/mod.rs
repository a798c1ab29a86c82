//! # Client
//!
//! Collaborator interfaces the reconciliation engine runs against, with a
//! Kubernetes-backed implementation for production and in-memory ones for tests.
//!
//! - `store`: `ObjectStore<K>` CRUD surface and `KubeStore<K>`
//! - `memory`: `MemoryStore<K>` with resourceVersion semantics and an action log
//! - `nodes`: node readiness lookup
//! - `events`: Kubernetes Event emission
//! - `clock`: injectable time source
//! - `retry`: `retry_on_conflict` combinator
//! - `selector`, `patch`: label selector and JSON merge patch helpers

mod clock;
mod error;
mod events;
mod memory;
mod nodes;
mod patch;
mod retry;
mod selector;
mod store;

pub use clock::{parse_time, Clock, ManualClock, SystemClock};
pub use error::ClientError;
pub use events::{EventKind, EventRecorder, KubeEventRecorder, MemoryRecorder};
pub use memory::{MemoryStore, StoreAction, Verb};
pub use nodes::{is_node_ready, KubeNodeLookup, NodeLookup, StaticNodes};
pub use patch::{apply_merge_patch, create_merge_patch};
pub use retry::retry_on_conflict;
pub use selector::{selector_from_labels, selector_matches, selector_to_string};
pub use store::{KubeStore, ObjectStore};
