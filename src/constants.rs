//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the GameStatefulSet, HookRun and HookTemplate resources
pub const API_GROUP: &str = "tkex.tencent.com";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default maximum number of workloads reconciled at the same time
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default Fibonacci backoff floor for failed reconciliations (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 1;

/// Default Fibonacci backoff ceiling for failed reconciliations (seconds)
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Default exponential backoff starting value for watch stream errors (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch stream errors (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// How long a recorded scale-down deletion may stay unobserved before it is dropped (seconds)
pub const DEFAULT_EXPECTATIONS_TIMEOUT_SECS: u64 = 300;

/// Requeue delay while scale-down deletions are still unobserved (seconds)
pub const UNSATISFIED_EXPECTATIONS_REQUEUE_SECS: u64 = 5;

/// Attempts made by optimistic-concurrency write loops before giving up
pub const DEFAULT_CONFLICT_RETRIES: u32 = 5;

/// Revisions kept beyond the live set when `revisionHistoryLimit` is unset
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;

/// Upper bound on name-collision retries when creating revisions and hook-runs
pub const MAX_COLLISION_RETRIES: i32 = 16;

/// Pod label carrying the revision that produced the Pod
pub const REVISION_LABEL: &str = "controller-revision-hash";

/// Pod label carrying the Pod's own name (stable network identity)
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

/// Annotation that allows force deletion of a terminating Pod whose node is NotReady
pub const NODE_LOST_FORCE_DELETE_ANNOTATION: &str = "tkex.tencent.com/node-lost-force-delete";

/// Pod annotation recording the last in-place update
pub const INPLACE_UPDATE_STATE_ANNOTATION: &str = "tkex.tencent.com/inplace-update-state";

/// Pod annotation recording an in-place update waiting out its grace period
pub const INPLACE_UPDATE_GRACE_ANNOTATION: &str = "tkex.tencent.com/inplace-update-grace";

/// Pod annotation recording the last hot-patch update
pub const HOTPATCH_UPDATE_STATE_ANNOTATION: &str = "tkex.tencent.com/hot-patch-update-state";

/// Readiness gate / condition type toggled around in-place updates
pub const INPLACE_UPDATE_READY_CONDITION: &str = "InPlaceUpdateReady";

/// Hook-run label: which family the hook-run belongs to
pub const HOOK_TYPE_LABEL: &str = "tkex.tencent.com/hook-run-type";

/// Hook-run label: owning workload name
pub const HOOK_WORKLOAD_LABEL: &str = "tkex.tencent.com/workload-name";

/// Hook-run label: revision of the Pod (or rollout) the hook-run was created for
pub const HOOK_REVISION_LABEL: &str = "tkex.tencent.com/workload-revision";

/// Hook-run label: ordinal of the Pod the hook-run was created for
pub const HOOK_ORDINAL_LABEL: &str = "tkex.tencent.com/pod-instance-ordinal";

/// Hook-run label: canary step index the hook-run was created for
pub const HOOK_STEP_INDEX_LABEL: &str = "tkex.tencent.com/canary-step-index";

/// Pause reason recorded while a canary pause step is in effect
pub const PAUSE_REASON_CANARY_STEP: &str = "CanaryPauseStep";

/// Pause reason recorded when a canary step hook finished unsuccessfully
pub const PAUSE_REASON_STEP_HOOK: &str = "PausedByStepBasedHook";

/// Field manager / event reporter name
pub const CONTROLLER_NAME: &str = "game-statefulset-operator";
