//! # GameStatefulSet Operator
//!
//! Watches GameStatefulSet resources across all namespaces and converges their
//! Pods, ControllerRevisions and HookRuns.
//!
//! ## Endpoints
//!
//! - `/metrics` - Prometheus metrics
//! - `/healthz` - liveness
//! - `/readyz` - readiness
//!
//! Configuration comes from environment variables, see `ControllerConfig::from_env`.

use anyhow::Result;
use game_statefulset_operator::runtime::{initialization, watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialization::initialize().await?;

    watch_loop::run_watch_loop(
        init.client,
        init.workloads,
        init.reconciler,
        init.server_state,
        init.config,
    )
    .await
}
