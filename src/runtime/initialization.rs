//! # Initialization
//!
//! Operator start-up: rustls setup, tracing, metrics, server startup and
//! Kubernetes client setup.

use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::GameStatefulSet;
use crate::observability;
use anyhow::{Context, Result};
use kube::{api::Api, Client};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for GameStatefulSets across all namespaces
    pub workloads: Api<GameStatefulSet>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn init_tracing(config: &ControllerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("game_statefulset_operator={}", config.log_level.to_lowercase()).into()
    });
    if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .init();
    }
}

/// Initialize the operator runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
///
/// # Errors
///
/// Fails when the server does not come up or no Kubernetes client can be built.
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything opens a TLS connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    let config = ControllerConfig::from_env();
    init_tracing(&config);

    info!("Starting GameStatefulSet operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = Arc::clone(&server_state);
    let port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let workloads: Api<GameStatefulSet> = Api::all(client.clone());
    let reconciler = Arc::new(Reconciler::new(&client, config.clone()));

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        workloads,
        reconciler,
        server_state,
        config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = std::time::Duration::from_secs(config.server_startup_timeout_secs);
    let poll_interval = std::time::Duration::from_millis(config.server_poll_interval_ms);
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
