//! # Watch Loop
//!
//! Runs the kube-runtime `Controller` over GameStatefulSets. Changes to owned
//! Pods, ControllerRevisions and HookRuns map back to their owning workload.
//! A separate Pod watcher feeds deletions into the scale expectations.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::{GameStatefulSet, HookRun};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::ControllerRevision;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::watcher::{self, Event};
use kube_runtime::{controller, Controller, WatchStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key of the GameStatefulSet controlling `pod`, if any
#[must_use]
pub fn owner_key(pod: &Pod) -> Option<String> {
    let owner = pod
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true))?;
    let kind = GameStatefulSet::kind(&());
    if owner.kind != kind.as_ref() || owner.api_version != GameStatefulSet::api_version(&()) {
        return None;
    }
    Some(format!(
        "{}/{}",
        pod.namespace().unwrap_or_default(),
        owner.name
    ))
}

/// Watch Pod deletions and mark them observed in the scale expectations
pub async fn watch_pod_deletions(client: Client, reconciler: Arc<Reconciler>) {
    let pods: Api<Pod> = Api::all(client);
    let mut events = watcher::watcher(pods, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Delete(pod)) => {
                if let Some(key) = owner_key(&pod) {
                    debug!(workload = key.as_str(), pod = pod.name_any().as_str(), "Observed pod deletion");
                    reconciler.expectations.observe_deletion(&key, &pod.name_any());
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Pod deletion watcher error: {}", e),
        }
    }
    warn!("Pod deletion watcher ended");
}

/// Run the controller watch loop
///
/// Marks the server not ready on SIGINT/SIGTERM and restarts the controller
/// stream whenever it ends for any other reason.
///
/// # Errors
///
/// Currently never fails; the signature leaves room for fatal start-up errors.
pub async fn run_watch_loop(
    client: Client,
    workloads: Api<GameStatefulSet>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    config: ControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    let shutdown_server_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let deletions = tokio::spawn(watch_pod_deletions(client.clone(), Arc::clone(&reconciler)));

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = Arc::clone(&backoff_duration_ms);
        let backoff_start_ms = config.backoff_start_ms;
        let max_backoff_ms = config.backoff_max_ms;
        let watch_restart_delay_secs = config.watch_restart_delay_secs;

        Controller::new(workloads.clone(), watcher::Config::default().any_semantic())
            .owns(Api::<Pod>::all(client.clone()), watcher::Config::default())
            .owns(
                Api::<ControllerRevision>::all(client.clone()),
                watcher::Config::default(),
            )
            .owns(Api::<HookRun>::all(client.clone()), watcher::Config::default())
            .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciliations))
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |result| {
                let backoff = Arc::clone(&backoff);
                async move {
                    match &result {
                        Ok((object, _)) => {
                            backoff.store(backoff_start_ms, Ordering::Relaxed);
                            debug!(workload = %object, "watch.event.success");
                            Some(result)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                max_backoff_ms,
                                watch_restart_delay_secs,
                            )
                            .await
                            .map(|()| result)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            config.watch_restart_delay_after_end_secs
        );
        tokio::time::sleep(config.watch_restart_delay_after_end_duration()).await;
    }

    deletions.abort();
    info!("Controller stopped gracefully");
    Ok(())
}
