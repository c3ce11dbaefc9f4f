//! KubePower - power-aware Kubernetes scheduler
//!
//! Places pods of its `schedulerName` on the worker node with the lowest
//! measured power draw, corrected for recent binds telemetry has not caught
//! up with.

use anyhow::Result;
use scheduler_lib::{
    api::{self, AppState},
    cluster::{init_kube_client, ClusterApi, KubeCluster},
    health::{components, HealthRegistry},
    observability::{SchedulerMetrics, StructuredLogger},
    orchestrator::{MetricRefresher, Orchestrator, Placer},
    resolver::IpNodeResolver,
    selector::NodeSelector,
    state::{NodePowerStore, PendingBindLedger, WorkloadPowerHistory},
    telemetry::{PowerSource, PrometheusClient},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const SCHEDULER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting kubepower");

    let config = config::SchedulerConfig::load()?;
    info!(
        scheduler_name = %config.scheduler_name,
        prometheus_url = %config.prometheus_url,
        tie_break = ?config.tie_break,
        "Scheduler configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::TELEMETRY).await;
    health_registry.register(components::WATCH).await;
    health_registry.register(components::SWEEP).await;

    let metrics = SchedulerMetrics::new()?;

    let logger = StructuredLogger::new(&config.scheduler_name);
    logger.log_startup(SCHEDULER_VERSION, &config.prometheus_url);

    let client = init_kube_client(config.kubeconfig.clone()).await?;
    let cluster: Arc<dyn ClusterApi> =
        Arc::new(KubeCluster::new(client, config.scheduler_name.clone()));
    let source: Arc<dyn PowerSource> = Arc::new(PrometheusClient::new(&config.prometheus_url)?);

    let node_store = NodePowerStore::new();
    let history = match config.workload_evict_after_cycles {
        Some(cycles) => WorkloadPowerHistory::with_eviction(cycles),
        None => WorkloadPowerHistory::new(),
    };
    let ledger = PendingBindLedger::new(config.pending_bind_max_age());
    let resolver = IpNodeResolver::new(cluster.clone()).with_max_age(config.resolver_max_age());

    let selector = NodeSelector::new(
        node_store.clone(),
        history.clone(),
        ledger.clone(),
        resolver,
        cluster.clone(),
        config.selector_config(),
    );
    let refresher = MetricRefresher::new(
        source,
        node_store,
        history,
        config.metrics.clone(),
        metrics.clone(),
        health_registry.clone(),
    );
    let placer = Placer::new(
        cluster.clone(),
        selector,
        ledger,
        metrics.clone(),
        logger.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    // Start health and metrics server
    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics));
    let mut api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let running = Orchestrator::new(
        config.orchestrator_config(),
        refresher,
        placer,
        cluster,
        health_registry.clone(),
    )
    .start(&shutdown_tx);

    health_registry.set_ready(true).await;

    // A failed API server stops the scheduler right away
    let mut api_exited = false;
    let reason = tokio::select! {
        signal = wait_for_signal() => signal?,
        res = &mut api_handle => {
            api_exited = true;
            report_api_exit(res);
            "API server exited"
        }
    };
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    if shutdown_tx.send(()).is_err() {
        warn!("No duty was listening for shutdown");
    }
    let finished = running.join().await;

    if !api_exited {
        report_api_exit(api_handle.await);
    }

    info!(duties = finished.len(), "Shutdown complete");
    if api_exited {
        anyhow::bail!("API server exited before shutdown was requested");
    }
    Ok(())
}

fn report_api_exit(res: std::result::Result<std::io::Result<()>, JoinError>) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            Ok("SIGINT received")
        }
        _ = sigterm.recv() => Ok("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT received")
}
