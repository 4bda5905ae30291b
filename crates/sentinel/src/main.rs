//! Sentinel Agent - predictive cgroup v2 resource control
//!
//! Runs on each node, forecasting the CPU demand of its workloads, sizing
//! their cgroup limits ahead of demand and quarantining untrusted workloads
//! under high load.

use anyhow::{Context, Result};
use clap::Parser;
use sentinel_lib::{
    control::{ControlLoopBuilder, WorkloadRegistry},
    enforcer::{CgroupEnforcer, DryRunWriter, ResourceEnforcer},
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
    predictor::{probe_predictor, DemandPredictor},
    sampler::{create_sampler, CgroupPathResolver, WorkloadResolver},
    security::{DockerSecurityFeed, SecurityFeed, UnavailableSecurityFeed},
    telemetry::{HttpTelemetrySink, NullTelemetrySink, TelemetrySink},
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    let cli = config::Cli::parse();

    // Initialize tracing with JSON output; --log-level wins over RUST_LOG
    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting sentinel-agent");

    let config = match config::AgentConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Agent failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: config::AgentConfig) -> Result<()> {
    info!(
        node_id = %config.node_id,
        cgroup_root = %config.cgroup_root.display(),
        "Agent configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    for component in [
        components::SAMPLER,
        components::PREDICTOR,
        components::SECURITY_FEED,
        components::ENFORCER,
    ] {
        health_registry.register(component).await;
    }

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_id);

    let sampler = create_sampler(&config.cgroup_root).await?;

    let predictor = probe_predictor(&config.predictor);
    metrics.set_predictor(predictor.name());
    if config.predictor.model_path.is_some() && !predictor.is_learned() {
        health_registry
            .set_degraded(components::PREDICTOR, "learned model unavailable, using moving average")
            .await;
    }

    let (enforcer, journal) = build_enforcer(&config);

    let security: Arc<dyn SecurityFeed> = match &config.docker_endpoint {
        Some(endpoint) => Arc::new(DockerSecurityFeed::new(endpoint, config.security_timeout())?),
        None => {
            health_registry
                .set_degraded(components::SECURITY_FEED, "no container runtime configured")
                .await;
            Arc::new(UnavailableSecurityFeed)
        }
    };

    let telemetry: Arc<dyn TelemetrySink> = match &config.telemetry_endpoint {
        Some(endpoint) => Arc::new(HttpTelemetrySink::new(endpoint, config.telemetry_timeout())?),
        None => Arc::new(NullTelemetrySink),
    };

    let registry = Arc::new(WorkloadRegistry::new());
    for workload in &config.workloads {
        registry.register(workload.clone());
    }
    let resolver = CgroupPathResolver::new(&config.cgroup_root);
    for container_id in &config.containers {
        match resolver.resolve(container_id).await {
            Some(path) => registry.register_container(path, container_id.clone()),
            None => warn!(
                container_id = %container_id,
                "Container not found under cgroup root, skipping"
            ),
        }
    }
    if registry.is_empty() {
        anyhow::bail!("none of the configured workloads could be resolved");
    }

    let control = ControlLoopBuilder::new()
        .sampler(sampler)
        .predictor(Arc::new(predictor.clone()))
        .enforcer(enforcer)
        .security_feed(security)
        .telemetry(telemetry)
        .registry(Arc::clone(&registry))
        .health(health_registry.clone())
        .config(config.control_config())
        .build()
        .context("failed to build control loop")?;

    logger.log_startup(AGENT_VERSION, predictor.name(), registry.len(), config.dry_run);

    // Start health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let control_handle = tokio::spawn(control.run(shutdown_rx));

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;

    // The loop finishes its current tick before returning
    let _ = shutdown_tx.send(());
    control_handle.await.context("control loop panicked")?;

    if let Some(journal) = journal {
        info!(
            intended_writes = journal.journal().len(),
            "Dry run finished, no limits were written"
        );
    }
    info!("Shutdown complete");
    Ok(())
}

fn build_enforcer(
    config: &config::AgentConfig,
) -> (Arc<dyn ResourceEnforcer>, Option<Arc<DryRunWriter>>) {
    let (enforcer, journal) = if config.dry_run {
        let (enforcer, journal) = CgroupEnforcer::dry_run(&config.cgroup_root);
        (enforcer, Some(journal))
    } else {
        (CgroupEnforcer::new(&config.cgroup_root), None)
    };

    let enforcer = match &config.io_device {
        Some(device) => enforcer.with_io_device(device.clone()),
        None => enforcer,
    };
    (Arc::new(enforcer), journal)
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
