//! Remediation Engine - incident-driven corrective action daemon
//!
//! Turns classified incident signals into policy-bounded, conflict-safe
//! actions against desired-state workload resources, with a durable
//! action history.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use engine_lib::{
    executor::{ActionExecutor, ExecutorConfig, HttpClusterClient},
    health::{components, HealthRegistry},
    history::HistoryStore,
    observability::{EngineMetrics, StructuredLogger},
    pipeline::{PipelineConfig, RemediationPipeline},
    policy::{PolicyEngine, PolicySet},
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting remediation-engine");

    // Load configuration
    let config = config::EngineConfig::load()?;
    info!(
        instance = %config.instance_name,
        cluster_endpoint = %config.cluster_endpoint,
        "Engine configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::PIPELINE).await;
    health_registry.register(components::HISTORY).await;
    health_registry.register(components::CLUSTER).await;
    health_registry.register(components::API).await;

    // Initialize metrics
    let metrics = EngineMetrics::new();

    // Initialize structured logger
    let logger = StructuredLogger::new(&config.instance_name);

    // Load the policy table
    let policies = if config.policy_path.is_empty() {
        info!("Using built-in policy defaults");
        Arc::new(PolicySet::defaults())
    } else {
        let set = PolicySet::from_file(&config.policy_path)
            .with_context(|| format!("Failed to load policies from {}", config.policy_path))?;
        info!(path = %config.policy_path, policies = set.len(), "Policy table loaded");
        Arc::new(set)
    };
    logger.log_startup(ENGINE_VERSION, policies.len());

    // History store with durable appends
    let history = if config.history_path.is_empty() {
        warn!("History persistence disabled");
        Arc::new(HistoryStore::new(Default::default()))
    } else {
        Arc::new(
            HistoryStore::with_persistence(config.history_path.clone().into())
                .context("Failed to initialize history store")?,
        )
    };

    // Cluster resource interface
    let attempt_timeout = Duration::from_secs(config.attempt_timeout_secs);
    let cluster = Arc::new(
        HttpClusterClient::new(&config.cluster_endpoint, attempt_timeout)
            .context("Failed to create cluster client")?,
    );

    // Wire the pipeline
    let executor = ActionExecutor::new(
        cluster,
        ExecutorConfig {
            max_attempts: config.max_attempts,
            attempt_timeout,
            ..Default::default()
        },
    );
    let pipeline = Arc::new(RemediationPipeline::new(
        PolicyEngine::new(policies.clone()),
        executor,
        history.clone(),
        PipelineConfig {
            worker_idle_timeout: Duration::from_secs(config.worker_idle_timeout_secs),
            ..Default::default()
        },
        logger.clone(),
    ));

    // Periodic history pruning
    let prune_history = history.clone();
    let prune_registry = health_registry.clone();
    let prune_interval = Duration::from_secs(config.prune_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_interval);
        ticker.tick().await; // First tick fires immediately
        loop {
            ticker.tick().await;
            match prune_history.prune(chrono::Utc::now()).await {
                Ok(_) => prune_registry.set_healthy(components::HISTORY).await,
                Err(e) => {
                    warn!(error = %e, "History pruning failed");
                    prune_registry
                        .set_degraded(components::HISTORY, e.to_string())
                        .await;
                }
            }
        }
    });

    // Create shared application state
    let app_state = Arc::new(api::AppState {
        pipeline,
        history,
        policies,
        health_registry: health_registry.clone(),
        metrics,
    });

    // Mark engine as ready after initialization
    health_registry.set_ready(true).await;

    // Start the API server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
