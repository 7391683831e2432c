//! UPF Operator - lifecycle operator for the five-container UPF workload
//!
//! Runs the reconciliation loop next to the workload and serves health,
//! metrics, status and event endpoints.

use anyhow::{Context, Result};
use operator_lib::{
    catalog::ResourceCatalog,
    health::HealthRegistry,
    observability::StructuredLogger,
    platform::{InMemoryPlatform, KubePlatform, KubeStorage, Platform},
    reconciler::{OperatorEvent, ReconcileLoopBuilder, Reconciler},
    relation::RelationBroker,
    storage::{LocalStorage, StorageBackend, StorageManager},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use upf_operator::api;
use upf_operator::config::{OperatorConfig, PlatformKind};

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting upf-operator");

    let config = OperatorConfig::load()?;
    info!(
        app = %config.app_name,
        namespace = %config.namespace,
        platform = config.platform.as_str(),
        "Operator configured"
    );

    let logger = StructuredLogger::new(&config.app_name);
    logger.log_startup(OPERATOR_VERSION, config.platform.as_str());

    let (platform, storage) = connect(&config).await?;
    let catalog = ResourceCatalog::from_attachments(&config.images, config.attach_upstream_images)
        .context("invalid image attachments")?;
    let reconciler = Reconciler::new(
        config.reconciler_config(),
        catalog,
        StorageManager::new(storage),
        platform,
    );

    let health_registry = HealthRegistry::new();
    let broker = Arc::new(RelationBroker::new());
    let (reconcile_loop, handle) = ReconcileLoopBuilder::new()
        .reconciler(reconciler)
        .broker(broker.clone())
        .health(health_registry.clone())
        .initial_config(config.workload.clone())
        .queue_capacity(config.queue_capacity)
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let loop_handle = tokio::spawn(reconcile_loop.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        handle.clone(),
        broker,
    ));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    if config.install_on_start {
        handle.send(OperatorEvent::Install).await?;
    }

    // Mark operator as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    if let Err(e) = loop_handle.await {
        error!(error = %e, "Reconciliation loop panicked");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Build the platform and storage backend for the configured target
async fn connect(
    config: &OperatorConfig,
) -> Result<(Arc<dyn Platform>, Arc<dyn StorageBackend>)> {
    match config.platform {
        PlatformKind::Kubernetes => {
            let platform = KubePlatform::try_default(&config.namespace, &config.app_name)
                .await
                .context("failed to connect to Kubernetes")?;
            let storage = KubeStorage::new(
                platform.client(),
                &config.namespace,
                &config.app_name,
                config.storage_class.clone(),
            );
            Ok((Arc::new(platform), Arc::new(storage)))
        }
        PlatformKind::Local => {
            info!(root = %config.storage_root.display(), "Using local platform");
            let storage = LocalStorage::new(&config.storage_root, config.storage_capacity_bytes);
            Ok((Arc::new(InMemoryPlatform::new()), Arc::new(storage)))
        }
    }
}
