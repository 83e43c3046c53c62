//! NSX service account operator.
//!
//! Reads its configuration from the environment, connects to the NSX
//! Manager cluster and Kubernetes, loads existing Manager objects and then
//! runs the controller and the garbage collector until SIGTERM.

use std::sync::Arc;

use nsx_sa_client::{EndpointPool, HttpManagerApi};
use nsx_sa_control::{GarbageCollector, KubeApiClient, TrustProvisioningService};
use nsx_sa_operator::{controller, OperatorConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nsx_sa=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting NSX service account operator");

    let config = OperatorConfig::from_env()?;
    tracing::info!(
        managers = ?config.manager.managers,
        cluster = %config.provisioning.cluster_name,
        rate_limit = config.manager.rate_limit,
        gc_interval_seconds = config.gc.interval_seconds,
        "Loaded operator configuration"
    );

    let token = CancellationToken::new();

    let pool = Arc::new(EndpointPool::new(&config.manager)?);
    let health = pool.keep_alive_once().await;
    match pool.version() {
        Some(version) => tracing::info!(version = %version, health = ?health, "Connected to NSX Manager"),
        None => tracing::warn!(health = ?health, "NSX Manager version unknown"),
    }
    let keep_alive = pool.spawn_keep_alive(&token);

    let client = kube::Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let service = Arc::new(TrustProvisioningService::new(
        Arc::new(HttpManagerApi::new(Arc::clone(&pool))),
        Arc::new(KubeApiClient::new(client.clone())),
        config.provisioning,
    ));
    service.initialize().await?;

    let gc = Arc::new(GarbageCollector::new(Arc::clone(&service), config.gc));
    let gc_task = tokio::spawn(gc.run(token.clone()));

    controller::run(client, service).await;

    token.cancel();
    gc_task.await?;
    for handle in keep_alive {
        handle.await?;
    }

    tracing::info!("Operator stopped");
    Ok(())
}
