use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fleetlock::cli::Cli;
use fleetlock::coordinator::Coordinator;
use fleetlock::drain::KubeDrainer;
use fleetlock::metrics;
use fleetlock::nodes::KubeNodeResolver;
use fleetlock::protocol::{self, AppState};
use fleetlock::slot::KubeSlotStore;

#[tokio::main]
async fn main() -> Result<()> {
    fleetlock_common::init();

    let cli = Cli::parse();
    cli.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let client = kube::Client::try_default()
        .await
        .context("failed to construct Kubernetes client")?;

    let coordinator = Coordinator::new(
        Arc::new(KubeSlotStore::new(client.clone(), &namespace)),
        Arc::new(KubeNodeResolver::new(client.clone())),
        Arc::new(KubeDrainer::new(client)),
    );
    let prometheus = metrics::install_recorder();

    let state = AppState {
        coordinator: Arc::new(coordinator),
        prometheus: Arc::new(prometheus),
    };
    let app = protocol::router(state);

    let listener = tokio::net::TcpListener::bind(&cli.address)
        .await
        .with_context(|| format!("failed to bind {}", cli.address))?;
    tracing::info!(address = %cli.address, namespace = %namespace, "fleetlock listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(fleetlock_common::shutdown::shutdown_signal())
        .await
        .context("server exited with error")?;

    tracing::info!("fleetlock stopped gracefully");
    Ok(())
}
