//! zkrelay: proving relay worker.
//!
//! Claims proof-generation tasks from a rollup coordinator, delegates the
//! proof computation to a remote proving API, and reports the results back.
//!
//! ## Endpoints
//!
//! - `GET /` - Readiness probe (200 = healthy)
//! - `GET /live` - Liveness probe
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Configuration
//!
//! The worker is configured via a JSON/TOML file naming the coordinator, the
//! proving service and the worker pool. See [`zkrelay_config::Config`] for
//! details. `PROVING_SERVICE_BASE_URL` and `PROVING_SERVICE_API_KEY` override
//! the proving-service fields from the environment.
//!
//! ## Usage
//!
//! ```bash
//! zkrelay --config config.json
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
    sync::broadcast,
};
use tracing::{info, warn};
use zkrelay_client::{CoordinatorClient, ProvingServiceClient, RetryPolicy};
use zkrelay_config::Config;

use crate::health::HealthState;
use crate::keys::KeyManager;
use crate::pool::{Coordinator, PoolStatus, Prover, WorkerContext};

/// Upper bound on the shutdown drain; in-flight tasks still running past it
/// are abandoned to the coordinator's reassignment.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

mod health;
mod keys;
mod metrics;
mod pool;

#[cfg(test)]
mod mock;

/// Command-line interface for the relay worker.
#[derive(Parser, Debug)]
#[command(name = "zkrelay")]
#[command(about = "Proving relay worker", long_about = None)]
pub struct Cli {
    /// Config file path.
    #[arg(long)]
    pub config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_ansi(true)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    config.override_with_env()?;
    config.validate()?;

    let metrics_handle = metrics::init_metrics();
    let http = reqwest::Client::new();

    let prover_client = Arc::new(ProvingServiceClient::new(
        &config.base_url,
        config.api_key.clone(),
        RetryPolicy::new(
            config.retry_count,
            config.retry_wait_time_sec,
            config.connection_timeout_sec,
        ),
        http.clone(),
    )?);

    let sdk = &config.sdk_config;
    let prover_name = format!("{}{}", sdk.prover_name_prefix, uuid::Uuid::new_v4());
    let coordinator_client = Arc::new(CoordinatorClient::new(
        &sdk.coordinator.base_url,
        prover_name,
        sdk.prover.circuit_types.clone(),
        sdk.prover.circuit_version.clone(),
        RetryPolicy::new(
            sdk.coordinator.retry_count,
            sdk.coordinator.retry_wait_time_sec,
            sdk.coordinator.connection_timeout_sec,
        ),
        http,
    )?);

    // Advertise the accepted circuits' verification keys when registering.
    let vks = futures::future::try_join_all(sdk.prover.circuit_types.iter().map(|circuit_type| {
        prover_client.get_vk(*circuit_type, &sdk.prover.circuit_version)
    }))
    .await
    .context("failed to fetch verification keys from the proving service")?;
    coordinator_client
        .login(vks)
        .await
        .context("coordinator login failed")?;

    let pool_status = Arc::new(PoolStatus::new(sdk.prover.n_workers));
    let keys = Arc::new(KeyManager::new(sdk.keys_dir.clone()));
    let health_state = Arc::new(HealthState::new(
        pool_status.clone(),
        coordinator_client.health(),
        prover_client.health(),
    ));
    let _heartbeat = health::spawn_heartbeat(health_state.clone());

    let ctx = Arc::new(WorkerContext {
        coordinator: Coordinator::Http(coordinator_client),
        prover: Prover::Http(prover_client),
        keys,
        pool: pool_status,
        circuit_types: sdk.prover.circuit_types.clone(),
        circuit_version: sdk.prover.circuit_version.clone(),
    });

    let (shutdown_tx, _) = broadcast::channel(1);
    let workers = pool::start_workers(ctx, &shutdown_tx);
    info!(n_workers = sdk.prover.n_workers, "worker pool started");

    let addr: SocketAddr = sdk.health_listener_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("health listener on {addr}");
    let router = health::app(health_state, metrics_handle);
    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("draining in-flight tasks");
    let _ = shutdown_tx.send(());
    let drain = async {
        for worker in workers {
            let _ = worker.await;
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("drain deadline reached, abandoning in-flight tasks");
    }
    server.await??;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, starting graceful shutdown"),
        _ = sigint.recv() => info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
    }
}
