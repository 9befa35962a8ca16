//! Fog worker process.
//!
//! Wires the three adapters the worker needs (task store, node registry,
//! message bus), serves the metrics scrape endpoint, and drives the
//! worker runtime (heartbeat + consumer) until a shutdown signal arrives.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod executor;
mod metrics_exporter;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scheduler_core::adapters::{AmqpTaskBus, PgTaskStore, RedisNodeRegistry};
use scheduler_core::config::WorkerConfig;
use scheduler_core::supervisor::{retry_with_backoff, wait_for_shutdown_signal};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use executor::StubExecutor;
use metrics_exporter::GaugeRegistry;
use runtime::WorkerRuntime;

#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Fog worker: heartbeat publisher, metrics exporter, task consumer", long_about = None)]
struct CliArgs {
    /// Path to the worker configuration file.
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the worker's node id from config file.
    #[arg(long = "node-id")]
    node_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("worker=info,scheduler_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!("fog worker starting up");
    info!(config_file = %cli_args.config_file.display());

    let mut config = match WorkerConfig::load(&cli_args.config_file) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(node_id) = cli_args.node_id {
        config.node_id = node_id;
    }

    let store = match bootstrap_store(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!("failed to initialise task store after retries: {e}");
            std::process::exit(1);
        }
    };

    let registry = match retry_with_backoff("connect to registry", 10, Duration::from_secs(2), || {
        RedisNodeRegistry::connect(&config.registry.connection_url())
    })
    .await
    {
        Ok(r) => r,
        Err(e) => {
            error!("failed to initialise node registry after retries: {e}");
            std::process::exit(1);
        }
    };

    let queue = "tasks.normal";
    let bus = match retry_with_backoff("connect to bus", 10, Duration::from_secs(2), || {
        AmqpTaskBus::open_consumer(&config.bus.connection_url(), queue)
    })
    .await
    {
        Ok(b) => b,
        Err(e) => {
            error!("failed to initialise task bus after retries: {e}");
            std::process::exit(1);
        }
    };

    let gauges = match GaugeRegistry::new(&config.node_id) {
        Ok(g) => Arc::new(g),
        Err(e) => {
            error!("failed to construct metrics gauges: {e}");
            std::process::exit(1);
        }
    };

    let hostname = hostname_or_node_id(&config.node_id);

    let runtime = WorkerRuntime::new(
        config.node_id.clone(),
        hostname,
        config.total_cpu,
        config.total_memory,
        Duration::from_secs(config.heartbeat_interval_secs),
        Duration::from_secs(config.heartbeat_ttl_secs),
        Arc::new(store),
        Arc::new(registry),
        Arc::new(bus),
        Arc::new(StubExecutor::default()),
        gauges.clone(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let exporter_handle = tokio::spawn({
        let gauges = gauges.clone();
        let port = config.metrics_port;
        async move {
            if let Err(e) = metrics_exporter::serve(gauges, port).await {
                error!("metrics exporter stopped: {e}");
            }
        }
    });

    let run_handle = tokio::spawn(async move {
        runtime.run(shutdown_rx).await;
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping worker runtime");
    let _ = shutdown_tx.send(());

    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), run_handle).await {
        error!("worker runtime did not stop within timeout: {e}");
    }
    exporter_handle.abort();

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("worker shut down cleanly");
    Ok(())
}

async fn bootstrap_store(config: &WorkerConfig) -> Result<PgTaskStore> {
    let pool = retry_with_backoff("connect to store", 10, Duration::from_secs(2), || {
        PgPoolOptions::new().connect(&config.store.connection_url())
    })
    .await
    .context("connecting to task store")?;

    Ok(PgTaskStore::new(pool))
}

/// The worker names itself from `node.id`; there's no separate hostname
/// configuration key, so the declared identity doubles as the advertised
/// hostname.
fn hostname_or_node_id(node_id: &str) -> String {
    node_id.to_string()
}
