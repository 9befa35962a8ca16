//! Fog cluster scheduler.
//!
//! Wires the four adapters (task store, node registry, message bus,
//! metrics source), runs schema migration once, and drives the placement
//! engine until a shutdown signal arrives.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod placement;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scheduler_core::adapters::{AmqpTaskBus, PgTaskStore, PrometheusMetricsSource, RedisNodeRegistry};
use scheduler_core::config::SchedulerConfig;
use scheduler_core::supervisor::{retry_with_backoff, wait_for_shutdown_signal};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use placement::PlacementEngine;

#[derive(Parser, Debug)]
#[command(name = "scheduler")]
#[command(about = "Placement engine for the fog worker cluster", long_about = None)]
struct CliArgs {
    /// Path to the scheduler configuration file.
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the placement tick interval, in seconds.
    #[arg(long = "sched-interval")]
    sched_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "scheduler.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scheduler=info,scheduler_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!("fog scheduler starting up");
    info!(config_file = %cli_args.config_file.display());

    let mut config = match SchedulerConfig::load(&cli_args.config_file) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(secs) = cli_args.sched_interval {
        config.sched_interval_secs = secs;
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

    let bus = match retry_with_backoff("connect to bus", 10, Duration::from_secs(2), || {
        AmqpTaskBus::open(&config.bus.connection_url())
    })
    .await
    {
        Ok(b) => b,
        Err(e) => {
            error!("failed to initialise task bus after retries: {e}");
            std::process::exit(1);
        }
    };

    let metrics = match PrometheusMetricsSource::new(&config.metrics_url) {
        Ok(m) => m,
        Err(e) => {
            error!("failed to construct metrics client: {e}");
            std::process::exit(1);
        }
    };

    let engine = PlacementEngine::new(
        Arc::new(store),
        Arc::new(registry),
        Arc::new(metrics),
        Arc::new(bus),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);

    let run_handle = tokio::spawn({
        let interval = Duration::from_secs(config.sched_interval_secs);
        async move {
            engine.run(interval, shutdown_rx).await;
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping placement engine");
    let _ = shutdown_tx.send(());

    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), run_handle).await {
        error!("placement engine did not stop within timeout: {e}");
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("scheduler shut down cleanly");
    Ok(())
}

async fn bootstrap_store(config: &SchedulerConfig) -> Result<PgTaskStore> {
    let pool = retry_with_backoff("connect to store", 10, Duration::from_secs(2), || {
        PgPoolOptions::new().connect(&config.store.connection_url())
    })
    .await
    .context("connecting to task store")?;

    let store = PgTaskStore::new(pool);
    store.migrate().await.context("running task store migrations")?;
    Ok(store)
}
