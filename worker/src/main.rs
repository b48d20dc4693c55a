use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use queue_worker_core::engine::{EngineAdapter, FixtureEngine};
use queue_worker_core::Broker;

use queue_worker::broker_pg::PgBroker;
use queue_worker::config::WorkerConfig;
use queue_worker::coordinator::{Coordinator, CoordinatorConfig};
use queue_worker::{enqueue, migrate};

#[derive(Parser, Debug)]
#[command(name = "queue-worker")]
#[command(about = "Drains a queue of record-ingest messages into an entity-resolution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the queue + dead-letter schema migrations.
    Migrate,

    /// Publish one record message for manual testing.
    Enqueue {
        #[arg(long)]
        data_source: String,
        #[arg(long)]
        record_id: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Run the consumer loop.
    Run,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("invalid configuration: {err:#}");
            std::process::exit(255);
        }
    };

    init_tracing(&cfg.log_level);
    tracing::debug!(event = "queue_worker.config.loaded", config = ?cfg, "configuration loaded");

    let result = match cli.command {
        Command::Migrate => migrate::run(&cfg).await,
        Command::Enqueue {
            data_source,
            record_id,
            payload,
        } => enqueue::run(&cfg, &data_source, &record_id, &payload).await,
        Command::Run => run(&cfg).await,
    };

    if let Err(err) = result {
        tracing::error!(event = "queue_worker.fatal", error = %err, "worker exited with error");
        std::process::exit(255);
    }

    Ok(())
}

async fn run(cfg: &WorkerConfig) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.queue_connection_string)
        .await
        .context("connect queue db")?;

    let broker = PgBroker::new(pool, &cfg.queue_name);
    let renewer = broker.spawn_lease_renewer();

    let engine: Arc<dyn EngineAdapter> =
        match FixtureEngine::init("queue-worker", &cfg.engine_configuration_json, cfg.debug_trace) {
            Ok(engine) => Arc::new(engine),
            Err(err) => {
                tracing::error!(event = "queue_worker.engine.init_failed", error = %err, "engine init failed");
                std::process::exit(255);
            }
        };

    let broker_dyn: Arc<dyn Broker> = broker.clone();

    let resolved = cfg.resolve_concurrency();
    let coordinator = Coordinator::new(
        broker_dyn,
        engine,
        CoordinatorConfig {
            max_workers: resolved.max_workers,
            prefetch: resolved.prefetch,
            long_record: cfg.long_record(),
            interval: cfg.interval,
            with_info: cfg.info,
            shutdown_deadline: Duration::from_secs(30),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(event = "queue_worker.shutdown.signal", "shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let result = coordinator.run(shutdown_rx).await;

    broker.shutdown_lease_renewer();
    renewer.abort();

    result
}
