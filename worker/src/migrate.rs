use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::config::WorkerConfig;

pub async fn run(cfg: &WorkerConfig) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.queue_connection_string)
        .await
        .context("connect queue db")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("migrate queue db")?;

    tracing::info!(event = "queue_worker.migrate.complete", "migrations complete");
    Ok(())
}
