use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::broker_pg::PgBroker;
use crate::config::WorkerConfig;

/// Publish one record message directly into the queue. Exists purely to make manual testing
/// ergonomic: the worker can be run in one terminal and fed records from another without going
/// through the broker's own producer tooling.
pub async fn run(cfg: &WorkerConfig, data_source: &str, record_id: &str, payload: &str) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.queue_connection_string)
        .await
        .context("connect queue db")?;

    let mut body: serde_json::Value =
        serde_json::from_str(payload).context("payload must be a JSON object")?;
    let obj = body
        .as_object_mut()
        .context("payload must be a JSON object")?;
    obj.insert("DATA_SOURCE".to_string(), serde_json::Value::String(data_source.to_string()));
    obj.insert("RECORD_ID".to_string(), serde_json::Value::String(record_id.to_string()));

    let broker = PgBroker::new(pool, &cfg.queue_name);
    let message_id = broker.publish(&body.to_string()).await.context("publish record")?;

    println!("enqueued message_id={message_id}");
    Ok(())
}
