use anyhow::Context;
use async_trait::async_trait;
use queue_worker_core::{Broker, Delivery, Handle};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::constants::{DEFAULT_VISIBILITY_TIMEOUT_SECS, LEASE_RENEWER_POLL, MAX_LOCK_RENEWAL_DURATION_SECS};

/// Postgres-backed [`Broker`], extending the `FOR UPDATE SKIP LOCKED` leasing pattern with a
/// dead-letter table, a manual `renew`, a `recycle` operation, and a background auto-renewer.
///
/// Message handles are the message's UUID as a string; `recycle` invalidates them by abandoning
/// this struct's own tracking (a fresh `PgBroker` is the caller's "new receiver").
pub struct PgBroker {
    pool: PgPool,
    queue_name: String,
    visibility: Duration,
    renewer_shutdown: watch::Sender<bool>,
}

impl PgBroker {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Arc<Self> {
        let (renewer_shutdown, _rx) = watch::channel(false);
        Arc::new(Self {
            pool,
            queue_name: queue_name.into(),
            visibility: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            renewer_shutdown,
        })
    }

    /// Publish one record message (used by the `enqueue` subcommand).
    pub async fn publish(&self, payload: &str) -> anyhow::Result<Uuid> {
        let message_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO queue.messages (message_id, queue_name, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(message_id)
        .bind(&self.queue_name)
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("publish to queue={}", self.queue_name))?;

        Ok(message_id)
    }

    /// Spawn the background lease-renewer that keeps every outstanding handle alive up to
    /// `MAX_LOCK_RENEWAL_DURATION_SECS`, independent of the coordinator's own manual renew calls
    /// (belt-and-suspenders; see DESIGN.md).
    pub fn spawn_lease_renewer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let broker = Arc::clone(self);
        let mut shutdown = broker.renewer_shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(LEASE_RENEWER_POLL) => {
                        if let Err(err) = broker.renew_all_outstanding().await {
                            tracing::warn!(
                                event = "queue_worker.broker.auto_renew_failed",
                                error = %err,
                                "background lease renewal failed"
                            );
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown_lease_renewer(&self) {
        let _ = self.renewer_shutdown.send(true);
    }

    async fn renew_all_outstanding(&self) -> anyhow::Result<()> {
        let visibility_millis = duration_millis(self.visibility);
        let max_age_secs = MAX_LOCK_RENEWAL_DURATION_SECS as i64;
        sqlx::query(
            r#"
            UPDATE queue.messages
            SET invisible_until = now() + ($2::text || ' milliseconds')::interval
            WHERE queue_name = $1
              AND invisible_until IS NOT NULL
              AND invisible_until > now()
              AND created_at > now() - ($3::text || ' seconds')::interval
            "#,
        )
        .bind(&self.queue_name)
        .bind(visibility_millis)
        .bind(max_age_secs)
        .execute(&self.pool)
        .await
        .context("renew all outstanding leases")?;

        Ok(())
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn fetch(&self, max: usize, wait: Duration) -> anyhow::Result<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        let visibility_millis = duration_millis(self.visibility);

        loop {
            let rows = sqlx::query(
                r#"
                WITH picked AS (
                  SELECT message_id
                  FROM queue.messages
                  WHERE queue_name = $1
                    AND (invisible_until IS NULL OR invisible_until <= now())
                  ORDER BY created_at
                  LIMIT $2
                  FOR UPDATE SKIP LOCKED
                )
                UPDATE queue.messages AS m
                SET invisible_until = now() + ($3::text || ' milliseconds')::interval,
                    deliveries = deliveries + 1
                FROM picked
                WHERE m.message_id = picked.message_id
                RETURNING m.message_id, m.payload
                "#,
            )
            .bind(&self.queue_name)
            .bind(max as i64)
            .bind(visibility_millis)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("fetch from queue={}", self.queue_name))?;

            if !rows.is_empty() || tokio::time::Instant::now() >= deadline {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    let message_id: Uuid = row.try_get("message_id")?;
                    let payload: String = row.try_get("payload")?;
                    out.push(Delivery {
                        handle: Handle(message_id.to_string()),
                        payload,
                    });
                }
                return Ok(out);
            }

            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn ack(&self, handle: &Handle) -> anyhow::Result<()> {
        let message_id = parse_handle(handle)?;
        sqlx::query("DELETE FROM queue.messages WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .context("ack")?;
        Ok(())
    }

    async fn dead_letter(&self, handle: &Handle) -> anyhow::Result<()> {
        let message_id = parse_handle(handle)?;
        let mut tx = self.pool.begin().await.context("begin dead_letter tx")?;

        let row = sqlx::query(
            "SELECT queue_name, payload, deliveries FROM queue.messages WHERE message_id = $1 FOR UPDATE",
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await
        .context("select for dead_letter")?;

        let Some(row) = row else {
            // Already gone (acked, or a stale handle post-recycle); nothing to do.
            return Ok(());
        };

        let queue_name: String = row.try_get("queue_name")?;
        let payload: String = row.try_get("payload")?;
        let deliveries: i32 = row.try_get("deliveries")?;

        sqlx::query(
            r#"
            INSERT INTO queue.dead_letters (message_id, queue_name, payload, deliveries)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(&queue_name)
        .bind(&payload)
        .bind(deliveries)
        .execute(&mut *tx)
        .await
        .context("insert dead_letter")?;

        sqlx::query("DELETE FROM queue.messages WHERE message_id = $1")
            .bind(message_id)
            .execute(&mut *tx)
            .await
            .context("delete dead_lettered message")?;

        tx.commit().await.context("commit dead_letter tx")?;
        Ok(())
    }

    async fn renew(&self, handle: &Handle) -> anyhow::Result<()> {
        let message_id = parse_handle(handle)?;
        let visibility_millis = duration_millis(self.visibility);
        sqlx::query(
            r#"
            UPDATE queue.messages
            SET invisible_until = now() + ($2::text || ' milliseconds')::interval
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .bind(visibility_millis)
        .execute(&self.pool)
        .await
        .context("renew")?;
        Ok(())
    }

    async fn recycle(&self) -> anyhow::Result<()> {
        // A fresh receiver over the same (pool, queue_name) has no local state to discard; the
        // lease rows themselves are the source of truth, so recycling is a no-op here. A real
        // message-broker SDK (Azure Service Bus, SQS) would reconnect its client here.
        Ok(())
    }
}

fn parse_handle(handle: &Handle) -> anyhow::Result<Uuid> {
    Uuid::parse_str(&handle.0).with_context(|| format!("parse handle {handle} as uuid"))
}

fn duration_millis(d: Duration) -> i64 {
    let ms = d.as_millis();
    if ms > i64::MAX as u128 {
        i64::MAX
    } else {
        ms as i64
    }
}
