use std::sync::Arc;
use std::time::{Duration, Instant};

use queue_worker_core::engine::EngineAdapter;
use queue_worker_core::pool::{Job, WorkerPool};
use queue_worker_core::record::Record;
use queue_worker_core::registry::Registry;
use queue_worker_core::{telemetry, Broker};
use tokio::sync::watch;

use crate::constants::{ACK_BATCH_SIZE, ADMISSION_BACKOFF, DRAIN_WAIT, FETCH_WAIT, HOUSEKEEPING_FRACTION};

pub struct CoordinatorConfig {
    pub max_workers: usize,
    pub prefetch: usize,
    pub long_record: Duration,
    pub interval: u64,
    pub with_info: bool,
    pub shutdown_deadline: Duration,
}

/// Drives the fetch -> dispatch -> drain -> ack/dead-letter loop.
///
/// Only this task touches the registry and calls `broker.ack`/`dead_letter`/`renew`/`fetch`; the
/// worker pool's tasks only ever talk to the engine and report back over the completion channel.
pub struct Coordinator {
    broker: Arc<dyn Broker>,
    engine: Arc<dyn EngineAdapter>,
    pool: WorkerPool,
    registry: Registry,
    counters: telemetry::Counters,
    cfg: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(broker: Arc<dyn Broker>, engine: Arc<dyn EngineAdapter>, cfg: CoordinatorConfig) -> Self {
        let mut registry = Registry::new();
        let completions = registry.completion_sender();
        let pool = WorkerPool::new(cfg.max_workers, cfg.max_workers + cfg.prefetch, engine.clone(), completions);
        let counters = telemetry::Counters::new(Instant::now());

        Self {
            broker,
            engine,
            pool,
            registry,
            counters,
            cfg,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        telemetry::log_started(self.cfg.max_workers, self.cfg.prefetch, "<redacted>");

        loop {
            if *shutdown.borrow() {
                return self.shutdown().await;
            }

            self.drain_and_ack().await?;

            if *shutdown.borrow() {
                return self.shutdown().await;
            }

            self.housekeeping().await?;
            self.admit().await?;
        }
    }

    /// Drain everything the pool has finished and ack/dead-letter it. Exposed `pub` so the full
    /// loop can be driven step by step in tests without a CLI/process boundary.
    pub async fn drain_and_ack(&mut self) -> anyhow::Result<()> {
        if self.registry.is_empty() {
            return Ok(());
        }

        let completed = self.registry.drain_completed(DRAIN_WAIT).await;
        if completed.is_empty() {
            return Ok(());
        }

        let mut to_ack = Vec::new();

        for item in completed {
            self.counters.messages_processed += 1;

            match item.outcome {
                Ok(info) => {
                    if self.cfg.with_info {
                        if let Some(info) = info {
                            println!("{info}");
                        }
                    }
                    to_ack.push(item.entry.handle);
                }
                Err(err) if err.is_permanent() => {
                    if let Err(dl_err) = self.broker.dead_letter(&item.entry.handle).await {
                        tracing::warn!(
                            event = "queue_worker.message.dead_letter_failed",
                            handle = %item.entry.handle,
                            error = %dl_err,
                            "failed to dead-letter message"
                        );
                    }
                    to_ack.push(item.entry.handle);
                }
                Err(err) => {
                    tracing::warn!(
                        event = "queue_worker.message.transient_failure",
                        handle = %item.entry.handle,
                        kind = err.kind(),
                        error = %err,
                        "transient processing failure; leaving lease to expire"
                    );
                }
            }

            if to_ack.len() >= ACK_BATCH_SIZE {
                self.flush_acks(&mut to_ack).await;
            }

            if self.cfg.interval > 0 && self.counters.messages_processed % self.cfg.interval == 0 {
                let now = Instant::now();
                let elapsed = now.duration_since(self.counters.prev_time);
                telemetry::log_rate(self.cfg.interval, telemetry::rate_per_second(self.cfg.interval, elapsed));
                self.counters.prev_time = now;
            }
        }

        self.flush_acks(&mut to_ack).await;
        Ok(())
    }

    async fn flush_acks(&self, handles: &mut Vec<queue_worker_core::broker::Handle>) {
        for handle in handles.drain(..) {
            if let Err(err) = self.broker.ack(&handle).await {
                tracing::warn!(
                    event = "queue_worker.message.ack_failed",
                    handle = %handle,
                    error = %err,
                    "failed to ack message"
                );
            }
        }
    }

    async fn housekeeping(&mut self) -> anyhow::Result<()> {
        let housekeeping_interval = self.cfg.long_record / HOUSEKEEPING_FRACTION;
        let now = Instant::now();
        if now.duration_since(self.counters.log_check_time) < housekeeping_interval {
            return Ok(());
        }
        self.counters.log_check_time = now;

        match self.engine.stats().await {
            Ok(stats) => telemetry::log_stats(&stats),
            Err(err) => {
                tracing::warn!(
                    event = "queue_worker.engine.stats_failed",
                    error = %err,
                    "failed to collect engine stats"
                );
            }
        }

        let stuck = self.registry.scan_stuck(self.cfg.long_record);
        if stuck.len() >= self.cfg.max_workers && self.registry.size() >= self.cfg.max_workers {
            telemetry::log_all_stuck(self.cfg.max_workers);
        }

        for token in stuck {
            let Some(entry) = self.registry.entry(token) else {
                continue;
            };
            if let Err(err) = self.broker.renew(&entry.handle).await {
                tracing::warn!(
                    event = "queue_worker.message.renew_failed",
                    handle = %entry.handle,
                    error = %err,
                    "failed to renew lease on long-running record"
                );
                continue;
            }
            let elapsed_minutes = now.duration_since(entry.start_time).as_secs_f64() / 60.0;
            let payload = entry.payload.clone();
            let (data_source, record_id) = identifiers(&payload);
            telemetry::log_extended(&data_source, &record_id, elapsed_minutes, entry.extensions + 1);
            self.registry.mark_extended(token);
        }

        Ok(())
    }

    /// Top up the registry from the broker, up to `max_workers + prefetch` outstanding.
    pub async fn admit(&mut self) -> anyhow::Result<()> {
        let capacity = self.cfg.max_workers + self.cfg.prefetch;
        if self.registry.size() >= capacity {
            tokio::time::sleep(ADMISSION_BACKOFF).await;
            return Ok(());
        }

        let budget = capacity - self.registry.size();
        let deliveries = self.broker.fetch(budget, FETCH_WAIT).await?;

        if deliveries.is_empty() {
            if self.registry.is_empty() {
                self.broker.recycle().await?;
            }
            tokio::time::sleep(ADMISSION_BACKOFF).await;
            return Ok(());
        }

        for delivery in deliveries {
            let record = match Record::parse(&delivery.payload) {
                Ok(record) => record,
                Err(err) => {
                    // Transient per-message error: not acked, not dead-lettered; the lease is left
                    // to expire and the broker will redeliver it.
                    tracing::warn!(
                        event = "queue_worker.message.parse_failed",
                        handle = %delivery.handle,
                        error = %err,
                        "malformed record; leaving lease to expire"
                    );
                    continue;
                }
            };

            let token = self.registry.reserve_token();
            self.registry.insert(token, delivery.handle, record.raw.clone());
            self.pool
                .submit(Job {
                    token,
                    record,
                    with_info: self.cfg.with_info,
                })
                .await?;
        }

        Ok(())
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        let now = Instant::now();
        let mut had_outstanding = false;
        for (_, entry) in self.registry.outstanding() {
            had_outstanding = true;
            let elapsed_minutes = now.duration_since(entry.start_time).as_secs_f64() / 60.0;
            let (data_source, record_id) = identifiers(&entry.payload);
            telemetry::log_still_processing(&data_source, &record_id, elapsed_minutes);
        }

        self.pool.shutdown(self.cfg.shutdown_deadline).await;

        if let Err(err) = self.engine.close().await {
            tracing::warn!(
                event = "queue_worker.engine.close_failed",
                error = %err,
                "failed to close engine"
            );
        }

        if had_outstanding {
            anyhow::bail!("shut down with outstanding in-flight records");
        }
        Ok(())
    }
}

fn identifiers(raw: &str) -> (String, String) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => (
            value.get("DATA_SOURCE").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
            value.get("RECORD_ID").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
        ),
        Err(_) => ("?".to_string(), "?".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use queue_worker_core::broker::{Delivery, Handle};
    use queue_worker_core::engine::{EngineError, FixtureEngine};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeBroker {
        pending: Mutex<Vec<Delivery>>,
        acked: Mutex<Vec<Handle>>,
        dead_lettered: Mutex<Vec<Handle>>,
        fetch_calls: AtomicUsize,
    }

    impl FakeBroker {
        fn with_messages(messages: Vec<(&str, &str, &str)>) -> Self {
            let pending = messages
                .into_iter()
                .map(|(handle, ds, rid)| Delivery {
                    handle: Handle(handle.to_string()),
                    payload: format!(r#"{{"DATA_SOURCE":"{ds}","RECORD_ID":"{rid}"}}"#),
                })
                .collect();
            Self {
                pending: Mutex::new(pending),
                acked: Mutex::new(Vec::new()),
                dead_lettered: Mutex::new(Vec::new()),
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn fetch(&self, max: usize, _wait: Duration) -> anyhow::Result<Vec<Delivery>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let mut pending = self.pending.lock().unwrap();
            let take = max.min(pending.len());
            Ok(pending.drain(0..take).collect())
        }

        async fn ack(&self, handle: &Handle) -> anyhow::Result<()> {
            self.acked.lock().unwrap().push(handle.clone());
            Ok(())
        }

        async fn dead_letter(&self, handle: &Handle) -> anyhow::Result<()> {
            self.dead_lettered.lock().unwrap().push(handle.clone());
            Ok(())
        }

        async fn renew(&self, _handle: &Handle) -> anyhow::Result<()> {
            Ok(())
        }

        async fn recycle(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn drains_and_acks_successful_records() {
        let broker = Arc::new(FakeBroker::with_messages(vec![("h1", "A", "1"), ("h2", "A", "2")]));
        let engine: Arc<dyn EngineAdapter> = Arc::new(FixtureEngine::new("test"));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let broker_dyn: Arc<dyn Broker> = broker.clone();

        let mut coordinator = Coordinator::new(
            broker_dyn,
            engine,
            CoordinatorConfig {
                max_workers: 2,
                prefetch: 2,
                long_record: Duration::from_secs(300),
                interval: 10_000,
                with_info: false,
                shutdown_deadline: Duration::from_secs(5),
            },
        );

        coordinator.admit().await.unwrap();
        assert_eq!(coordinator.registry.size(), 2);

        let mut acked = 0;
        while acked < 2 {
            coordinator.drain_and_ack().await.unwrap();
            acked = broker.acked.lock().unwrap().len();
        }

        assert_eq!(broker.acked.lock().unwrap().len(), 2);
        assert!(broker.dead_lettered.lock().unwrap().is_empty());

        let _ = shutdown_rx;
    }

    #[tokio::test]
    async fn permanent_engine_errors_are_dead_lettered_then_acked() {
        let broker = Arc::new(FakeBroker::with_messages(vec![]));
        let engine: Arc<dyn EngineAdapter> = Arc::new(FixtureEngine::new("test"));
        let broker_dyn: Arc<dyn Broker> = broker.clone();

        let mut coordinator = Coordinator::new(
            broker_dyn,
            engine,
            CoordinatorConfig {
                max_workers: 1,
                prefetch: 1,
                long_record: Duration::from_secs(300),
                interval: 10_000,
                with_info: false,
                shutdown_deadline: Duration::from_secs(5),
            },
        );

        let token = coordinator.registry.reserve_token();
        coordinator.registry.insert(
            token,
            Handle("h-bad".into()),
            r#"{"DATA_SOURCE":"A","RECORD_ID":"1"}"#.into(),
        );
        coordinator
            .registry
            .completion_sender()
            .send(token, Err(EngineError::BadInput(anyhow::anyhow!("bad"))));

        coordinator.drain_and_ack().await.unwrap();

        assert_eq!(broker.dead_lettered.lock().unwrap().len(), 1);
        assert_eq!(broker.acked.lock().unwrap().len(), 1);
    }

    #[test]
    fn identifiers_falls_back_on_malformed_payload() {
        let (ds, rid) = identifiers("not json");
        assert_eq!(ds, "?");
        assert_eq!(rid, "?");
    }
}
