use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use queue_worker_core::broker::{Delivery, Handle};
use queue_worker_core::engine::FixtureEngine;
use queue_worker_core::Broker;
use queue_worker::coordinator::{Coordinator, CoordinatorConfig};
use tokio::sync::watch;

/// In-memory stand-in for the broker, exercising the full fetch -> dispatch -> drain -> ack loop
/// without a live Postgres instance.
struct FakeBroker {
    pending: Mutex<Vec<Delivery>>,
    acked: Mutex<Vec<Handle>>,
    dead_lettered: Mutex<Vec<Handle>>,
}

impl FakeBroker {
    fn with_messages(messages: Vec<(&str, &str)>) -> Self {
        let pending = messages
            .into_iter()
            .enumerate()
            .map(|(i, (data_source, record_id))| Delivery {
                handle: Handle(format!("h{i}")),
                payload: format!(r#"{{"DATA_SOURCE":"{data_source}","RECORD_ID":"{record_id}"}}"#),
            })
            .collect();
        Self {
            pending: Mutex::new(pending),
            acked: Mutex::new(Vec::new()),
            dead_lettered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn fetch(&self, max: usize, _wait: Duration) -> anyhow::Result<Vec<Delivery>> {
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
async fn drains_a_full_batch_of_records_to_completion() -> anyhow::Result<()> {
    let messages: Vec<(&str, &str)> = (0..20).map(|_| ("A", "1")).collect();
    let broker = Arc::new(FakeBroker::with_messages(messages));
    let broker_dyn: Arc<dyn Broker> = broker.clone();
    let engine = Arc::new(FixtureEngine::new("integration-test"));

    let mut coordinator = Coordinator::new(
        broker_dyn,
        engine,
        CoordinatorConfig {
            max_workers: 4,
            prefetch: 4,
            long_record: Duration::from_secs(300),
            interval: 10_000,
            with_info: false,
            shutdown_deadline: Duration::from_secs(5),
        },
    );

    // Drive the coordinator's internal steps directly (no CLI/process boundary) until every
    // published message has been acked.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        coordinator.admit().await?;
        coordinator.drain_and_ack().await?;

        let acked = broker.acked.lock().unwrap().len();
        if acked == 20 {
            break;
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "did not drain all messages within the deadline, acked={acked}"
        );
    }

    anyhow::ensure!(broker.dead_lettered.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn shuts_down_cleanly_with_no_outstanding_work() -> anyhow::Result<()> {
    let broker = Arc::new(FakeBroker::with_messages(vec![]));
    let broker_dyn: Arc<dyn Broker> = broker.clone();
    let engine = Arc::new(FixtureEngine::new("integration-test"));

    let coordinator = Coordinator::new(
        broker_dyn,
        engine,
        CoordinatorConfig {
            max_workers: 2,
            prefetch: 2,
            long_record: Duration::from_secs(300),
            interval: 10_000,
            with_info: false,
            shutdown_deadline: Duration::from_secs(1),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(true);
    let _ = shutdown_tx;
    coordinator.run(shutdown_rx).await
}
