use crate::engine::EngineAdapter;
use crate::record::Record;
use crate::registry::{CompletionSender, Token};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// One unit of dispatched work.
pub struct Job {
    pub token: Token,
    pub record: Record,
    pub with_info: bool,
}

/// Fixed-size pool of worker tasks running [`EngineAdapter::process`] concurrently.
///
/// Submitting work returns immediately once there is room in the pool's internal bounded
/// channel; the channel capacity is the `prefetch` share of the coordinator's fetch budget, since
/// up to `max_workers` jobs are pulled out for active processing at any moment.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        queue_capacity: usize,
        engine: Arc<dyn EngineAdapter>,
        completions: CompletionSender,
    ) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let rx = rx.clone();
            let engine = engine.clone();
            let completions = completions.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };

                    let outcome = engine.process(&job.record, job.with_info).await;
                    completions.send(job.token, outcome);
                }
            }));
        }

        Self { tx, workers }
    }

    /// Hand work to the pool. Blocks only if every worker is busy and the internal channel is
    /// already full up to its `queue_capacity`.
    pub async fn submit(&self, job: Job) -> anyhow::Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("worker pool is shut down"))
    }

    /// Stop accepting new work and wait for in-flight work to finish, up to `deadline`. Stragglers
    /// past the deadline are abandoned, not forcibly aborted — cancellation never interrupts an
    /// in-flight engine call.
    pub async fn shutdown(self, deadline: Duration) {
        drop(self.tx);

        let join_all = async {
            for handle in self.workers {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(deadline, join_all).await.is_err() {
            tracing::warn!(
                event = "queue_worker.pool.shutdown_timeout",
                "worker pool did not drain within the shutdown deadline; abandoning stragglers"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FixtureEngine;
    use crate::registry::Registry;

    #[tokio::test]
    async fn submitted_jobs_complete_and_report_back() {
        let mut registry = Registry::new();
        let completions = registry.completion_sender();
        let engine: Arc<dyn EngineAdapter> = Arc::new(FixtureEngine::new("test"));
        let pool = WorkerPool::new(2, 4, engine, completions);

        for i in 0..5u64 {
            let token = registry.reserve_token();
            let record = Record::parse(&format!(
                r#"{{"DATA_SOURCE":"A","RECORD_ID":"{i}"}}"#
            ))
            .unwrap();
            registry.insert(
                token,
                crate::broker::Handle(format!("h{i}")),
                record.raw.clone(),
            );
            pool.submit(Job {
                token,
                record,
                with_info: false,
            })
            .await
            .unwrap();
        }

        let mut seen = 0;
        while seen < 5 {
            let completed = registry.drain_completed(Duration::from_secs(5)).await;
            seen += completed.len();
        }
        assert_eq!(seen, 5);

        pool.shutdown(Duration::from_secs(5)).await;
    }
}
