use crate::broker::Handle;
use crate::engine::EngineError;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub type Token = u64;
pub type ProcessOutcome = Result<Option<String>, EngineError>;

/// `(handle, raw_payload, start_time, extensions)` for one dispatched message.
#[derive(Debug)]
pub struct Entry {
    pub handle: Handle,
    pub payload: String,
    pub start_time: Instant,
    pub extensions: u32,
}

/// One finished unit of work, paired with the entry that had been tracking it.
pub struct Completed {
    pub token: Token,
    pub entry: Entry,
    pub outcome: ProcessOutcome,
}

/// Sending half of the registry's completion channel. Cloned into every worker task; workers
/// report results here instead of touching the registry directly — the registry is mutated from
/// one place only, the coordinator's own task.
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<(Token, ProcessOutcome)>,
}

impl CompletionSender {
    pub fn send(&self, token: Token, outcome: ProcessOutcome) {
        // The registry outlives every worker for the life of a run; a send failure only happens
        // after the coordinator has already torn the registry down, so there's nothing to do.
        let _ = self.tx.send((token, outcome));
    }
}

/// In-flight work tracked by the coordinator.
///
/// `|registry| <= max_workers + prefetch` is enforced by the coordinator's fetch admission logic,
/// not by the registry itself — the registry just tracks whatever it's told to.
pub struct Registry {
    entries: HashMap<Token, Entry>,
    next_token: Token,
    completion_rx: mpsc::UnboundedReceiver<(Token, ProcessOutcome)>,
    completion_tx: mpsc::UnboundedSender<(Token, ProcessOutcome)>,
}

impl Registry {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            entries: HashMap::new(),
            next_token: 0,
            completion_rx: rx,
            completion_tx: tx,
        }
    }

    pub fn completion_sender(&self) -> CompletionSender {
        CompletionSender {
            tx: self.completion_tx.clone(),
        }
    }

    /// Reserve the next dispatch token. Callers must `insert` once the corresponding work has
    /// actually been handed to the worker pool.
    pub fn reserve_token(&mut self) -> Token {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    pub fn insert(&mut self, token: Token, handle: Handle, payload: String) {
        self.entries.insert(
            token,
            Entry {
                handle,
                payload,
                start_time: Instant::now(),
                extensions: 0,
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Block until at least one task completes or `wait` elapses; return everything that has
    /// completed. Entries are removed atomically with result retrieval, so a token is never
    /// observed twice.
    pub async fn drain_completed(&mut self, wait: Duration) -> Vec<Completed> {
        let mut out = Vec::new();

        match tokio::time::timeout(wait, self.completion_rx.recv()).await {
            Ok(Some((token, outcome))) => {
                if let Some(entry) = self.entries.remove(&token) {
                    out.push(Completed {
                        token,
                        entry,
                        outcome,
                    });
                }
            }
            Ok(None) | Err(_) => return out,
        }

        while let Ok((token, outcome)) = self.completion_rx.try_recv() {
            if let Some(entry) = self.entries.remove(&token) {
                out.push(Completed {
                    token,
                    entry,
                    outcome,
                });
            }
        }

        out
    }

    pub fn mark_extended(&mut self, token: Token) {
        if let Some(entry) = self.entries.get_mut(&token) {
            entry.extensions += 1;
        }
    }

    /// Every token whose age exceeds `long_record * (extensions + 1)`.
    pub fn scan_stuck(&self, long_record: Duration) -> Vec<Token> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter_map(|(token, entry)| {
                let age = now.duration_since(entry.start_time);
                let threshold = long_record.saturating_mul(entry.extensions + 1);
                if age > threshold {
                    Some(*token)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn entry(&self, token: Token) -> Option<&Entry> {
        self.entries.get(&token)
    }

    /// Every entry still present, for shutdown reporting. Leaves the registry untouched — those
    /// handles are deliberately abandoned, not acked.
    pub fn outstanding(&self) -> impl Iterator<Item = (&Token, &Entry)> {
        self.entries.iter()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
