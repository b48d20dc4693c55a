use clap::Parser;

use crate::constants::{DEFAULT_INTERVAL, DEFAULT_LONG_RECORD_SECS};

/// Worker configuration. CLI flag > env var > default, exactly as tabulated in the external
/// interface contract.
///
/// Defaults are deployment-agnostic; there is no `docker-compose.yml` to match here, unlike the
/// Postgres/S3-backed harness services.
#[derive(Parser, Clone)]
pub struct WorkerConfig {
    /// Broker connection string.
    #[arg(long = "queue", short = 'q', env = "SENZING_AZURE_QUEUE_CONNECTION_STRING")]
    pub queue_connection_string: String,

    /// Queue (or topic/subscription) name to drain.
    #[arg(long, env = "SENZING_AZURE_QUEUE_NAME")]
    pub queue_name: String,

    /// Engine configuration JSON, handed to `EngineAdapter::init` verbatim.
    #[arg(long, env = "SENZING_ENGINE_CONFIGURATION_JSON")]
    pub engine_configuration_json: String,

    /// Worker threads to run concurrently. Unset or `0` means "derive from host CPU count".
    #[arg(long, env = "SENZING_THREADS_PER_PROCESS", default_value_t = 0)]
    pub threads_per_process: usize,

    /// Messages to keep prefetched ahead of the worker pool. Negative (`-1` sentinel, represented
    /// here as `None`) means "derive from `max_workers`".
    #[arg(long, env = "SENZING_PREFETCH")]
    pub prefetch: Option<i64>,

    /// Seconds after which an in-flight record is considered long-running.
    #[arg(long, env = "LONG_RECORD", default_value_t = DEFAULT_LONG_RECORD_SECS)]
    pub long_record_secs: u64,

    /// `tracing` level name (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, env = "SENZING_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Request `AFFECTED_ENTITIES` info back from the engine and print it to stdout.
    #[arg(long, short = 'i')]
    pub info: bool,

    /// Enable verbose engine-side logging at `init` time.
    #[arg(long = "debugTrace", short = 't')]
    pub debug_trace: bool,

    /// Processed-message count between rate-report log lines.
    #[arg(long, env = "SENZING_LOG_INTERVAL", default_value_t = DEFAULT_INTERVAL)]
    pub interval: u64,
}

/// `max_workers` / `prefetch` resolved from config + host CPU count, mirroring the source's
/// `SENZING_THREADS_PER_PROCESS` / `SENZING_PREFETCH` resolution:
///
/// - unset or `0` threads: `max_workers = cpu_count` (falling back to `1` if undetectable);
///   `prefetch = min(32, max_workers + 4)` unless overridden.
/// - explicit threads: `max_workers = threads`; `prefetch = max_workers` unless overridden.
pub struct ResolvedConcurrency {
    pub max_workers: usize,
    pub prefetch: usize,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::try_parse_from(["queue-worker"]).map_err(anyhow::Error::from)
    }

    pub fn long_record(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.long_record_secs)
    }

    pub fn resolve_concurrency(&self) -> ResolvedConcurrency {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let max_workers = if self.threads_per_process == 0 {
            cpu_count
        } else {
            self.threads_per_process
        };

        let prefetch = match self.prefetch {
            Some(p) if p >= 0 => p as usize,
            _ if self.threads_per_process == 0 => (max_workers + 4).min(32),
            _ => max_workers,
        };

        ResolvedConcurrency {
            max_workers,
            prefetch,
        }
    }
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("queue_connection_string", &"<redacted>")
            .field("queue_name", &self.queue_name)
            .field("engine_configuration_json", &"<redacted>")
            .field("threads_per_process", &self.threads_per_process)
            .field("prefetch", &self.prefetch)
            .field("long_record_secs", &self.long_record_secs)
            .field("log_level", &self.log_level)
            .field("info", &self.info)
            .field("debug_trace", &self.debug_trace)
            .field("interval", &self.interval)
            .finish()
    }
}
