use crate::record::Record;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Failure classification returned by [`EngineAdapter::process`].
///
/// `BadInput` and `RetryTimeoutExceeded` are permanent for this delivery (the coordinator
/// dead-letters and acks); `Other` is transient (the coordinator leaves the handle alone and lets
/// the broker lease expire).
#[derive(Debug)]
pub enum EngineError {
    BadInput(anyhow::Error),
    RetryTimeoutExceeded(anyhow::Error),
    Other(anyhow::Error),
}

impl EngineError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, EngineError::BadInput(_) | EngineError::RetryTimeoutExceeded(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::BadInput(_) => "bad_input",
            EngineError::RetryTimeoutExceeded(_) => "retry_timeout_exceeded",
            EngineError::Other(_) => "other",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::BadInput(e) => write!(f, "bad input: {e:#}"),
            EngineError::RetryTimeoutExceeded(e) => write!(f, "retry timeout exceeded: {e:#}"),
            EngineError::Other(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::BadInput(e) | EngineError::RetryTimeoutExceeded(e) | EngineError::Other(e) => {
                e.source()
            }
        }
    }
}

/// Wraps the entity-resolution engine: a synchronous, possibly-minutes-long `add_record` call and
/// a `stats` dump. The engine itself is an opaque external dependency; this trait is the seam.
///
/// Implementations are shared across all workers — callable in parallel up to `max_workers` is an
/// assumption this repo makes about the wrapped engine, not something it can verify.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn process(&self, record: &Record, with_info: bool) -> Result<Option<String>, EngineError>;

    async fn stats(&self) -> anyhow::Result<String>;

    /// Release any resources held by the engine. Called once, at coordinator shutdown.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run a blocking engine call on the blocking thread pool, keeping synchronous native calls off
/// the async executor's worker threads.
///
/// A panic inside `f` is caught at the `JoinError` boundary and classified `Other` (transient) —
/// it must never propagate out of a worker task and poison the pool.
pub async fn run_blocking<F, T>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(EngineError::Other(anyhow::anyhow!(
            "engine call panicked: {join_err}"
        ))),
    }
}

/// Deterministic in-memory stand-in for the real entity-resolution engine.
///
/// The real engine is an opaque, closed-source native library outside this repo's scope; this
/// fixture lets the coordinator loop, registry, and pool be exercised end to end without it.
/// Callers can steer its behavior per-record via two optional fields that are never forwarded to
/// a real engine and have no effect on `raw`/`Record::parse`:
///
/// - `"SIMULATE_OUTCOME"`: `"bad_input"` | `"retry_timeout"` | `"error"` (anything else: success).
/// - `"SIMULATE_SLEEP_MS"`: blocks the call for this many milliseconds before returning, to
///   exercise long-running-record behavior.
pub struct FixtureEngine {
    instance_name: String,
}

impl FixtureEngine {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
        }
    }

    /// Mirrors the engine's `init(instance_name, config_json, verbose_logging) -> ok | fatal`
    /// contract. A real binding would hand `config_json` to the native library here; the fixture
    /// only checks that it parses, since an engine-init failure is fatal to startup and callers
    /// need *some* way to exercise that path without a real engine.
    pub fn init(instance_name: &str, config_json: &str, verbose_logging: bool) -> anyhow::Result<Self> {
        use anyhow::Context;

        serde_json::from_str::<serde_json::Value>(config_json)
            .context("parse engine configuration json")?;

        if verbose_logging {
            tracing::debug!(
                event = "queue_worker.engine.init",
                instance_name,
                "engine initialized with verbose logging"
            );
        }

        Ok(Self::new(instance_name))
    }
}

#[async_trait]
impl EngineAdapter for FixtureEngine {
    async fn process(&self, record: &Record, with_info: bool) -> Result<Option<String>, EngineError> {
        let raw = record.raw.clone();
        let data_source = record.data_source.clone();
        let record_id = record.record_id.clone();

        run_blocking(move || {
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|err| EngineError::BadInput(anyhow::Error::new(err)))?;

            if let Some(sleep_ms) = value.get("SIMULATE_SLEEP_MS").and_then(|v| v.as_u64()) {
                std::thread::sleep(Duration::from_millis(sleep_ms));
            }

            match value.get("SIMULATE_OUTCOME").and_then(|v| v.as_str()) {
                Some("bad_input") => {
                    return Err(EngineError::BadInput(anyhow::anyhow!(
                        "simulated bad input for {data_source}:{record_id}"
                    )))
                }
                Some("retry_timeout") => {
                    return Err(EngineError::RetryTimeoutExceeded(anyhow::anyhow!(
                        "simulated retry timeout for {data_source}:{record_id}"
                    )))
                }
                Some("error") => {
                    return Err(EngineError::Other(anyhow::anyhow!(
                        "simulated transient error for {data_source}:{record_id}"
                    )))
                }
                _ => {}
            }

            if with_info {
                Ok(Some(
                    serde_json::json!({
                        "DATA_SOURCE": data_source,
                        "RECORD_ID": record_id,
                        "AFFECTED_ENTITIES": [],
                    })
                    .to_string(),
                ))
            } else {
                Ok(None)
            }
        })
        .await
    }

    async fn stats(&self) -> anyhow::Result<String> {
        Ok(format!("{{\"instance\":\"{}\",\"workload\":\"fixture\"}}", self.instance_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(body: &str) -> Record {
        Record::parse(body).expect("parse")
    }

    #[test]
    fn init_rejects_malformed_configuration_json() {
        assert!(FixtureEngine::init("test", "not json", false).is_err());
    }

    #[test]
    fn init_accepts_well_formed_configuration_json() {
        assert!(FixtureEngine::init("test", "{}", true).is_ok());
    }

    #[tokio::test]
    async fn default_outcome_is_success_with_no_info() {
        let engine = FixtureEngine::new("test");
        let r = rec(r#"{"DATA_SOURCE":"A","RECORD_ID":"1"}"#);
        let out = engine.process(&r, false).await.expect("ok");
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn with_info_returns_payload() {
        let engine = FixtureEngine::new("test");
        let r = rec(r#"{"DATA_SOURCE":"A","RECORD_ID":"1"}"#);
        let out = engine.process(&r, true).await.expect("ok");
        assert!(out.unwrap().contains("RECORD_ID"));
    }

    #[tokio::test]
    async fn simulated_bad_input_is_permanent() {
        let engine = FixtureEngine::new("test");
        let r = rec(r#"{"DATA_SOURCE":"A","RECORD_ID":"1","SIMULATE_OUTCOME":"bad_input"}"#);
        let err = engine.process(&r, false).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(err.kind(), "bad_input");
    }

    #[tokio::test]
    async fn simulated_retry_timeout_is_permanent() {
        let engine = FixtureEngine::new("test");
        let r = rec(r#"{"DATA_SOURCE":"A","RECORD_ID":"1","SIMULATE_OUTCOME":"retry_timeout"}"#);
        let err = engine.process(&r, false).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn simulated_error_is_transient() {
        let engine = FixtureEngine::new("test");
        let r = rec(r#"{"DATA_SOURCE":"A","RECORD_ID":"1","SIMULATE_OUTCOME":"error"}"#);
        let err = engine.process(&r, false).await.unwrap_err();
        assert!(!err.is_permanent());
    }
}
