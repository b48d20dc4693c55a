use std::time::{Duration, Instant};

/// Running counters for the rate-report loop: messages seen since the last report, and the
/// timestamps used to compute elapsed windows for both the rate line and the housekeeping tick.
pub struct Counters {
    pub messages_processed: u64,
    pub prev_time: Instant,
    pub log_check_time: Instant,
}

impl Counters {
    pub fn new(now: Instant) -> Self {
        Self {
            messages_processed: 0,
            prev_time: now,
            log_check_time: now,
        }
    }
}

/// `interval / elapsed`, in records/sec. `-1` mirrors the source's sentinel for a non-positive
/// elapsed window (a clock that hasn't advanced between two samples).
pub fn rate_per_second(interval: u64, elapsed: Duration) -> i64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (interval as f64 / secs) as i64
    } else {
        -1
    }
}

pub fn log_started(max_workers: usize, prefetch: usize, queue_url_redacted: &str) {
    tracing::info!(
        event = "queue_worker.coordinator.started",
        max_workers,
        prefetch,
        queue = queue_url_redacted,
        "worker started"
    );
}

pub fn log_rate(messages: u64, speed: i64) {
    tracing::info!(
        event = "queue_worker.telemetry.rate",
        messages,
        speed,
        "processed {messages} adds, {speed} records per second"
    );
}

pub fn log_stats(stats: &str) {
    tracing::info!(event = "queue_worker.telemetry.stats", stats = %stats, "engine stats");
}

pub fn log_extended(data_source: &str, record_id: &str, elapsed_minutes: f64, extensions: u32) {
    tracing::info!(
        event = "queue_worker.telemetry.extended",
        data_source,
        record_id,
        elapsed_minutes,
        extensions,
        "extended visibility ({elapsed_minutes:.1} min, extended {extensions} times): {data_source} : {record_id}"
    );
}

pub fn log_all_stuck(max_workers: usize) {
    tracing::warn!(
        event = "queue_worker.telemetry.all_stuck",
        max_workers,
        "all {max_workers} workers are stuck on long running records"
    );
}

pub fn log_still_processing(data_source: &str, record_id: &str, elapsed_minutes: f64) {
    tracing::warn!(
        event = "queue_worker.shutdown.still_processing",
        data_source,
        record_id,
        elapsed_minutes,
        "still processing ({elapsed_minutes:.1} min): {data_source} : {record_id}"
    );
}
