use std::time::Duration;

/// Rate-report every this many processed messages.
pub const DEFAULT_INTERVAL: u64 = 10_000;

/// Seconds before a record is considered long-running.
pub const DEFAULT_LONG_RECORD_SECS: u64 = 300;

/// Max acks issued back-to-back before flushing the batch.
pub const ACK_BATCH_SIZE: usize = 10;

/// Upper bound on how long a single `broker.fetch` call may wait for messages.
pub const FETCH_WAIT: Duration = Duration::from_secs(5);

/// Upper bound on how long `registry.drain_completed` may wait for a completion.
pub const DRAIN_WAIT: Duration = Duration::from_secs(10);

/// Sleep duration when the fetch budget is saturated.
pub const ADMISSION_BACKOFF: Duration = Duration::from_secs(1);

/// How often housekeeping (stats dump + stuck scan) runs, expressed as a fraction of
/// `long_record`.
pub const HOUSEKEEPING_FRACTION: u32 = 2;

/// Cap on the broker's background lease renewer.
pub const MAX_LOCK_RENEWAL_DURATION_SECS: u64 = 3600;

/// How often the background lease renewer re-issues `renew` for each outstanding handle.
pub const LEASE_RENEWER_POLL: Duration = Duration::from_secs(15);

/// How long a fetched-but-unclaimed message stays invisible to other consumers.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 60;
