use async_trait::async_trait;
use std::time::Duration;

/// Opaque reference to a delivered message, used to ack, dead-letter, or renew its lease.
///
/// Handles must not outlive their receiver: on [`Broker::recycle`] all outstanding handles are
/// implicitly invalidated. Callers that hold a stale handle across a recycle will see `ack`/
/// `dead_letter`/`renew` fail or no-op; that failure is logged and swallowed, not propagated as
/// coordinator-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub String);

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One delivered message: a handle plus its raw body.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: Handle,
    pub payload: String,
}

/// Wraps the broker's queue receiver. Internals of the wire protocol (SQS, Azure Service Bus,
/// Postgres-as-queue, ...) are out of this crate's scope; only this contract is.
///
/// The adapter hides the prefetch setting: callers request up to `max` messages with a `wait`
/// deadline, and the adapter returns whatever was already prefetched plus anything it could obtain
/// within the deadline.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Fetch up to `max` messages, waiting at most `wait` for at least one. Returns fewer than
    /// `max`, or an empty list, on timeout.
    async fn fetch(&self, max: usize, wait: Duration) -> anyhow::Result<Vec<Delivery>>;

    /// Finalize the message; it will not be redelivered.
    async fn ack(&self, handle: &Handle) -> anyhow::Result<()>;

    /// Route the message to the broker's dead-letter facility.
    async fn dead_letter(&self, handle: &Handle) -> anyhow::Result<()>;

    /// Extend the message's visibility lease.
    async fn renew(&self, handle: &Handle) -> anyhow::Result<()>;

    /// Close the current receiver and open a fresh one with the same queue name and prefetch.
    /// Used when the receiver becomes idle or its internal state is suspect. Invalidates every
    /// handle issued by the prior receiver.
    async fn recycle(&self) -> anyhow::Result<()>;
}
