//! Shared core abstractions for the queue-draining entity-resolution worker.
//!
//! This crate defines the cross-cutting contracts the `queue-worker` binary wires together: the
//! broker adapter, the engine adapter, the in-flight registry, the worker pool, and record
//! parsing. None of it knows about Postgres, clap, or CLI concerns — those live in the `worker`
//! crate alongside the concrete `Broker`/`EngineAdapter` implementations.

pub mod broker;
pub mod engine;
pub mod error;
pub mod pool;
pub mod record;
pub mod registry;
pub mod telemetry;

pub use broker::{Broker, Delivery, Handle};
pub use engine::{EngineAdapter, EngineError};
pub use error::Error;
pub use pool::{Job, WorkerPool};
pub use record::{Record, RecordParseError};
pub use registry::{CompletionSender, Completed, Registry, Token};

pub type Result<T> = std::result::Result<T, Error>;
