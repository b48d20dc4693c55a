//! Postgres/clap/CLI wiring around `queue-worker-core`'s contracts: concrete `Broker`, config,
//! and the coordinator loop.

pub mod broker_pg;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod enqueue;
pub mod migrate;
