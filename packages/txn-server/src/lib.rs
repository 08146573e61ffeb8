//! Ambient stack for the transaction session manager core: per-partition-
//! group owning worker threads, a background timeout timer, server-level
//! configuration, and structured logging setup.
//!
//! - **Configuration** ([`config`]): `ServerConfig`, the connection-layer
//!   superset of `txn_core::TxnManagerConfig`.
//! - **Worker** ([`worker`]): `PartitionGroupWorker`, one `TransactionManager`
//!   per partition group driven synchronously on its own thread.
//! - **Timer** ([`timer`]): `TimeoutTimer`, the background sweep that runs
//!   the timeout scans and performs the caller-side follow-up removals.

pub mod config;
pub mod timer;
pub mod worker;

pub use config::{KeepaliveConfig, ServerConfig};
pub use timer::{sweep, EventClock, SweepCounts, SystemEventClock, TimeoutTimer};
pub use worker::{call, Command, PartitionGroupWorker, TimeoutScanReport};
