//! `TimeoutTimer`: the background sweep that drives the two session scans
//! and the replication scan across every partition group, and performs the
//! follow-up removals spec.md §4.4 leaves to the caller ("removal is the
//! caller's responsibility").
//!
//! Grounded in the teacher's pattern of a dedicated thread waking on a
//! fixed interval (`gc_interval_ms`, the same config field name the
//! teacher's `ServerConfig` uses for its own background GC sweep).

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};
use txn_core::{ClientId, PartitionId, ReplicationId};

use crate::worker::{call, Command};

/// A clock the timer reads once per sweep to get the current monotonic
/// event time. Kept as a trait so tests can supply a deterministic clock
/// instead of the wall clock, mirroring spec.md §2's "the core never reads
/// either clock itself" by keeping clock access entirely in `txn-server`.
pub trait EventClock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

/// Reads `SystemTime::now()` relative to the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEventClock;

impl EventClock for SystemEventClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_millis() as i64
    }
}

/// One sweep's tally, for observability/tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepCounts {
    pub timed_out_transactions: usize,
    pub expired_sessions: usize,
    pub expired_replications: usize,
}

/// Runs `RunTimeoutScans` against every worker's channel in turn, then
/// issues the follow-up `Remove`/replication removal for every entry
/// reported, per spec.md §4.4.
pub struct TimeoutTimer {
    handle: Option<JoinHandle<()>>,
    stop: Sender<()>,
}

impl TimeoutTimer {
    #[must_use]
    pub fn spawn(
        senders: Vec<Sender<Command>>,
        interval: Duration,
        clock: Arc<dyn EventClock>,
    ) -> Self {
        let (stop, stop_rx) = std::sync::mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("txn-timeout-timer".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "timeout timer started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                            sweep(&senders, clock.as_ref());
                        }
                    }
                }
                info!("timeout timer stopped");
            })
            .expect("failed to spawn timeout timer thread");
        Self {
            handle: Some(handle),
            stop,
        }
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One full sweep across every partition group's worker. Exposed for tests
/// that want to drive a sweep deterministically instead of waiting on the
/// background thread's interval.
pub fn sweep(senders: &[Sender<Command>], clock: &dyn EventClock) -> SweepCounts {
    let em_now = clock.now_ms();
    let mut counts = SweepCounts::default();
    for sender in senders {
        let report = call(sender, |reply| Command::RunTimeoutScans { em_now, reply });

        counts.timed_out_transactions += report.timed_out_transactions.len();
        for (partition_id, client_id) in report.timed_out_transactions {
            debug!(partition_id, %client_id, "transaction timed out");
        }

        counts.expired_sessions += report.expired_sessions.len();
        for (partition_id, client_id) in report.expired_sessions {
            remove_expired_session(sender, partition_id, client_id);
        }

        counts.expired_replications += report.expired_replications.len();
        for (partition_id, replication_id) in report.expired_replications {
            remove_expired_replication(sender, partition_id, replication_id);
        }
    }
    counts
}

fn remove_expired_session(sender: &Sender<Command>, partition_id: PartitionId, client_id: ClientId) {
    debug!(partition_id, %client_id, "session context expired, removing");
    call(sender, |reply| Command::Remove {
        partition_id,
        client_id,
        reply,
    });
}

fn remove_expired_replication(
    sender: &Sender<Command>,
    partition_id: PartitionId,
    replication_id: ReplicationId,
) {
    debug!(partition_id, replication_id, "replication follow-up expired, removing");
    let (reply, rx) = std::sync::mpsc::channel();
    let _ = sender.send(Command::ReplicationRemove {
        partition_id,
        replication_id,
        reply,
    });
    let _ = rx.recv();
}
