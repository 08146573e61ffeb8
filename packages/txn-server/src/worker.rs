//! `PartitionGroupWorker`: one partition group's owning thread.
//!
//! Grounded in the teacher's `service/worker.rs` `BackgroundRunnable`/
//! `BackgroundWorker<T>` shape (there stubbed for async tasks under tokio
//! mpsc). Here the channel is `std::sync::mpsc` rather than
//! `tokio::sync::mpsc`, specifically because spec.md §5 forbids cooperative
//! suspension inside the core: the worker thread never awaits anything, it
//! only blocks on a synchronous channel recv between commands. A caller
//! running under async code reaches it via `tokio::task::spawn_blocking`.

use std::sync::mpsc::{self, Receiver, RecvError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};
use txn_core::{
    ClientId, ContainerCollaborator, CoreError, EmTime, NodeDescriptor, PartitionGroupId,
    PartitionId, PutParams, ReplicationId, Session, StatementType, TransactionManager,
    TxnManagerConfig,
};

/// One unit of work handed to the owning worker thread. Each variant
/// carries the `Sender` half of a one-shot reply channel, so the caller's
/// `recv()` blocks until the worker has actually applied the command.
pub enum Command {
    Put {
        partition_id: PartitionId,
        params: Box<PutParams>,
        reply: Sender<Result<Session, CoreError>>,
    },
    Get {
        partition_id: PartitionId,
        client_id: ClientId,
        reply: Sender<Result<Session, CoreError>>,
    },
    Remove {
        partition_id: PartitionId,
        client_id: ClientId,
        reply: Sender<Option<Session>>,
    },
    Commit {
        partition_id: PartitionId,
        client_id: ClientId,
        reply: Sender<Result<(), CoreError>>,
    },
    Abort {
        partition_id: PartitionId,
        client_id: ClientId,
        reply: Sender<Result<(), CoreError>>,
    },
    ReplicationPut {
        partition_id: PartitionId,
        client_id: ClientId,
        container_id: txn_core::ContainerId,
        statement_type: StatementType,
        statement_id: txn_core::StatementId,
        node_descriptor: NodeDescriptor,
        em_now: EmTime,
        reply: Sender<ReplicationId>,
    },
    RemovePartition {
        partition_id: PartitionId,
        reply: Sender<()>,
    },
    ReplicationRemove {
        partition_id: PartitionId,
        replication_id: ReplicationId,
        reply: Sender<()>,
    },
    /// Runs the two session scans and the replication scan for every
    /// partition in this group, in one pass.
    RunTimeoutScans {
        em_now: EmTime,
        reply: Sender<TimeoutScanReport>,
    },
    Shutdown,
}

/// Every `(partition_id, id)` pair the timeout scans reported this sweep.
/// `txn-server::timer` is responsible for following up with the
/// appropriate `remove`/`replication_remove`, per spec.md §4.4's "removal
/// is the caller's responsibility."
#[derive(Debug, Default, Clone)]
pub struct TimeoutScanReport {
    pub timed_out_transactions: Vec<(PartitionId, ClientId)>,
    pub expired_sessions: Vec<(PartitionId, ClientId)>,
    pub expired_replications: Vec<(PartitionId, ReplicationId)>,
}

/// Owns one `TransactionManager` scoped to one partition group, driven
/// synchronously from a dedicated OS thread.
pub struct PartitionGroupWorker {
    sender: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl PartitionGroupWorker {
    /// Spawns the worker thread. `group_id` is used only for log fields;
    /// the manager itself routes every command by `partition_id`.
    #[must_use]
    pub fn spawn(
        group_id: PartitionGroupId,
        config: TxnManagerConfig,
        collaborator: Arc<dyn ContainerCollaborator>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(format!("txn-group-{group_id}"))
            .spawn(move || run(group_id, config, collaborator, receiver))
            .expect("failed to spawn partition group worker thread");
        Self {
            sender,
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn sender(&self) -> Sender<Command> {
        self.sender.clone()
    }
}

impl Drop for PartitionGroupWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    group_id: PartitionGroupId,
    config: TxnManagerConfig,
    collaborator: Arc<dyn ContainerCollaborator>,
    receiver: Receiver<Command>,
) {
    let mut manager = TransactionManager::new(config, collaborator);
    debug!(group_id, "partition group worker started");
    loop {
        match receiver.recv() {
            Ok(command) => {
                if !apply(&mut manager, group_id, command) {
                    break;
                }
            }
            Err(RecvError) => break,
        }
    }
    debug!(group_id, "partition group worker stopped");
}

/// Applies one command to the owned manager. Returns `false` on shutdown.
fn apply(manager: &mut TransactionManager, group_id: PartitionGroupId, command: Command) -> bool {
    match command {
        Command::Put {
            partition_id,
            params,
            reply,
        } => {
            let result = manager.put(partition_id, *params);
            if let Err(err) = &result {
                warn!(group_id, partition_id, %err, "put rejected");
            }
            let _ = reply.send(result);
        }
        Command::Get {
            partition_id,
            client_id,
            reply,
        } => {
            let _ = reply.send(manager.get(partition_id, client_id));
        }
        Command::Remove {
            partition_id,
            client_id,
            reply,
        } => {
            let _ = reply.send(manager.remove(partition_id, client_id));
        }
        Command::Commit {
            partition_id,
            client_id,
            reply,
        } => {
            let result = manager.commit(partition_id, client_id);
            if let Err(err) = &result {
                warn!(group_id, partition_id, %client_id, %err, "commit rejected");
            } else {
                debug!(group_id, partition_id, %client_id, "transaction committed");
            }
            let _ = reply.send(result);
        }
        Command::Abort {
            partition_id,
            client_id,
            reply,
        } => {
            let result = manager.abort(partition_id, client_id);
            if let Err(err) = &result {
                warn!(group_id, partition_id, %client_id, %err, "abort rejected");
            } else {
                debug!(group_id, partition_id, %client_id, "transaction aborted");
            }
            let _ = reply.send(result);
        }
        Command::ReplicationPut {
            partition_id,
            client_id,
            container_id,
            statement_type,
            statement_id,
            node_descriptor,
            em_now,
            reply,
        } => {
            let id = manager.replication_put(
                partition_id,
                client_id,
                container_id,
                statement_type,
                statement_id,
                node_descriptor,
                em_now,
            );
            let _ = reply.send(id);
        }
        Command::RemovePartition { partition_id, reply } => {
            manager.remove_partition(partition_id);
            debug!(group_id, partition_id, "partition reset");
            let _ = reply.send(());
        }
        Command::ReplicationRemove {
            partition_id,
            replication_id,
            reply,
        } => {
            manager.replication_remove(partition_id, replication_id);
            let _ = reply.send(());
        }
        Command::RunTimeoutScans { em_now, reply } => {
            let report = TimeoutScanReport {
                timed_out_transactions: manager.transaction_timeout_scan(group_id, em_now),
                expired_sessions: manager.request_timeout_scan(group_id, em_now),
                expired_replications: manager.replication_timeout_scan(group_id, em_now),
            };
            let _ = reply.send(report);
        }
        Command::Shutdown => return false,
    }
    true
}

/// Blocking call/response helper: sends `command` (already carrying the
/// `reply` sender) and waits for the single reply. Panics only if the
/// worker thread has died, which is treated as an unrecoverable bug rather
/// than a normal error path (mirrors spec.md §9's guidance to reserve
/// panics for invariant violations).
pub fn call<T>(sender: &Sender<Command>, build: impl FnOnce(Sender<T>) -> Command) -> T {
    let (reply_tx, reply_rx) = mpsc::channel();
    sender
        .send(build(reply_tx))
        .expect("partition group worker thread is gone");
    reply_rx
        .recv()
        .expect("partition group worker dropped the reply sender")
}
