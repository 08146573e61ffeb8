//! Identifier and time primitives.
//!
//! Every identifier space in the session manager gets its own newtype so
//! that a partition id can never be passed where a transaction id is
//! expected, etc. Time is represented as two distinct axes, matching the
//! two clocks the core is handed by its caller: monotonic event time
//! (`EmTime`, used for every expiry computation) and wall-clock time
//! (`WallTime`, used only for the currently-executing statement's
//! start/expire bookkeeping). The core never reads either clock itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque fixed-width client identifier, assigned by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shard identifier. Partitions are dense integers in `[0, partition_count)`.
pub type PartitionId = u32;

/// Identifier of the partition group (worker thread) a partition belongs to.
pub type PartitionGroupId = u32;

/// Opaque identifier of the row/table container a statement targets.
/// Never interpreted by the core, only threaded through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub u64);

/// Monotonic 64-bit transaction id, strictly increasing per partition
/// (except under `restore`, which may set it to a supplied value).
pub type TxnId = i64;

/// Sentinel marking an implicit, single-statement (auto-commit) transaction.
/// Not indexed in the active-transaction map.
pub const AUTO_COMMIT_TXNID: TxnId = -1;

/// There is no valid transaction yet; used to request id auto-assignment.
pub const UNDEFINED_TXNID: TxnId = 0;

/// Monotonic 64-bit replication id, strictly increasing per partition.
pub type ReplicationId = u64;

/// Monotonic 64-bit statement id, assigned by the client per session.
pub type StatementId = u64;

/// Monotonic event time in milliseconds, passed in by the caller. Used for
/// every expiry computation in the core (session, transaction, replication).
pub type EmTime = i64;

/// Wall-clock time in milliseconds, passed in by the caller. Used only to
/// stamp the currently-executing statement's start/expire fields.
pub type WallTime = i64;

/// Opaque handle identifying the replica-side endpoint a replication
/// follow-up should be acknowledged by. The core never interprets its
/// contents; `NodeDescriptor` is supplied and compared only by its owner
/// (the replication subsystem, outside the core).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor(pub String);

/// Key of an entry in the active-transaction map: a transaction is
/// partition-unique, so `(partition_id, txn_id)` identifies it globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActiveTxnKey {
    pub partition_id: PartitionId,
    pub txn_id: TxnId,
}

/// Key of an entry in the replication map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicationKey {
    pub partition_id: PartitionId,
    pub replication_id: ReplicationId,
}
