//! Replication follow-up (`ReplicationContext`): state kept server-side
//! after replying to a client, to correlate asynchronous acknowledgements
//! from replica peers. See spec.md §3 "Replication follow-up".

use crate::ids::{
    ClientId, ContainerId, EmTime, NodeDescriptor, PartitionId, ReplicationId, StatementId,
};

/// Opaque statement kind. SQL semantics are out of scope for the core; this
/// only needs to be threaded through so the caller can decide how to react
/// once a replication follow-up completes (e.g. whether an `exist_flag`
/// applies to it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementType(pub u8);

#[derive(Debug, Clone)]
pub struct ReplicationContext {
    pub replication_id: ReplicationId,
    pub statement_type: StatementType,
    pub client_id: ClientId,
    pub partition_id: PartitionId,
    pub container_id: ContainerId,
    pub statement_id: StatementId,
    pub client_node_descriptor: NodeDescriptor,
    ack_counter: u32,
    pub expire_time: EmTime,
    /// Conveys whether the replicated row existed, set by statement logic
    /// outside the core.
    pub exist_flag: bool,
}

impl ReplicationContext {
    pub(crate) fn new(
        replication_id: ReplicationId,
        statement_type: StatementType,
        client_id: ClientId,
        partition_id: PartitionId,
        container_id: ContainerId,
        statement_id: StatementId,
        client_node_descriptor: NodeDescriptor,
        expire_time: EmTime,
    ) -> Self {
        Self {
            replication_id,
            statement_type,
            client_id,
            partition_id,
            container_id,
            statement_id,
            client_node_descriptor,
            ack_counter: 0,
            expire_time,
            exist_flag: false,
        }
    }

    #[must_use]
    pub fn ack_counter(&self) -> u32 {
        self.ack_counter
    }

    pub fn increment_ack_counter(&mut self, n: u32) {
        self.ack_counter = self.ack_counter.saturating_add(n);
    }

    /// Decrements the ack counter by one, saturating at zero.
    ///
    /// Returns `true` iff the counter *became* zero by this call, or was
    /// already zero on entry (tolerating spurious/duplicate acks). Per
    /// spec.md §9 this conflation (reached-zero vs. already-zero) is
    /// preserved verbatim from the original source; it is unclear whether
    /// it is intentional tolerance of duplicate acks or a latent bug, and
    /// this implementation does not silently diverge from it.
    pub fn decrement_ack_counter(&mut self) -> bool {
        if self.ack_counter == 0 {
            return true;
        }
        self.ack_counter -= 1;
        self.ack_counter == 0
    }
}
