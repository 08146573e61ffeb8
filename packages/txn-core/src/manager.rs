//! `TransactionManager`: the facade spec.md §6 describes. Owns every
//! partition and partition group's state and routes each public verb to the
//! right [`Partition`], passing in the owning group's [`GroupMaps`]
//! explicitly (see `partition.rs`'s module doc on cyclic ownership).
//!
//! Not `Sync` by itself: spec.md §5 assigns one partition group to exactly
//! one owning worker thread, so `txn-server` is responsible for routing
//! requests to the thread that owns a given partition rather than sharing
//! one `TransactionManager` across threads.

use std::sync::Arc;

use crate::config::TxnManagerConfig;
use crate::container::ContainerCollaborator;
use crate::error::{CoreError, DomainError};
use crate::ids::{
    ClientId, ContainerId, EmTime, NodeDescriptor, PartitionGroupId, PartitionId, ReplicationId,
    StatementId, TxnId,
};
use crate::lock::PartitionLockTable;
use crate::partition::{BackedUpContext, EndKind, GroupMaps, Partition, PutParams};
use crate::replication::{ReplicationContext, StatementType};
use crate::session::{Session, TxnMode};

pub struct TransactionManager {
    config: TxnManagerConfig,
    partitions: Vec<Partition>,
    groups: Vec<GroupMaps>,
    lock_table: PartitionLockTable,
    collaborator: Arc<dyn ContainerCollaborator>,
}

impl TransactionManager {
    #[must_use]
    pub fn new(config: TxnManagerConfig, collaborator: Arc<dyn ContainerCollaborator>) -> Self {
        let partitions = (0..config.partition_count).map(Partition::new).collect();
        let groups = (0..config.partition_group_count).map(|_| GroupMaps::new()).collect();
        Self {
            config,
            partitions,
            groups,
            lock_table: PartitionLockTable::new(),
            collaborator,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TxnManagerConfig {
        &self.config
    }

    /// Partitions are assigned to groups in contiguous ranges, so a group's
    /// owning worker can recognize "its" partitions by a bounds check alone.
    #[must_use]
    pub fn group_of(&self, partition_id: PartitionId) -> PartitionGroupId {
        (u64::from(partition_id) * u64::from(self.config.partition_group_count)
            / u64::from(self.config.partition_count)) as PartitionGroupId
    }

    fn parts(
        &mut self,
        partition_id: PartitionId,
    ) -> (&mut Partition, &mut GroupMaps) {
        let group = self.group_of(partition_id) as usize;
        (&mut self.partitions[partition_id as usize], &mut self.groups[group])
    }

    fn parts_with_config(
        &mut self,
        partition_id: PartitionId,
    ) -> (&mut Partition, &mut GroupMaps, &TxnManagerConfig) {
        let group = self.group_of(partition_id) as usize;
        (
            &mut self.partitions[partition_id as usize],
            &mut self.groups[group],
            &self.config,
        )
    }

    // -- Session verbs (spec.md §4.2, §6) -----------------------------------

    /// Runs the session/transaction state machine for one statement and
    /// returns a snapshot of the touched session.
    pub fn put(&mut self, partition_id: PartitionId, params: PutParams) -> Result<Session, CoreError> {
        let client_id = params.client_id;
        let get_mode = params.get_mode;
        let (partition, maps, config) = self.parts_with_config(partition_id);
        partition.put(maps, config, params)?;
        let session = if get_mode == crate::session::GetMode::Auto {
            partition.auto_context().expect("AUTO put always sets the scratch session").clone()
        } else {
            maps.sessions
                .get_ref(&client_id)
                .expect("put always leaves the session present on success")
                .clone()
        };
        Ok(session)
    }

    /// Raw session lookup, bypassing the `put` state machine.
    pub fn get(&self, partition_id: PartitionId, client_id: ClientId) -> Result<Session, CoreError> {
        let group = self.group_of(partition_id) as usize;
        self.groups[group]
            .sessions
            .get_ref(&client_id)
            .cloned()
            .ok_or_else(|| DomainError::ContextNotFound { partition_id, client_id }.into())
    }

    /// Removes a session and its active-transaction entry, if any.
    pub fn remove(&mut self, partition_id: PartitionId, client_id: ClientId) -> Option<Session> {
        let (_, maps) = self.parts(partition_id);
        if let Some(session) = maps.sessions.get_ref(&client_id) {
            if let Some(txn_id) = session.txn.txn_id() {
                maps.active_txns.remove(&crate::ids::ActiveTxnKey { partition_id, txn_id });
            }
        }
        maps.sessions.remove(&client_id)
    }

    pub fn begin(
        &mut self,
        partition_id: PartitionId,
        client_id: ClientId,
        explicit_txn_id: Option<TxnId>,
        em_now: EmTime,
    ) -> Result<TxnId, CoreError> {
        let (partition, maps) = self.parts(partition_id);
        Ok(partition.begin(maps, client_id, explicit_txn_id, em_now)?)
    }

    fn end_transaction(
        &mut self,
        partition_id: PartitionId,
        client_id: ClientId,
        kind: EndKind,
    ) -> Result<(), CoreError> {
        let collaborator = Arc::clone(&self.collaborator);
        let (partition, maps) = self.parts(partition_id);
        partition.check_can_end_transaction(maps, client_id, kind)?;
        let session = maps
            .sessions
            .get_ref(&client_id)
            .expect("checked present by check_can_end_transaction");
        let result = match kind {
            EndKind::Commit => collaborator.commit(session),
            EndKind::Abort => collaborator.abort(session),
        };
        result.map_err(|e| CoreError::internal(Some(partition_id), Some(client_id), e))?;
        let (partition, maps) = self.parts(partition_id);
        partition.end_transaction_unchecked(maps, client_id);
        Ok(())
    }

    pub fn commit(&mut self, partition_id: PartitionId, client_id: ClientId) -> Result<(), CoreError> {
        self.end_transaction(partition_id, client_id, EndKind::Commit)
    }

    pub fn abort(&mut self, partition_id: PartitionId, client_id: ClientId) -> Result<(), CoreError> {
        self.end_transaction(partition_id, client_id, EndKind::Abort)
    }

    pub fn check_statement_already_executed(
        &self,
        partition_id: PartitionId,
        client_id: ClientId,
        statement_id: StatementId,
        is_update_stmt: bool,
    ) -> Result<(), CoreError> {
        let group = self.group_of(partition_id) as usize;
        let session = self.groups[group]
            .sessions
            .get_ref(&client_id)
            .ok_or(DomainError::ContextNotFound { partition_id, client_id })?;
        Ok(session.check_statement_already_executed(statement_id, is_update_stmt)?)
    }

    pub fn check_statement_continuous_in_transaction(
        &self,
        partition_id: PartitionId,
        client_id: ClientId,
        statement_id: StatementId,
        txn_mode: TxnMode,
    ) -> Result<(), CoreError> {
        let group = self.group_of(partition_id) as usize;
        let session = self.groups[group]
            .sessions
            .get_ref(&client_id)
            .ok_or(DomainError::ContextNotFound { partition_id, client_id })?;
        Ok(session.check_statement_continuous_in_transaction(statement_id, txn_mode)?)
    }

    // -- Backup / restore / membership (spec.md §4.2) -----------------------

    pub fn backup_active_context(
        &self,
        partition_id: PartitionId,
    ) -> Result<(TxnId, Vec<BackedUpContext>), CoreError> {
        let group = self.group_of(partition_id) as usize;
        Ok(self.partitions[partition_id as usize].backup_active_context(&self.groups[group])?)
    }

    pub fn restore_active_context(
        &mut self,
        partition_id: PartitionId,
        max_txn_id: TxnId,
        contexts: &[BackedUpContext],
        em_now: EmTime,
    ) {
        let (partition, maps) = self.parts(partition_id);
        partition.restore_active_context(maps, max_txn_id, contexts, em_now);
    }

    /// Resets a partition to a freshly-created, empty state, dropping any
    /// sessions/transactions/replications it owned. Used on rebalance.
    pub fn remove_partition(&mut self, partition_id: PartitionId) {
        let (partition, maps) = self.parts(partition_id);
        partition.clear_for_removal(maps);
        self.partitions[partition_id as usize] = Partition::new(partition_id);
    }

    /// Idempotent: (re-)initializes a partition to an empty state.
    pub fn create_partition(&mut self, partition_id: PartitionId) {
        self.remove_partition(partition_id);
    }

    // -- Replication follow-ups (spec.md §4.3) ------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn replication_put(
        &mut self,
        partition_id: PartitionId,
        client_id: ClientId,
        container_id: ContainerId,
        statement_type: StatementType,
        statement_id: StatementId,
        node_descriptor: NodeDescriptor,
        em_now: EmTime,
    ) -> ReplicationId {
        let timeout = self.config.replication_timeout_interval_sec;
        let (partition, maps) = self.parts(partition_id);
        partition.replication_put(
            maps,
            client_id,
            container_id,
            statement_type,
            statement_id,
            node_descriptor,
            timeout,
            em_now,
        )
    }

    pub fn replication_get(
        &mut self,
        partition_id: PartitionId,
        replication_id: ReplicationId,
    ) -> Result<ReplicationContext, CoreError> {
        let (partition, maps) = self.parts(partition_id);
        Ok(partition.replication_get(maps, replication_id)?.clone())
    }

    pub fn replication_remove(&mut self, partition_id: PartitionId, replication_id: ReplicationId) {
        let (partition, maps) = self.parts(partition_id);
        partition.replication_remove(maps, replication_id);
    }

    pub fn replication_decrement_ack_counter(
        &mut self,
        partition_id: PartitionId,
        replication_id: ReplicationId,
    ) -> Result<bool, CoreError> {
        let (partition, maps) = self.parts(partition_id);
        Ok(partition.replication_get(maps, replication_id)?.decrement_ack_counter())
    }

    pub fn replication_increment_ack_counter(
        &mut self,
        partition_id: PartitionId,
        replication_id: ReplicationId,
        n: u32,
    ) -> Result<(), CoreError> {
        let (partition, maps) = self.parts(partition_id);
        partition.replication_get(maps, replication_id)?.increment_ack_counter(n);
        Ok(())
    }

    // -- Timeout scans (spec.md §4.4) ---------------------------------------

    /// Reports every session in `group_id` whose embedded transaction is
    /// ACTIVE and past its expiry, re-registering it at the session's own
    /// (longer) context expiry so it resurfaces via `request_timeout_scan`
    /// instead of being reported twice.
    pub fn transaction_timeout_scan(
        &mut self,
        group_id: PartitionGroupId,
        em_now: EmTime,
    ) -> Vec<(PartitionId, ClientId)> {
        let maps = &mut self.groups[group_id as usize];
        let mut out = Vec::new();
        // Re-registrations are deferred until after the drain loop: `refresh`
        // only reports an entry once per registration, so as long as we
        // don't `update` mid-loop, every entry due at `em_now` is visited
        // exactly once even if its re-registered expiry is itself <= em_now
        // (an inactive session whose context has also already expired, left
        // for `request_timeout_scan` to collect).
        let mut reregister = Vec::new();
        loop {
            let Some((client_id, session)) = maps.sessions.refresh(em_now) else {
                break;
            };
            let is_timeout = session.is_active_transaction()
                && session.txn.txn_expire_time().expect("checked active above") <= em_now;
            let partition_id = session.partition_id;
            let context_expire = session.context_expire_time;
            let effective_expire = session.effective_expire_time();
            if is_timeout {
                out.push((partition_id, client_id));
                reregister.push((client_id, context_expire));
                self.partitions[partition_id as usize].bump_txn_timeout_count();
            } else {
                reregister.push((client_id, effective_expire));
            }
        }
        for (client_id, expire_at) in reregister {
            maps.sessions.update(&client_id, expire_at);
        }
        out
    }

    /// Reports every session in `group_id` whose context has expired,
    /// leaving it unscheduled (the caller is expected to `remove` it).
    pub fn request_timeout_scan(
        &mut self,
        group_id: PartitionGroupId,
        em_now: EmTime,
    ) -> Vec<(PartitionId, ClientId)> {
        let maps = &mut self.groups[group_id as usize];
        let mut out = Vec::new();
        // See `transaction_timeout_scan`: re-registrations are deferred so a
        // re-registered-but-still-due entry can't be revisited forever
        // within this same call.
        let mut reregister = Vec::new();
        loop {
            let Some((client_id, session)) = maps.sessions.refresh(em_now) else {
                break;
            };
            let is_timeout = session.context_expire_time <= em_now;
            let partition_id = session.partition_id;
            let effective_expire = session.effective_expire_time();
            if is_timeout {
                out.push((partition_id, client_id));
                self.partitions[partition_id as usize].bump_req_timeout_count();
            } else {
                reregister.push((client_id, effective_expire));
            }
        }
        for (client_id, expire_at) in reregister {
            maps.sessions.update(&client_id, expire_at);
        }
        out
    }

    /// Reports every replication follow-up in `group_id` past its expiry.
    /// Each returned entry is left unscheduled; removal is the caller's
    /// responsibility.
    pub fn replication_timeout_scan(
        &mut self,
        group_id: PartitionGroupId,
        em_now: EmTime,
    ) -> Vec<(PartitionId, ReplicationId)> {
        let maps = &mut self.groups[group_id as usize];
        let mut out = Vec::new();
        while let Some((key, _ctx)) = maps.replications.refresh(em_now) {
            out.push((key.partition_id, key.replication_id));
            self.partitions[key.partition_id as usize].bump_repl_timeout_count();
        }
        out
    }

    // -- Lock pass-through (spec.md §4.5) ------------------------------------

    #[must_use]
    pub fn lock_partition(&self, partition_id: PartitionId) -> bool {
        self.lock_table.lock(partition_id)
    }

    pub fn unlock_partition(&self, partition_id: PartitionId) {
        self.lock_table.unlock(partition_id);
    }

    // -- Counters (spec.md §5) ------------------------------------------------

    #[must_use]
    pub fn txn_timeout_count(&self, partition_id: PartitionId) -> u64 {
        self.partitions[partition_id as usize].txn_timeout_count()
    }

    #[must_use]
    pub fn req_timeout_count(&self, partition_id: PartitionId) -> u64 {
        self.partitions[partition_id as usize].req_timeout_count()
    }

    #[must_use]
    pub fn repl_timeout_count(&self, partition_id: PartitionId) -> u64 {
        self.partitions[partition_id as usize].repl_timeout_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::NullContainerCollaborator;
    use crate::session::GetMode;
    use uuid::Uuid;

    fn manager() -> TransactionManager {
        TransactionManager::new(
            TxnManagerConfig {
                partition_count: 4,
                partition_group_count: 2,
                ..TxnManagerConfig::default()
            },
            Arc::new(NullContainerCollaborator),
        )
    }

    fn put_params(client_id: ClientId, get_mode: GetMode, txn_mode: TxnMode, em_now: EmTime) -> PutParams {
        PutParams {
            client_id,
            container_id: ContainerId(1),
            statement_id: 1,
            txn_timeout_interval_requested_sec: 10,
            now: 0,
            em_now,
            get_mode,
            txn_mode,
            is_update_stmt: false,
            is_redo: false,
            explicit_txn_id: None,
        }
    }

    #[test]
    fn put_commit_round_trip() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        let session = mgr
            .put(0, put_params(client, GetMode::Create, TxnMode::NoAutoCommitBegin, 1_000))
            .unwrap();
        assert!(session.is_active_transaction());
        mgr.commit(0, client).unwrap();
        assert!(!mgr.get(0, client).unwrap().is_active_transaction());
    }

    #[test]
    fn abort_without_active_transaction_is_rejected() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        mgr.put(0, put_params(client, GetMode::Create, TxnMode::AutoCommit, 1_000))
            .unwrap();
        let err = mgr.abort(0, client).unwrap_err();
        assert_eq!(
            err.as_domain(),
            Some(&DomainError::TransactionAbortNotAllowed { partition_id: 0, client_id: client })
        );
    }

    #[test]
    fn contiguous_partition_ranges_map_to_distinct_groups() {
        let mgr = manager();
        assert_eq!(mgr.group_of(0), 0);
        assert_eq!(mgr.group_of(1), 0);
        assert_eq!(mgr.group_of(2), 1);
        assert_eq!(mgr.group_of(3), 1);
    }

    #[test]
    fn transaction_timeout_scan_reports_once_then_requeues_at_context_expiry() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        mgr.put(0, put_params(client, GetMode::Create, TxnMode::NoAutoCommitBegin, 1_000))
            .unwrap();

        let reported = mgr.transaction_timeout_scan(0, 12_000);
        assert_eq!(reported, vec![(0, client)]);
        assert_eq!(mgr.txn_timeout_count(0), 1);

        // Re-scanning immediately must not report it again: it was
        // re-registered at the (larger) context expiry.
        let reported_again = mgr.transaction_timeout_scan(0, 12_000);
        assert!(reported_again.is_empty());
    }

    #[test]
    fn replication_ack_counter_round_trip() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        let rid = mgr.replication_put(
            0,
            client,
            ContainerId(1),
            StatementType(0),
            1,
            NodeDescriptor("node-a".into()),
            1_000,
        );
        mgr.replication_increment_ack_counter(0, rid, 2).unwrap();
        assert!(!mgr.replication_decrement_ack_counter(0, rid).unwrap());
        assert!(mgr.replication_decrement_ack_counter(0, rid).unwrap());
    }

    #[test]
    fn backup_restore_preserves_active_transaction() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        mgr.put(0, put_params(client, GetMode::Create, TxnMode::NoAutoCommitBegin, 1_000))
            .unwrap();
        let (max_txn_id, contexts) = mgr.backup_active_context(0).unwrap();

        mgr.remove_partition(0);
        assert!(mgr.get(0, client).is_err());

        mgr.restore_active_context(0, max_txn_id, &contexts, 5_000);
        assert!(mgr.get(0, client).unwrap().is_active_transaction());
    }

    #[test]
    fn s1_auto_commit_happy_path() {
        // The statement begins and commits transparently inside this single
        // `put`; the session never surfaces as ACTIVE afterward (see
        // DESIGN.md's note on the AUTO_COMMIT open question), so there is no
        // explicit follow-up commit to issue and last_statement_id is
        // untouched by a non-update statement.
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        let mut params = put_params(client, GetMode::Create, TxnMode::AutoCommit, 1_000);
        params.txn_timeout_interval_requested_sec = 30;
        let session = mgr.put(0, params).unwrap();
        assert!(!session.is_active_transaction());

        let after = mgr.get(0, client).unwrap();
        assert_eq!(after.last_statement_id, 0);
    }

    #[test]
    fn s2_begin_continue_commit() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        let mut begin = put_params(client, GetMode::Create, TxnMode::NoAutoCommitBegin, 1_000);
        begin.is_update_stmt = true;
        let session = mgr.put(0, begin).unwrap();
        assert!(session.is_active_transaction());
        let txn_id = session.txn.txn_id().unwrap();

        let mut cont = put_params(client, GetMode::Get, TxnMode::NoAutoCommitContinue, 1_000);
        cont.statement_id = 2;
        cont.is_update_stmt = true;
        let session = mgr.put(0, cont).unwrap();
        assert_eq!(session.txn.txn_id(), Some(txn_id));

        mgr.commit(0, client).unwrap();
        assert!(!mgr.get(0, client).unwrap().is_active_transaction());
    }

    #[test]
    fn s3_idempotent_update_stmt_retry_then_redo() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        let mut begin = put_params(client, GetMode::Create, TxnMode::NoAutoCommitBegin, 1_000);
        begin.is_update_stmt = true;
        mgr.put(0, begin).unwrap();
        let mut cont = put_params(client, GetMode::Get, TxnMode::NoAutoCommitContinue, 1_000);
        cont.statement_id = 2;
        cont.is_update_stmt = true;
        mgr.put(0, cont).unwrap();

        let err = mgr.put(0, cont).unwrap_err();
        assert!(matches!(err.as_domain(), Some(DomainError::StatementAlreadyExecuted { .. })));

        cont.is_redo = true;
        let before = mgr.get(0, client).unwrap().last_statement_id;
        mgr.put(0, cont).unwrap();
        assert_eq!(mgr.get(0, client).unwrap().last_statement_id, before);
    }

    #[test]
    fn s4_continuity_gap_is_rejected() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        let mut begin = put_params(client, GetMode::Create, TxnMode::NoAutoCommitBegin, 1_000);
        begin.is_update_stmt = true;
        mgr.put(0, begin).unwrap();
        let mut cont = put_params(client, GetMode::Get, TxnMode::NoAutoCommitContinue, 1_000);
        cont.statement_id = 2;
        cont.is_update_stmt = true;
        mgr.put(0, cont).unwrap();

        let mut gap = put_params(client, GetMode::Get, TxnMode::NoAutoCommitContinue, 1_000);
        gap.statement_id = 5;
        let err = mgr.put(0, gap).unwrap_err();
        assert!(matches!(err.as_domain(), Some(DomainError::StatementInvalid { .. })));
    }

    #[test]
    fn invariant_active_txn_map_entries_match_session_state() {
        let mut mgr = manager();
        let client = ClientId(Uuid::new_v4());
        mgr.put(0, put_params(client, GetMode::Create, TxnMode::NoAutoCommitBegin, 1_000))
            .unwrap();

        let group = mgr.group_of(0) as usize;
        let entries: Vec<_> = mgr.groups[group]
            .active_txns
            .cursor()
            .map(|(k, v)| (*k, *v))
            .collect();
        for (key, tracked_client) in entries {
            let session = mgr.groups[group].sessions.get_ref(&tracked_client).unwrap();
            assert_eq!(session.txn.txn_id(), Some(key.txn_id));
            assert!(session.is_active_transaction());
        }
    }
}
