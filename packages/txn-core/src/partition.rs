//! `Partition`: the sole authority over one partition's transaction/
//! replication id spaces and the session state machine (spec.md §4.2).
//!
//! A `Partition` holds no reference to the maps it indexes into — per
//! spec.md §9's "Cyclic ownership" design note, the partition-group's three
//! maps are passed in explicitly as `&mut GroupMaps` on every call instead
//! of being reached through a back-pointer to an owning manager.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::TxnManagerConfig;
use crate::error::DomainError;
use crate::expiring_map::ExpiringMap;
use crate::ids::{
    ActiveTxnKey, ClientId, ContainerId, EmTime, PartitionId, ReplicationId, ReplicationKey,
    StatementId, TxnId, WallTime, AUTO_COMMIT_TXNID,
};
use crate::replication::ReplicationContext;
use crate::session::{GetMode, Session, TransactionState, TxnMode};

/// The three maps shared by every partition in one partition group.
#[derive(Default)]
pub struct GroupMaps {
    pub sessions: ExpiringMap<ClientId, Session>,
    pub active_txns: ExpiringMap<ActiveTxnKey, ClientId>,
    pub replications: ExpiringMap<ReplicationKey, ReplicationContext>,
}

impl GroupMaps {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: ExpiringMap::new(),
            active_txns: ExpiringMap::new(),
            replications: ExpiringMap::new(),
        }
    }
}

/// Inputs to [`Partition::put`].
#[derive(Debug, Clone, Copy)]
pub struct PutParams {
    pub client_id: ClientId,
    pub container_id: ContainerId,
    pub statement_id: StatementId,
    pub txn_timeout_interval_requested_sec: u32,
    pub now: WallTime,
    pub em_now: EmTime,
    pub get_mode: GetMode,
    pub txn_mode: TxnMode,
    pub is_update_stmt: bool,
    pub is_redo: bool,
    pub explicit_txn_id: Option<TxnId>,
}

/// Whether `end_transaction` is being driven by `commit` or `abort`; only
/// affects which domain error is raised if no transaction is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndKind {
    Commit,
    Abort,
}

pub struct Partition {
    pid: PartitionId,
    next_txn_id: TxnId,
    next_replication_id: ReplicationId,
    txn_timeout_count: AtomicU64,
    req_timeout_count: AtomicU64,
    repl_timeout_count: AtomicU64,
    /// Reused scratch session for `GetMode::Auto`: never installed in the
    /// session map, cleared and re-set on every AUTO put.
    auto_context: Option<Session>,
}

impl Partition {
    #[must_use]
    pub fn new(pid: PartitionId) -> Self {
        Self {
            pid,
            next_txn_id: 0,
            next_replication_id: 0,
            txn_timeout_count: AtomicU64::new(0),
            req_timeout_count: AtomicU64::new(0),
            repl_timeout_count: AtomicU64::new(0),
            auto_context: None,
        }
    }

    #[must_use]
    pub fn partition_id(&self) -> PartitionId {
        self.pid
    }

    #[must_use]
    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id
    }

    pub fn assign_new_transaction_id(&mut self) -> TxnId {
        self.next_txn_id += 1;
        self.next_txn_id
    }

    /// Read without locking; may be stale by one update (spec.md §5).
    #[must_use]
    pub fn txn_timeout_count(&self) -> u64 {
        self.txn_timeout_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn req_timeout_count(&self) -> u64 {
        self.req_timeout_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn repl_timeout_count(&self) -> u64 {
        self.repl_timeout_count.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_txn_timeout_count(&self) {
        self.txn_timeout_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_req_timeout_count(&self) {
        self.req_timeout_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_repl_timeout_count(&self) {
        self.repl_timeout_count.fetch_add(1, Ordering::Relaxed);
    }

    /// The AUTO-mode scratch session, if the most recent `put` used it.
    #[must_use]
    pub fn auto_context(&self) -> Option<&Session> {
        self.auto_context.as_ref()
    }

    // -- Session state machine (spec.md §4.2) -------------------------------

    pub fn put(
        &mut self,
        maps: &mut GroupMaps,
        config: &TxnManagerConfig,
        params: PutParams,
    ) -> Result<(), DomainError> {
        let PutParams {
            client_id,
            container_id,
            statement_id,
            txn_timeout_interval_requested_sec,
            now,
            em_now,
            get_mode,
            txn_mode,
            is_update_stmt,
            is_redo,
            explicit_txn_id,
        } = params;

        let clamped_timeout = config.clamp_txn_timeout(txn_timeout_interval_requested_sec);
        let stable = crate::config::STABLE_TXN_TIMEOUT_SEC;
        let new_req_expire_time = em_now + i64::from(clamped_timeout.max(stable)) * 1_000;

        match get_mode {
            GetMode::Create => {
                if maps.sessions.get_ref(&client_id).is_some() {
                    return Err(DomainError::SessionUuidUnmatched {
                        partition_id: self.pid,
                        client_id,
                    });
                }
                if txn_mode == TxnMode::NoAutoCommitContinue {
                    return Err(DomainError::TransactionModeInvalid {
                        partition_id: self.pid,
                        client_id,
                    });
                }
                let session = Session::new(
                    client_id,
                    self.pid,
                    container_id,
                    new_req_expire_time,
                    clamped_timeout,
                );
                maps.sessions
                    .create(client_id, session, new_req_expire_time)
                    .expect("checked above that the key is absent");
                self.auto_context = None;
            }
            GetMode::Get => {
                let session =
                    maps.sessions
                        .get(&client_id)
                        .ok_or(DomainError::ContextNotFound {
                            partition_id: self.pid,
                            client_id,
                        })?;
                session.context_expire_time = new_req_expire_time;
            }
            GetMode::Put => {
                if maps.sessions.get_ref(&client_id).is_none() {
                    let session = Session::new(
                        client_id,
                        self.pid,
                        container_id,
                        new_req_expire_time,
                        clamped_timeout,
                    );
                    maps.sessions
                        .create(client_id, session, new_req_expire_time)
                        .expect("checked above that the key is absent");
                } else {
                    let session = maps.sessions.get(&client_id).expect("just checked present");
                    session.context_expire_time = new_req_expire_time;
                }
            }
            GetMode::Auto => {
                if txn_mode != TxnMode::AutoCommit {
                    return Err(DomainError::TransactionModeInvalid {
                        partition_id: self.pid,
                        client_id,
                    });
                }
                self.auto_context = Some(Session::new(
                    client_id,
                    self.pid,
                    container_id,
                    new_req_expire_time,
                    clamped_timeout,
                ));
            }
        }

        // Statement-start bookkeeping (wall-clock) and idempotence checks,
        // run against whichever session this put just touched.
        if get_mode == GetMode::Auto {
            let session = self.auto_context.as_mut().expect("AUTO branch just set it");
            session.statement_start_time = now;
            session.statement_expire_time = now + i64::from(session.txn_timeout_interval_seconds);
        } else {
            let session = maps
                .sessions
                .get(&client_id)
                .expect("session was just created or fetched above");
            session.statement_start_time = now;
            session.statement_expire_time = now + i64::from(session.txn_timeout_interval_seconds);
            if get_mode == GetMode::Get && !is_redo {
                session.check_statement_already_executed(statement_id, is_update_stmt)?;
                session.check_statement_continuous_in_transaction(statement_id, txn_mode)?;
            }
            if is_update_stmt {
                session.last_statement_id = statement_id;
            }
        }

        // Transaction transition (spec.md §4.2 transition table).
        let is_active = if get_mode == GetMode::Auto {
            self.auto_context.as_ref().unwrap().is_active_transaction()
        } else {
            maps.sessions
                .get_ref(&client_id)
                .unwrap()
                .is_active_transaction()
        };

        match txn_mode {
            TxnMode::AutoCommit => {
                if is_active {
                    let txn_id = if get_mode == GetMode::Auto {
                        self.auto_context.as_ref().unwrap().txn.txn_id()
                    } else {
                        maps.sessions.get_ref(&client_id).unwrap().txn.txn_id()
                    }
                    .unwrap_or(AUTO_COMMIT_TXNID);
                    return Err(DomainError::TransactionAlreadyBegin {
                        partition_id: self.pid,
                        client_id,
                        txn_id,
                    });
                }
                // The statement begins and commits within this single call:
                // the session's transaction never becomes visible as ACTIVE.
            }
            TxnMode::NoAutoCommitBegin => {
                if !is_active {
                    let assigned =
                        explicit_txn_id.unwrap_or_else(|| self.assign_new_transaction_id());
                    self.begin_on_map(maps, get_mode, client_id, assigned, em_now);
                }
                // else: silently continue, per spec.md §4.2.
            }
            TxnMode::NoAutoCommitContinue => {
                if !is_active {
                    return Err(DomainError::TransactionNotFound {
                        partition_id: self.pid,
                        client_id,
                    });
                }
            }
            TxnMode::NoAutoCommitBeginOrContinue => {
                if !is_active {
                    let assigned =
                        explicit_txn_id.unwrap_or_else(|| self.assign_new_transaction_id());
                    self.begin_on_map(maps, get_mode, client_id, assigned, em_now);
                }
            }
        }

        Ok(())
    }

    /// Installs the active-transaction map entry, marks the session ACTIVE,
    /// and re-registers the session map's schedule at the transaction's
    /// expiry, per spec.md §4.2 "`begin(txn_id, em_now)`".
    fn begin_on_map(
        &mut self,
        maps: &mut GroupMaps,
        get_mode: GetMode,
        client_id: ClientId,
        txn_id: TxnId,
        em_now: EmTime,
    ) {
        let txn_timeout_interval_seconds = if get_mode == GetMode::Auto {
            self.auto_context.as_ref().unwrap().txn_timeout_interval_seconds
        } else {
            maps.sessions
                .get_ref(&client_id)
                .unwrap()
                .txn_timeout_interval_seconds
        };
        let txn_expire_time = em_now + i64::from(txn_timeout_interval_seconds) * 1_000;

        if get_mode != GetMode::Auto {
            let key = ActiveTxnKey {
                partition_id: self.pid,
                txn_id,
            };
            maps.active_txns
                .create_no_expire(key, client_id)
                .expect("txn id collision in active-transaction map violates monotonicity");
        }

        let session = if get_mode == GetMode::Auto {
            self.auto_context.as_mut().unwrap()
        } else {
            maps.sessions.get(&client_id).unwrap()
        };
        session.txn = TransactionState::Active {
            txn_id,
            txn_start_time: em_now,
            txn_expire_time,
        };

        if get_mode != GetMode::Auto {
            maps.sessions.update(&client_id, txn_expire_time);
        }
        if txn_id > self.next_txn_id {
            self.next_txn_id = txn_id;
        }
    }

    /// Standalone `begin` verb (spec.md §6): a no-op if already active,
    /// otherwise assigns (or uses the supplied) transaction id and begins.
    pub fn begin(
        &mut self,
        maps: &mut GroupMaps,
        client_id: ClientId,
        explicit_txn_id: Option<TxnId>,
        em_now: EmTime,
    ) -> Result<TxnId, DomainError> {
        let session = maps
            .sessions
            .get_ref(&client_id)
            .ok_or(DomainError::ContextNotFound {
                partition_id: self.pid,
                client_id,
            })?;
        if let Some(txn_id) = session.txn.txn_id() {
            return Ok(txn_id);
        }
        let txn_id = explicit_txn_id.unwrap_or_else(|| self.assign_new_transaction_id());
        self.begin_on_map(maps, GetMode::Get, client_id, txn_id, em_now);
        Ok(txn_id)
    }

    /// Validates that `client_id`'s session has an active transaction that
    /// may legally be ended via `kind`. Does not mutate state.
    pub fn check_can_end_transaction(
        &self,
        maps: &GroupMaps,
        client_id: ClientId,
        kind: EndKind,
    ) -> Result<(), DomainError> {
        let session = maps
            .sessions
            .get_ref(&client_id)
            .ok_or(DomainError::ContextNotFound {
                partition_id: self.pid,
                client_id,
            })?;
        if session.is_active_transaction() {
            Ok(())
        } else {
            Err(match kind {
                EndKind::Commit => DomainError::TransactionCommitNotAllowed {
                    partition_id: self.pid,
                    client_id,
                },
                EndKind::Abort => DomainError::TransactionAbortNotAllowed {
                    partition_id: self.pid,
                    client_id,
                },
            })
        }
    }

    /// Removes the active-transaction map entry and marks the session
    /// INACTIVE. Caller (`TransactionManager`) must have already validated
    /// with [`Partition::check_can_end_transaction`] and invoked the
    /// container collaborator's `commit`/`abort`.
    pub fn end_transaction_unchecked(&mut self, maps: &mut GroupMaps, client_id: ClientId) {
        let Some(session) = maps.sessions.get(&client_id) else {
            return;
        };
        if let TransactionState::Active { txn_id, .. } = session.txn {
            session.txn = TransactionState::Inactive;
            maps.active_txns.remove(&ActiveTxnKey {
                partition_id: self.pid,
                txn_id,
            });
        }
    }

    #[must_use]
    pub fn is_active_transaction(&self, maps: &GroupMaps, txn_id: TxnId) -> bool {
        maps.active_txns
            .get_ref(&ActiveTxnKey {
                partition_id: self.pid,
                txn_id,
            })
            .is_some()
    }

    // -- Replication follow-ups (spec.md §4.3) ------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn replication_put(
        &mut self,
        maps: &mut GroupMaps,
        client_id: ClientId,
        container_id: ContainerId,
        statement_type: crate::replication::StatementType,
        statement_id: StatementId,
        node_descriptor: crate::ids::NodeDescriptor,
        replication_timeout_interval_sec: u32,
        em_now: EmTime,
    ) -> ReplicationId {
        self.next_replication_id += 1;
        let replication_id = self.next_replication_id;
        let key = ReplicationKey {
            partition_id: self.pid,
            replication_id,
        };
        let expire_time = em_now + i64::from(replication_timeout_interval_sec) * 1_000;
        let ctx = ReplicationContext::new(
            replication_id,
            statement_type,
            client_id,
            self.pid,
            container_id,
            statement_id,
            node_descriptor,
            expire_time,
        );
        maps.replications
            .create(key, ctx, expire_time)
            .expect("replication id collision violates monotonicity");
        replication_id
    }

    pub fn replication_get<'a>(
        &self,
        maps: &'a mut GroupMaps,
        replication_id: ReplicationId,
    ) -> Result<&'a mut ReplicationContext, DomainError> {
        maps.replications
            .get(&ReplicationKey {
                partition_id: self.pid,
                replication_id,
            })
            .ok_or(DomainError::ReplicationNotFound {
                partition_id: self.pid,
                replication_id,
            })
    }

    pub fn replication_remove(&self, maps: &mut GroupMaps, replication_id: ReplicationId) {
        maps.replications.remove(&ReplicationKey {
            partition_id: self.pid,
            replication_id,
        });
    }

    // -- Backup / restore (spec.md §4.2) ------------------------------------

    pub fn backup_active_context(
        &self,
        maps: &GroupMaps,
    ) -> Result<(TxnId, Vec<BackedUpContext>), DomainError> {
        let mut out = Vec::new();
        for (key, client_id) in maps.active_txns.cursor() {
            if key.partition_id != self.pid {
                continue;
            }
            let session =
                maps.sessions
                    .get_ref(client_id)
                    .ok_or(DomainError::ContextNotFound {
                        partition_id: self.pid,
                        client_id: *client_id,
                    })?;
            out.push(BackedUpContext {
                client_id: *client_id,
                txn_id: key.txn_id,
                container_id: session.container_id,
                last_statement_id: session.last_statement_id,
                txn_timeout_interval_seconds: session.txn_timeout_interval_seconds,
            });
        }
        Ok((self.next_txn_id, out))
    }

    /// Drops every entry in the three maps belonging to this partition.
    fn clear_from_maps(&self, maps: &mut GroupMaps) {
        let session_keys: Vec<ClientId> = maps
            .sessions
            .cursor()
            .filter(|(_, s)| s.partition_id == self.pid)
            .map(|(k, _)| *k)
            .collect();
        for key in session_keys {
            maps.sessions.remove(&key);
        }
        let active_keys: Vec<ActiveTxnKey> = maps
            .active_txns
            .cursor()
            .filter(|(k, _)| k.partition_id == self.pid)
            .map(|(k, _)| *k)
            .collect();
        for key in active_keys {
            maps.active_txns.remove(&key);
        }
        let repl_keys: Vec<ReplicationKey> = maps
            .replications
            .cursor()
            .filter(|(k, _)| k.partition_id == self.pid)
            .map(|(k, _)| *k)
            .collect();
        for key in repl_keys {
            maps.replications.remove(&key);
        }
    }

    pub fn restore_active_context(
        &mut self,
        maps: &mut GroupMaps,
        max_txn_id: TxnId,
        contexts: &[BackedUpContext],
        em_now: EmTime,
    ) {
        self.clear_from_maps(maps);
        self.next_txn_id = 0;
        for ctx in contexts {
            let expire_time = em_now
                + i64::from(
                    ctx.txn_timeout_interval_seconds
                        .max(crate::config::STABLE_TXN_TIMEOUT_SEC),
                ) * 1_000;
            let mut session = Session::new(
                ctx.client_id,
                self.pid,
                ctx.container_id,
                expire_time,
                ctx.txn_timeout_interval_seconds,
            );
            session.last_statement_id = ctx.last_statement_id;
            maps.sessions
                .create(ctx.client_id, session, expire_time)
                .expect("restore target partition was just cleared");
            self.begin_on_map(maps, GetMode::Get, ctx.client_id, ctx.txn_id, em_now);
        }
        self.next_txn_id = max_txn_id;
    }

    pub(crate) fn clear_for_removal(&self, maps: &mut GroupMaps) {
        self.clear_from_maps(maps);
    }
}

/// One row of the backup/restore snapshot (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackedUpContext {
    pub client_id: ClientId,
    pub txn_id: TxnId,
    pub container_id: ContainerId,
    pub last_statement_id: StatementId,
    pub txn_timeout_interval_seconds: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn params(client_id: ClientId, get_mode: GetMode, txn_mode: TxnMode) -> PutParams {
        PutParams {
            client_id,
            container_id: ContainerId(1),
            statement_id: 1,
            txn_timeout_interval_requested_sec: 10,
            now: 0,
            em_now: 1_000,
            get_mode,
            txn_mode,
            is_update_stmt: false,
            is_redo: false,
            explicit_txn_id: None,
        }
    }

    #[test]
    fn create_then_get_round_trip() {
        let mut maps = GroupMaps::new();
        let cfg = TxnManagerConfig::default();
        let mut p = Partition::new(0);
        let client = ClientId(Uuid::new_v4());

        p.put(&mut maps, &cfg, params(client, GetMode::Create, TxnMode::AutoCommit))
            .unwrap();
        assert!(maps.sessions.get_ref(&client).is_some());

        let err = p
            .put(&mut maps, &cfg, params(client, GetMode::Create, TxnMode::AutoCommit))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::SessionUuidUnmatched {
                partition_id: 0,
                client_id: client
            }
        );
    }

    #[test]
    fn get_missing_session_is_context_not_found() {
        let mut maps = GroupMaps::new();
        let cfg = TxnManagerConfig::default();
        let mut p = Partition::new(0);
        let client = ClientId(Uuid::new_v4());
        let err = p
            .put(&mut maps, &cfg, params(client, GetMode::Get, TxnMode::AutoCommit))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::ContextNotFound {
                partition_id: 0,
                client_id: client
            }
        );
    }

    #[test]
    fn no_auto_commit_begin_installs_active_transaction() {
        let mut maps = GroupMaps::new();
        let cfg = TxnManagerConfig::default();
        let mut p = Partition::new(0);
        let client = ClientId(Uuid::new_v4());

        p.put(
            &mut maps,
            &cfg,
            params(client, GetMode::Create, TxnMode::NoAutoCommitBegin),
        )
        .unwrap();
        let session = maps.sessions.get_ref(&client).unwrap();
        assert!(session.is_active_transaction());
        let txn_id = session.txn.txn_id().unwrap();
        assert!(p.is_active_transaction(&maps, txn_id));
    }

    #[test]
    fn continue_without_active_transaction_is_rejected() {
        let mut maps = GroupMaps::new();
        let cfg = TxnManagerConfig::default();
        let mut p = Partition::new(0);
        let client = ClientId(Uuid::new_v4());
        p.put(&mut maps, &cfg, params(client, GetMode::Create, TxnMode::AutoCommit))
            .unwrap();
        let err = p
            .put(
                &mut maps,
                &cfg,
                params(client, GetMode::Get, TxnMode::NoAutoCommitContinue),
            )
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::TransactionNotFound {
                partition_id: 0,
                client_id: client
            }
        );
    }

    #[test]
    fn commit_requires_active_transaction() {
        let mut maps = GroupMaps::new();
        let cfg = TxnManagerConfig::default();
        let mut p = Partition::new(0);
        let client = ClientId(Uuid::new_v4());
        p.put(&mut maps, &cfg, params(client, GetMode::Create, TxnMode::AutoCommit))
            .unwrap();

        assert_eq!(
            p.check_can_end_transaction(&maps, client, EndKind::Commit),
            Err(DomainError::TransactionCommitNotAllowed {
                partition_id: 0,
                client_id: client
            })
        );

        p.put(
            &mut maps,
            &cfg,
            params(client, GetMode::Get, TxnMode::NoAutoCommitBegin),
        )
        .unwrap();
        assert!(p
            .check_can_end_transaction(&maps, client, EndKind::Commit)
            .is_ok());
        p.end_transaction_unchecked(&mut maps, client);
        assert!(!maps.sessions.get_ref(&client).unwrap().is_active_transaction());
    }

    #[test]
    fn backup_and_restore_round_trip() {
        let mut maps = GroupMaps::new();
        let cfg = TxnManagerConfig::default();
        let mut p = Partition::new(0);
        let client = ClientId(Uuid::new_v4());
        p.put(
            &mut maps,
            &cfg,
            params(client, GetMode::Create, TxnMode::NoAutoCommitBegin),
        )
        .unwrap();

        let (max_txn_id, contexts) = p.backup_active_context(&maps).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(max_txn_id, p.next_txn_id());

        let mut p2 = Partition::new(0);
        let mut maps2 = GroupMaps::new();
        p2.restore_active_context(&mut maps2, max_txn_id, &contexts, 5_000);
        assert_eq!(p2.next_txn_id(), max_txn_id);
        assert!(p2.is_active_transaction(&maps2, contexts[0].txn_id));
    }

    #[test]
    fn replication_put_get_remove() {
        let mut maps = GroupMaps::new();
        let mut p = Partition::new(0);
        let client = ClientId(Uuid::new_v4());
        let rid = p.replication_put(
            &mut maps,
            client,
            ContainerId(1),
            crate::replication::StatementType(0),
            1,
            crate::ids::NodeDescriptor("node-a".into()),
            30,
            1_000,
        );
        assert!(p.replication_get(&mut maps, rid).is_ok());
        p.replication_remove(&mut maps, rid);
        assert!(matches!(
            p.replication_get(&mut maps, rid),
            Err(DomainError::ReplicationNotFound { .. })
        ));
    }
}
