//! Session (`TransactionContext`) and its embedded transaction sub-state.
//!
//! See spec.md §3 "Session (TransactionContext)" and "Transaction
//! (embedded)" for the full invariant list this module enforces.

use crate::error::DomainError;
use crate::ids::{ClientId, ContainerId, EmTime, PartitionId, StatementId, TxnId, WallTime};

/// How an existing session should be looked up / created by `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetMode {
    /// Use a partition-local stub with no map entry. Only valid together
    /// with `TxnMode::AutoCommit`.
    Auto,
    /// The session must not already exist.
    Create,
    /// The session must already exist.
    Get,
    /// Insert if missing, otherwise refresh the existing session's expiry.
    Put,
}

/// How the statement should affect the session's embedded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    AutoCommit,
    NoAutoCommitBegin,
    NoAutoCommitContinue,
    NoAutoCommitBeginOrContinue,
}

/// The embedded transaction's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Inactive,
    Active {
        txn_id: TxnId,
        txn_start_time: EmTime,
        txn_expire_time: EmTime,
    },
}

impl TransactionState {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active { .. })
    }

    #[must_use]
    pub fn txn_id(&self) -> Option<TxnId> {
        match self {
            TransactionState::Active { txn_id, .. } => Some(*txn_id),
            TransactionState::Inactive => None,
        }
    }

    #[must_use]
    pub fn txn_expire_time(&self) -> Option<EmTime> {
        match self {
            TransactionState::Active {
                txn_expire_time, ..
            } => Some(*txn_expire_time),
            TransactionState::Inactive => None,
        }
    }
}

/// A per-client session (`TransactionContext` in the original source).
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: ClientId,
    pub partition_id: PartitionId,
    pub container_id: ContainerId,
    pub last_statement_id: StatementId,
    pub context_expire_time: EmTime,
    pub statement_start_time: WallTime,
    pub statement_expire_time: WallTime,
    pub txn_timeout_interval_seconds: u32,
    pub txn: TransactionState,
}

impl Session {
    pub(crate) fn new(
        client_id: ClientId,
        partition_id: PartitionId,
        container_id: ContainerId,
        context_expire_time: EmTime,
        txn_timeout_interval_seconds: u32,
    ) -> Self {
        Self {
            client_id,
            partition_id,
            container_id,
            last_statement_id: 0,
            context_expire_time,
            statement_start_time: 0,
            statement_expire_time: 0,
            txn_timeout_interval_seconds,
            txn: TransactionState::Inactive,
        }
    }

    #[must_use]
    pub fn is_active_transaction(&self) -> bool {
        self.txn.is_active()
    }

    /// The expiry that should currently be installed in the session map's
    /// index: the transaction's expiry while ACTIVE, else the context's.
    #[must_use]
    pub fn effective_expire_time(&self) -> EmTime {
        self.txn
            .txn_expire_time()
            .unwrap_or(self.context_expire_time)
    }

    /// spec.md §4.2 "Already-executed check". Callable independently of
    /// `put` so a replayed statement that already located its session by
    /// other means can still run the idempotence check.
    pub fn check_statement_already_executed(
        &self,
        statement_id: StatementId,
        is_update_stmt: bool,
    ) -> Result<(), DomainError> {
        if is_update_stmt && statement_id <= self.last_statement_id {
            return Err(DomainError::StatementAlreadyExecuted {
                partition_id: self.partition_id,
                client_id: self.client_id,
                statement_id,
                last_statement_id: self.last_statement_id,
            });
        }
        Ok(())
    }

    /// spec.md §4.2 "Continuity check".
    pub fn check_statement_continuous_in_transaction(
        &self,
        statement_id: StatementId,
        txn_mode: TxnMode,
    ) -> Result<(), DomainError> {
        if statement_id > self.last_statement_id + 1 && txn_mode == TxnMode::NoAutoCommitContinue {
            return Err(DomainError::StatementInvalid {
                partition_id: self.partition_id,
                client_id: self.client_id,
                statement_id,
                last_statement_id: self.last_statement_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn session() -> Session {
        Session::new(ClientId(Uuid::nil()), 0, ContainerId(1), 1_000, 30)
    }

    #[test]
    fn fresh_session_is_inactive_with_zero_last_statement() {
        let s = session();
        assert!(!s.is_active_transaction());
        assert_eq!(s.last_statement_id, 0);
        assert_eq!(s.effective_expire_time(), 1_000);
    }

    #[test]
    fn effective_expire_time_follows_active_transaction() {
        let mut s = session();
        s.txn = TransactionState::Active {
            txn_id: 1,
            txn_start_time: 1_000,
            txn_expire_time: 31_000,
        };
        assert_eq!(s.effective_expire_time(), 31_000);
    }

    #[test]
    fn already_executed_check_only_fires_for_update_statements_at_or_below_last() {
        let mut s = session();
        s.last_statement_id = 2;
        assert!(s.check_statement_already_executed(2, true).is_err());
        assert!(s.check_statement_already_executed(1, true).is_err());
        assert!(s.check_statement_already_executed(3, true).is_ok());
        // Non-update statements are never rejected by this check.
        assert!(s.check_statement_already_executed(2, false).is_ok());
    }

    #[test]
    fn continuity_check_only_fires_in_continue_mode_with_a_gap() {
        let mut s = session();
        s.last_statement_id = 2;
        assert!(s
            .check_statement_continuous_in_transaction(5, TxnMode::NoAutoCommitContinue)
            .is_err());
        assert!(s
            .check_statement_continuous_in_transaction(3, TxnMode::NoAutoCommitContinue)
            .is_ok());
        // Gaps are only an error in NO_AUTO_COMMIT_CONTINUE mode.
        assert!(s
            .check_statement_continuous_in_transaction(5, TxnMode::AutoCommit)
            .is_ok());
    }
}
