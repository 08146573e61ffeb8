//! Error taxonomy: domain errors callers are expected to handle, plus a
//! wrapping type for unexpected internal failures.
//!
//! Following spec.md §7: domain errors are part of the public contract, and
//! *statement-already-executed* / *context-not-found* / *replication-not-found*
//! in particular must keep their own identity so a retry can be answered
//! without re-executing the statement.

use crate::ids::{ClientId, PartitionId, ReplicationId, StatementId, TxnId};

/// Errors the caller is expected to handle as part of the normal protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("context not found (pId={partition_id}, clientId={client_id})")]
    ContextNotFound {
        partition_id: PartitionId,
        client_id: ClientId,
    },

    #[error("replication not found (pId={partition_id}, replicationId={replication_id})")]
    ReplicationNotFound {
        partition_id: PartitionId,
        replication_id: ReplicationId,
    },

    #[error("statement already executed (pId={partition_id}, clientId={client_id}, stmtId={statement_id}, lastStmtId={last_statement_id})")]
    StatementAlreadyExecuted {
        partition_id: PartitionId,
        client_id: ClientId,
        statement_id: StatementId,
        last_statement_id: StatementId,
    },

    #[error("statement invalid, not continuous (pId={partition_id}, clientId={client_id}, stmtId={statement_id}, lastStmtId={last_statement_id})")]
    StatementInvalid {
        partition_id: PartitionId,
        client_id: ClientId,
        statement_id: StatementId,
        last_statement_id: StatementId,
    },

    #[error("transaction already begun (pId={partition_id}, clientId={client_id}, txnId={txn_id})")]
    TransactionAlreadyBegin {
        partition_id: PartitionId,
        client_id: ClientId,
        txn_id: TxnId,
    },

    #[error("transaction not found (pId={partition_id}, clientId={client_id})")]
    TransactionNotFound {
        partition_id: PartitionId,
        client_id: ClientId,
    },

    #[error("transaction commit not allowed, no active transaction (pId={partition_id}, clientId={client_id})")]
    TransactionCommitNotAllowed {
        partition_id: PartitionId,
        client_id: ClientId,
    },

    #[error("transaction abort not allowed, no active transaction (pId={partition_id}, clientId={client_id})")]
    TransactionAbortNotAllowed {
        partition_id: PartitionId,
        client_id: ClientId,
    },

    #[error("transaction mode invalid (pId={partition_id}, clientId={client_id})")]
    TransactionModeInvalid {
        partition_id: PartitionId,
        client_id: ClientId,
    },

    #[error("creation mode invalid (pId={partition_id}, clientId={client_id})")]
    CreationModeInvalid {
        partition_id: PartitionId,
        client_id: ClientId,
    },

    #[error("session uuid unmatched, already exists (pId={partition_id}, clientId={client_id})")]
    SessionUuidUnmatched {
        partition_id: PartitionId,
        client_id: ClientId,
    },
}

/// Top-level error returned by `TransactionManager` operations: either a
/// `DomainError` the caller is meant to branch on, or an internal failure
/// (from the allocator, the maps, or the container collaborator) wrapped
/// with operation context.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("internal error (pId={partition_id:?}, clientId={client_id:?}): {source}")]
    Internal {
        partition_id: Option<PartitionId>,
        client_id: Option<ClientId>,
        #[source]
        source: anyhow::Error,
    },
}

impl CoreError {
    #[must_use]
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            CoreError::Domain(e) => Some(e),
            CoreError::Internal { .. } => None,
        }
    }

    #[must_use]
    pub fn internal(
        partition_id: Option<PartitionId>,
        client_id: Option<ClientId>,
        source: anyhow::Error,
    ) -> Self {
        CoreError::Internal {
            partition_id,
            client_id,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
