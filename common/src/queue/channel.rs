// Transactional channel abstraction over the upstream queue

use crate::errors::QueueError;
use crate::models::Record;
use async_trait::async_trait;

/// A queue the sink drains under transactional semantics
#[async_trait]
pub trait Channel: Send + Sync {
    type Txn: Transaction;

    /// Begin a new transaction against the queue
    async fn begin(&self) -> Result<Self::Txn, QueueError>;
}

/// One begin/commit-or-rollback cycle against a [`Channel`].
///
/// Records taken through a transaction are only removed from the queue on
/// `commit`; `rollback` makes them available for redelivery.
#[async_trait]
pub trait Transaction: Send {
    /// Take at most one record; `None` when the queue is currently empty
    async fn take(&mut self) -> Result<Option<Record>, QueueError>;

    async fn commit(&mut self) -> Result<(), QueueError>;

    async fn rollback(&mut self) -> Result<(), QueueError>;

    /// Release the transaction. Idempotent; an unfinished transaction is rolled back.
    async fn close(&mut self);
}

/// Lifecycle of a transaction, shared by the channel implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnState {
    Open,
    Committed,
    RolledBack,
    Closed,
}

impl TxnState {
    pub(crate) fn ensure_open(self) -> Result<(), QueueError> {
        match self {
            TxnState::Open => Ok(()),
            _ => Err(QueueError::TransactionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_open_transactions_accept_operations() {
        assert!(TxnState::Open.ensure_open().is_ok());

        for state in [TxnState::Committed, TxnState::RolledBack, TxnState::Closed] {
            assert!(matches!(
                state.ensure_open(),
                Err(QueueError::TransactionClosed)
            ));
        }
    }
}
