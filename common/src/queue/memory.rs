// In-process bounded channel with transactional take

use crate::errors::QueueError;
use crate::models::Record;
use crate::queue::channel::{Channel, Transaction, TxnState};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded FIFO shared between producers and the sink.
///
/// Cloning yields another handle onto the same queue.
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<Mutex<VecDeque<Record>>>,
    capacity: usize,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a record to the tail of the queue
    pub fn put(&self, record: impl Into<Record>) -> Result<(), QueueError> {
        let mut queue = lock(&self.inner);
        if queue.len() >= self.capacity {
            return Err(QueueError::Full(self.capacity));
        }
        queue.push_back(record.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    type Txn = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, QueueError> {
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            taken: Vec::new(),
            state: TxnState::Open,
        })
    }
}

pub struct MemoryTransaction {
    inner: Arc<Mutex<VecDeque<Record>>>,
    taken: Vec<Record>,
    state: TxnState,
}

impl MemoryTransaction {
    fn restore_taken(&mut self) {
        let mut queue = lock(&self.inner);
        // Push back in reverse so the original head order is preserved
        for record in self.taken.drain(..).rev() {
            queue.push_front(record);
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn take(&mut self) -> Result<Option<Record>, QueueError> {
        self.state.ensure_open()?;
        let record = lock(&self.inner).pop_front();
        if let Some(record) = &record {
            self.taken.push(record.clone());
        }
        Ok(record)
    }

    async fn commit(&mut self) -> Result<(), QueueError> {
        self.state.ensure_open()?;
        debug!(records = self.taken.len(), "Committing memory transaction");
        self.taken.clear();
        self.state = TxnState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), QueueError> {
        self.state.ensure_open()?;
        debug!(records = self.taken.len(), "Rolling back memory transaction");
        self.restore_taken();
        self.state = TxnState::RolledBack;
        Ok(())
    }

    async fn close(&mut self) {
        if self.state == TxnState::Open {
            warn!("Closing unfinished memory transaction, rolling back");
            self.restore_taken();
        }
        self.state = TxnState::Closed;
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state == TxnState::Open {
            self.restore_taken();
        }
    }
}

fn lock(inner: &Mutex<VecDeque<Record>>) -> MutexGuard<'_, VecDeque<Record>> {
    // A poisoned queue still holds consistent records
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
