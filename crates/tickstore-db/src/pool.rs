//! Free list of reusable [`Transaction`]s.
//!
//! The pool grows to the high-water mark of transactions in flight and never
//! shrinks. A transaction is moved out on `acquire` and moved back on
//! `release`, so it can never be handed out while another owner holds it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::transaction::Transaction;

/// Reuse pool for [`Transaction`]s.
#[derive(Debug, Default)]
pub struct TransactionPool {
    free: Mutex<Vec<Transaction>>,
    created: AtomicU64,
    in_use: AtomicUsize,
}

impl TransactionPool {
    /// Create an empty pool.
    pub const fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Take an empty pending transaction, reusing a free one if available.
    pub fn acquire(&self) -> Transaction {
        let reused = self.lock_free().pop();
        self.in_use.fetch_add(1, Ordering::Relaxed);
        reused.unwrap_or_else(|| {
            let id = self.created.fetch_add(1, Ordering::Relaxed);
            debug!(transaction_id = id, "transaction pool grew");
            Transaction::new(id)
        })
    }

    /// Clear `transaction` and put it back on the free list.
    ///
    /// Rows should already have been notified. Any row still held reports
    /// [`WriteError::Discarded`](crate::WriteError::Discarded).
    pub fn release(&self, mut transaction: Transaction) {
        if !transaction.is_empty() {
            debug!(
                transaction_id = transaction.id(),
                rows = transaction.len(),
                "transaction released with unnotified rows"
            );
        }
        transaction.clear();
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        self.lock_free().push(transaction);
    }

    /// Transactions ever constructed.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Transactions waiting on the free list.
    pub fn free_len(&self) -> usize {
        self.lock_free().len()
    }

    /// Transactions currently acquired.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    fn lock_free(&self) -> MutexGuard<'_, Vec<Transaction>> {
        self.free.lock()
    }
}
