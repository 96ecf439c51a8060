use crate::connection::Connection;
use crate::transaction::{TransactionHandler, TransactionId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared, mutable handle to a transaction.
pub type SharedTransaction<C> = Rc<RefCell<TransactionHandler<C>>>;

/// The live transactions of a server, in insertion order.
///
/// Ids are stored next to the handlers so removal never borrows a handler, which may be the
/// one currently ending itself.
pub struct TransactionPool<C = Connection> {
    transactions: Vec<(TransactionId, SharedTransaction<C>)>,
}

impl<C> TransactionPool<C> {
    pub fn new() -> Self {
        Self { transactions: Vec::new() }
    }

    pub fn insert(&mut self, id: TransactionId, transaction: SharedTransaction<C>) {
        self.transactions.push((id, transaction));
    }

    /// Removes the transaction `id`, `None` when it is not in the pool.
    pub fn remove(&mut self, id: TransactionId) -> Option<SharedTransaction<C>> {
        let index = self.transactions.iter().position(|(candidate, _)| *candidate == id)?;
        Some(self.transactions.remove(index).1)
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.transactions.iter().any(|(candidate, _)| *candidate == id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// The current transactions, safe to iterate while they end themselves.
    pub fn snapshot(&self) -> Vec<SharedTransaction<C>> {
        self.transactions.iter().map(|(_, transaction)| Rc::clone(transaction)).collect()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }
}

impl<C> Default for TransactionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TransactionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<TransactionId> = self.transactions.iter().map(|(id, _)| *id).collect();
        f.debug_struct("TransactionPool").field("ids", &ids).finish()
    }
}
