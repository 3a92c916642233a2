//! No-op transaction manager
//!
//! The remote auto-commits per statement, so there is nothing to commit
//! or roll back; tickets exist only to satisfy the host's interface.

use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionTicket(Uuid);

#[derive(Debug, Default)]
pub struct TransactionManager {
    active: Mutex<HashSet<TransactionTicket>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_transaction(&self) -> TransactionTicket {
        let ticket = TransactionTicket(Uuid::new_v4());
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ticket);
        ticket
    }

    pub fn commit(&self, ticket: TransactionTicket) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ticket);
    }

    pub fn rollback(&self, ticket: TransactionTicket) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ticket);
    }

    /// Nothing local to checkpoint.
    pub fn checkpoint(&self) {}

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_are_unique_and_dropped_on_commit() {
        let manager = TransactionManager::new();
        let first = manager.start_transaction();
        let second = manager.start_transaction();
        assert_ne!(first, second);
        assert_eq!(manager.active_count(), 2);

        manager.commit(first);
        assert_eq!(manager.active_count(), 1);
        manager.rollback(second);
        assert_eq!(manager.active_count(), 0);

        // Unknown tickets are a no-op either way.
        manager.commit(first);
        manager.rollback(second);
        manager.checkpoint();
        assert_eq!(manager.active_count(), 0);
    }
}
