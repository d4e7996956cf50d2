use crate::domain::ids::LoanId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per loan id.
///
/// Every read-modify-write of a loan's balance or overdue episode holds the
/// loan's guard; different loans never contend.
#[derive(Default, Clone)]
pub struct LoanLocks {
    locks: Arc<DashMap<LoanId, Arc<Mutex<()>>>>,
}

impl LoanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, loan_id: LoanId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(loan_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drops entries nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_loan_is_serialized() {
        let locks = LoanLocks::new();
        let loan = LoanId::new();
        let guard = locks.acquire(loan).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _g = contender.acquire(loan).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_loans_do_not_contend() {
        let locks = LoanLocks::new();
        let _a = locks.acquire(LoanId::new()).await;
        let _b = locks.acquire(LoanId::new()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = LoanLocks::new();
        let held = locks.acquire(LoanId::new()).await;
        drop(locks.acquire(LoanId::new()).await);
        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
