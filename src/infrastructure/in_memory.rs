use crate::domain::borrower::{AuditEntry, BorrowerStanding};
use crate::domain::collection::CollectionWorkflow;
use crate::domain::ids::{BorrowerId, LoanId, OverdueId, ScheduledPaymentId, WorkflowId};
use crate::domain::loan::{LoanRecord, LoanStatus};
use crate::domain::overdue::OverdueRecord;
use crate::domain::payment::{PaymentRecord, ScheduledPayment, ScheduledPaymentStatus};
use crate::domain::ports::{
    BorrowerStore, CollectionStore, LoanStore, OverdueStore, PaymentCommit, PaymentStore,
};
use crate::error::{LoanError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    loans: HashMap<LoanId, LoanRecord>,
    payments: Vec<PaymentRecord>,
    scheduled: HashMap<ScheduledPaymentId, ScheduledPayment>,
    overdue: HashMap<OverdueId, OverdueRecord>,
    workflows: HashMap<WorkflowId, CollectionWorkflow>,
    standings: HashMap<BorrowerId, BorrowerStanding>,
    audit: Vec<AuditEntry>,
    unreadable: HashSet<LoanId>,
}

/// A thread-safe in-memory implementation of every persistence port.
///
/// All tables sit behind one `Arc<RwLock<..>>`, so a payment commit is a
/// single write-locked section and is trivially atomic. `Clone` shares the
/// underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a storage error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes reads of one loan and of its scheduled payments fail until reset.
    pub async fn set_unreadable(&self, loan_id: LoanId, unreadable: bool) {
        let mut tables = self.tables.write().await;
        if unreadable {
            tables.unreadable.insert(loan_id);
        } else {
            tables.unreadable.remove(&loan_id);
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LoanError::Storage("in-memory store is read-only".to_string()));
        }
        Ok(())
    }
}

fn check_readable(tables: &Tables, loan_id: LoanId) -> Result<()> {
    if tables.unreadable.contains(&loan_id) {
        return Err(LoanError::Storage(format!("loan {loan_id} is unreadable")));
    }
    Ok(())
}

#[async_trait]
impl LoanStore for InMemoryRepository {
    async fn save_loan(&self, loan: LoanRecord) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.loans.insert(loan.id(), loan);
        Ok(())
    }

    async fn get_loan(&self, id: LoanId) -> Result<Option<LoanRecord>> {
        let tables = self.tables.read().await;
        check_readable(&tables, id)?;
        Ok(tables.loans.get(&id).cloned())
    }

    async fn loans_by_borrower(&self, borrower: BorrowerId) -> Result<Vec<LoanRecord>> {
        let tables = self.tables.read().await;
        let mut loans: Vec<_> = tables
            .loans
            .values()
            .filter(|l| l.borrower() == borrower)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.created_at());
        Ok(loans)
    }

    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<LoanRecord>> {
        let tables = self.tables.read().await;
        let mut loans: Vec<_> = tables
            .loans
            .values()
            .filter(|l| l.status() == status)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.created_at());
        Ok(loans)
    }

    async fn commit_payment(&self, commit: PaymentCommit) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.loans.insert(commit.loan.id(), commit.loan);
        tables.payments.push(commit.payment);
        if let Some(record) = commit.overdue {
            tables.overdue.insert(record.id, record);
        }
        if let Some(scheduled) = commit.scheduled {
            tables.scheduled.insert(scheduled.id, scheduled);
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryRepository {
    async fn payments_for_loan(&self, loan_id: LoanId) -> Result<Vec<PaymentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.paid_at >= from && p.paid_at < to)
            .cloned()
            .collect())
    }

    async fn save_scheduled(&self, payment: ScheduledPayment) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.scheduled.insert(payment.id, payment);
        Ok(())
    }

    async fn get_scheduled(&self, id: ScheduledPaymentId) -> Result<Option<ScheduledPayment>> {
        let tables = self.tables.read().await;
        let scheduled = tables.scheduled.get(&id).cloned();
        if let Some(payment) = &scheduled {
            check_readable(&tables, payment.loan_id)?;
        }
        Ok(scheduled)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPayment>> {
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .scheduled
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.scheduled_for, s.created_at));
        Ok(due)
    }

    async fn scheduled_for_loan(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>> {
        let tables = self.tables.read().await;
        let mut scheduled: Vec<_> = tables
            .scheduled
            .values()
            .filter(|s| s.loan_id == loan_id)
            .cloned()
            .collect();
        scheduled.sort_by_key(|s| {
            (
                s.status != ScheduledPaymentStatus::Pending,
                s.scheduled_for,
            )
        });
        Ok(scheduled)
    }
}

#[async_trait]
impl OverdueStore for InMemoryRepository {
    async fn save_overdue(&self, record: OverdueRecord) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.overdue.insert(record.id, record);
        Ok(())
    }

    async fn active_overdue(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .overdue
            .values()
            .find(|r| r.loan_id == loan_id && r.is_active())
            .cloned())
    }

    async fn overdue_records(&self) -> Result<Vec<OverdueRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables.overdue.values().cloned().collect();
        records.sort_by_key(|r| r.first_overdue_date);
        Ok(records)
    }
}

#[async_trait]
impl CollectionStore for InMemoryRepository {
    async fn save_workflow(&self, workflow: CollectionWorkflow) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn active_workflow(&self, loan_id: LoanId) -> Result<Option<CollectionWorkflow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .workflows
            .values()
            .find(|w| w.loan_id == loan_id && w.is_open())
            .cloned())
    }

    async fn workflows(&self) -> Result<Vec<CollectionWorkflow>> {
        let tables = self.tables.read().await;
        let mut workflows: Vec<_> = tables.workflows.values().cloned().collect();
        workflows.sort_by_key(|w| w.started_at);
        Ok(workflows)
    }
}

#[async_trait]
impl BorrowerStore for InMemoryRepository {
    async fn standing(&self, borrower: BorrowerId) -> Result<BorrowerStanding> {
        let tables = self.tables.read().await;
        Ok(tables.standings.get(&borrower).cloned().unwrap_or_default())
    }

    async fn set_standing(&self, borrower: BorrowerId, standing: BorrowerStanding) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.standings.insert(borrower, standing);
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.audit.push(entry);
        Ok(())
    }

    async fn audit_log(&self, borrower: Option<BorrowerId>) -> Result<Vec<AuditEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| borrower.is_none_or(|b| e.borrower == b))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::amortization::LoanTerms;
    use crate::domain::application::{CreditGrade, CreditSnapshot};
    use crate::domain::money::Money;
    use crate::domain::payment::{Allocation, PaymentChannel, PaymentMethod};
    use crate::domain::ids::PaymentId;
    use crate::domain::policy::LoanType;
    use rust_decimal_macros::dec;

    fn loan(borrower: BorrowerId) -> LoanRecord {
        let terms = LoanTerms::compute(dec!(1200), dec!(0), 12, dec!(0)).unwrap();
        LoanRecord::originate(
            borrower,
            LoanType::Credit,
            terms,
            "tools".to_string(),
            CreditSnapshot {
                score: 700,
                grade: CreditGrade::Good,
            },
            None,
            Utc::now(),
        )
    }

    fn payment(loan: &LoanRecord) -> PaymentRecord {
        PaymentRecord {
            id: PaymentId::new(),
            loan_id: loan.id(),
            borrower: loan.borrower(),
            offered: Money::new(dec!(100)),
            allocation: Allocation::default(),
            channel: PaymentChannel::Manual,
            method: PaymentMethod::BankBalance,
            balance_after: loan.current_balance(),
            installments_completed: 0,
            paid_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_loan_queries() {
        let repo = InMemoryRepository::new();
        let borrower = BorrowerId::new();
        let record = loan(borrower);
        repo.save_loan(record.clone()).await.unwrap();
        repo.save_loan(loan(BorrowerId::new())).await.unwrap();

        assert_eq!(repo.get_loan(record.id()).await.unwrap(), Some(record.clone()));
        assert_eq!(repo.loans_by_borrower(borrower).await.unwrap().len(), 1);
        assert_eq!(
            repo.loans_by_status(LoanStatus::PendingReview).await.unwrap().len(),
            2
        );
        assert!(repo.get_loan(LoanId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let repo = InMemoryRepository::new();
        let record = loan(BorrowerId::new());
        repo.save_loan(record.clone()).await.unwrap();

        repo.set_fail_writes(true);
        let commit = PaymentCommit {
            loan: record.clone(),
            payment: payment(&record),
            overdue: None,
            scheduled: None,
        };
        assert!(matches!(
            repo.commit_payment(commit).await,
            Err(LoanError::Storage(_))
        ));
        assert!(repo.payments_for_loan(record.id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_standing_defaults_to_good() {
        let repo = InMemoryRepository::new();
        assert!(repo.standing(BorrowerId::new()).await.unwrap().is_good());
    }
}
