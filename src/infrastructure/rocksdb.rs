use crate::domain::borrower::{AuditEntry, BorrowerStanding};
use crate::domain::collection::CollectionWorkflow;
use crate::domain::ids::{BorrowerId, LoanId, ScheduledPaymentId};
use crate::domain::loan::{LoanRecord, LoanStatus};
use crate::domain::overdue::OverdueRecord;
use crate::domain::payment::{PaymentRecord, ScheduledPayment, ScheduledPaymentStatus};
use crate::domain::ports::{
    BorrowerStore, CollectionStore, LoanStore, OverdueStore, PaymentCommit, PaymentStore,
};
use crate::error::{LoanError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const CF_LOANS: &str = "loans";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_SCHEDULED: &str = "scheduled";
pub const CF_OVERDUE: &str = "overdue";
pub const CF_WORKFLOWS: &str = "workflows";
pub const CF_STANDINGS: &str = "standings";
/// Append-only; keyed by a big-endian sequence number.
pub const CF_AUDIT: &str = "audit";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_LOANS,
    CF_PAYMENTS,
    CF_SCHEDULED,
    CF_OVERDUE,
    CF_WORKFLOWS,
    CF_STANDINGS,
    CF_AUDIT,
];

/// A persistent repository backed by RocksDB, one column family per table.
///
/// Values are JSON. Secondary lookups (by borrower, by status, by time
/// window) scan the owning column family. `Clone` shares the underlying
/// `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBRepository {
    db: Arc<DB>,
    next_audit: Arc<AtomicU64>,
}

impl RocksDBRepository {
    /// Opens or creates the database at `path`, creating missing column
    /// families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let next_audit = {
            let cf = db.cf_handle(CF_AUDIT).ok_or_else(|| missing_cf(CF_AUDIT))?;
            match db.iterator_cf(cf, IteratorMode::End).next() {
                Some(item) => {
                    let (key, _) = item?;
                    sequence(&key)? + 1
                }
                None => 0,
            }
        };

        Ok(Self {
            db: Arc::new(db),
            next_audit: Arc::new(AtomicU64::new(next_audit)),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| missing_cf(name))
    }

    fn put<T: Serialize>(&self, name: &'static str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(name)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, name: &'static str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every value of a column family matching `keep`, in key order.
    fn scan<T, F>(&self, name: &'static str, mut keep: F) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        let cf = self.cf(name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, bytes) = item?;
            let value: T = serde_json::from_slice(&bytes)?;
            if keep(&value) {
                values.push(value);
            }
        }
        Ok(values)
    }
}

fn missing_cf(name: &str) -> LoanError {
    LoanError::InternalError(Box::new(std::io::Error::other(format!(
        "{name} column family not found"
    ))))
}

fn sequence(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| {
        LoanError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed audit key",
        )))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait]
impl LoanStore for RocksDBRepository {
    async fn save_loan(&self, loan: LoanRecord) -> Result<()> {
        self.put(CF_LOANS, loan.id().as_bytes(), &loan)
    }

    async fn get_loan(&self, id: LoanId) -> Result<Option<LoanRecord>> {
        self.get(CF_LOANS, id.as_bytes())
    }

    async fn loans_by_borrower(&self, borrower: BorrowerId) -> Result<Vec<LoanRecord>> {
        let mut loans = self.scan(CF_LOANS, |l: &LoanRecord| l.borrower() == borrower)?;
        loans.sort_by_key(|l| l.created_at());
        Ok(loans)
    }

    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<LoanRecord>> {
        let mut loans = self.scan(CF_LOANS, |l: &LoanRecord| l.status() == status)?;
        loans.sort_by_key(|l| l.created_at());
        Ok(loans)
    }

    async fn commit_payment(&self, commit: PaymentCommit) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_LOANS)?,
            commit.loan.id().as_bytes(),
            serde_json::to_vec(&commit.loan)?,
        );
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            commit.payment.id.as_bytes(),
            serde_json::to_vec(&commit.payment)?,
        );
        if let Some(record) = &commit.overdue {
            batch.put_cf(self.cf(CF_OVERDUE)?, record.id.as_bytes(), serde_json::to_vec(record)?);
        }
        if let Some(scheduled) = &commit.scheduled {
            batch.put_cf(
                self.cf(CF_SCHEDULED)?,
                scheduled.id.as_bytes(),
                serde_json::to_vec(scheduled)?,
            );
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for RocksDBRepository {
    async fn payments_for_loan(&self, loan_id: LoanId) -> Result<Vec<PaymentRecord>> {
        let mut payments = self.scan(CF_PAYMENTS, |p: &PaymentRecord| p.loan_id == loan_id)?;
        payments.sort_by_key(|p| p.paid_at);
        Ok(payments)
    }

    async fn payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>> {
        let mut payments = self.scan(CF_PAYMENTS, |p: &PaymentRecord| {
            p.paid_at >= from && p.paid_at < to
        })?;
        payments.sort_by_key(|p| p.paid_at);
        Ok(payments)
    }

    async fn save_scheduled(&self, payment: ScheduledPayment) -> Result<()> {
        self.put(CF_SCHEDULED, payment.id.as_bytes(), &payment)
    }

    async fn get_scheduled(&self, id: ScheduledPaymentId) -> Result<Option<ScheduledPayment>> {
        self.get(CF_SCHEDULED, id.as_bytes())
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPayment>> {
        let mut due = self.scan(CF_SCHEDULED, |s: &ScheduledPayment| s.is_due(now))?;
        due.sort_by_key(|s| (s.scheduled_for, s.created_at));
        Ok(due)
    }

    async fn scheduled_for_loan(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>> {
        let mut scheduled = self.scan(CF_SCHEDULED, |s: &ScheduledPayment| s.loan_id == loan_id)?;
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
impl OverdueStore for RocksDBRepository {
    async fn save_overdue(&self, record: OverdueRecord) -> Result<()> {
        self.put(CF_OVERDUE, record.id.as_bytes(), &record)
    }

    async fn active_overdue(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>> {
        let active = self.scan(CF_OVERDUE, |r: &OverdueRecord| {
            r.loan_id == loan_id && r.is_active()
        })?;
        Ok(active.into_iter().next())
    }

    async fn overdue_records(&self) -> Result<Vec<OverdueRecord>> {
        let mut records = self.scan(CF_OVERDUE, |_: &OverdueRecord| true)?;
        records.sort_by_key(|r| r.first_overdue_date);
        Ok(records)
    }
}

#[async_trait]
impl CollectionStore for RocksDBRepository {
    async fn save_workflow(&self, workflow: CollectionWorkflow) -> Result<()> {
        self.put(CF_WORKFLOWS, workflow.id.as_bytes(), &workflow)
    }

    async fn active_workflow(&self, loan_id: LoanId) -> Result<Option<CollectionWorkflow>> {
        let open = self.scan(CF_WORKFLOWS, |w: &CollectionWorkflow| {
            w.loan_id == loan_id && w.is_open()
        })?;
        Ok(open.into_iter().next())
    }

    async fn workflows(&self) -> Result<Vec<CollectionWorkflow>> {
        let mut workflows = self.scan(CF_WORKFLOWS, |_: &CollectionWorkflow| true)?;
        workflows.sort_by_key(|w| w.started_at);
        Ok(workflows)
    }
}

#[async_trait]
impl BorrowerStore for RocksDBRepository {
    async fn standing(&self, borrower: BorrowerId) -> Result<BorrowerStanding> {
        Ok(self
            .get(CF_STANDINGS, borrower.as_bytes())?
            .unwrap_or_default())
    }

    async fn set_standing(&self, borrower: BorrowerId, standing: BorrowerStanding) -> Result<()> {
        self.put(CF_STANDINGS, borrower.as_bytes(), &standing)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        let seq = self.next_audit.fetch_add(1, Ordering::SeqCst);
        self.put(CF_AUDIT, &seq.to_be_bytes(), &entry)
    }

    async fn audit_log(&self, borrower: Option<BorrowerId>) -> Result<Vec<AuditEntry>> {
        self.scan(CF_AUDIT, |e: &AuditEntry| {
            borrower.is_none_or(|b| e.borrower == b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::amortization::LoanTerms;
    use crate::domain::application::{CreditGrade, CreditSnapshot};
    use crate::domain::borrower::{Actor, AuditAction};
    use crate::domain::ids::PaymentId;
    use crate::domain::money::Money;
    use crate::domain::payment::{Allocation, PaymentChannel, PaymentMethod};
    use crate::domain::policy::LoanType;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

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

    fn audit(borrower: BorrowerId, reason: &str) -> AuditEntry {
        AuditEntry {
            at: Utc::now(),
            actor: Actor::System,
            action: AuditAction::BorrowerSuspended,
            borrower,
            loan_id: None,
            amount: None,
            reason: reason.to_string(),
        }
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let repo = RocksDBRepository::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(repo.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_loan_store() {
        let dir = tempdir().unwrap();
        let repo = RocksDBRepository::open(dir.path()).unwrap();
        let borrower = BorrowerId::new();
        let record = loan(borrower);

        repo.save_loan(record.clone()).await.unwrap();
        repo.save_loan(loan(BorrowerId::new())).await.unwrap();

        assert_eq!(repo.get_loan(record.id()).await.unwrap(), Some(record));
        assert_eq!(repo.loans_by_borrower(borrower).await.unwrap().len(), 1);
        assert_eq!(
            repo.loans_by_status(LoanStatus::PendingReview).await.unwrap().len(),
            2
        );
        assert!(repo.get_loan(LoanId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rocksdb_commit_payment() {
        let dir = tempdir().unwrap();
        let repo = RocksDBRepository::open(dir.path()).unwrap();
        let record = loan(BorrowerId::new());
        let payment = PaymentRecord {
            id: PaymentId::new(),
            loan_id: record.id(),
            borrower: record.borrower(),
            offered: Money::new(dec!(100)),
            allocation: Allocation::default(),
            channel: PaymentChannel::Manual,
            method: PaymentMethod::BankBalance,
            balance_after: record.current_balance(),
            installments_completed: 0,
            paid_at: Utc::now(),
        };

        repo.commit_payment(PaymentCommit {
            loan: record.clone(),
            payment: payment.clone(),
            overdue: None,
            scheduled: None,
        })
        .await
        .unwrap();

        assert_eq!(repo.get_loan(record.id()).await.unwrap(), Some(record.clone()));
        assert_eq!(repo.payments_for_loan(record.id()).await.unwrap(), vec![payment]);
    }

    #[tokio::test]
    async fn test_rocksdb_audit_order_survives_reopen() {
        let dir = tempdir().unwrap();
        let borrower = BorrowerId::new();
        {
            let repo = RocksDBRepository::open(dir.path()).unwrap();
            repo.append_audit(audit(borrower, "first")).await.unwrap();
            repo.append_audit(audit(borrower, "second")).await.unwrap();
        }

        let repo = RocksDBRepository::open(dir.path()).unwrap();
        repo.append_audit(audit(borrower, "third")).await.unwrap();
        let reasons: Vec<String> = repo
            .audit_log(Some(borrower))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.reason)
            .collect();
        assert_eq!(reasons, ["first", "second", "third"]);
        assert!(repo.standing(borrower).await.unwrap().is_good());
    }
}
