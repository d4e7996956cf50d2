//! Every collaborator the core talks to, as trait objects.
//!
//! Persistence is split by table so adapters can be assembled piecemeal in
//! tests; services take a single [`Repository`] that bundles them.

use super::application::CreditGrade;
use super::borrower::{AuditEntry, BorrowerStanding};
use super::collection::{CollectionChannel, CollectionWorkflow};
use super::ids::{BorrowerId, LoanId, ScheduledPaymentId};
use super::loan::{LoanRecord, LoanStatus};
use super::overdue::OverdueRecord;
use super::payment::{PaymentRecord, ScheduledPayment};
use super::policy::LoanType;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Everything a single payment changes, written all-or-nothing.
#[derive(Debug, Clone)]
pub struct PaymentCommit {
    pub loan: LoanRecord,
    pub payment: PaymentRecord,
    pub overdue: Option<OverdueRecord>,
    pub scheduled: Option<ScheduledPayment>,
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn save_loan(&self, loan: LoanRecord) -> Result<()>;
    async fn get_loan(&self, id: LoanId) -> Result<Option<LoanRecord>>;
    async fn loans_by_borrower(&self, borrower: BorrowerId) -> Result<Vec<LoanRecord>>;
    async fn loans_by_status(&self, status: LoanStatus) -> Result<Vec<LoanRecord>>;
    /// Atomically persists the loan, the payment record and any overdue or
    /// scheduled-payment update that belongs to the same payment.
    async fn commit_payment(&self, commit: PaymentCommit) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn payments_for_loan(&self, loan_id: LoanId) -> Result<Vec<PaymentRecord>>;
    async fn payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>>;
    async fn save_scheduled(&self, payment: ScheduledPayment) -> Result<()>;
    async fn get_scheduled(&self, id: ScheduledPaymentId) -> Result<Option<ScheduledPayment>>;
    /// Pending scheduled payments whose time has come, oldest first.
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPayment>>;
    async fn scheduled_for_loan(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>>;
}

#[async_trait]
pub trait OverdueStore: Send + Sync {
    async fn save_overdue(&self, record: OverdueRecord) -> Result<()>;
    async fn active_overdue(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>>;
    async fn overdue_records(&self) -> Result<Vec<OverdueRecord>>;
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn save_workflow(&self, workflow: CollectionWorkflow) -> Result<()>;
    async fn active_workflow(&self, loan_id: LoanId) -> Result<Option<CollectionWorkflow>>;
    async fn workflows(&self) -> Result<Vec<CollectionWorkflow>>;
}

#[async_trait]
pub trait BorrowerStore: Send + Sync {
    async fn standing(&self, borrower: BorrowerId) -> Result<BorrowerStanding>;
    async fn set_standing(&self, borrower: BorrowerId, standing: BorrowerStanding) -> Result<()>;
    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;
    /// Audit entries, optionally restricted to one borrower, in append order.
    async fn audit_log(&self, borrower: Option<BorrowerId>) -> Result<Vec<AuditEntry>>;
}

/// All persistence ports behind one object.
pub trait Repository:
    LoanStore + PaymentStore + OverdueStore + CollectionStore + BorrowerStore
{
}

impl<T> Repository for T where
    T: LoanStore + PaymentStore + OverdueStore + CollectionStore + BorrowerStore + ?Sized
{
}

#[async_trait]
pub trait CreditEvaluator: Send + Sync {
    async fn score(&self, borrower: BorrowerId) -> Result<u32>;
    async fn grade(&self, borrower: BorrowerId) -> Result<CreditGrade>;
    async fn qualifies_for_loan(&self, borrower: BorrowerId, loan_type: LoanType) -> Result<bool>;
    async fn is_account_verified(&self, borrower: BorrowerId) -> Result<bool>;
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self, borrower: BorrowerId) -> Result<Decimal>;
    /// Returns `false` when the ledger declines the withdrawal.
    async fn withdraw(&self, borrower: BorrowerId, amount: Decimal) -> Result<bool>;
    async fn deposit(&self, borrower: BorrowerId, amount: Decimal) -> Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers a message and returns the channel's notification id.
    async fn send(
        &self,
        borrower: BorrowerId,
        channel: CollectionChannel,
        message: &str,
    ) -> Result<String>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type RepositoryRef = Arc<dyn Repository>;
pub type CreditEvaluatorRef = Arc<dyn CreditEvaluator>;
pub type LedgerRef = Arc<dyn Ledger>;
pub type NotifierRef = Arc<dyn Notifier>;
pub type ClockRef = Arc<dyn Clock>;
