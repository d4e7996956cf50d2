use crate::domain::ids::{BorrowerId, LoanId, PaymentId, ScheduledPaymentId};
use crate::domain::loan::{DueAmounts, LoanStatus};
use crate::domain::money::Money;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    BankBalance,
    Wallet,
}

/// How a payment entered the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentChannel {
    Manual,
    AutoPay,
    Scheduled,
}

impl PaymentChannel {
    pub fn is_manual(self) -> bool {
        self == Self::Manual
    }
}

/// Split of a payment across the waterfall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocation {
    pub penalty: Money,
    pub interest: Money,
    pub principal: Money,
    /// Portion of the offered amount nothing was owed against.
    pub unallocated: Money,
}

impl Allocation {
    pub fn applied(&self) -> Money {
        self.penalty + self.interest + self.principal
    }
}

/// Allocates `amount` to penalty, then interest due, then principal due.
///
/// Anything beyond what is currently owed stays unallocated; it is never
/// pushed into future installments.
pub fn allocate(amount: Money, outstanding_penalty: Money, due: DueAmounts) -> Allocation {
    let mut remaining = amount;
    let mut take = |owed: Money| {
        let portion = remaining.min(owed);
        remaining -= portion;
        portion
    };
    let penalty = take(outstanding_penalty);
    let interest = take(due.interest);
    let principal = take(due.principal);
    Allocation {
        penalty,
        interest,
        principal,
        unallocated: remaining,
    }
}

/// Immutable audit record of a completed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub borrower: BorrowerId,
    pub offered: Money,
    pub allocation: Allocation,
    pub channel: PaymentChannel,
    pub method: PaymentMethod,
    pub balance_after: Money,
    pub installments_completed: u32,
    pub paid_at: DateTime<Utc>,
}

/// Outcome of a processed payment, returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_id: PaymentId,
    pub loan_id: LoanId,
    pub allocation: Allocation,
    pub remaining_balance: Money,
    pub outstanding_penalty: Money,
    pub installments_completed: u32,
    pub loan_status: LoanStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledPaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPayment {
    pub id: ScheduledPaymentId,
    pub loan_id: LoanId,
    pub borrower: BorrowerId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduledPaymentStatus,
    pub retries: u32,
    pub last_error: Option<String>,
    pub payment_id: Option<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledPayment {
    pub fn new(
        loan_id: LoanId,
        borrower: BorrowerId,
        amount: Money,
        method: PaymentMethod,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ScheduledPaymentId::new(),
            loan_id,
            borrower,
            amount,
            method,
            scheduled_for,
            status: ScheduledPaymentStatus::Pending,
            retries: 0,
            last_error: None,
            payment_id: None,
            created_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduledPaymentStatus::Pending && self.scheduled_for <= now
    }

    pub fn complete(&mut self, payment_id: PaymentId) {
        self.status = ScheduledPaymentStatus::Completed;
        self.payment_id = Some(payment_id);
        self.last_error = None;
    }

    /// Records a failed attempt: reschedules one `interval` later, or marks
    /// the payment FAILED once `max_retries` attempts have failed.
    pub fn record_failure(&mut self, reason: String, interval: Duration, max_retries: u32) {
        self.retries += 1;
        self.last_error = Some(reason);
        if self.retries >= max_retries {
            self.status = ScheduledPaymentStatus::Failed;
        } else {
            self.scheduled_for += interval;
        }
    }
}
