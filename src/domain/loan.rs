use crate::domain::amortization::{LoanTerms, Schedule};
use crate::domain::application::CreditSnapshot;
use crate::domain::ids::{BorrowerId, LoanId};
use crate::domain::money::{Money, round_cents};
use crate::domain::payment::PaymentMethod;
use crate::domain::policy::{CollateralAssessment, LoanType};
use crate::error::{LoanError, Result};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    PendingReview,
    Active,
    Overdue,
    Closed,
    Defaulted,
    Rejected,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 6] = [
        Self::PendingReview,
        Self::Active,
        Self::Overdue,
        Self::Closed,
        Self::Defaulted,
        Self::Rejected,
    ];

    /// The only transitions a loan may take.
    pub fn can_transition_to(self, to: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, to),
            (PendingReview, Active)
                | (PendingReview, Rejected)
                | (Active, Overdue)
                | (Active, Closed)
                | (Overdue, Active)
                | (Overdue, Closed)
                | (Overdue, Defaulted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Defaulted | Self::Rejected)
    }

    pub fn is_payable(self) -> bool {
        matches!(self, Self::Active | Self::Overdue)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingReview => "PENDING_REVIEW",
            Self::Active => "ACTIVE",
            Self::Overdue => "OVERDUE",
            Self::Closed => "CLOSED",
            Self::Defaulted => "DEFAULTED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// One installment of the current due cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installment {
    pub interest: Money,
    pub principal: Money,
}

/// Interest and principal still owed for the installments currently due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DueAmounts {
    pub interest: Money,
    pub principal: Money,
    pub installments: u32,
}

impl DueAmounts {
    pub fn total(&self) -> Money {
        self.interest + self.principal
    }
}

/// A persisted loan.
///
/// Fields are crate-private: the repayment allocator and escalation engine are
/// the only writers, through the mutation methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub(crate) id: LoanId,
    pub(crate) borrower: BorrowerId,
    pub(crate) loan_type: LoanType,
    pub(crate) terms: LoanTerms,
    pub(crate) purpose: String,
    pub(crate) credit: CreditSnapshot,
    pub(crate) collateral: Option<CollateralAssessment>,
    pub(crate) status: LoanStatus,
    pub(crate) current_balance: Money,
    pub(crate) payments_made: u32,
    pub(crate) total_principal_paid: Money,
    pub(crate) total_interest_paid: Money,
    pub(crate) total_penalty_paid: Money,
    pub(crate) overdue_payments: u32,
    pub(crate) overdue_amount: Money,
    pub(crate) defaulted: bool,
    pub(crate) legal_review: bool,
    pub(crate) auto_pay: Option<PaymentMethod>,
    pub(crate) penalty_waived: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) activated_at: Option<DateTime<Utc>>,
    pub(crate) next_due_date: Option<DateTime<Utc>>,
    pub(crate) closed_at: Option<DateTime<Utc>>,
    pub(crate) cycle_opening_balance: Money,
    pub(crate) cycle_interest_paid: Money,
    pub(crate) cycle_principal_paid: Money,
}

impl LoanRecord {
    pub fn originate(
        borrower: BorrowerId,
        loan_type: LoanType,
        terms: LoanTerms,
        purpose: String,
        credit: CreditSnapshot,
        collateral: Option<CollateralAssessment>,
        now: DateTime<Utc>,
    ) -> Self {
        let principal = Money::new(terms.principal);
        Self {
            id: LoanId::new(),
            borrower,
            loan_type,
            terms,
            purpose,
            credit,
            collateral,
            status: LoanStatus::PendingReview,
            current_balance: principal,
            payments_made: 0,
            total_principal_paid: Money::ZERO,
            total_interest_paid: Money::ZERO,
            total_penalty_paid: Money::ZERO,
            overdue_payments: 0,
            overdue_amount: Money::ZERO,
            defaulted: false,
            legal_review: false,
            auto_pay: None,
            penalty_waived: false,
            created_at: now,
            activated_at: None,
            next_due_date: None,
            closed_at: None,
            cycle_opening_balance: principal,
            cycle_interest_paid: Money::ZERO,
            cycle_principal_paid: Money::ZERO,
        }
    }

    pub fn id(&self) -> LoanId {
        self.id
    }

    pub fn borrower(&self) -> BorrowerId {
        self.borrower
    }

    pub fn loan_type(&self) -> LoanType {
        self.loan_type
    }

    pub fn terms(&self) -> &LoanTerms {
        &self.terms
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn collateral(&self) -> Option<&CollateralAssessment> {
        self.collateral.as_ref()
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn current_balance(&self) -> Money {
        self.current_balance
    }

    pub fn payments_made(&self) -> u32 {
        self.payments_made
    }

    pub fn total_principal_paid(&self) -> Money {
        self.total_principal_paid
    }

    pub fn total_interest_paid(&self) -> Money {
        self.total_interest_paid
    }

    pub fn total_penalty_paid(&self) -> Money {
        self.total_penalty_paid
    }

    pub fn overdue_payments(&self) -> u32 {
        self.overdue_payments
    }

    pub fn overdue_amount(&self) -> Money {
        self.overdue_amount
    }

    pub fn is_defaulted(&self) -> bool {
        self.defaulted
    }

    pub fn legal_review(&self) -> bool {
        self.legal_review
    }

    pub fn auto_pay(&self) -> Option<PaymentMethod> {
        self.auto_pay
    }

    pub fn penalty_waived(&self) -> bool {
        self.penalty_waived
    }

    pub fn next_due_date(&self) -> Option<DateTime<Utc>> {
        self.next_due_date
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn remaining_periods(&self) -> u32 {
        self.terms.term_months.saturating_sub(self.payments_made)
    }

    pub(crate) fn transition(&mut self, to: LoanStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(LoanError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub(crate) fn activate(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(LoanStatus::Active)?;
        self.activated_at = Some(now);
        self.next_due_date = now.checked_add_months(Months::new(1));
        Ok(())
    }

    pub(crate) fn reject(&mut self) -> Result<()> {
        self.transition(LoanStatus::Rejected)
    }

    pub(crate) fn set_auto_pay(&mut self, method: Option<PaymentMethod>) {
        self.auto_pay = method;
    }

    pub(crate) fn waive_penalty_accrual(&mut self) {
        self.penalty_waived = true;
    }

    /// Number of installments the next payment is applied against.
    pub fn installments_due(&self) -> u32 {
        self.overdue_payments.max(1).min(self.remaining_periods().max(1))
    }

    /// Installments of the current due cycle, computed from the balance at
    /// the start of the cycle.
    pub fn cycle_installments(&self) -> Vec<Installment> {
        let remaining = self.remaining_periods();
        if remaining == 0 || !self.cycle_opening_balance.is_positive() {
            return Vec::new();
        }
        let mut balance = self.cycle_opening_balance.value();
        Schedule::new(
            balance,
            self.terms.monthly_rate(),
            self.terms.monthly_payment,
            remaining,
        )
        .take(self.installments_due() as usize)
        .map(|period| {
            let interest = round_cents(period.interest);
            let principal = round_cents(period.principal).min(balance);
            balance -= principal;
            Installment {
                interest: Money::new(interest),
                principal: Money::new(principal),
            }
        })
        .collect()
    }

    /// Amounts still owed for the installments currently due.
    pub fn amounts_due(&self) -> DueAmounts {
        let installments = self.cycle_installments();
        let interest: Money = installments.iter().map(|i| i.interest).sum();
        let principal: Money = installments.iter().map(|i| i.principal).sum();
        DueAmounts {
            interest: interest.saturating_sub(self.cycle_interest_paid),
            principal: principal
                .saturating_sub(self.cycle_principal_paid)
                .min(self.current_balance),
            installments: installments.len() as u32,
        }
    }

    /// Applies interest and principal from an allocated payment.
    ///
    /// Returns how many installments the payment completed; completed
    /// installments advance the due date and start a new cycle.
    pub(crate) fn apply_repayment(
        &mut self,
        interest: Money,
        principal: Money,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let installments = self.cycle_installments();

        self.cycle_interest_paid += interest;
        self.cycle_principal_paid += principal;
        self.total_interest_paid += interest;
        self.total_principal_paid += principal;
        self.current_balance = self.current_balance.saturating_sub(principal);

        let mut needed_interest = Money::ZERO;
        let mut needed_principal = Money::ZERO;
        let mut completed = 0u32;
        for installment in &installments {
            let interest_after = needed_interest + installment.interest;
            let principal_after = needed_principal + installment.principal;
            if self.cycle_interest_paid < interest_after
                || self.cycle_principal_paid < principal_after
            {
                break;
            }
            needed_interest = interest_after;
            needed_principal = principal_after;
            completed += 1;
        }

        if completed > 0 {
            self.payments_made += completed;
            self.overdue_payments = self.overdue_payments.saturating_sub(completed);
            self.cycle_opening_balance =
                self.cycle_opening_balance.saturating_sub(needed_principal);
            self.cycle_interest_paid = self.cycle_interest_paid.saturating_sub(needed_interest);
            self.cycle_principal_paid = self.cycle_principal_paid.saturating_sub(needed_principal);
            self.next_due_date = self
                .next_due_date
                .and_then(|due| due.checked_add_months(Months::new(completed)));
        }

        if self.current_balance.is_zero() {
            self.transition(LoanStatus::Closed)?;
            self.closed_at = Some(now);
            self.next_due_date = None;
            self.overdue_payments = 0;
            self.overdue_amount = Money::ZERO;
        }
        Ok(completed)
    }

    pub(crate) fn record_penalty_paid(&mut self, amount: Money) {
        self.total_penalty_paid += amount;
    }

    /// Number of due dates at or before `now` that have not been met.
    pub fn missed_due_dates(&self, now: DateTime<Utc>) -> u32 {
        let Some(mut due) = self.next_due_date else {
            return 0;
        };
        let mut missed = 0;
        while due < now && missed < self.remaining_periods() {
            missed += 1;
            match due.checked_add_months(Months::new(1)) {
                Some(next) => due = next,
                None => break,
            }
        }
        missed
    }

    /// Refreshes the overdue counters, moving an active loan to OVERDUE when
    /// it has missed a due date.
    pub(crate) fn refresh_overdue(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let missed = self.missed_due_dates(now);
        if missed == 0 {
            return Ok(false);
        }
        if self.status == LoanStatus::Active {
            self.transition(LoanStatus::Overdue)?;
        }
        self.overdue_payments = missed;
        self.overdue_amount = self.amounts_due().total();
        Ok(true)
    }

    /// Recounts missed installments after a payment on an overdue loan.
    pub(crate) fn recount_overdue(&mut self, now: DateTime<Utc>) {
        if self.status != LoanStatus::Overdue {
            return;
        }
        self.overdue_payments = self.missed_due_dates(now);
        self.overdue_amount = if self.overdue_payments == 0 {
            Money::ZERO
        } else {
            self.amounts_due().total()
        };
    }

    pub(crate) fn restore_active(&mut self) -> Result<()> {
        self.transition(LoanStatus::Active)?;
        self.overdue_payments = 0;
        self.overdue_amount = Money::ZERO;
        Ok(())
    }

    pub(crate) fn mark_defaulted(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(LoanStatus::Defaulted)?;
        self.defaulted = true;
        self.legal_review = true;
        self.closed_at = Some(now);
        Ok(())
    }
}
