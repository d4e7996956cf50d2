//! Payment processing, scheduled payments and auto-pay.

use crate::application::locks::LoanLocks;
use crate::config::{PaymentConfig, RefinanceConfig};
use crate::domain::amortization::{
    BiweeklyProjection, EarlyPayoffScenario, LoanTerms, PaymentDetail, RefinanceComparison,
    Schedule, biweekly_projection, early_payoff_options, refinance_comparison,
};
use crate::domain::collection::CloseReason;
use crate::domain::ids::{BorrowerId, LoanId, PaymentId, ScheduledPaymentId};
use crate::domain::loan::{LoanRecord, LoanStatus};
use crate::domain::money::{Amount, Money, round_cents};
use crate::domain::overdue::{OverdueRecord, ResolutionReason};
use crate::domain::payment::{
    Allocation, PaymentChannel, PaymentMethod, PaymentRecord, PaymentResult, ScheduledPayment,
    ScheduledPaymentStatus, allocate,
};
use crate::domain::ports::{ClockRef, LedgerRef, PaymentCommit, RepositoryRef};
use crate::error::{LoanError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub loan_id: LoanId,
    pub payer: BorrowerId,
    pub amount: Amount,
    pub channel: PaymentChannel,
    pub method: PaymentMethod,
}

/// Remaining schedule of a loan from its current due cycle onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSchedule {
    pub loan_id: LoanId,
    pub terms: LoanTerms,
    pub payments_made: u32,
    pub current_balance: Money,
    pub next_due_date: Option<DateTime<Utc>>,
    pub upcoming: Vec<PaymentDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffOptions {
    pub loan_id: LoanId,
    pub current_balance: Money,
    pub remaining_months: u32,
    pub early_payoff: Vec<EarlyPayoffScenario>,
    pub biweekly: BiweeklyProjection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSweepReport {
    pub scheduled_attempted: usize,
    pub scheduled_succeeded: usize,
    pub scheduled_rescheduled: usize,
    pub scheduled_failed: usize,
    pub auto_pay_attempted: usize,
    pub auto_pay_succeeded: usize,
    /// Items skipped because they could not be loaded or attempted.
    pub failures: usize,
}

pub struct RepaymentService {
    repo: RepositoryRef,
    ledger: LedgerRef,
    clock: ClockRef,
    locks: LoanLocks,
    config: PaymentConfig,
    refinance: RefinanceConfig,
}

impl RepaymentService {
    pub fn new(
        repo: RepositoryRef,
        ledger: LedgerRef,
        clock: ClockRef,
        locks: LoanLocks,
        config: PaymentConfig,
        refinance: RefinanceConfig,
    ) -> Self {
        Self {
            repo,
            ledger,
            clock,
            locks,
            config,
            refinance,
        }
    }

    /// Applies a payment to a loan through the penalty → interest → principal
    /// waterfall. Only the allocated portion is taken from the ledger.
    pub async fn process_payment(&self, request: PaymentRequest) -> Result<PaymentResult> {
        let _guard = self.locks.acquire(request.loan_id).await;
        self.pay_locked(request, None).await
    }

    /// Caller must hold the loan's lock.
    async fn pay_locked(
        &self,
        request: PaymentRequest,
        scheduled: Option<ScheduledPayment>,
    ) -> Result<PaymentResult> {
        let mut loan = self.load_loan(request.loan_id).await?;
        if !loan.status().is_payable() {
            return Err(LoanError::LoanNotPayable {
                loan_id: loan.id(),
                status: loan.status(),
            });
        }
        if request.channel.is_manual() {
            if request.payer != loan.borrower() {
                return Err(LoanError::Unauthorized(format!(
                    "{} is not the borrower of loan {}",
                    request.payer,
                    loan.id()
                )));
            }
            if request.amount.value() < self.config.min_manual_payment {
                return Err(LoanError::InvalidAmount(format!(
                    "manual payments must be at least {}",
                    self.config.min_manual_payment
                )));
            }
        }

        let now = self.clock.now();
        let mut overdue = self.repo.active_overdue(loan.id()).await?;
        let outstanding_penalty = overdue
            .as_ref()
            .map(|r| r.outstanding_penalty())
            .unwrap_or(Money::ZERO);
        let allocation = allocate(request.amount.into(), outstanding_penalty, loan.amounts_due());
        let charge = round_cents(allocation.applied().value());
        if charge <= Decimal::ZERO {
            return Err(LoanError::InvalidAmount(format!(
                "nothing is currently owed on loan {}",
                loan.id()
            )));
        }

        let borrower = loan.borrower();
        let available = self.ledger.balance(borrower).await?;
        if available < charge || !self.ledger.withdraw(borrower, charge).await? {
            return Err(LoanError::InsufficientFunds {
                required: charge,
                available,
            });
        }

        let installments_completed = match settle(&mut loan, overdue.as_mut(), allocation, now) {
            Ok(completed) => completed,
            Err(e) => {
                self.refund(borrower, charge, loan.id()).await;
                return Err(e);
            }
        };

        let payment = PaymentRecord {
            id: PaymentId::new(),
            loan_id: loan.id(),
            borrower,
            offered: request.amount.into(),
            allocation,
            channel: request.channel,
            method: request.method,
            balance_after: loan.current_balance(),
            installments_completed,
            paid_at: now,
        };
        let scheduled = scheduled.map(|mut s| {
            s.complete(payment.id);
            s
        });
        let result = PaymentResult {
            payment_id: payment.id,
            loan_id: loan.id(),
            allocation,
            remaining_balance: loan.current_balance(),
            outstanding_penalty: overdue
                .as_ref()
                .map(|r| r.outstanding_penalty())
                .unwrap_or(Money::ZERO),
            installments_completed,
            loan_status: loan.status(),
        };

        let resolved = overdue.as_ref().is_some_and(|r| !r.is_active());
        let commit = PaymentCommit {
            loan,
            payment,
            overdue,
            scheduled,
        };
        if let Err(e) = self.repo.commit_payment(commit).await {
            error!(loan_id = %request.loan_id, error = %e, "payment commit failed");
            self.refund(borrower, charge, request.loan_id).await;
            return Err(e);
        }
        if resolved {
            self.close_collection(request.loan_id, now).await;
        }

        info!(
            loan_id = %result.loan_id,
            payment_id = %result.payment_id,
            channel = ?request.channel,
            penalty = %allocation.penalty,
            interest = %allocation.interest,
            principal = %allocation.principal,
            unallocated = %allocation.unallocated,
            remaining = %result.remaining_balance,
            status = %result.loan_status,
            "payment applied"
        );
        Ok(result)
    }

    async fn close_collection(&self, loan_id: LoanId, now: DateTime<Utc>) {
        let closed = match self.repo.active_workflow(loan_id).await {
            Ok(Some(mut workflow)) => {
                workflow.close(CloseReason::Resolved, now);
                self.repo.save_workflow(workflow).await
            }
            Ok(None) => return,
            Err(e) => Err(e),
        };
        if let Err(e) = closed {
            warn!(loan_id = %loan_id, error = %e, "collection workflow left open after resolution");
        }
    }

    async fn refund(&self, borrower: BorrowerId, amount: Decimal, loan_id: LoanId) {
        if let Err(e) = self.ledger.deposit(borrower, amount).await {
            error!(loan_id = %loan_id, borrower = %borrower, amount = %amount, error = %e, "refund of failed payment did not go through");
        }
    }

    async fn load_loan(&self, loan_id: LoanId) -> Result<LoanRecord> {
        self.repo
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::NotFound(format!("loan {loan_id}")))
    }

    /// Queues a payment for the sweep to execute at `scheduled_for`.
    pub async fn schedule_payment(
        &self,
        loan_id: LoanId,
        payer: BorrowerId,
        amount: Amount,
        scheduled_for: DateTime<Utc>,
        method: PaymentMethod,
    ) -> Result<ScheduledPayment> {
        let loan = self.load_loan(loan_id).await?;
        if payer != loan.borrower() {
            return Err(LoanError::Unauthorized(format!(
                "{payer} is not the borrower of loan {loan_id}"
            )));
        }
        if !loan.status().is_payable() {
            return Err(LoanError::LoanNotPayable {
                loan_id,
                status: loan.status(),
            });
        }
        let scheduled = ScheduledPayment::new(
            loan_id,
            payer,
            amount.into(),
            method,
            scheduled_for,
            self.clock.now(),
        );
        self.repo.save_scheduled(scheduled.clone()).await?;
        info!(loan_id = %loan_id, scheduled_id = %scheduled.id, at = %scheduled_for, amount = %amount.value(), "payment scheduled");
        Ok(scheduled)
    }

    pub async fn cancel_scheduled_payment(
        &self,
        id: ScheduledPaymentId,
        payer: BorrowerId,
    ) -> Result<ScheduledPayment> {
        let mut scheduled = self
            .repo
            .get_scheduled(id)
            .await?
            .ok_or_else(|| LoanError::NotFound(format!("scheduled payment {id}")))?;
        let _guard = self.locks.acquire(scheduled.loan_id).await;
        if scheduled.borrower != payer {
            return Err(LoanError::Unauthorized(format!(
                "{payer} did not schedule payment {id}"
            )));
        }
        if scheduled.status != ScheduledPaymentStatus::Pending {
            return Err(LoanError::ScheduleNotPending {
                id,
                status: scheduled.status,
            });
        }
        scheduled.status = ScheduledPaymentStatus::Cancelled;
        self.repo.save_scheduled(scheduled.clone()).await?;
        info!(scheduled_id = %id, "scheduled payment cancelled");
        Ok(scheduled)
    }

    pub async fn set_auto_pay(
        &self,
        loan_id: LoanId,
        payer: BorrowerId,
        enabled: bool,
        method: PaymentMethod,
    ) -> Result<LoanRecord> {
        let _guard = self.locks.acquire(loan_id).await;
        let mut loan = self.load_loan(loan_id).await?;
        if payer != loan.borrower() {
            return Err(LoanError::Unauthorized(format!(
                "{payer} is not the borrower of loan {loan_id}"
            )));
        }
        if enabled && !loan.status().is_payable() {
            return Err(LoanError::LoanNotPayable {
                loan_id,
                status: loan.status(),
            });
        }
        loan.set_auto_pay(enabled.then_some(method));
        self.repo.save_loan(loan.clone()).await?;
        info!(loan_id = %loan_id, enabled, method = ?method, "auto-pay updated");
        Ok(loan)
    }

    /// Executes due scheduled payments, then auto-pay for loans with an
    /// installment due. Failures are recorded per payment and never stop the
    /// sweep.
    pub async fn run_payment_sweep(&self) -> Result<PaymentSweepReport> {
        let now = self.clock.now();
        let mut report = PaymentSweepReport::default();

        for due in self.repo.due_scheduled(now).await? {
            let _guard = self.locks.acquire(due.loan_id).await;
            if let Err(e) = self.run_scheduled(due.id, now, &mut report).await {
                report.failures += 1;
                warn!(scheduled_id = %due.id, loan_id = %due.loan_id, error = %e, "scheduled payment skipped");
            }
        }

        for status in [LoanStatus::Active, LoanStatus::Overdue] {
            for candidate in self.repo.loans_by_status(status).await? {
                let Some(method) = candidate.auto_pay() else {
                    continue;
                };
                if !candidate.next_due_date().is_some_and(|due| due <= now) {
                    continue;
                }
                let _guard = self.locks.acquire(candidate.id()).await;
                report.auto_pay_attempted += 1;
                match self.auto_pay_locked(candidate.id(), method, now).await {
                    Ok(Some(_)) => report.auto_pay_succeeded += 1,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(loan_id = %candidate.id(), error = %e, "auto-pay failed");
                    }
                }
            }
        }

        debug!(?report, "payment sweep finished");
        Ok(report)
    }

    /// Attempts one due scheduled payment; the caller holds the loan's lock.
    async fn run_scheduled(
        &self,
        id: ScheduledPaymentId,
        now: DateTime<Utc>,
        report: &mut PaymentSweepReport,
    ) -> Result<()> {
        // Re-read under the lock: it may have been cancelled or run meanwhile.
        let Some(scheduled) = self.repo.get_scheduled(id).await? else {
            return Ok(());
        };
        if !scheduled.is_due(now) {
            return Ok(());
        }
        let request = PaymentRequest {
            loan_id: scheduled.loan_id,
            payer: scheduled.borrower,
            amount: Amount::new(scheduled.amount.value())?,
            channel: PaymentChannel::Scheduled,
            method: scheduled.method,
        };
        report.scheduled_attempted += 1;
        match self.pay_locked(request, Some(scheduled.clone())).await {
            Ok(_) => report.scheduled_succeeded += 1,
            Err(e) => {
                let mut failed = scheduled;
                failed.record_failure(
                    e.to_string(),
                    self.config.sweep_interval(),
                    self.config.max_retries,
                );
                if failed.status == ScheduledPaymentStatus::Failed {
                    report.scheduled_failed += 1;
                    warn!(scheduled_id = %failed.id, loan_id = %failed.loan_id, retries = failed.retries, error = %e, "scheduled payment failed permanently");
                } else {
                    report.scheduled_rescheduled += 1;
                    warn!(scheduled_id = %failed.id, loan_id = %failed.loan_id, retries = failed.retries, next = %failed.scheduled_for, error = %e, "scheduled payment rescheduled");
                }
                if let Err(save) = self.repo.save_scheduled(failed).await {
                    warn!(error = %save, "could not record scheduled payment failure");
                }
            }
        }
        Ok(())
    }

    async fn auto_pay_locked(
        &self,
        loan_id: LoanId,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentResult>> {
        let loan = self.load_loan(loan_id).await?;
        if !loan.status().is_payable()
            || loan.auto_pay().is_none()
            || !loan.next_due_date().is_some_and(|due| due <= now)
        {
            return Ok(None);
        }
        let penalty = self
            .repo
            .active_overdue(loan_id)
            .await?
            .map(|r| r.outstanding_penalty())
            .unwrap_or(Money::ZERO);
        let owed = (loan.amounts_due().total() + penalty).value();
        if owed <= Decimal::ZERO {
            return Ok(None);
        }
        let request = PaymentRequest {
            loan_id,
            payer: loan.borrower(),
            amount: Amount::new(owed)?,
            channel: PaymentChannel::AutoPay,
            method,
        };
        self.pay_locked(request, None).await.map(Some)
    }

    pub async fn get_payment_schedule(&self, loan_id: LoanId) -> Result<LoanSchedule> {
        let loan = self.load_loan(loan_id).await?;
        let upcoming = if loan.status().is_payable() {
            let terms = loan.terms();
            Schedule::new(
                loan.cycle_opening_balance.value(),
                terms.monthly_rate(),
                terms.monthly_payment,
                loan.remaining_periods(),
            )
            .map(|detail| {
                let mut detail = detail.rounded();
                detail.period += loan.payments_made();
                detail
            })
            .collect()
        } else {
            Vec::new()
        };
        Ok(LoanSchedule {
            loan_id,
            terms: loan.terms().clone(),
            payments_made: loan.payments_made(),
            current_balance: loan.current_balance(),
            next_due_date: loan.next_due_date(),
            upcoming,
        })
    }

    pub async fn get_early_payoff_options(&self, loan_id: LoanId) -> Result<PayoffOptions> {
        let loan = self.load_loan(loan_id).await?;
        if !loan.status().is_payable() {
            return Err(LoanError::LoanNotPayable {
                loan_id,
                status: loan.status(),
            });
        }
        let balance = loan.current_balance().value();
        let rate = loan.terms().annual_rate;
        let remaining = loan.remaining_periods().max(1);
        let early_payoff =
            early_payoff_options(balance, rate, remaining, &self.refinance.payoff_horizons)?;
        let remaining_terms = LoanTerms::compute(balance, rate, remaining, Decimal::ZERO)?;
        let biweekly = biweekly_projection(&remaining_terms);
        Ok(PayoffOptions {
            loan_id,
            current_balance: loan.current_balance(),
            remaining_months: remaining,
            early_payoff,
            biweekly,
        })
    }

    pub async fn compare_refinance(
        &self,
        loan_id: LoanId,
        new_annual_rate: Decimal,
        new_term_months: u32,
    ) -> Result<RefinanceComparison> {
        let loan = self.load_loan(loan_id).await?;
        if !loan.status().is_payable() {
            return Err(LoanError::LoanNotPayable {
                loan_id,
                status: loan.status(),
            });
        }
        refinance_comparison(
            loan.current_balance().value(),
            loan.terms().annual_rate,
            loan.remaining_periods().max(1),
            new_annual_rate,
            new_term_months,
            self.refinance.closing_cost_percentage,
        )
    }

    pub async fn payment_history(&self, loan_id: LoanId) -> Result<Vec<PaymentRecord>> {
        self.repo.payments_for_loan(loan_id).await
    }

    pub async fn payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>> {
        self.repo.payments_between(from, to).await
    }

    pub async fn scheduled_payments(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>> {
        self.repo.scheduled_for_loan(loan_id).await
    }
}

/// Books an allocation on the loan and its overdue episode, restoring the
/// loan to ACTIVE once nothing overdue remains.
fn settle(
    loan: &mut LoanRecord,
    overdue: Option<&mut OverdueRecord>,
    allocation: Allocation,
    now: DateTime<Utc>,
) -> Result<u32> {
    let completed = loan.apply_repayment(allocation.interest, allocation.principal, now)?;
    loan.record_penalty_paid(allocation.penalty);
    loan.recount_overdue(now);

    let penalty_cleared = match overdue {
        Some(record) => {
            record.apply_payment(allocation.penalty, loan);
            if loan.status() == LoanStatus::Closed {
                record.resolve(ResolutionReason::LoanClosed, now);
                false
            } else if record.is_cleared() {
                record.resolve(ResolutionReason::Repaid, now);
                true
            } else {
                false
            }
        }
        None => true,
    };
    if loan.status() == LoanStatus::Overdue && loan.overdue_payments() == 0 && penalty_cleared {
        loan.restore_active()?;
        debug!(loan_id = %loan.id(), "loan back in good standing");
    }
    Ok(completed)
}
