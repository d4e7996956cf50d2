//! Facade over the workflow, repayment and escalation components.
//!
//! Every operation passes its result through [`boundary`]: validation errors
//! and business rejections reach the caller unchanged, infrastructure
//! failures are logged here and surface as [`LoanError::Unavailable`].

use crate::application::escalation::{EscalationEngine, OverdueStatistics, OverdueSweepReport};
use crate::application::locks::LoanLocks;
use crate::application::repayment::{
    LoanSchedule, PaymentRequest, PaymentSweepReport, PayoffOptions, RepaymentService,
};
use crate::application::sessions::ApplicationHandle;
use crate::application::workflow::{ApplicationWorkflow, StepInput, StepOutcome, SubmittedLoan};
use crate::config::EngineConfig;
use crate::domain::amortization::RefinanceComparison;
use crate::domain::application::{ApplicationStep, LoanApplication};
use crate::domain::borrower::{AuditEntry, BorrowerStanding};
use crate::domain::ids::{BorrowerId, LoanId, ScheduledPaymentId};
use crate::domain::loan::LoanRecord;
use crate::domain::money::Amount;
use crate::domain::overdue::OverdueRecord;
use crate::domain::payment::{
    PaymentChannel, PaymentMethod, PaymentRecord, PaymentResult, ScheduledPayment,
};
use crate::domain::policy::LoanType;
use crate::domain::ports::{ClockRef, CreditEvaluatorRef, LedgerRef, NotifierRef, RepositoryRef};
use crate::error::{LoanError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::error;

/// The collaborators a [`LoanService`] is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub repo: RepositoryRef,
    pub credit: CreditEvaluatorRef,
    pub ledger: LedgerRef,
    pub notifier: NotifierRef,
    pub clock: ClockRef,
}

pub struct LoanService {
    config: EngineConfig,
    repo: RepositoryRef,
    locks: LoanLocks,
    workflow: ApplicationWorkflow,
    repayment: RepaymentService,
    escalation: EscalationEngine,
}

fn boundary<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        if e.is_infrastructure() {
            error!(operation, code = e.code(), error = %e, "operation failed");
            LoanError::Unavailable
        } else {
            e
        }
    })
}

impl LoanService {
    pub fn new(config: EngineConfig, deps: Collaborators) -> Result<Self> {
        config.validate()?;
        let locks = LoanLocks::new();
        let workflow = ApplicationWorkflow::new(
            deps.repo.clone(),
            deps.credit,
            deps.ledger.clone(),
            deps.clock.clone(),
            locks.clone(),
            config.application.clone(),
        );
        let repayment = RepaymentService::new(
            deps.repo.clone(),
            deps.ledger,
            deps.clock.clone(),
            locks.clone(),
            config.payments.clone(),
            config.refinance.clone(),
        );
        let escalation = EscalationEngine::new(
            deps.repo.clone(),
            deps.notifier,
            deps.clock,
            locks.clone(),
            config.overdue.clone(),
        );
        Ok(Self {
            config,
            repo: deps.repo,
            locks,
            workflow,
            repayment,
            escalation,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Application workflow

    pub async fn start_application(
        &self,
        borrower: BorrowerId,
        loan_type: LoanType,
    ) -> ApplicationHandle {
        self.workflow.start_application(borrower, loan_type).await
    }

    pub async fn application(&self, handle: ApplicationHandle) -> Result<LoanApplication> {
        boundary("application", self.workflow.application(handle).await)
    }

    pub async fn advance_step(
        &self,
        handle: ApplicationHandle,
        input: StepInput,
    ) -> Result<StepOutcome> {
        boundary(
            "advance_step",
            self.workflow.advance_step(handle, input).await,
        )
    }

    pub async fn go_back(
        &self,
        handle: ApplicationHandle,
        step: ApplicationStep,
    ) -> Result<LoanApplication> {
        boundary("go_back", self.workflow.go_back(handle, step).await)
    }

    pub async fn submit_application(&self, handle: ApplicationHandle) -> Result<SubmittedLoan> {
        boundary(
            "submit_application",
            self.workflow.submit_application(handle).await,
        )
    }

    pub async fn review_application(
        &self,
        loan_id: LoanId,
        approve: bool,
        reviewer: &str,
    ) -> Result<LoanRecord> {
        boundary(
            "review_application",
            self.workflow.review_application(loan_id, approve, reviewer).await,
        )
    }

    // Repayment

    /// A borrower-initiated payment.
    pub async fn make_payment(
        &self,
        loan_id: LoanId,
        payer: BorrowerId,
        amount: Amount,
        method: PaymentMethod,
    ) -> Result<PaymentResult> {
        let request = PaymentRequest {
            loan_id,
            payer,
            amount,
            channel: PaymentChannel::Manual,
            method,
        };
        boundary(
            "make_payment",
            self.repayment.process_payment(request).await,
        )
    }

    pub async fn schedule_payment(
        &self,
        loan_id: LoanId,
        payer: BorrowerId,
        amount: Amount,
        scheduled_for: DateTime<Utc>,
        method: PaymentMethod,
    ) -> Result<ScheduledPayment> {
        boundary(
            "schedule_payment",
            self.repayment
                .schedule_payment(loan_id, payer, amount, scheduled_for, method)
                .await,
        )
    }

    pub async fn cancel_scheduled_payment(
        &self,
        id: ScheduledPaymentId,
        payer: BorrowerId,
    ) -> Result<ScheduledPayment> {
        boundary(
            "cancel_scheduled_payment",
            self.repayment.cancel_scheduled_payment(id, payer).await,
        )
    }

    pub async fn set_auto_pay(
        &self,
        loan_id: LoanId,
        payer: BorrowerId,
        enabled: bool,
        method: PaymentMethod,
    ) -> Result<LoanRecord> {
        boundary(
            "set_auto_pay",
            self.repayment.set_auto_pay(loan_id, payer, enabled, method).await,
        )
    }

    pub async fn get_payment_schedule(&self, loan_id: LoanId) -> Result<LoanSchedule> {
        boundary(
            "get_payment_schedule",
            self.repayment.get_payment_schedule(loan_id).await,
        )
    }

    pub async fn get_early_payoff_options(&self, loan_id: LoanId) -> Result<PayoffOptions> {
        boundary(
            "get_early_payoff_options",
            self.repayment.get_early_payoff_options(loan_id).await,
        )
    }

    pub async fn compare_refinance(
        &self,
        loan_id: LoanId,
        new_annual_rate: Decimal,
        new_term_months: u32,
    ) -> Result<RefinanceComparison> {
        boundary(
            "compare_refinance",
            self.repayment
                .compare_refinance(loan_id, new_annual_rate, new_term_months)
                .await,
        )
    }

    pub async fn payment_history(&self, loan_id: LoanId) -> Result<Vec<PaymentRecord>> {
        boundary(
            "payment_history",
            self.repayment.payment_history(loan_id).await,
        )
    }

    pub async fn payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>> {
        boundary(
            "payments_between",
            self.repayment.payments_between(from, to).await,
        )
    }

    pub async fn scheduled_payments(&self, loan_id: LoanId) -> Result<Vec<ScheduledPayment>> {
        boundary(
            "scheduled_payments",
            self.repayment.scheduled_payments(loan_id).await,
        )
    }

    pub async fn get_loan(&self, loan_id: LoanId) -> Result<LoanRecord> {
        let result = self
            .repo
            .get_loan(loan_id)
            .await
            .and_then(|loan| loan.ok_or_else(|| LoanError::NotFound(format!("loan {loan_id}"))));
        boundary("get_loan", result)
    }

    pub async fn loans_for_borrower(&self, borrower: BorrowerId) -> Result<Vec<LoanRecord>> {
        boundary(
            "loans_for_borrower",
            self.repo.loans_by_borrower(borrower).await,
        )
    }

    // Overdue escalation and administration

    pub async fn waive_penalties(
        &self,
        loan_id: LoanId,
        amount: Amount,
        reason: &str,
        operator: &str,
    ) -> Result<OverdueRecord> {
        boundary(
            "waive_penalties",
            self.escalation
                .waive_penalties(loan_id, amount, reason, operator)
                .await,
        )
    }

    pub async fn stop_penalty_accrual(
        &self,
        loan_id: LoanId,
        reason: &str,
        operator: &str,
    ) -> Result<LoanRecord> {
        boundary(
            "stop_penalty_accrual",
            self.escalation
                .stop_penalty_accrual(loan_id, reason, operator)
                .await,
        )
    }

    pub async fn suspend_borrower(
        &self,
        borrower: BorrowerId,
        reason: &str,
        operator: &str,
    ) -> Result<BorrowerStanding> {
        boundary(
            "suspend_borrower",
            self.escalation
                .suspend_borrower(borrower, reason, operator)
                .await,
        )
    }

    pub async fn blacklist_borrower(
        &self,
        borrower: BorrowerId,
        reason: &str,
        permanent: bool,
        operator: &str,
    ) -> Result<BorrowerStanding> {
        boundary(
            "blacklist_borrower",
            self.escalation
                .blacklist_borrower(borrower, reason, permanent, operator)
                .await,
        )
    }

    pub async fn reinstate_borrower(
        &self,
        borrower: BorrowerId,
        reason: &str,
        operator: &str,
    ) -> Result<BorrowerStanding> {
        boundary(
            "reinstate_borrower",
            self.escalation
                .reinstate_borrower(borrower, reason, operator)
                .await,
        )
    }

    pub async fn borrower_standing(&self, borrower: BorrowerId) -> Result<BorrowerStanding> {
        boundary(
            "borrower_standing",
            self.escalation.borrower_standing(borrower).await,
        )
    }

    pub async fn audit_log(&self, borrower: Option<BorrowerId>) -> Result<Vec<AuditEntry>> {
        boundary("audit_log", self.escalation.audit_log(borrower).await)
    }

    pub async fn overdue_record(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>> {
        boundary(
            "overdue_record",
            self.escalation.overdue_record(loan_id).await,
        )
    }

    pub async fn get_overdue_statistics(&self) -> Result<OverdueStatistics> {
        boundary(
            "get_overdue_statistics",
            self.escalation.get_overdue_statistics().await,
        )
    }

    // Sweeps

    pub async fn run_overdue_sweep(&self) -> Result<OverdueSweepReport> {
        boundary(
            "run_overdue_sweep",
            self.escalation.run_overdue_sweep().await,
        )
    }

    /// Runs scheduled payments and auto-pay, then drops expired application
    /// drafts and idle lock entries.
    pub async fn run_payment_sweep(&self) -> Result<PaymentSweepReport> {
        let report = boundary(
            "run_payment_sweep",
            self.repayment.run_payment_sweep().await,
        )?;
        self.workflow.purge_expired_sessions().await;
        self.locks.prune();
        Ok(report)
    }
}
