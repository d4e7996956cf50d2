//! The five-step loan application workflow.
//!
//! Drafts live in a [`SessionArena`]; steps that call out to the credit
//! evaluator or the stores snapshot the draft, release the arena, await the
//! collaborator, and then apply the result only if the session is still the
//! same one and still at the same step.

use crate::application::locks::LoanLocks;
use crate::application::sessions::{ApplicationHandle, SessionArena};
use crate::config::ApplicationConfig;
use crate::domain::amortization::LoanTerms;
use crate::domain::application::{
    AmountTermQuote, ApplicationStatus, ApplicationStep, CreditSnapshot, EligibilityReport,
    LoanApplication, LoanStatusSummary, TypeSelection,
};
use crate::domain::borrower::{Actor, AuditAction, AuditEntry};
use crate::domain::ids::{BorrowerId, LoanId};
use crate::domain::loan::{LoanRecord, LoanStatus};
use crate::domain::money::Money;
use crate::domain::policy::{
    AutoApproval, AutoApprovalInput, CollateralAssessment, CollateralItem, LoanType,
    assess_collateral, auto_approve, interest_rate, validate_amount_term,
};
use crate::domain::ports::{ClockRef, CreditEvaluatorRef, LedgerRef, RepositoryRef};
use crate::error::{LoanError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Input for one step; the variant must match the draft's current step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepInput {
    Eligibility,
    AmountTerm { amount: Decimal, term_months: u32 },
    TypeSelection { loan_type: LoanType },
    Collateral { items: Vec<CollateralItem> },
    Confirmation { purpose: String },
}

impl StepInput {
    pub fn step(&self) -> ApplicationStep {
        match self {
            Self::Eligibility => ApplicationStep::Eligibility,
            Self::AmountTerm { .. } => ApplicationStep::AmountTerm,
            Self::TypeSelection { .. } => ApplicationStep::TypeSelection,
            Self::Collateral { .. } => ApplicationStep::Collateral,
            Self::Confirmation { .. } => ApplicationStep::Confirmation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub terms: LoanTerms,
    pub auto_approval: AutoApproval,
}

/// What a completed step produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepOutcome {
    Eligibility(EligibilityReport),
    AmountTerm(AmountTermQuote),
    TypeSelection(TypeSelection),
    /// `None` when an unsecured loan was submitted without collateral.
    Collateral(Option<CollateralAssessment>),
    Confirmation(Confirmation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedLoan {
    pub loan: LoanRecord,
    pub auto_approved: bool,
}

pub struct ApplicationWorkflow {
    repo: RepositoryRef,
    credit: CreditEvaluatorRef,
    ledger: LedgerRef,
    clock: ClockRef,
    locks: LoanLocks,
    config: ApplicationConfig,
    sessions: Mutex<SessionArena>,
}

impl ApplicationWorkflow {
    pub fn new(
        repo: RepositoryRef,
        credit: CreditEvaluatorRef,
        ledger: LedgerRef,
        clock: ClockRef,
        locks: LoanLocks,
        config: ApplicationConfig,
    ) -> Self {
        let sessions = Mutex::new(SessionArena::new(config.session_ttl()));
        Self {
            repo,
            credit,
            ledger,
            clock,
            locks,
            config,
            sessions,
        }
    }

    /// Opens a fresh draft, replacing any draft the borrower already had.
    pub async fn start_application(
        &self,
        borrower: BorrowerId,
        loan_type: LoanType,
    ) -> ApplicationHandle {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let replaced = sessions.handle_for(borrower).is_some();
        let handle = sessions.insert(LoanApplication::new(borrower, loan_type, now), now);
        info!(borrower = %borrower, loan_type = %loan_type, replaced, "application started");
        handle
    }

    /// Snapshot of the draft behind `handle`.
    pub async fn application(&self, handle: ApplicationHandle) -> Result<LoanApplication> {
        let sessions = self.sessions.lock().await;
        sessions.get(handle, self.clock.now()).cloned()
    }

    pub async fn advance_step(
        &self,
        handle: ApplicationHandle,
        input: StepInput,
    ) -> Result<StepOutcome> {
        let draft = self.draft_at(handle, input.step()).await?;
        match input {
            StepInput::Eligibility => self.check_eligibility(handle, draft).await,
            StepInput::AmountTerm {
                amount,
                term_months,
            } => {
                self.apply(handle, ApplicationStep::AmountTerm, |app| {
                    let quote = quote(app, amount, term_months)?;
                    app.requested_amount = Some(amount);
                    app.term_months = Some(term_months);
                    app.quote = Some(quote.clone());
                    Ok(StepOutcome::AmountTerm(quote))
                })
                .await
            }
            StepInput::TypeSelection { loan_type } => {
                self.select_type(handle, draft, loan_type).await
            }
            StepInput::Collateral { items } => {
                let rates = &self.config.collateral_discount_rates;
                self.apply(handle, ApplicationStep::Collateral, |app| {
                    let amount = app.requested_amount.unwrap_or_default();
                    let assessment = if items.is_empty() && !app.loan_type.policy().secured {
                        None
                    } else {
                        Some(assess_collateral(app.loan_type, amount, &items, rates)?)
                    };
                    app.collateral = assessment.clone();
                    Ok(StepOutcome::Collateral(assessment))
                })
                .await
            }
            StepInput::Confirmation { purpose } => self.confirm(handle, draft, purpose).await,
        }
    }

    /// Moves back to `step`, discarding what that step and later ones produced.
    pub async fn go_back(
        &self,
        handle: ApplicationHandle,
        step: ApplicationStep,
    ) -> Result<LoanApplication> {
        let mut sessions = self.sessions.lock().await;
        let app = sessions.get_mut(handle, self.clock.now())?;
        if step > app.current_step || app.status == ApplicationStatus::Submitting {
            return Err(LoanError::StepOutOfOrder {
                expected: app.current_step,
                actual: step,
            });
        }
        app.rewind_to(step);
        debug!(borrower = %app.borrower, step = %step, "application rewound");
        Ok(app.clone())
    }

    /// Persists a confirmed application as a loan.
    ///
    /// Auto-approved loans are activated and disbursed immediately; the rest
    /// wait in PENDING_REVIEW. The draft is consumed only on success.
    pub async fn submit_application(&self, handle: ApplicationHandle) -> Result<SubmittedLoan> {
        let draft = self.claim_for_submit(handle).await?;
        match self.originate(&draft).await {
            Ok(submitted) => {
                let mut sessions = self.sessions.lock().await;
                // A concurrent restart already dropped the draft; the loan stands.
                let _ = sessions.remove(handle, self.clock.now());
                Ok(submitted)
            }
            Err(e) => {
                let mut sessions = self.sessions.lock().await;
                if let Ok(app) = sessions.get_mut(handle, self.clock.now()) {
                    if app.status == ApplicationStatus::Submitting {
                        app.status = ApplicationStatus::ReadyToSubmit;
                    }
                }
                Err(e)
            }
        }
    }

    /// Marks a confirmed draft as being submitted so no second submit, step
    /// or rewind can touch it while the loan is originated.
    async fn claim_for_submit(&self, handle: ApplicationHandle) -> Result<LoanApplication> {
        let mut sessions = self.sessions.lock().await;
        let app = sessions.get_mut(handle, self.clock.now())?;
        if app.status != ApplicationStatus::ReadyToSubmit {
            return Err(LoanError::StepOutOfOrder {
                expected: ApplicationStep::Confirmation,
                actual: app.current_step,
            });
        }
        app.status = ApplicationStatus::Submitting;
        Ok(app.clone())
    }

    async fn originate(&self, draft: &LoanApplication) -> Result<SubmittedLoan> {
        let (Some(terms), Some(credit), Some(approval), Some(purpose)) = (
            draft.final_terms.clone(),
            draft.credit,
            draft.auto_approval.clone(),
            draft.purpose.clone(),
        ) else {
            return Err(LoanError::StepOutOfOrder {
                expected: ApplicationStep::Confirmation,
                actual: draft.current_step,
            });
        };

        let now = self.clock.now();
        let mut loan = LoanRecord::originate(
            draft.borrower,
            draft.loan_type,
            terms,
            purpose,
            credit,
            draft.collateral.clone(),
            now,
        );
        if approval.approved {
            loan.activate(now)?;
            self.disburse_and_save(&loan).await?;
        } else {
            self.repo.save_loan(loan.clone()).await?;
        }

        info!(
            loan_id = %loan.id(),
            borrower = %loan.borrower(),
            principal = %loan.terms().principal,
            status = %loan.status(),
            "application submitted"
        );
        Ok(SubmittedLoan {
            loan,
            auto_approved: approval.approved,
        })
    }

    /// Manual decision on a PENDING_REVIEW loan.
    pub async fn review_application(
        &self,
        loan_id: LoanId,
        approve: bool,
        reviewer: &str,
    ) -> Result<LoanRecord> {
        let _guard = self.locks.acquire(loan_id).await;
        let mut loan = self
            .repo
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::NotFound(format!("loan {loan_id}")))?;
        let now = self.clock.now();
        if approve {
            loan.activate(now)?;
            self.disburse_and_save(&loan).await?;
        } else {
            loan.reject()?;
            self.repo.save_loan(loan.clone()).await?;
        }

        let reason = if approve { "approved" } else { "rejected" };
        self.repo
            .append_audit(AuditEntry {
                at: now,
                actor: Actor::Operator(reviewer.to_string()),
                action: AuditAction::ApplicationReviewed,
                borrower: loan.borrower(),
                loan_id: Some(loan_id),
                amount: Some(Money::new(loan.terms().principal)),
                reason: reason.to_string(),
            })
            .await?;
        info!(target: "audit", loan_id = %loan_id, reviewer, decision = reason, "application reviewed");
        Ok(loan)
    }

    pub async fn purge_expired_sessions(&self) -> usize {
        self.sessions.lock().await.purge_expired(self.clock.now())
    }

    async fn disburse_and_save(&self, loan: &LoanRecord) -> Result<()> {
        let principal = loan.terms().principal;
        self.ledger.deposit(loan.borrower(), principal).await?;
        if let Err(e) = self.repo.save_loan(loan.clone()).await {
            error!(loan_id = %loan.id(), error = %e, "loan not saved; reversing disbursement");
            if let Err(reversal) = self.ledger.withdraw(loan.borrower(), principal).await {
                error!(loan_id = %loan.id(), error = %reversal, "disbursement reversal failed");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn draft_at(
        &self,
        handle: ApplicationHandle,
        step: ApplicationStep,
    ) -> Result<LoanApplication> {
        let sessions = self.sessions.lock().await;
        let app = sessions.get(handle, self.clock.now())?;
        ensure_step(app, step)?;
        Ok(app.clone())
    }

    /// Applies `f` to the live draft if it is still at `step`, then advances.
    async fn apply<F>(
        &self,
        handle: ApplicationHandle,
        step: ApplicationStep,
        f: F,
    ) -> Result<StepOutcome>
    where
        F: FnOnce(&mut LoanApplication) -> Result<StepOutcome>,
    {
        let mut sessions = self.sessions.lock().await;
        let app = sessions.get_mut(handle, self.clock.now())?;
        ensure_step(app, step)?;
        let outcome = f(app)?;
        app.advance();
        debug!(borrower = %app.borrower, step = %step, "application step completed");
        Ok(outcome)
    }

    async fn loan_summary(&self, borrower: BorrowerId) -> Result<LoanStatusSummary> {
        let loans = self.repo.loans_by_borrower(borrower).await?;
        let mut summary = LoanStatusSummary::default();
        for loan in loans.iter().filter(|l| l.status().is_payable()) {
            summary.active_loans += 1;
            if loan.status() == LoanStatus::Overdue {
                summary.overdue_loans += 1;
            }
            summary.outstanding_balance += loan.current_balance().value();
            summary.monthly_burden += loan.terms().monthly_payment_cents();
        }
        Ok(summary)
    }

    async fn check_eligibility(
        &self,
        handle: ApplicationHandle,
        draft: LoanApplication,
    ) -> Result<StepOutcome> {
        let borrower = draft.borrower;
        let score = self.credit.score(borrower).await?;
        let grade = self.credit.grade(borrower).await?;
        let verified = self.credit.is_account_verified(borrower).await?;
        let summary = self.loan_summary(borrower).await?;
        let standing = self.repo.standing(borrower).await?;

        let mut reasons = Vec::new();
        let mut recommendations = Vec::new();
        if score < self.config.min_credit_score {
            reasons.push(format!(
                "credit score {score} is below the minimum of {}",
                self.config.min_credit_score
            ));
            recommendations
                .push("keep existing obligations current to raise your credit score".to_string());
        }
        if summary.overdue_loans > 0 {
            reasons.push(format!("{} overdue loan(s) outstanding", summary.overdue_loans));
            recommendations.push("settle overdue loans before applying again".to_string());
        }
        if !verified {
            reasons.push("account is not verified".to_string());
            recommendations.push("complete account verification".to_string());
        }
        if !standing.is_good() {
            reasons.push(format!("account standing is {standing}"));
            recommendations.push("contact support to resolve the account restriction".to_string());
        }

        let report = EligibilityReport {
            eligible: reasons.is_empty(),
            credit: CreditSnapshot { score, grade },
            summary,
            account_verified: verified,
            reasons,
            recommendations,
        };
        if !report.eligible {
            info!(borrower = %borrower, reasons = ?report.reasons, "borrower ineligible");
            return Err(LoanError::Ineligible(Box::new(report)));
        }

        self.apply(handle, ApplicationStep::Eligibility, |app| {
            app.credit = Some(report.credit);
            app.eligibility = Some(report.clone());
            Ok(StepOutcome::Eligibility(report))
        })
        .await
    }

    async fn select_type(
        &self,
        handle: ApplicationHandle,
        draft: LoanApplication,
        loan_type: LoanType,
    ) -> Result<StepOutcome> {
        let evaluator_qualifies = self
            .credit
            .qualifies_for_loan(draft.borrower, loan_type)
            .await?;
        self.apply(handle, ApplicationStep::TypeSelection, |app| {
            let amount = app.requested_amount.unwrap_or_default();
            let term = app.term_months.unwrap_or_default();
            let requote = quote_for(app, loan_type, amount, term)?;
            let selection = TypeSelection {
                loan_type,
                profile: loan_type.profile(),
                requires_collateral: loan_type.policy().secured,
                evaluator_qualifies,
            };
            app.loan_type = loan_type;
            app.quote = Some(requote);
            app.type_selection = Some(selection.clone());
            Ok(StepOutcome::TypeSelection(selection))
        })
        .await
    }

    async fn confirm(
        &self,
        handle: ApplicationHandle,
        draft: LoanApplication,
        purpose: String,
    ) -> Result<StepOutcome> {
        let purpose = purpose.trim().to_string();
        if purpose.is_empty() {
            return Err(LoanError::EmptyPurpose);
        }
        let summary = self.loan_summary(draft.borrower).await?;
        let max_active = self.config.max_active_loans_for_auto_approval;

        self.apply(handle, ApplicationStep::Confirmation, |app| {
            let credit = app.credit.ok_or(LoanError::StepOutOfOrder {
                expected: ApplicationStep::Eligibility,
                actual: ApplicationStep::Confirmation,
            })?;
            let amount = app.requested_amount.unwrap_or_default();
            let term = app.term_months.unwrap_or_default();
            if app.loan_type.policy().secured && app.collateral.is_none() {
                return Err(LoanError::EmptyCollateral);
            }
            let rate = interest_rate(app.loan_type, credit.score, amount, term);
            let terms = LoanTerms::compute(amount, rate, term, Decimal::ZERO)?;
            let auto_approval = auto_approve(
                AutoApprovalInput {
                    credit_score: credit.score,
                    loan_type: app.loan_type,
                    active_loans: summary.active_loans,
                    has_overdue_loans: summary.overdue_loans > 0,
                },
                max_active,
            );
            app.purpose = Some(purpose);
            app.final_terms = Some(terms.clone());
            app.auto_approval = Some(auto_approval.clone());
            Ok(StepOutcome::Confirmation(Confirmation {
                terms,
                auto_approval,
            }))
        })
        .await
    }
}

fn ensure_step(app: &LoanApplication, step: ApplicationStep) -> Result<()> {
    if app.current_step != step || app.status != ApplicationStatus::InProgress {
        return Err(LoanError::StepOutOfOrder {
            expected: app.current_step,
            actual: step,
        });
    }
    Ok(())
}

fn quote(app: &LoanApplication, amount: Decimal, term: u32) -> Result<AmountTermQuote> {
    quote_for(app, app.loan_type, amount, term)
}

fn quote_for(
    app: &LoanApplication,
    loan_type: LoanType,
    amount: Decimal,
    term: u32,
) -> Result<AmountTermQuote> {
    let credit = app.credit.ok_or(LoanError::StepOutOfOrder {
        expected: ApplicationStep::Eligibility,
        actual: ApplicationStep::AmountTerm,
    })?;
    let max_amount = validate_amount_term(loan_type, credit.score, amount, term)?;
    Ok(AmountTermQuote {
        amount,
        term_months: term,
        max_amount,
        interest_rate: interest_rate(loan_type, credit.score, amount, term),
    })
}
