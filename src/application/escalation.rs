//! Overdue detection, penalty accrual, escalation and collections, plus the
//! privileged administrative overrides.

use crate::application::locks::LoanLocks;
use crate::config::OverdueConfig;
use crate::domain::borrower::{Actor, AuditAction, AuditEntry, BorrowerStanding};
use crate::domain::collection::{
    CloseReason, CollectionAttempt, CollectionChannel, CollectionStrategy, CollectionWorkflow,
};
use crate::domain::ids::{BorrowerId, LoanId};
use crate::domain::loan::{LoanRecord, LoanStatus};
use crate::domain::money::{Amount, Money};
use crate::domain::overdue::{EscalationLevel, OverdueRecord, ResolutionReason};
use crate::domain::ports::{ClockRef, NotifierRef, RepositoryRef};
use crate::error::{LoanError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueSweepReport {
    pub loans_checked: usize,
    pub newly_overdue: usize,
    pub escalations: usize,
    pub notifications_sent: usize,
    pub collection_attempts: usize,
    pub suspensions: usize,
    pub blacklistings: usize,
    pub defaults: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverdueStatistics {
    pub active_episodes: usize,
    pub resolved_episodes: usize,
    pub by_level: BTreeMap<EscalationLevel, usize>,
    pub total_overdue_amount: Money,
    pub total_accrued_penalty: Money,
    pub total_outstanding_penalty: Money,
    pub total_penalty_waived: Money,
    pub active_workflows: usize,
    pub collection_attempts: u32,
    pub successful_attempts: u32,
    pub defaulted_loans: usize,
}

pub struct EscalationEngine {
    repo: RepositoryRef,
    notifier: NotifierRef,
    clock: ClockRef,
    locks: LoanLocks,
    config: OverdueConfig,
}

impl EscalationEngine {
    pub fn new(
        repo: RepositoryRef,
        notifier: NotifierRef,
        clock: ClockRef,
        locks: LoanLocks,
        config: OverdueConfig,
    ) -> Self {
        Self {
            repo,
            notifier,
            clock,
            locks,
            config,
        }
    }

    /// One pass over every ACTIVE and OVERDUE loan. Safe to repeat: penalties
    /// are recomputed, level actions fire once per level, and collection
    /// attempts are throttled.
    pub async fn run_overdue_sweep(&self) -> Result<OverdueSweepReport> {
        let now = self.clock.now();
        let mut report = OverdueSweepReport::default();
        let mut candidates = self.repo.loans_by_status(LoanStatus::Active).await?;
        candidates.extend(self.repo.loans_by_status(LoanStatus::Overdue).await?);

        for candidate in candidates {
            let loan_id = candidate.id();
            let _guard = self.locks.acquire(loan_id).await;
            report.loans_checked += 1;
            if let Err(e) = self.process_loan(loan_id, now, &mut report).await {
                report.failures += 1;
                warn!(loan_id = %loan_id, error = %e, "overdue processing failed");
            }
        }
        self.locks.prune();
        debug!(?report, "overdue sweep finished");
        Ok(report)
    }

    async fn process_loan(
        &self,
        loan_id: LoanId,
        now: DateTime<Utc>,
        report: &mut OverdueSweepReport,
    ) -> Result<()> {
        let Some(mut loan) = self.repo.get_loan(loan_id).await? else {
            return Ok(());
        };
        let first_missed = loan.next_due_date();
        match loan.status() {
            LoanStatus::Active => {
                if !loan.refresh_overdue(now)? {
                    return Ok(());
                }
                report.newly_overdue += 1;
                info!(loan_id = %loan_id, missed = loan.overdue_payments(), "loan is overdue");
            }
            LoanStatus::Overdue => {
                loan.refresh_overdue(now)?;
            }
            _ => return Ok(()),
        }

        let mut record = match self.repo.active_overdue(loan_id).await? {
            Some(record) => record,
            None => OverdueRecord::open(
                &loan,
                first_missed.unwrap_or(now),
                self.config.penalty_rate,
                now,
            ),
        };
        record.observe(&loan, now);
        if !loan.penalty_waived() && record.days_overdue >= self.config.grace_period_days {
            record.accrue(&self.config);
        }
        let computed = EscalationLevel::compute(
            record.days_overdue,
            record.overdue_payments,
            &self.config,
        );
        if record.escalate(computed) {
            report.escalations += 1;
            info!(loan_id = %loan_id, level = %record.escalation_level, days = record.days_overdue, "escalation level raised");
        }

        self.repo.save_loan(loan.clone()).await?;
        self.repo.save_overdue(record.clone()).await?;

        self.dispatch(&mut loan, &mut record, now, report).await?;
        self.repo.save_overdue(record).await
    }

    /// Runs the entry actions of a newly reached level once, then any
    /// collection attempt the throttle allows.
    async fn dispatch(
        &self,
        loan: &mut LoanRecord,
        record: &mut OverdueRecord,
        now: DateTime<Utc>,
        report: &mut OverdueSweepReport,
    ) -> Result<()> {
        let level = record.escalation_level;
        let entering = record.actioned_level.is_none_or(|done| done < level);

        if entering {
            match level {
                EscalationLevel::GracePeriod => {}
                EscalationLevel::Notification => {
                    let message = format!(
                        "Your loan payment of {} is {} days overdue.",
                        record.overdue_amount.rounded(),
                        record.days_overdue
                    );
                    match self
                        .notifier
                        .send(loan.borrower(), CollectionChannel::InApp, &message)
                        .await
                    {
                        Ok(_) => report.notifications_sent += 1,
                        Err(e) => warn!(loan_id = %loan.id(), error = %e, "overdue notice not delivered"),
                    }
                }
                EscalationLevel::InitialCollection | EscalationLevel::IntensiveCollection => {}
                EscalationLevel::AccountSuspension => {
                    let reason = format!("loan {} overdue {} days", loan.id(), record.days_overdue);
                    let standing = suspended(reason, now);
                    if self
                        .restrict(loan.borrower(), standing, &Actor::System, now)
                        .await?
                    {
                        report.suspensions += 1;
                    }
                }
                EscalationLevel::Blacklisting => {
                    let reason = format!("loan {} overdue {} days", loan.id(), record.days_overdue);
                    let standing = blacklisted(reason, false, now);
                    if self
                        .restrict(loan.borrower(), standing, &Actor::System, now)
                        .await?
                    {
                        report.blacklistings += 1;
                    }
                }
                EscalationLevel::LegalAction => {
                    loan.mark_defaulted(now)?;
                    self.repo.save_loan(loan.clone()).await?;
                    record.resolve(ResolutionReason::Defaulted, now);
                    report.defaults += 1;
                    info!(target: "audit", loan_id = %loan.id(), borrower = %loan.borrower(), "loan referred for legal action and defaulted");
                }
            }
            record.actioned_level = Some(level);
        }

        self.collect(loan, record, entering, now, report).await
    }

    async fn collect(
        &self,
        loan: &LoanRecord,
        record: &mut OverdueRecord,
        entering: bool,
        now: DateTime<Utc>,
        report: &mut OverdueSweepReport,
    ) -> Result<()> {
        let level = record.escalation_level;
        let Some(strategy) = CollectionStrategy::for_level(level) else {
            return Ok(());
        };
        let existing = self.repo.active_workflow(loan.id()).await?;
        let close_reason = match level {
            EscalationLevel::AccountSuspension => Some(CloseReason::Suspended),
            EscalationLevel::Blacklisting => Some(CloseReason::Blacklisted),
            EscalationLevel::LegalAction => Some(CloseReason::LegalAction),
            _ => None,
        };
        let closes = close_reason.is_some();
        if existing.is_none() && closes && !entering {
            return Ok(());
        }
        let mut workflow = match existing {
            Some(mut workflow) => {
                if workflow.intensify(level, strategy.clone()) {
                    debug!(loan_id = %loan.id(), level = %level, "collection intensified");
                }
                workflow
            }
            None => {
                info!(loan_id = %loan.id(), level = %level, "collection workflow opened");
                CollectionWorkflow::open(loan.id(), loan.borrower(), level, strategy, now)
            }
        };

        if workflow.can_attempt(now, self.config.collection_retry_interval()) {
            let message = format!(
                "Loan {} is {} days overdue. Amount due: {}, penalty: {}.",
                loan.id(),
                record.days_overdue,
                record.overdue_amount.rounded(),
                record.outstanding_penalty().rounded()
            );
            for channel in workflow.strategy.channels.clone() {
                let attempt = match self.notifier.send(loan.borrower(), channel, &message).await {
                    Ok(id) => CollectionAttempt {
                        at: now,
                        level,
                        channel,
                        success: true,
                        notification_id: Some(id),
                        error: None,
                    },
                    Err(e) => {
                        warn!(loan_id = %loan.id(), channel = %channel, error = %e, "collection attempt failed");
                        CollectionAttempt {
                            at: now,
                            level,
                            channel,
                            success: false,
                            notification_id: None,
                            error: Some(e.to_string()),
                        }
                    }
                };
                workflow.record_attempt(attempt);
                record.collection_attempts += 1;
                report.collection_attempts += 1;
            }
        }

        if let Some(reason) = close_reason {
            workflow.close(reason, now);
        }
        self.repo.save_workflow(workflow).await
    }

    /// Applies a restriction unless the borrower already has one at least as
    /// severe. Returns whether the standing changed.
    async fn restrict(
        &self,
        borrower: BorrowerId,
        standing: BorrowerStanding,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let current = self.repo.standing(borrower).await?;
        if current.severity() >= standing.severity() {
            if let Actor::Operator(_) = actor {
                let reason = format!("requested {standing}; kept {current}");
                let action = AuditAction::RestrictionUnchanged;
                self.audit(actor, action, borrower, None, None, &reason, now).await?;
                info!(target: "audit", borrower = %borrower, actor = %actor, standing = %current, "restriction request left standing unchanged");
            }
            return Ok(false);
        }
        let (action, reason) = match &standing {
            BorrowerStanding::Suspended { reason, .. } => {
                (AuditAction::BorrowerSuspended, reason.clone())
            }
            BorrowerStanding::Blacklisted { reason, .. } => {
                (AuditAction::BorrowerBlacklisted, reason.clone())
            }
            BorrowerStanding::Good => return Ok(false),
        };
        self.repo.set_standing(borrower, standing.clone()).await?;
        self.audit(actor, action, borrower, None, None, &reason, now).await?;
        info!(target: "audit", borrower = %borrower, actor = %actor, standing = %standing, "borrower restricted");
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        actor: &Actor,
        action: AuditAction,
        borrower: BorrowerId,
        loan_id: Option<LoanId>,
        amount: Option<Money>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.repo
            .append_audit(AuditEntry {
                at: now,
                actor: actor.clone(),
                action,
                borrower,
                loan_id,
                amount,
                reason: reason.to_string(),
            })
            .await
    }

    /// Forgives part or all of a loan's outstanding penalty.
    ///
    /// The escalation level is re-derived without its monotonic floor, and a
    /// loan with nothing left overdue returns to ACTIVE.
    pub async fn waive_penalties(
        &self,
        loan_id: LoanId,
        amount: Amount,
        reason: &str,
        operator: &str,
    ) -> Result<OverdueRecord> {
        let _guard = self.locks.acquire(loan_id).await;
        let now = self.clock.now();
        let mut loan = self
            .repo
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::NotFound(format!("loan {loan_id}")))?;
        let mut record = self
            .repo
            .active_overdue(loan_id)
            .await?
            .ok_or_else(|| {
                LoanError::NotFound(format!("active overdue record for loan {loan_id}"))
            })?;

        record.waive(amount.into())?;
        record.reset_level(&self.config);
        if record.is_cleared()
            && loan.status() == LoanStatus::Overdue
            && loan.overdue_payments() == 0
        {
            loan.restore_active()?;
            record.resolve(ResolutionReason::Repaid, now);
            self.repo.save_loan(loan.clone()).await?;
        }
        self.repo.save_overdue(record.clone()).await?;

        let actor = Actor::Operator(operator.to_string());
        self.audit(
            &actor,
            AuditAction::PenaltyWaived,
            loan.borrower(),
            Some(loan_id),
            Some(amount.into()),
            reason,
            now,
        )
        .await?;
        info!(
            target: "audit",
            loan_id = %loan_id,
            operator,
            amount = %amount.value(),
            remaining = %record.outstanding_penalty(),
            reason,
            "penalty waived"
        );
        Ok(record)
    }

    /// Stops all further penalty accrual on a loan.
    pub async fn stop_penalty_accrual(
        &self,
        loan_id: LoanId,
        reason: &str,
        operator: &str,
    ) -> Result<LoanRecord> {
        let _guard = self.locks.acquire(loan_id).await;
        let now = self.clock.now();
        let mut loan = self
            .repo
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| LoanError::NotFound(format!("loan {loan_id}")))?;
        loan.waive_penalty_accrual();
        self.repo.save_loan(loan.clone()).await?;

        let actor = Actor::Operator(operator.to_string());
        self.audit(
            &actor,
            AuditAction::PenaltyWaived,
            loan.borrower(),
            Some(loan_id),
            None,
            reason,
            now,
        )
        .await?;
        info!(target: "audit", loan_id = %loan_id, operator, reason, "penalty accrual stopped");
        Ok(loan)
    }

    pub async fn suspend_borrower(
        &self,
        borrower: BorrowerId,
        reason: &str,
        operator: &str,
    ) -> Result<BorrowerStanding> {
        let now = self.clock.now();
        let actor = Actor::Operator(operator.to_string());
        if self
            .restrict(borrower, suspended(reason.to_string(), now), &actor, now)
            .await?
        {
            self.close_workflows(borrower, CloseReason::Suspended, now).await?;
        }
        self.repo.standing(borrower).await
    }

    pub async fn blacklist_borrower(
        &self,
        borrower: BorrowerId,
        reason: &str,
        permanent: bool,
        operator: &str,
    ) -> Result<BorrowerStanding> {
        let now = self.clock.now();
        let actor = Actor::Operator(operator.to_string());
        if self
            .restrict(borrower, blacklisted(reason.to_string(), permanent, now), &actor, now)
            .await?
        {
            self.close_workflows(borrower, CloseReason::Blacklisted, now).await?;
        }
        self.repo.standing(borrower).await
    }

    /// Closes the open collection workflow of every loan the borrower holds.
    async fn close_workflows(
        &self,
        borrower: BorrowerId,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut closed = 0;
        for loan in self.repo.loans_by_borrower(borrower).await? {
            let _guard = self.locks.acquire(loan.id()).await;
            if let Some(mut workflow) = self.repo.active_workflow(loan.id()).await? {
                workflow.close(reason, now);
                self.repo.save_workflow(workflow).await?;
                closed += 1;
                info!(loan_id = %loan.id(), reason = ?reason, "collection workflow closed");
            }
        }
        Ok(closed)
    }

    /// Lifts a suspension or a non-permanent blacklisting.
    pub async fn reinstate_borrower(
        &self,
        borrower: BorrowerId,
        reason: &str,
        operator: &str,
    ) -> Result<BorrowerStanding> {
        let now = self.clock.now();
        let current = self.repo.standing(borrower).await?;
        if !current.can_reinstate() {
            return Err(LoanError::BorrowerRestricted(format!(
                "{borrower} is permanently blacklisted"
            )));
        }
        if current.is_good() {
            return Ok(current);
        }
        self.repo.set_standing(borrower, BorrowerStanding::Good).await?;
        let actor = Actor::Operator(operator.to_string());
        self.audit(&actor, AuditAction::BorrowerReinstated, borrower, None, None, reason, now)
            .await?;
        info!(target: "audit", borrower = %borrower, operator, previous = %current, reason, "borrower reinstated");
        Ok(BorrowerStanding::Good)
    }

    pub async fn borrower_standing(&self, borrower: BorrowerId) -> Result<BorrowerStanding> {
        self.repo.standing(borrower).await
    }

    pub async fn audit_log(&self, borrower: Option<BorrowerId>) -> Result<Vec<AuditEntry>> {
        self.repo.audit_log(borrower).await
    }

    pub async fn overdue_record(&self, loan_id: LoanId) -> Result<Option<OverdueRecord>> {
        self.repo.active_overdue(loan_id).await
    }

    pub async fn get_overdue_statistics(&self) -> Result<OverdueStatistics> {
        let mut stats = OverdueStatistics::default();
        for record in self.repo.overdue_records().await? {
            stats.total_accrued_penalty += record.accrued_penalty;
            stats.total_penalty_waived += record.penalty_waived;
            if record.is_active() {
                stats.active_episodes += 1;
                *stats.by_level.entry(record.escalation_level).or_default() += 1;
                stats.total_overdue_amount += record.overdue_amount;
                stats.total_outstanding_penalty += record.outstanding_penalty();
            } else {
                stats.resolved_episodes += 1;
            }
        }
        for workflow in self.repo.workflows().await? {
            if workflow.is_open() {
                stats.active_workflows += 1;
            }
            stats.collection_attempts += workflow.attempt_count;
            stats.successful_attempts += workflow.success_count;
        }
        stats.defaulted_loans = self.repo.loans_by_status(LoanStatus::Defaulted).await?.len();
        Ok(stats)
    }
}

fn suspended(reason: String, since: DateTime<Utc>) -> BorrowerStanding {
    BorrowerStanding::Suspended { reason, since }
}

fn blacklisted(reason: String, permanent: bool, since: DateTime<Utc>) -> BorrowerStanding {
    BorrowerStanding::Blacklisted {
        reason,
        permanent,
        since,
    }
}
