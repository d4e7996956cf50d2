use crate::config::OverdueConfig;
use crate::domain::ids::{BorrowerId, LoanId, OverdueId};
use crate::domain::loan::LoanRecord;
use crate::domain::money::{Money, round_cents};
use crate::error::{LoanError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete overdue handling stages, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationLevel {
    GracePeriod,
    Notification,
    InitialCollection,
    IntensiveCollection,
    AccountSuspension,
    Blacklisting,
    LegalAction,
}

impl EscalationLevel {
    pub const ALL: [EscalationLevel; 7] = [
        Self::GracePeriod,
        Self::Notification,
        Self::InitialCollection,
        Self::IntensiveCollection,
        Self::AccountSuspension,
        Self::Blacklisting,
        Self::LegalAction,
    ];

    /// Level for a loan `days_overdue` days past due with `overdue_payments`
    /// missed installments, before applying the monotonic floor.
    pub fn compute(days_overdue: i64, overdue_payments: u32, config: &OverdueConfig) -> Self {
        if days_overdue > config.legal_action_days {
            Self::LegalAction
        } else if overdue_payments >= config.blacklist_threshold
            || days_overdue >= config.blacklist_days
        {
            Self::Blacklisting
        } else if overdue_payments >= config.suspension_threshold
            || days_overdue >= config.intensive_collection_days
        {
            Self::AccountSuspension
        } else if days_overdue < config.grace_period_days {
            Self::GracePeriod
        } else if days_overdue < config.notification_days {
            Self::Notification
        } else if days_overdue < config.initial_collection_days && overdue_payments < 2 {
            Self::InitialCollection
        } else {
            Self::IntensiveCollection
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GracePeriod => "GRACE_PERIOD",
            Self::Notification => "NOTIFICATION",
            Self::InitialCollection => "INITIAL_COLLECTION",
            Self::IntensiveCollection => "INTENSIVE_COLLECTION",
            Self::AccountSuspension => "ACCOUNT_SUSPENSION",
            Self::Blacklisting => "BLACKLISTING",
            Self::LegalAction => "LEGAL_ACTION",
        };
        f.write_str(name)
    }
}

/// Total penalty for `days_overdue` days on `overdue_amount`.
///
/// Simple accrual is `amount × rate × days`; compounded accrual adds each
/// day's penalty to the base, `amount × ((1 + rate)^days − 1)`. Both are
/// capped at `amount × max_percentage`.
pub fn accrued_penalty(
    overdue_amount: Decimal,
    daily_rate: Decimal,
    days_overdue: i64,
    compound_daily: bool,
    max_percentage: Decimal,
) -> Decimal {
    if days_overdue <= 0 || overdue_amount <= Decimal::ZERO || daily_rate <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let cap = overdue_amount * max_percentage;
    let days = days_overdue as u64;
    let total = if compound_daily {
        match (Decimal::ONE + daily_rate).checked_powu(days) {
            Some(growth) => overdue_amount * (growth - Decimal::ONE),
            None => cap,
        }
    } else {
        overdue_amount * daily_rate * Decimal::from(days)
    };
    round_cents(total.min(cap))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverdueStatus {
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionReason {
    Repaid,
    LoanClosed,
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub reason: ResolutionReason,
    pub resolved_at: DateTime<Utc>,
}

/// One overdue episode of a loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueRecord {
    pub id: OverdueId,
    pub loan_id: LoanId,
    pub borrower: BorrowerId,
    pub original_balance: Money,
    pub current_balance: Money,
    pub overdue_amount: Money,
    pub overdue_payments: u32,
    pub first_overdue_date: DateTime<Utc>,
    pub last_overdue_date: DateTime<Utc>,
    pub days_overdue: i64,
    pub collection_attempts: u32,
    pub penalty_rate: Decimal,
    pub accrued_penalty: Money,
    pub penalty_paid: Money,
    pub penalty_waived: Money,
    pub escalation_level: EscalationLevel,
    /// Highest level whose entry actions have already been dispatched.
    pub actioned_level: Option<EscalationLevel>,
    pub status: OverdueStatus,
    pub resolution: Option<Resolution>,
}

impl OverdueRecord {
    /// Opens an episode for a loan that just missed a due date.
    pub fn open(
        loan: &LoanRecord,
        first_overdue_date: DateTime<Utc>,
        penalty_rate: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OverdueId::new(),
            loan_id: loan.id(),
            borrower: loan.borrower(),
            original_balance: loan.current_balance(),
            current_balance: loan.current_balance(),
            overdue_amount: loan.overdue_amount(),
            overdue_payments: loan.overdue_payments(),
            first_overdue_date,
            last_overdue_date: now,
            days_overdue: 0,
            collection_attempts: 0,
            penalty_rate,
            accrued_penalty: Money::ZERO,
            penalty_paid: Money::ZERO,
            penalty_waived: Money::ZERO,
            escalation_level: EscalationLevel::GracePeriod,
            actioned_level: None,
            status: OverdueStatus::Active,
            resolution: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == OverdueStatus::Active
    }

    pub fn outstanding_penalty(&self) -> Money {
        self.accrued_penalty
            .saturating_sub(self.penalty_paid)
            .saturating_sub(self.penalty_waived)
    }

    /// Syncs balances from the loan and recomputes days overdue.
    pub fn observe(&mut self, loan: &LoanRecord, now: DateTime<Utc>) {
        self.current_balance = loan.current_balance();
        self.overdue_amount = loan.overdue_amount();
        self.overdue_payments = loan.overdue_payments();
        self.days_overdue = (now - self.first_overdue_date).num_days().max(0);
        self.last_overdue_date = now;
    }

    /// Recomputes the accrued penalty; the accrued total never decreases.
    pub fn accrue(&mut self, config: &OverdueConfig) -> Money {
        let total = accrued_penalty(
            self.overdue_amount.value(),
            self.penalty_rate,
            self.days_overdue,
            config.compound_daily,
            config.max_penalty_percentage,
        );
        self.accrued_penalty = self.accrued_penalty.max(Money::new(total));
        self.outstanding_penalty()
    }

    /// Raises the level if `computed` is more severe; returns whether it rose.
    pub fn escalate(&mut self, computed: EscalationLevel) -> bool {
        if computed > self.escalation_level {
            self.escalation_level = computed;
            true
        } else {
            false
        }
    }

    /// Books the penalty portion of a payment and re-syncs balances from the
    /// loan it was applied to.
    pub fn apply_payment(&mut self, penalty: Money, loan: &LoanRecord) {
        self.penalty_paid += penalty;
        self.current_balance = loan.current_balance();
        self.overdue_amount = loan.overdue_amount();
        self.overdue_payments = loan.overdue_payments();
    }

    pub fn waive(&mut self, amount: Money) -> Result<()> {
        let outstanding = self.outstanding_penalty();
        if amount > outstanding {
            return Err(LoanError::WaiverExceedsPenalty {
                requested: amount.value(),
                outstanding: outstanding.value(),
            });
        }
        self.penalty_waived += amount;
        Ok(())
    }

    /// Re-derives the level without the monotonic floor, after a waiver.
    pub fn reset_level(&mut self, config: &OverdueConfig) {
        self.escalation_level =
            EscalationLevel::compute(self.days_overdue, self.overdue_payments, config);
        self.actioned_level = self.actioned_level.map(|a| a.min(self.escalation_level));
    }

    pub fn is_cleared(&self) -> bool {
        self.overdue_amount.is_zero() && self.outstanding_penalty().is_zero()
    }

    pub fn resolve(&mut self, reason: ResolutionReason, now: DateTime<Utc>) {
        self.status = OverdueStatus::Resolved;
        self.resolution = Some(Resolution {
            reason,
            resolved_at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_simple_penalty_reference() {
        let total = accrued_penalty(dec!(5000), dec!(0.05), 20, false, dec!(1.0));
        assert_eq!(total, dec!(5000));
        let capped = accrued_penalty(dec!(5000), dec!(0.05), 20, false, dec!(0.5));
        assert_eq!(capped, dec!(2500));
    }

    #[test]
    fn test_compound_penalty_exceeds_simple() {
        let simple = accrued_penalty(dec!(1000), dec!(0.01), 30, false, dec!(10));
        let compound = accrued_penalty(dec!(1000), dec!(0.01), 30, true, dec!(10));
        assert_eq!(simple, dec!(300));
        assert!(compound > simple);
        assert_eq!(compound, dec!(347.85));
    }

    #[test]
    fn test_penalty_zero_cases() {
        assert_eq!(accrued_penalty(dec!(1000), dec!(0.01), 0, false, dec!(1)), Decimal::ZERO);
        assert_eq!(accrued_penalty(Decimal::ZERO, dec!(0.01), 5, false, dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn test_level_ladder() {
        let cfg = OverdueConfig::default();
        assert_eq!(EscalationLevel::compute(1, 1, &cfg), EscalationLevel::GracePeriod);
        assert_eq!(EscalationLevel::compute(4, 1, &cfg), EscalationLevel::Notification);
        assert_eq!(EscalationLevel::compute(10, 1, &cfg), EscalationLevel::InitialCollection);
        assert_eq!(EscalationLevel::compute(10, 2, &cfg), EscalationLevel::IntensiveCollection);
        assert_eq!(EscalationLevel::compute(20, 1, &cfg), EscalationLevel::IntensiveCollection);
        assert_eq!(EscalationLevel::compute(31, 2, &cfg), EscalationLevel::AccountSuspension);
        assert_eq!(EscalationLevel::compute(20, 3, &cfg), EscalationLevel::AccountSuspension);
        assert_eq!(EscalationLevel::compute(61, 3, &cfg), EscalationLevel::Blacklisting);
        assert_eq!(EscalationLevel::compute(40, 5, &cfg), EscalationLevel::Blacklisting);
        assert_eq!(EscalationLevel::compute(91, 4, &cfg), EscalationLevel::LegalAction);
    }

    #[test]
    fn test_level_monotonic_with_days() {
        let cfg = OverdueConfig::default();
        let mut previous = EscalationLevel::GracePeriod;
        for days in 0..120i64 {
            let payments = (days / 30 + 1) as u32;
            let level = EscalationLevel::compute(days, payments, &cfg);
            assert!(level >= previous, "day {days}: {level} < {previous}");
            previous = level;
        }
        assert_eq!(previous, EscalationLevel::LegalAction);
    }
}
