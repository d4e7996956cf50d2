use crate::domain::ids::{BorrowerId, LoanId, WorkflowId};
use crate::domain::overdue::EscalationLevel;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionChannel {
    Email,
    Sms,
    Phone,
    InApp,
    AccountRestriction,
    Blacklist,
    LegalNotice,
}

impl fmt::Display for CollectionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Phone => "PHONE",
            Self::InApp => "IN_APP",
            Self::AccountRestriction => "ACCOUNT_RESTRICTION",
            Self::Blacklist => "BLACKLIST",
            Self::LegalNotice => "LEGAL_NOTICE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intensity {
    Gentle,
    Intensive,
    Restrictive,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStrategy {
    pub intensity: Intensity,
    pub channels: Vec<CollectionChannel>,
}

impl CollectionStrategy {
    /// Strategy for a level, or `None` where no active collection runs.
    pub fn for_level(level: EscalationLevel) -> Option<Self> {
        let (intensity, channels) = match level {
            EscalationLevel::GracePeriod | EscalationLevel::Notification => return None,
            EscalationLevel::InitialCollection => (
                Intensity::Gentle,
                vec![CollectionChannel::Email, CollectionChannel::Sms],
            ),
            EscalationLevel::IntensiveCollection => (
                Intensity::Intensive,
                vec![CollectionChannel::Phone, CollectionChannel::InApp],
            ),
            EscalationLevel::AccountSuspension => (
                Intensity::Restrictive,
                vec![CollectionChannel::AccountRestriction],
            ),
            EscalationLevel::Blacklisting => {
                (Intensity::Final, vec![CollectionChannel::Blacklist])
            }
            EscalationLevel::LegalAction => {
                (Intensity::Final, vec![CollectionChannel::LegalNotice])
            }
        };
        Some(Self {
            intensity,
            channels,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionAttempt {
    pub at: DateTime<Utc>,
    pub level: EscalationLevel,
    pub channel: CollectionChannel,
    pub success: bool,
    pub notification_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    Resolved,
    Suspended,
    Blacklisted,
    LegalAction,
}

/// An active effort to recover an overdue balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionWorkflow {
    pub id: WorkflowId,
    pub loan_id: LoanId,
    pub borrower: BorrowerId,
    pub level: EscalationLevel,
    pub strategy: CollectionStrategy,
    pub attempts: Vec<CollectionAttempt>,
    pub attempt_count: u32,
    pub success_count: u32,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl CollectionWorkflow {
    pub fn open(
        loan_id: LoanId,
        borrower: BorrowerId,
        level: EscalationLevel,
        strategy: CollectionStrategy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowId::new(),
            loan_id,
            borrower,
            level,
            strategy,
            attempts: Vec::new(),
            attempt_count: 0,
            success_count: 0,
            status: WorkflowStatus::Open,
            started_at: now,
            last_attempt_at: None,
            closed_at: None,
            close_reason: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == WorkflowStatus::Open
    }

    /// Switches to a more severe strategy; the throttle restarts so the new
    /// channels are tried on the same sweep.
    pub fn intensify(&mut self, level: EscalationLevel, strategy: CollectionStrategy) -> bool {
        if level <= self.level {
            return false;
        }
        self.level = level;
        self.strategy = strategy;
        self.last_attempt_at = None;
        true
    }

    /// At most one attempt round per `interval`.
    pub fn can_attempt(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        self.is_open()
            && self
                .last_attempt_at
                .is_none_or(|last| now - last >= interval)
    }

    pub fn record_attempt(&mut self, attempt: CollectionAttempt) {
        self.attempt_count += 1;
        if attempt.success {
            self.success_count += 1;
        }
        self.last_attempt_at = Some(attempt.at);
        self.attempts.push(attempt);
    }

    pub fn close(&mut self, reason: CloseReason, now: DateTime<Utc>) {
        if self.is_open() {
            self.status = WorkflowStatus::Closed;
            self.closed_at = Some(now);
            self.close_reason = Some(reason);
        }
    }
}
