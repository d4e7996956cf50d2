use crate::domain::ids::{BorrowerId, LoanId};
use crate::domain::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account-level restriction on a borrower.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BorrowerStanding {
    #[default]
    Good,
    Suspended {
        reason: String,
        since: DateTime<Utc>,
    },
    Blacklisted {
        reason: String,
        permanent: bool,
        since: DateTime<Utc>,
    },
}

impl BorrowerStanding {
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }

    pub fn is_blacklisted(&self) -> bool {
        matches!(self, Self::Blacklisted { .. })
    }

    /// Permanent blacklisting can never be lifted.
    pub fn can_reinstate(&self) -> bool {
        !matches!(
            self,
            Self::Blacklisted {
                permanent: true,
                ..
            }
        )
    }

    /// Severity rank; a restriction never downgrades a more severe one.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Good => 0,
            Self::Suspended { .. } => 1,
            Self::Blacklisted {
                permanent: false, ..
            } => 2,
            Self::Blacklisted {
                permanent: true, ..
            } => 3,
        }
    }
}

impl fmt::Display for BorrowerStanding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => f.write_str("GOOD"),
            Self::Suspended { reason, .. } => write!(f, "SUSPENDED ({reason})"),
            Self::Blacklisted {
                reason,
                permanent: true,
                ..
            } => write!(f, "PERMANENTLY BLACKLISTED ({reason})"),
            Self::Blacklisted { reason, .. } => write!(f, "BLACKLISTED ({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PenaltyWaived,
    BorrowerSuspended,
    BorrowerBlacklisted,
    BorrowerReinstated,
    ApplicationReviewed,
    /// A requested restriction left a more severe standing in place.
    RestrictionUnchanged,
}

/// Who caused an administrative mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Actor {
    /// The escalation engine acting on its own.
    System,
    Operator(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Operator(name) => f.write_str(name),
        }
    }
}

/// Append-only record of a privileged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub action: AuditAction,
    pub borrower: BorrowerId,
    pub loan_id: Option<LoanId>,
    pub amount: Option<Money>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standing_severity_orders_restrictions() {
        let now = Utc::now();
        let suspended = BorrowerStanding::Suspended {
            reason: "overdue".to_string(),
            since: now,
        };
        let permanent = BorrowerStanding::Blacklisted {
            reason: "fraud".to_string(),
            permanent: true,
            since: now,
        };
        assert!(BorrowerStanding::Good.severity() < suspended.severity());
        assert!(suspended.severity() < permanent.severity());
        assert!(suspended.can_reinstate());
        assert!(!permanent.can_reinstate());
    }

    #[test]
    fn test_standing_serializes_tagged() {
        let json = serde_json::to_string(&BorrowerStanding::Good).unwrap();
        assert_eq!(json, r#"{"state":"GOOD"}"#);
    }
}
