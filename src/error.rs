use crate::domain::application::{ApplicationStep, EligibilityReport};
use crate::domain::ids::{LoanId, ScheduledPaymentId};
use crate::domain::loan::LoanStatus;
use crate::domain::payment::ScheduledPaymentStatus;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoanError>;

/// Broad classification of a failure.
///
/// Validation failures leave the caller free to correct the input and retry,
/// rejections are expected business outcomes, and infrastructure failures are
/// logged and surfaced as a generic failure at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Rejection,
    Infrastructure,
}

#[derive(Error, Debug)]
pub enum LoanError {
    #[error("Invalid loan terms: {0}")]
    InvalidTerms(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Amount {amount} is outside the allowed range [{min}, {max}]")]
    AmountOutOfRange {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },
    #[error("Term of {term} months is outside the allowed range [{min}, {max}]")]
    TermOutOfRange { term: u32, min: u32, max: u32 },
    #[error("Unsupported collateral type: {0}")]
    UnsupportedCollateral(String),
    #[error("Secured loans require at least one collateral item")]
    EmptyCollateral,
    #[error("Loan purpose must not be empty")]
    EmptyPurpose,
    #[error("Expected step {expected}, got {actual}")]
    StepOutOfOrder {
        expected: ApplicationStep,
        actual: ApplicationStep,
    },
    #[error("Application session is no longer valid")]
    StaleSession,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Borrower is not eligible: {}", .0.reasons.join("; "))]
    Ineligible(Box<EligibilityReport>),
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },
    #[error("Waiver of {requested} exceeds outstanding penalty {outstanding}")]
    WaiverExceedsPenalty {
        requested: Decimal,
        outstanding: Decimal,
    },
    #[error("Loan {loan_id} is not payable in status {status}")]
    LoanNotPayable { loan_id: LoanId, status: LoanStatus },
    #[error("Invalid loan status transition from {from} to {to}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },
    #[error("Scheduled payment {id} is {status:?}, not pending")]
    ScheduleNotPending {
        id: ScheduledPaymentId,
        status: ScheduledPaymentStatus,
    },
    #[error("Borrower is restricted: {0}")]
    BorrowerRestricted(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Ledger error: {0}")]
    Ledger(String),
    #[error("Notification error: {0}")]
    Notification(String),
    #[error("Service temporarily unavailable")]
    Unavailable,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl LoanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTerms(_)
            | Self::InvalidAmount(_)
            | Self::AmountOutOfRange { .. }
            | Self::TermOutOfRange { .. }
            | Self::UnsupportedCollateral(_)
            | Self::EmptyCollateral
            | Self::EmptyPurpose
            | Self::StepOutOfOrder { .. }
            | Self::StaleSession
            | Self::InvalidConfig(_) => ErrorKind::Validation,
            Self::Ineligible(_)
            | Self::InsufficientFunds { .. }
            | Self::WaiverExceedsPenalty { .. }
            | Self::LoanNotPayable { .. }
            | Self::InvalidTransition { .. }
            | Self::ScheduleNotPending { .. }
            | Self::BorrowerRestricted(_)
            | Self::NotFound(_)
            | Self::Unauthorized(_) => ErrorKind::Rejection,
            Self::Storage(_)
            | Self::Ledger(_)
            | Self::Notification(_)
            | Self::Unavailable
            | Self::Io(_)
            | Self::Csv(_)
            | Self::InternalError(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable reason code for the calling surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTerms(_) => "INVALID_TERMS",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            Self::TermOutOfRange { .. } => "TERM_OUT_OF_RANGE",
            Self::UnsupportedCollateral(_) => "UNSUPPORTED_COLLATERAL",
            Self::EmptyCollateral => "EMPTY_COLLATERAL",
            Self::EmptyPurpose => "EMPTY_PURPOSE",
            Self::StepOutOfOrder { .. } => "STEP_OUT_OF_ORDER",
            Self::StaleSession => "STALE_SESSION",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Ineligible(_) => "INELIGIBLE",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::WaiverExceedsPenalty { .. } => "WAIVER_EXCEEDS_PENALTY",
            Self::LoanNotPayable { .. } => "LOAN_NOT_PAYABLE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ScheduleNotPending { .. } => "SCHEDULE_NOT_PENDING",
            Self::BorrowerRestricted(_) => "BORROWER_RESTRICTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Storage(_) => "STORAGE_FAILURE",
            Self::Ledger(_) => "LEDGER_FAILURE",
            Self::Notification(_) => "NOTIFICATION_FAILURE",
            Self::Unavailable | Self::Io(_) | Self::Csv(_) | Self::InternalError(_) => {
                "UNAVAILABLE"
            }
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LoanError {
    fn from(e: rocksdb::Error) -> Self {
        LoanError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LoanError {
    fn from(e: serde_json::Error) -> Self {
        LoanError::InternalError(Box::new(e))
    }
}
