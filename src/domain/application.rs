use crate::domain::amortization::LoanTerms;
use crate::domain::ids::BorrowerId;
use crate::domain::policy::{AutoApproval, CollateralAssessment, LoanType, TypeProfile};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five ordered stages of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStep {
    Eligibility,
    AmountTerm,
    TypeSelection,
    Collateral,
    Confirmation,
}

impl ApplicationStep {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Eligibility => Some(Self::AmountTerm),
            Self::AmountTerm => Some(Self::TypeSelection),
            Self::TypeSelection => Some(Self::Collateral),
            Self::Collateral => Some(Self::Confirmation),
            Self::Confirmation => None,
        }
    }
}

impl fmt::Display for ApplicationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eligibility => "ELIGIBILITY",
            Self::AmountTerm => "AMOUNT_TERM",
            Self::TypeSelection => "TYPE_SELECTION",
            Self::Collateral => "COLLATERAL",
            Self::Confirmation => "CONFIRMATION",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSnapshot {
    pub score: u32,
    pub grade: CreditGrade,
}

/// The borrower's existing loans as seen at eligibility time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanStatusSummary {
    pub active_loans: usize,
    pub overdue_loans: usize,
    pub outstanding_balance: Decimal,
    /// Sum of monthly installments across active and overdue loans.
    pub monthly_burden: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityReport {
    pub eligible: bool,
    pub credit: CreditSnapshot,
    pub summary: LoanStatusSummary,
    pub account_verified: bool,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Result of the amount/term step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountTermQuote {
    pub amount: Decimal,
    pub term_months: u32,
    pub max_amount: Decimal,
    /// Provisional annual rate in percent.
    pub interest_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSelection {
    pub loan_type: LoanType,
    pub profile: TypeProfile,
    pub requires_collateral: bool,
    /// The credit evaluator's own opinion on this type; informational.
    pub evaluator_qualifies: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    InProgress,
    ReadyToSubmit,
    /// Claimed by a submit call that has not finished yet.
    Submitting,
}

/// Draft application owned by one borrower session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub borrower: BorrowerId,
    pub loan_type: LoanType,
    pub requested_amount: Option<Decimal>,
    pub term_months: Option<u32>,
    pub purpose: Option<String>,
    pub credit: Option<CreditSnapshot>,
    pub eligibility: Option<EligibilityReport>,
    pub quote: Option<AmountTermQuote>,
    pub type_selection: Option<TypeSelection>,
    pub collateral: Option<CollateralAssessment>,
    pub current_step: ApplicationStep,
    pub final_terms: Option<LoanTerms>,
    pub auto_approval: Option<AutoApproval>,
    pub status: ApplicationStatus,
    pub started_at: DateTime<Utc>,
}

impl LoanApplication {
    pub fn new(borrower: BorrowerId, loan_type: LoanType, started_at: DateTime<Utc>) -> Self {
        Self {
            borrower,
            loan_type,
            requested_amount: None,
            term_months: None,
            purpose: None,
            credit: None,
            eligibility: None,
            quote: None,
            type_selection: None,
            collateral: None,
            current_step: ApplicationStep::Eligibility,
            final_terms: None,
            auto_approval: None,
            status: ApplicationStatus::InProgress,
            started_at,
        }
    }

    /// Drops everything produced at `step` or later and makes it current.
    pub fn rewind_to(&mut self, step: ApplicationStep) {
        if step <= ApplicationStep::Confirmation {
            self.final_terms = None;
            self.auto_approval = None;
            self.purpose = None;
            self.status = ApplicationStatus::InProgress;
        }
        if step <= ApplicationStep::Collateral {
            self.collateral = None;
        }
        if step <= ApplicationStep::TypeSelection {
            self.type_selection = None;
        }
        if step <= ApplicationStep::AmountTerm {
            self.quote = None;
            self.requested_amount = None;
            self.term_months = None;
        }
        if step <= ApplicationStep::Eligibility {
            self.eligibility = None;
            self.credit = None;
        }
        self.current_step = step;
    }

    pub fn advance(&mut self) {
        match self.current_step.next() {
            Some(next) => self.current_step = next,
            None => self.status = ApplicationStatus::ReadyToSubmit,
        }
    }
}
