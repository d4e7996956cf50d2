//! Lending policy: per-type limits, pricing, auto-approval and collateral
//! valuation.

use crate::error::{LoanError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const REFERENCE_SCORE: Decimal = dec!(650);
const MULTIPLIER_SCORE: Decimal = dec!(700);
const BASE_MULTIPLIER: Decimal = dec!(2.0);
const MAX_AMOUNT_UNIT: Decimal = dec!(100000);
const LARGE_AMOUNT: Decimal = dec!(50000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanType {
    Credit,
    Mortgage,
    Business,
    Emergency,
    /// Any type the policy tables do not know about.
    #[serde(other)]
    General,
}

impl FromStr for LoanType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "CREDIT" => Self::Credit,
            "MORTGAGE" => Self::Mortgage,
            "BUSINESS" => Self::Business,
            "EMERGENCY" => Self::Emergency,
            _ => Self::General,
        })
    }
}

impl fmt::Display for LoanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Credit => "CREDIT",
            Self::Mortgage => "MORTGAGE",
            Self::Business => "BUSINESS",
            Self::Emergency => "EMERGENCY",
            Self::General => "GENERAL",
        };
        f.write_str(name)
    }
}

/// Hard limits and pricing for one loan type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanTypePolicy {
    pub min_term: u32,
    pub max_term: u32,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub min_auto_approve_score: u32,
    /// Annual base rate in percent.
    pub base_rate: Decimal,
    pub secured: bool,
}

/// Descriptive metadata shown while the borrower picks a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeProfile {
    pub requirements: Vec<String>,
    pub advantages: Vec<String>,
    pub risks: Vec<String>,
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl LoanType {
    pub fn policy(&self) -> LoanTypePolicy {
        match self {
            Self::Credit => LoanTypePolicy {
                min_term: 3,
                max_term: 36,
                min_amount: dec!(1000),
                max_amount: dec!(200000),
                min_auto_approve_score: 720,
                base_rate: dec!(8.5),
                secured: false,
            },
            Self::Mortgage => LoanTypePolicy {
                min_term: 12,
                max_term: 360,
                min_amount: dec!(10000),
                max_amount: dec!(5000000),
                min_auto_approve_score: 750,
                base_rate: dec!(5.5),
                secured: true,
            },
            Self::Business => LoanTypePolicy {
                min_term: 6,
                max_term: 60,
                min_amount: dec!(5000),
                max_amount: dec!(1000000),
                min_auto_approve_score: 780,
                base_rate: dec!(7.0),
                secured: true,
            },
            Self::Emergency => LoanTypePolicy {
                min_term: 1,
                max_term: 3,
                min_amount: dec!(500),
                max_amount: dec!(20000),
                min_auto_approve_score: 650,
                base_rate: dec!(12.0),
                secured: false,
            },
            Self::General => LoanTypePolicy {
                min_term: 3,
                max_term: 60,
                min_amount: dec!(1000),
                max_amount: dec!(100000),
                min_auto_approve_score: 700,
                base_rate: dec!(10.0),
                secured: false,
            },
        }
    }

    pub fn profile(&self) -> TypeProfile {
        match self {
            Self::Credit => TypeProfile {
                requirements: lines(&["Credit score of 600 or higher", "Verified account"]),
                advantages: lines(&["No collateral required", "Fast approval"]),
                risks: lines(&["Higher rate than secured loans"]),
            },
            Self::Mortgage => TypeProfile {
                requirements: lines(&[
                    "Real estate or equivalent collateral",
                    "Stable repayment history",
                ]),
                advantages: lines(&["Lowest base rate", "Terms up to 30 years"]),
                risks: lines(&["Collateral is forfeited on default", "Long repayment commitment"]),
            },
            Self::Business => TypeProfile {
                requirements: lines(&["Business collateral", "Strong credit history"]),
                advantages: lines(&["Large amounts", "Flexible terms up to 5 years"]),
                risks: lines(&["Collateral is forfeited on default"]),
            },
            Self::Emergency => TypeProfile {
                requirements: lines(&["Verified account"]),
                advantages: lines(&["Small amounts approved quickly", "Lower score threshold"]),
                risks: lines(&["Highest base rate", "Very short repayment window"]),
            },
            Self::General => TypeProfile {
                requirements: lines(&["Credit score of 600 or higher"]),
                advantages: lines(&["General purpose"]),
                risks: lines(&["Standard pricing"]),
            },
        }
    }
}

/// Annual rate in percent for the given borrower and loan shape.
///
/// `base + (650 − score)/50 × 0.5 + amount adj + term adj`, floored at zero.
/// The amount adjustment applies strictly above 50,000; the term adjustment
/// applies strictly above 36 and strictly below 6 months.
pub fn interest_rate(
    loan_type: LoanType,
    credit_score: u32,
    amount: Decimal,
    term: u32,
) -> Decimal {
    let credit_adjustment = (REFERENCE_SCORE - Decimal::from(credit_score)) / dec!(50) * dec!(0.5);
    let amount_adjustment = if amount > LARGE_AMOUNT {
        dec!(-0.2)
    } else {
        Decimal::ZERO
    };
    let term_adjustment = if term > 36 {
        dec!(-0.1)
    } else if term < 6 {
        dec!(0.2)
    } else {
        Decimal::ZERO
    };
    let rate = loan_type.policy().base_rate
        + credit_adjustment
        + amount_adjustment
        + term_adjustment;
    rate.max(Decimal::ZERO)
}

/// Credit- and term-adjusted ceiling on the requested amount.
pub fn credit_adjusted_max(credit_score: u32, term: u32) -> Decimal {
    let credit_multiplier = (Decimal::from(credit_score) / MULTIPLIER_SCORE).max(Decimal::ONE);
    let term_multiplier = (Decimal::ONE + Decimal::from(term) / dec!(60)).min(dec!(1.5));
    BASE_MULTIPLIER * credit_multiplier * term_multiplier * MAX_AMOUNT_UNIT
}

/// Checks amount and term against the type limits; returns the effective
/// maximum amount on success.
pub fn validate_amount_term(
    loan_type: LoanType,
    credit_score: u32,
    amount: Decimal,
    term: u32,
) -> Result<Decimal> {
    let policy = loan_type.policy();
    if term < policy.min_term || term > policy.max_term {
        return Err(LoanError::TermOutOfRange {
            term,
            min: policy.min_term,
            max: policy.max_term,
        });
    }
    let max = policy.max_amount.min(credit_adjusted_max(credit_score, term));
    if amount < policy.min_amount || amount > max {
        return Err(LoanError::AmountOutOfRange {
            amount,
            min: policy.min_amount,
            max,
        });
    }
    Ok(max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoApprovalInput {
    pub credit_score: u32,
    pub loan_type: LoanType,
    pub active_loans: usize,
    pub has_overdue_loans: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApproval {
    pub approved: bool,
    pub reasons: Vec<String>,
}

/// Deterministic auto-approval decision.
pub fn auto_approve(input: AutoApprovalInput, max_active_loans: usize) -> AutoApproval {
    let threshold = input.loan_type.policy().min_auto_approve_score;
    let mut reasons = Vec::new();
    if input.credit_score < threshold {
        reasons.push(format!(
            "credit score {} is below the auto-approval threshold {} for {}",
            input.credit_score, threshold, input.loan_type
        ));
    }
    if input.active_loans >= max_active_loans {
        reasons.push(format!(
            "{} active loans (auto-approval requires fewer than {})",
            input.active_loans, max_active_loans
        ));
    }
    if input.has_overdue_loans {
        reasons.push("borrower has overdue loans".to_string());
    }
    AutoApproval {
        approved: reasons.is_empty(),
        reasons,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralItem {
    pub kind: String,
    pub quantity: Decimal,
    pub base_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedItem {
    pub kind: String,
    pub quantity: Decimal,
    pub base_value: Decimal,
    pub discount_rate: Decimal,
    pub assessed_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralAssessment {
    pub items: Vec<AssessedItem>,
    pub total_value: Decimal,
    /// Assessed value over the requested amount.
    pub coverage_ratio: Decimal,
}

/// Values collateral as `Σ quantity × base_value × discount_rate`.
///
/// Unsecured types accept an empty list and produce a zero assessment.
pub fn assess_collateral(
    loan_type: LoanType,
    requested_amount: Decimal,
    items: &[CollateralItem],
    discount_rates: &HashMap<String, Decimal>,
) -> Result<CollateralAssessment> {
    if items.is_empty() && loan_type.policy().secured {
        return Err(LoanError::EmptyCollateral);
    }

    let mut assessed = Vec::with_capacity(items.len());
    for item in items {
        let kind = item.kind.trim().to_ascii_uppercase();
        let discount_rate = *discount_rates
            .get(&kind)
            .ok_or_else(|| LoanError::UnsupportedCollateral(item.kind.clone()))?;
        if item.quantity <= Decimal::ZERO || item.base_value < Decimal::ZERO {
            return Err(LoanError::InvalidAmount(format!(
                "collateral {kind} must have positive quantity and non-negative value"
            )));
        }
        assessed.push(AssessedItem {
            assessed_value: item.quantity * item.base_value * discount_rate,
            kind,
            quantity: item.quantity,
            base_value: item.base_value,
            discount_rate,
        });
    }

    let total_value: Decimal = assessed.iter().map(|i| i.assessed_value).sum();
    let coverage_ratio = if requested_amount > Decimal::ZERO {
        (total_value / requested_amount).round_dp(4)
    } else {
        Decimal::ZERO
    };
    Ok(CollateralAssessment {
        items: assessed,
        total_value,
        coverage_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discount_table() -> HashMap<String, Decimal> {
        HashMap::from([
            ("REAL_ESTATE".to_string(), dec!(0.70)),
            ("VEHICLE".to_string(), dec!(0.50)),
        ])
    }

    #[test]
    fn test_unknown_type_falls_back() {
        let t: LoanType = "payday".parse().unwrap();
        assert_eq!(t, LoanType::General);
        let p = t.policy();
        assert_eq!((p.min_term, p.max_term), (3, 60));
        assert_eq!(p.min_amount, dec!(1000));
        assert_eq!(p.min_auto_approve_score, 700);
        assert_eq!(p.base_rate, dec!(10.0));

        let parsed: LoanType = serde_json::from_str("\"PAYDAY\"").unwrap();
        assert_eq!(parsed, LoanType::General);
    }

    #[test]
    fn test_interest_rate_formula() {
        // 8.5 + (650-750)/50*0.5 = 7.5
        assert_eq!(interest_rate(LoanType::Credit, 750, dec!(30000), 12), dec!(7.5));
        // large amount and long term both discount
        assert_eq!(interest_rate(LoanType::Mortgage, 650, dec!(60000), 120), dec!(5.2));
        // short term surcharge
        assert_eq!(interest_rate(LoanType::Emergency, 650, dec!(1000), 3), dec!(12.2));
    }

    #[test]
    fn test_interest_rate_boundaries() {
        let base = interest_rate(LoanType::Business, 650, dec!(10000), 12);
        assert_eq!(interest_rate(LoanType::Business, 650, dec!(10000), 36), base);
        assert_eq!(interest_rate(LoanType::Business, 650, dec!(10000), 37), base - dec!(0.1));
        assert_eq!(interest_rate(LoanType::Business, 650, dec!(10000), 6), base);
        assert_eq!(interest_rate(LoanType::Business, 650, dec!(10000), 5), base + dec!(0.2));
        assert_eq!(interest_rate(LoanType::Business, 650, dec!(50000), 12), base);
        assert_eq!(interest_rate(LoanType::Business, 650, dec!(50000.01), 12), base - dec!(0.2));
    }

    #[test]
    fn test_credit_adjusted_max() {
        // below-reference score never shrinks the multiplier
        assert_eq!(credit_adjusted_max(600, 0), dec!(200000));
        // term multiplier is capped at 1.5
        assert_eq!(credit_adjusted_max(700, 120), dec!(300000));
        assert_eq!(credit_adjusted_max(700, 12), dec!(240000));
    }

    #[test]
    fn test_validate_amount_term() {
        assert!(validate_amount_term(LoanType::Credit, 750, dec!(30000), 12).is_ok());
        assert!(matches!(
            validate_amount_term(LoanType::Credit, 750, dec!(30000), 48),
            Err(LoanError::TermOutOfRange { min: 3, max: 36, .. })
        ));
        assert!(matches!(
            validate_amount_term(LoanType::Credit, 750, dec!(999), 12),
            Err(LoanError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            validate_amount_term(LoanType::Emergency, 750, dec!(25000), 2),
            Err(LoanError::AmountOutOfRange { .. })
        ));
    }

    #[test]
    fn test_auto_approval_is_deterministic() {
        let input = AutoApprovalInput {
            credit_score: 750,
            loan_type: LoanType::Credit,
            active_loans: 0,
            has_overdue_loans: false,
        };
        let first = auto_approve(input, 2);
        assert!(first.approved);
        assert_eq!(first, auto_approve(input, 2));

        let busy = AutoApprovalInput {
            active_loans: 2,
            ..input
        };
        assert!(!auto_approve(busy, 2).approved);

        let low = AutoApprovalInput {
            credit_score: 719,
            ..input
        };
        let decision = auto_approve(low, 2);
        assert!(!decision.approved);
        assert_eq!(decision.reasons.len(), 1);
    }

    #[test]
    fn test_collateral_assessment() {
        let items = vec![
            CollateralItem {
                kind: "real_estate".to_string(),
                quantity: dec!(1),
                base_value: dec!(100000),
            },
            CollateralItem {
                kind: "VEHICLE".to_string(),
                quantity: dec!(2),
                base_value: dec!(10000),
            },
        ];
        let assessment =
            assess_collateral(LoanType::Mortgage, dec!(80000), &items, &discount_table()).unwrap();
        assert_eq!(assessment.total_value, dec!(80000));
        assert_eq!(assessment.coverage_ratio, dec!(1));
    }

    #[test]
    fn test_collateral_errors() {
        assert!(matches!(
            assess_collateral(LoanType::Mortgage, dec!(1000), &[], &discount_table()),
            Err(LoanError::EmptyCollateral)
        ));
        assert!(
            assess_collateral(LoanType::Credit, dec!(1000), &[], &discount_table())
                .unwrap()
                .total_value
                .is_zero()
        );
        let items = vec![CollateralItem {
            kind: "ARTWORK".to_string(),
            quantity: dec!(1),
            base_value: dec!(5000),
        }];
        assert!(matches!(
            assess_collateral(LoanType::Business, dec!(1000), &items, &discount_table()),
            Err(LoanError::UnsupportedCollateral(kind)) if kind == "ARTWORK"
        ));
    }
}
