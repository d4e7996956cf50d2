//! Fixed-payment amortization math.
//!
//! Everything here is pure: no clocks, no stores. Values are carried at full
//! `Decimal` precision; callers round to cents at the edges (display, ledger
//! movements) with [`round_cents`].

use crate::domain::money::round_cents;
use crate::error::{LoanError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const APR_BISECTION_STEPS: usize = 100;
const APR_UPPER_BOUND: Decimal = dec!(1000);
/// 26 bi-weekly payments approximate a monthly rate spread over 2.16 periods.
const BIWEEKLY_RATE_DIVISOR: Decimal = dec!(2.16);

/// Converts an annual percentage rate into the per-month decimal rate.
pub fn monthly_rate(annual_rate_percent: Decimal) -> Decimal {
    annual_rate_percent / dec!(100) / dec!(12)
}

fn growth(rate: Decimal, periods: u32) -> Result<Decimal> {
    (Decimal::ONE + rate)
        .checked_powu(u64::from(periods))
        .ok_or_else(|| LoanError::InvalidTerms("rate and term overflow".to_string()))
}

/// Level payment that retires `principal` over `periods` at `rate` per period.
///
/// `M = P·r·(1+r)^n / ((1+r)^n − 1)`, or `P / n` when the rate is zero.
pub fn level_payment(principal: Decimal, rate: Decimal, periods: u32) -> Result<Decimal> {
    if periods == 0 {
        return Err(LoanError::InvalidTerms(
            "term must be at least one month".to_string(),
        ));
    }
    if rate.is_zero() {
        return Ok(principal / Decimal::from(periods));
    }
    let g = growth(rate, periods)?;
    Ok(principal * rate * (g / (g - Decimal::ONE)))
}

/// Immutable loan terms derived from principal, rate, term and fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: Decimal,
    /// Nominal annual rate in percent (8.5 means 8.5%).
    pub annual_rate: Decimal,
    pub term_months: u32,
    pub fee: Decimal,
    pub monthly_payment: Decimal,
    pub total_payment: Decimal,
    pub total_interest: Decimal,
    /// Annual percentage rate including the fee, in percent.
    pub apr: Decimal,
}

impl LoanTerms {
    pub fn compute(
        principal: Decimal,
        annual_rate: Decimal,
        term_months: u32,
        fee: Decimal,
    ) -> Result<Self> {
        if term_months == 0 {
            return Err(LoanError::InvalidTerms(
                "term must be at least one month".to_string(),
            ));
        }
        if principal <= Decimal::ZERO {
            return Err(LoanError::InvalidTerms(format!(
                "principal must be positive, got {principal}"
            )));
        }
        if annual_rate < Decimal::ZERO {
            return Err(LoanError::InvalidTerms(format!(
                "rate must not be negative, got {annual_rate}"
            )));
        }
        if fee < Decimal::ZERO || fee >= principal {
            return Err(LoanError::InvalidTerms(format!(
                "fee {fee} must be within [0, principal)"
            )));
        }

        let monthly_payment = level_payment(principal, monthly_rate(annual_rate), term_months)?;
        let total_payment = round_cents(monthly_payment * Decimal::from(term_months));
        let total_interest = total_payment - principal;
        let apr = if fee.is_zero() {
            annual_rate
        } else {
            effective_apr(principal - fee, monthly_payment, term_months, annual_rate)
        };

        Ok(Self {
            principal,
            annual_rate,
            term_months,
            fee,
            monthly_payment,
            total_payment,
            total_interest,
            apr,
        })
    }

    pub fn monthly_rate(&self) -> Decimal {
        monthly_rate(self.annual_rate)
    }

    /// Monthly payment rounded to cents, for display.
    pub fn monthly_payment_cents(&self) -> Decimal {
        round_cents(self.monthly_payment)
    }

    /// A fresh iterator over the full schedule.
    pub fn schedule(&self) -> Schedule {
        Schedule::new(
            self.principal,
            self.monthly_rate(),
            self.monthly_payment,
            self.term_months,
        )
    }

    /// Remaining balance after `k` payments via the closed-form formula
    /// `P·((1+r)^n − (1+r)^k) / ((1+r)^n − 1)`.
    pub fn balance_after(&self, k: u32) -> Result<Decimal> {
        if k >= self.term_months {
            return Ok(Decimal::ZERO);
        }
        let r = self.monthly_rate();
        let n = Decimal::from(self.term_months);
        if r.is_zero() {
            return Ok(self.principal * (n - Decimal::from(k)) / n);
        }
        let gn = growth(r, self.term_months)?;
        let gk = growth(r, k)?;
        Ok(self.principal * (gn - gk) / (gn - Decimal::ONE))
    }

    /// Remaining balance after `k` payments by walking the schedule.
    pub fn walked_balance_after(&self, k: u32) -> Decimal {
        if k == 0 {
            return self.principal;
        }
        self.schedule()
            .take(k as usize)
            .last()
            .map(|p| p.remaining_balance)
            .unwrap_or(self.principal)
    }

    pub fn cumulative_interest(&self, k: u32) -> Decimal {
        self.schedule().take(k as usize).map(|p| p.interest).sum()
    }

    pub fn cumulative_principal(&self, k: u32) -> Decimal {
        self.schedule().take(k as usize).map(|p| p.principal).sum()
    }
}

/// Rate at which `net_proceeds` amortize with `payment` over `periods`.
fn effective_apr(
    net_proceeds: Decimal,
    payment: Decimal,
    periods: u32,
    nominal: Decimal,
) -> Decimal {
    if payment * Decimal::from(periods) <= net_proceeds {
        return Decimal::ZERO;
    }
    // A positive payment stream that exceeds the proceeds always has a rate
    // at least as high as the nominal one.
    let mut lo = nominal;
    let mut hi = APR_UPPER_BOUND;
    for _ in 0..APR_BISECTION_STEPS {
        let mid = (lo + hi) / dec!(2);
        // a candidate so steep that (1+r)^n overflows is above the root
        let too_high = match level_payment(net_proceeds, monthly_rate(mid), periods) {
            Ok(candidate) => candidate > payment,
            Err(_) => true,
        };
        if too_high {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    ((lo + hi) / dec!(2)).round_dp(4)
}

/// One period of an amortization schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetail {
    pub period: u32,
    pub payment: Decimal,
    pub principal: Decimal,
    pub interest: Decimal,
    pub remaining_balance: Decimal,
}

impl PaymentDetail {
    pub fn rounded(&self) -> Self {
        Self {
            period: self.period,
            payment: round_cents(self.payment),
            principal: round_cents(self.principal),
            interest: round_cents(self.interest),
            remaining_balance: round_cents(self.remaining_balance),
        }
    }
}

/// Lazily generated amortization schedule.
///
/// The final period absorbs any residue so the balance ends at exactly zero
/// and the principal column sums to the starting balance.
#[derive(Debug, Clone)]
pub struct Schedule {
    balance: Decimal,
    rate: Decimal,
    payment: Decimal,
    period: u32,
    periods: u32,
}

impl Schedule {
    pub fn new(balance: Decimal, rate: Decimal, payment: Decimal, periods: u32) -> Self {
        Self {
            balance,
            rate,
            payment,
            period: 0,
            periods,
        }
    }

    /// Schedule for the rest of a loan that already has `balance` outstanding.
    pub fn remaining(balance: Decimal, rate: Decimal, periods: u32) -> Result<Self> {
        let payment = level_payment(balance, rate, periods)?;
        Ok(Self::new(balance, rate, payment, periods))
    }
}

impl Iterator for Schedule {
    type Item = PaymentDetail;

    fn next(&mut self) -> Option<Self::Item> {
        if self.period >= self.periods || self.balance <= Decimal::ZERO {
            return None;
        }
        self.period += 1;
        let interest = self.balance * self.rate;
        let final_period = self.period == self.periods || self.payment - interest >= self.balance;
        let principal = if final_period {
            self.balance
        } else {
            self.payment - interest
        };
        self.balance -= principal;
        Some(PaymentDetail {
            period: self.period,
            payment: principal + interest,
            principal,
            interest,
            remaining_balance: self.balance,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyPayoffScenario {
    pub target_months: u32,
    pub required_payment: Decimal,
    pub extra_per_month: Decimal,
    pub total_interest: Decimal,
    pub interest_saved: Decimal,
}

/// Accelerated payoff options for a balance with `remaining_months` left.
///
/// Each horizon is a fraction of the remaining term; horizons that would not
/// shorten the term are skipped.
pub fn early_payoff_options(
    balance: Decimal,
    annual_rate: Decimal,
    remaining_months: u32,
    horizons: &[Decimal],
) -> Result<Vec<EarlyPayoffScenario>> {
    let r = monthly_rate(annual_rate);
    let standard = level_payment(balance, r, remaining_months)?;
    let standard_interest = standard * Decimal::from(remaining_months) - balance;

    let mut scenarios = Vec::with_capacity(horizons.len());
    for fraction in horizons {
        let target = (Decimal::from(remaining_months) * fraction)
            .ceil()
            .to_u32()
            .unwrap_or(0)
            .max(1);
        let duplicate = scenarios
            .iter()
            .any(|s: &EarlyPayoffScenario| s.target_months == target);
        if target >= remaining_months || duplicate {
            continue;
        }
        let required = level_payment(balance, r, target)?;
        let interest = required * Decimal::from(target) - balance;
        scenarios.push(EarlyPayoffScenario {
            target_months: target,
            required_payment: round_cents(required),
            extra_per_month: round_cents(required - standard),
            total_interest: round_cents(interest),
            interest_saved: round_cents(standard_interest - interest),
        });
    }
    Ok(scenarios)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiweeklyProjection {
    pub biweekly_payment: Decimal,
    pub payments: u32,
    pub payoff_months: Decimal,
    pub total_interest: Decimal,
    pub months_saved: Decimal,
    pub interest_saved: Decimal,
}

/// Projects paying half the monthly payment every two weeks.
pub fn biweekly_projection(terms: &LoanTerms) -> BiweeklyProjection {
    let payment = terms.monthly_payment / dec!(2);
    let rate = terms.monthly_rate() / BIWEEKLY_RATE_DIVISOR;
    let max_payments = terms.term_months.saturating_mul(3);

    let mut balance = terms.principal;
    let mut payments = 0u32;
    let mut interest_total = Decimal::ZERO;
    while balance > Decimal::ZERO && payments < max_payments {
        let interest = balance * rate;
        let principal = (payment - interest).min(balance);
        if principal <= Decimal::ZERO {
            break;
        }
        interest_total += interest;
        balance -= principal;
        payments += 1;
    }

    let payoff_months = Decimal::from(payments) * dec!(12) / dec!(26);
    let standard_interest =
        terms.monthly_payment * Decimal::from(terms.term_months) - terms.principal;
    BiweeklyProjection {
        biweekly_payment: round_cents(payment),
        payments,
        payoff_months: payoff_months.round_dp(1),
        total_interest: round_cents(interest_total),
        months_saved: (Decimal::from(terms.term_months) - payoff_months).round_dp(1),
        interest_saved: round_cents(standard_interest - interest_total),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinanceComparison {
    pub current_payment: Decimal,
    pub new_payment: Decimal,
    pub monthly_savings: Decimal,
    pub current_remaining_interest: Decimal,
    pub new_total_interest: Decimal,
    pub closing_costs: Decimal,
    pub net_savings: Decimal,
    pub break_even_months: Option<u32>,
    pub recommended: bool,
}

/// Compares keeping the current loan against refinancing the balance.
///
/// Closing costs are a flat percentage of the refinanced balance.
pub fn refinance_comparison(
    balance: Decimal,
    current_annual_rate: Decimal,
    remaining_months: u32,
    new_annual_rate: Decimal,
    new_term_months: u32,
    closing_cost_percentage: Decimal,
) -> Result<RefinanceComparison> {
    let current = level_payment(balance, monthly_rate(current_annual_rate), remaining_months)?;
    let proposed = level_payment(balance, monthly_rate(new_annual_rate), new_term_months)?;
    let current_interest = current * Decimal::from(remaining_months) - balance;
    let new_interest = proposed * Decimal::from(new_term_months) - balance;
    let closing_costs = round_cents(balance * closing_cost_percentage / dec!(100));
    let monthly_savings = current - proposed;
    let net_savings = current_interest - new_interest - closing_costs;
    let break_even_months = if monthly_savings > Decimal::ZERO {
        (closing_costs / monthly_savings).ceil().to_u32()
    } else {
        None
    };

    Ok(RefinanceComparison {
        current_payment: round_cents(current),
        new_payment: round_cents(proposed),
        monthly_savings: round_cents(monthly_savings),
        current_remaining_interest: round_cents(current_interest),
        new_total_interest: round_cents(new_interest),
        closing_costs,
        net_savings: round_cents(net_savings),
        break_even_months,
        recommended: net_savings > Decimal::ZERO,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tolerance() -> Decimal {
        dec!(0.000001)
    }

    #[test]
    fn test_reference_scenario() {
        let terms = LoanTerms::compute(dec!(50000), dec!(8.5), 12, Decimal::ZERO).unwrap();
        assert_eq!(terms.monthly_payment_cents(), dec!(4357.66));
        assert_eq!(terms.total_payment, dec!(52291.92));
        assert_eq!(terms.total_interest, dec!(2291.92));
        assert_eq!(terms.apr, dec!(8.5));
    }

    #[test]
    fn test_zero_rate_is_straight_line() {
        let terms = LoanTerms::compute(dec!(1200), Decimal::ZERO, 12, Decimal::ZERO).unwrap();
        assert_eq!(terms.monthly_payment, dec!(100));
        assert_eq!(terms.total_interest, Decimal::ZERO);
        assert_eq!(terms.balance_after(3).unwrap(), dec!(900));
    }

    #[test]
    fn test_zero_term_rejected() {
        assert!(matches!(
            LoanTerms::compute(dec!(1000), dec!(5), 0, Decimal::ZERO),
            Err(LoanError::InvalidTerms(_))
        ));
    }

    #[test]
    fn test_schedule_is_restartable() {
        let terms = LoanTerms::compute(dec!(10000), dec!(6), 24, Decimal::ZERO).unwrap();
        let first: Vec<_> = terms.schedule().collect();
        let second: Vec<_> = terms.schedule().collect();
        assert_eq!(first.len(), 24);
        assert_eq!(first, second);
        assert_eq!(first.last().unwrap().remaining_balance, Decimal::ZERO);
    }

    #[test]
    fn test_closed_form_matches_walk() {
        let terms = LoanTerms::compute(dec!(250000), dec!(5.5), 360, Decimal::ZERO).unwrap();
        for k in [0, 1, 12, 120, 359] {
            let closed = terms.balance_after(k).unwrap();
            let walked = terms.walked_balance_after(k);
            assert!((closed - walked).abs() < tolerance(), "k={k}: {closed} vs {walked}");
        }
        assert_eq!(terms.balance_after(360).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_cumulative_totals() {
        let terms = LoanTerms::compute(dec!(50000), dec!(8.5), 12, Decimal::ZERO).unwrap();
        let principal_6 = terms.cumulative_principal(6);
        assert!((dec!(50000) - principal_6 - terms.balance_after(6).unwrap()).abs() < tolerance());
        let interest_12 = terms.cumulative_interest(12);
        assert!((round_cents(interest_12) - terms.total_interest).abs() <= dec!(0.01));
    }

    #[test]
    fn test_fee_raises_apr() {
        let terms = LoanTerms::compute(dec!(10000), dec!(10), 12, dec!(200)).unwrap();
        assert!(terms.apr > dec!(10));
        assert!(terms.apr < dec!(15));
    }

    #[test]
    fn test_fee_apr_on_long_term() {
        let terms = LoanTerms::compute(dec!(250000), dec!(5.5), 360, dec!(1000)).unwrap();
        assert!(terms.apr > dec!(5.5));
        assert!(terms.apr < dec!(5.7));
        assert_eq!(terms.monthly_payment_cents(), dec!(1419.47));
    }

    #[test]
    fn test_early_payoff_saves_interest() {
        let options =
            early_payoff_options(dec!(20000), dec!(9), 48, &[dec!(0.25), dec!(0.5), dec!(0.75)])
                .unwrap();
        assert_eq!(
            options.iter().map(|o| o.target_months).collect::<Vec<_>>(),
            vec![12, 24, 36]
        );
        assert!(options[0].interest_saved > options[1].interest_saved);
        assert!(options.iter().all(|o| o.extra_per_month > Decimal::ZERO));
    }

    #[test]
    fn test_early_payoff_skips_non_shortening_horizons() {
        let options = early_payoff_options(dec!(1000), dec!(9), 1, &[dec!(0.5)]).unwrap();
        assert!(options.is_empty());
    }

    #[test]
    fn test_biweekly_pays_off_sooner() {
        let terms = LoanTerms::compute(dec!(200000), dec!(6), 360, Decimal::ZERO).unwrap();
        let projection = biweekly_projection(&terms);
        assert!(projection.payoff_months < dec!(360));
        assert!(projection.months_saved > dec!(12));
        assert!(projection.interest_saved > Decimal::ZERO);
    }

    #[test]
    fn test_refinance_to_lower_rate() {
        let cmp = refinance_comparison(dec!(100000), dec!(9), 120, dec!(6), 120, dec!(2)).unwrap();
        assert_eq!(cmp.closing_costs, dec!(2000.00));
        assert!(cmp.monthly_savings > Decimal::ZERO);
        assert!(cmp.recommended);
        assert!(cmp.break_even_months.unwrap() > 0);
    }

    #[test]
    fn test_refinance_to_higher_rate_not_recommended() {
        let cmp = refinance_comparison(dec!(50000), dec!(5), 60, dec!(7), 60, dec!(2)).unwrap();
        assert!(!cmp.recommended);
        assert_eq!(cmp.break_even_months, None);
    }

    proptest! {
        #[test]
        fn prop_schedule_retires_principal(
            principal_cents in 10_000i64..100_000_000i64,
            rate_bps in 1u32..3000u32,
            term in 1u32..360u32,
        ) {
            let principal = Decimal::new(principal_cents, 2);
            let rate = Decimal::new(i64::from(rate_bps), 2);
            let terms = LoanTerms::compute(principal, rate, term, Decimal::ZERO).unwrap();
            let periods: Vec<_> = terms.schedule().collect();
            prop_assert_eq!(periods.len() as u32, term);
            prop_assert_eq!(periods.last().unwrap().remaining_balance, Decimal::ZERO);
            let repaid: Decimal = periods.iter().map(|p| p.principal).sum();
            prop_assert_eq!(repaid, principal);
        }

        #[test]
        fn prop_zero_rate_payment_is_exact(
            principal_cents in 100i64..10_000_000i64,
            term in 1u32..120u32,
        ) {
            let principal = Decimal::new(principal_cents, 2);
            let terms = LoanTerms::compute(principal, Decimal::ZERO, term, Decimal::ZERO).unwrap();
            prop_assert_eq!(terms.monthly_payment, principal / Decimal::from(term));
        }
    }
}
