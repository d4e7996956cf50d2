//! Engine configuration.
//!
//! Every section defaults independently, so a JSON file only needs to name
//! the values it overrides.

use crate::error::{LoanError, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub application: ApplicationConfig,
    pub payments: PaymentConfig,
    pub overdue: OverdueConfig,
    pub refinance: RefinanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub min_credit_score: u32,
    pub max_active_loans_for_auto_approval: usize,
    pub session_ttl_secs: u64,
    /// Collateral type to the fraction of its value counted as security.
    pub collateral_discount_rates: HashMap<String, Decimal>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            min_credit_score: 600,
            max_active_loans_for_auto_approval: 2,
            session_ttl_secs: 3600,
            collateral_discount_rates: HashMap::from([
                ("REAL_ESTATE".to_string(), dec!(0.70)),
                ("VEHICLE".to_string(), dec!(0.50)),
                ("EQUIPMENT".to_string(), dec!(0.40)),
                ("INVENTORY".to_string(), dec!(0.30)),
                ("SECURITIES".to_string(), dec!(0.60)),
                ("PRECIOUS_METAL".to_string(), dec!(0.80)),
            ]),
        }
    }
}

impl ApplicationConfig {
    pub fn session_ttl(&self) -> Duration {
        secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub max_retries: u32,
    pub sweep_interval_secs: u64,
    pub min_manual_payment: Decimal,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            sweep_interval_secs: 3600,
            min_manual_payment: dec!(0.01),
        }
    }
}

impl PaymentConfig {
    pub fn sweep_interval(&self) -> Duration {
        secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverdueConfig {
    pub grace_period_days: i64,
    pub notification_days: i64,
    pub initial_collection_days: i64,
    pub intensive_collection_days: i64,
    pub blacklist_days: i64,
    pub legal_action_days: i64,
    pub suspension_threshold: u32,
    pub blacklist_threshold: u32,
    /// Daily penalty rate as a fraction of the overdue amount.
    pub penalty_rate: Decimal,
    /// Cap on accrued penalty as a fraction of the overdue amount.
    pub max_penalty_percentage: Decimal,
    pub compound_daily: bool,
    pub collection_retry_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub initial_delay_secs: u64,
}

impl Default for OverdueConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 3,
            notification_days: 7,
            initial_collection_days: 15,
            intensive_collection_days: 30,
            blacklist_days: 60,
            legal_action_days: 90,
            suspension_threshold: 3,
            blacklist_threshold: 5,
            penalty_rate: dec!(0.001),
            max_penalty_percentage: dec!(0.5),
            compound_daily: false,
            collection_retry_interval_secs: 86_400,
            sweep_interval_secs: 3600,
            initial_delay_secs: 300,
        }
    }
}

impl OverdueConfig {
    pub fn collection_retry_interval(&self) -> Duration {
        secs(self.collection_retry_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        secs(self.sweep_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        secs(self.initial_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinanceConfig {
    /// Flat closing cost in percent of the refinanced balance.
    pub closing_cost_percentage: Decimal,
    /// Early payoff targets as fractions of the remaining term.
    pub payoff_horizons: Vec<Decimal>,
}

impl Default for RefinanceConfig {
    fn default() -> Self {
        Self {
            closing_cost_percentage: dec!(2.0),
            payoff_horizons: vec![dec!(0.25), dec!(0.5), dec!(0.75)],
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| LoanError::InvalidConfig(format!("malformed configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let o = &self.overdue;
        let ordered = [
            o.grace_period_days,
            o.notification_days,
            o.initial_collection_days,
            o.intensive_collection_days,
            o.blacklist_days,
            o.legal_action_days,
        ];
        if ordered.windows(2).any(|w| w[0] > w[1]) || o.grace_period_days < 0 {
            return Err(LoanError::InvalidConfig(
                "overdue day thresholds must be non-negative and non-decreasing".to_string(),
            ));
        }
        if o.suspension_threshold > o.blacklist_threshold {
            return Err(LoanError::InvalidConfig(
                "suspension threshold must not exceed blacklist threshold".to_string(),
            ));
        }
        if o.penalty_rate < Decimal::ZERO || o.max_penalty_percentage < Decimal::ZERO {
            return Err(LoanError::InvalidConfig(
                "penalty rates must not be negative".to_string(),
            ));
        }
        if self.payments.max_retries == 0 {
            return Err(LoanError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.payments.sweep_interval_secs == 0 || o.sweep_interval_secs == 0 {
            return Err(LoanError::InvalidConfig(
                "sweep intervals must be positive".to_string(),
            ));
        }
        if self
            .application
            .collateral_discount_rates
            .values()
            .any(|r| *r < Decimal::ZERO || *r > Decimal::ONE)
        {
            return Err(LoanError::InvalidConfig(
                "collateral discount rates must be within [0, 1]".to_string(),
            ));
        }
        if self
            .refinance
            .payoff_horizons
            .iter()
            .any(|h| *h <= Decimal::ZERO || *h >= Decimal::ONE)
        {
            return Err(LoanError::InvalidConfig(
                "payoff horizons must be fractions within (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.payments.max_retries, 3);
        assert_eq!(config.overdue.collection_retry_interval(), Duration::hours(24));
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{"overdue": {"penalty_rate": "0.05", "compound_daily": true}}"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.overdue.penalty_rate, dec!(0.05));
        assert!(config.overdue.compound_daily);
        assert_eq!(config.overdue.grace_period_days, 3);
        assert_eq!(config.payments, PaymentConfig::default());
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let err = EngineConfig::from_json_str(r#"{"overdue": {"suspension_threshold": 9}}"#)
            .unwrap_err();
        assert!(matches!(err, LoanError::InvalidConfig(_)));

        let err = EngineConfig::from_json_str(r#"{"payments": {"max_retries": 0}}"#).unwrap_err();
        assert!(matches!(err, LoanError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(LoanError::InvalidConfig(_))
        ));
    }
}
