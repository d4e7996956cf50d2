//! In-process stand-ins for the external credit, ledger and notification
//! services.
//!
//! Each one can be switched into a failing mode so callers can observe how
//! infrastructure errors are contained.

use crate::domain::application::CreditGrade;
use crate::domain::collection::CollectionChannel;
use crate::domain::ids::BorrowerId;
use crate::domain::policy::LoanType;
use crate::domain::ports::{CreditEvaluator, Ledger, Notifier};
use crate::error::{LoanError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditProfile {
    pub score: u32,
    pub verified: bool,
}

/// Credit evaluator backed by a fixed table of profiles.
#[derive(Default, Clone)]
pub struct StaticCreditEvaluator {
    profiles: Arc<RwLock<HashMap<BorrowerId, CreditProfile>>>,
    unavailable: Arc<AtomicBool>,
}

impl StaticCreditEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_profile(&self, borrower: BorrowerId, score: u32, verified: bool) {
        self.profiles
            .write()
            .await
            .insert(borrower, CreditProfile { score, verified });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn profile(&self, borrower: BorrowerId) -> Result<CreditProfile> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LoanError::InternalError(
                "credit bureau unreachable".into(),
            ));
        }
        self.profiles
            .read()
            .await
            .get(&borrower)
            .copied()
            .ok_or_else(|| LoanError::NotFound(format!("credit profile for {borrower}")))
    }
}

/// Grade bands used by the static evaluator.
pub fn grade_for(score: u32) -> CreditGrade {
    match score {
        800.. => CreditGrade::Excellent,
        740..800 => CreditGrade::Good,
        670..740 => CreditGrade::Fair,
        580..670 => CreditGrade::Poor,
        _ => CreditGrade::VeryPoor,
    }
}

#[async_trait]
impl CreditEvaluator for StaticCreditEvaluator {
    async fn score(&self, borrower: BorrowerId) -> Result<u32> {
        Ok(self.profile(borrower).await?.score)
    }

    async fn grade(&self, borrower: BorrowerId) -> Result<CreditGrade> {
        Ok(grade_for(self.profile(borrower).await?.score))
    }

    async fn qualifies_for_loan(&self, borrower: BorrowerId, loan_type: LoanType) -> Result<bool> {
        let profile = self.profile(borrower).await?;
        Ok(profile.score >= loan_type.policy().min_auto_approve_score)
    }

    async fn is_account_verified(&self, borrower: BorrowerId) -> Result<bool> {
        Ok(self.profile(borrower).await?.verified)
    }
}

/// Ledger that keeps balances in a map.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    balances: Arc<RwLock<HashMap<BorrowerId, Decimal>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, borrower: BorrowerId, amount: Decimal) {
        self.balances.write().await.insert(borrower, amount);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LoanError::Ledger("ledger offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn balance(&self, borrower: BorrowerId) -> Result<Decimal> {
        self.check_available()?;
        Ok(self
            .balances
            .read()
            .await
            .get(&borrower)
            .copied()
            .unwrap_or_default())
    }

    async fn withdraw(&self, borrower: BorrowerId, amount: Decimal) -> Result<bool> {
        self.check_available()?;
        let mut balances = self.balances.write().await;
        let balance = balances.entry(borrower).or_default();
        if *balance < amount {
            return Ok(false);
        }
        *balance -= amount;
        Ok(true)
    }

    async fn deposit(&self, borrower: BorrowerId, amount: Decimal) -> Result<()> {
        self.check_available()?;
        *self.balances.write().await.entry(borrower).or_default() += amount;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub id: String,
    pub borrower: BorrowerId,
    pub channel: CollectionChannel,
    pub message: String,
}

/// Notifier that records every message it is asked to send.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<SentNotification>>>,
    next_id: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().await.clone()
    }

    pub async fn sent_to(&self, borrower: BorrowerId) -> Vec<SentNotification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.borrower == borrower)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        borrower: BorrowerId,
        channel: CollectionChannel,
        message: &str,
    ) -> Result<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LoanError::Notification(format!("{channel} gateway down")));
        }
        let id = format!("ntf-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.sent.write().await.push(SentNotification {
            id: id.clone(),
            borrower,
            channel,
            message: message.to_string(),
        });
        Ok(id)
    }
}
