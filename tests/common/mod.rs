#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use loanflow::application::service::{Collaborators, LoanService};
use loanflow::application::workflow::{StepInput, SubmittedLoan};
use loanflow::config::EngineConfig;
use loanflow::domain::ids::BorrowerId;
use loanflow::domain::loan::LoanRecord;
use loanflow::domain::policy::{CollateralItem, LoanType};
use async_trait::async_trait;
use loanflow::application::sessions::ApplicationHandle;
use loanflow::domain::ports::{Ledger, LedgerRef};
use loanflow::error::Result;
use loanflow::infrastructure::clock::ManualClock;
use loanflow::infrastructure::collaborators::{
    InMemoryLedger, RecordingNotifier, StaticCreditEvaluator,
};
use loanflow::infrastructure::in_memory::InMemoryRepository;
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
}

/// A service wired to in-memory adapters the test can poke at directly.
pub struct Harness {
    pub service: Arc<LoanService>,
    pub repo: InMemoryRepository,
    pub credit: StaticCreditEvaluator,
    pub ledger: InMemoryLedger,
    pub notifier: RecordingNotifier,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, |ledger| Arc::new(ledger) as LedgerRef)
    }

    /// Every disbursement waits `delay` before reaching the ledger.
    pub fn with_deposit_delay(delay: std::time::Duration) -> Self {
        Self::build(EngineConfig::default(), |inner| {
            Arc::new(SlowDepositLedger { inner, delay }) as LedgerRef
        })
    }

    fn build(config: EngineConfig, wrap: impl FnOnce(InMemoryLedger) -> LedgerRef) -> Self {
        let repo = InMemoryRepository::new();
        let credit = StaticCreditEvaluator::new();
        let ledger = InMemoryLedger::new();
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::new(start());
        let service = LoanService::new(
            config,
            Collaborators {
                repo: Arc::new(repo.clone()),
                credit: Arc::new(credit.clone()),
                ledger: wrap(ledger.clone()),
                notifier: Arc::new(notifier.clone()),
                clock: Arc::new(clock.clone()),
            },
        )
        .unwrap();
        Self {
            service: Arc::new(service),
            repo,
            credit,
            ledger,
            notifier,
            clock,
        }
    }

    /// A verified borrower with the given credit score.
    pub async fn borrower(&self, score: u32) -> BorrowerId {
        let borrower = BorrowerId::new();
        self.credit.set_profile(borrower, score, true).await;
        borrower
    }

    /// Runs every workflow step and submits.
    pub async fn originate(
        &self,
        borrower: BorrowerId,
        loan_type: LoanType,
        amount: Decimal,
        term_months: u32,
        collateral: Vec<CollateralItem>,
    ) -> SubmittedLoan {
        let handle = self
            .confirmed(borrower, loan_type, amount, term_months, collateral)
            .await;
        self.service.submit_application(handle).await.unwrap()
    }

    /// Runs every workflow step, leaving the draft ready to submit.
    pub async fn confirmed(
        &self,
        borrower: BorrowerId,
        loan_type: LoanType,
        amount: Decimal,
        term_months: u32,
        collateral: Vec<CollateralItem>,
    ) -> ApplicationHandle {
        let handle = self.service.start_application(borrower, loan_type).await;
        let steps = [
            StepInput::Eligibility,
            StepInput::AmountTerm {
                amount,
                term_months,
            },
            StepInput::TypeSelection { loan_type },
            StepInput::Collateral { items: collateral },
            StepInput::Confirmation {
                purpose: "equipment".to_string(),
            },
        ];
        for step in steps {
            self.service.advance_step(handle, step).await.unwrap();
        }
        handle
    }

    /// An auto-approved, disbursed CREDIT loan for a fresh 750-score
    /// borrower. The disbursement is drained from the ledger so tests
    /// control the balance available for repayments.
    pub async fn active_loan(&self, amount: Decimal, term_months: u32) -> LoanRecord {
        let borrower = self.borrower(750).await;
        let submitted = self
            .originate(borrower, LoanType::Credit, amount, term_months, Vec::new())
            .await;
        assert!(submitted.auto_approved);
        self.ledger.set_balance(borrower, Decimal::ZERO).await;
        submitted.loan
    }

    pub async fn loan(&self, loan: &LoanRecord) -> LoanRecord {
        self.service.get_loan(loan.id()).await.unwrap()
    }

    pub async fn ledger_balance(&self, loan: &LoanRecord) -> Decimal {
        self.ledger.balance(loan.borrower()).await.unwrap()
    }
}

struct SlowDepositLedger {
    inner: InMemoryLedger,
    delay: std::time::Duration,
}

#[async_trait]
impl Ledger for SlowDepositLedger {
    async fn balance(&self, borrower: BorrowerId) -> Result<Decimal> {
        self.inner.balance(borrower).await
    }

    async fn withdraw(&self, borrower: BorrowerId, amount: Decimal) -> Result<bool> {
        self.inner.withdraw(borrower, amount).await
    }

    async fn deposit(&self, borrower: BorrowerId, amount: Decimal) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.deposit(borrower, amount).await
    }
}
