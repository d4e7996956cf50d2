mod common;

use chrono::Duration;
use common::Harness;
use loanflow::domain::loan::LoanStatus;
use loanflow::domain::money::{Amount, Money};
use loanflow::domain::payment::{PaymentChannel, PaymentMethod};
use loanflow::domain::policy::LoanType;
use loanflow::domain::ports::{CollectionStore, Ledger};
use loanflow::error::LoanError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

#[tokio::test]
async fn test_installment_payment_follows_waterfall() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.ledger.set_balance(loan.borrower(), dec!(10000)).await;
    let due = loan.amounts_due();
    assert_eq!(due.interest, Money::new(dec!(187.50)));

    let result = h
        .service
        .make_payment(
            loan.id(),
            loan.borrower(),
            amount(due.total().value()),
            PaymentMethod::BankBalance,
        )
        .await
        .unwrap();

    assert_eq!(result.allocation.penalty, Money::ZERO);
    assert_eq!(result.allocation.interest, due.interest);
    assert_eq!(result.allocation.principal, due.principal);
    assert_eq!(result.allocation.unallocated, Money::ZERO);
    assert_eq!(result.installments_completed, 1);
    assert_eq!(result.loan_status, LoanStatus::Active);
    assert_eq!(result.remaining_balance, Money::new(dec!(30000)) - due.principal);

    let stored = h.loan(&loan).await;
    assert_eq!(stored.payments_made(), 1);
    assert_eq!(
        stored.next_due_date(),
        loan.next_due_date().map(|d| d + chrono::Months::new(1))
    );
    assert_eq!(
        h.ledger.balance(loan.borrower()).await.unwrap(),
        dec!(10000) - due.total().value()
    );

    let history = h.service.payment_history(loan.id()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].channel, PaymentChannel::Manual);
    assert_eq!(history[0].balance_after, result.remaining_balance);
}

#[tokio::test]
async fn test_partial_payment_goes_to_interest_first() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.ledger.set_balance(loan.borrower(), dec!(100)).await;

    let result = h
        .service
        .make_payment(loan.id(), loan.borrower(), amount(dec!(100)), PaymentMethod::Wallet)
        .await
        .unwrap();
    assert_eq!(result.allocation.interest, Money::new(dec!(100)));
    assert_eq!(result.allocation.principal, Money::ZERO);
    assert_eq!(result.installments_completed, 0);
    assert_eq!(result.remaining_balance, Money::new(dec!(30000)));

    let stored = h.loan(&loan).await;
    assert_eq!(stored.payments_made(), 0);
    assert_eq!(stored.amounts_due().interest, Money::new(dec!(87.50)));
}

#[tokio::test]
async fn test_excess_is_not_taken_from_ledger() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.ledger.set_balance(loan.borrower(), dec!(10000)).await;
    let due = loan.amounts_due().total();

    let result = h
        .service
        .make_payment(
            loan.id(),
            loan.borrower(),
            amount(due.value() + dec!(500)),
            PaymentMethod::BankBalance,
        )
        .await
        .unwrap();
    assert_eq!(result.allocation.unallocated, Money::new(dec!(500)));
    assert_eq!(result.allocation.applied(), due);
    assert_eq!(
        h.ledger.balance(loan.borrower()).await.unwrap(),
        dec!(10000) - due.value()
    );
}

#[tokio::test]
async fn test_insufficient_funds_changes_nothing() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.ledger.set_balance(loan.borrower(), dec!(50)).await;

    let err = h
        .service
        .make_payment(loan.id(), loan.borrower(), amount(dec!(1000)), PaymentMethod::BankBalance)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoanError::InsufficientFunds { available, .. } if available == dec!(50)
    ));

    assert_eq!(h.loan(&loan).await, loan);
    assert!(h.service.payment_history(loan.id()).await.unwrap().is_empty());
    assert_eq!(h.ledger.balance(loan.borrower()).await.unwrap(), dec!(50));
}

#[tokio::test]
async fn test_failed_commit_refunds_the_borrower() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.ledger.set_balance(loan.borrower(), dec!(10000)).await;

    h.repo.set_fail_writes(true);
    let err = h
        .service
        .make_payment(loan.id(), loan.borrower(), amount(dec!(1000)), PaymentMethod::BankBalance)
        .await
        .unwrap_err();
    h.repo.set_fail_writes(false);

    assert!(matches!(err, LoanError::Unavailable));
    assert_eq!(h.ledger.balance(loan.borrower()).await.unwrap(), dec!(10000));
    assert_eq!(h.loan(&loan).await.current_balance(), Money::new(dec!(30000)));
    assert!(h.service.payment_history(loan.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_outage_is_unavailable() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.ledger.set_unavailable(true);

    let err = h
        .service
        .make_payment(loan.id(), loan.borrower(), amount(dec!(100)), PaymentMethod::BankBalance)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UNAVAILABLE");
}

#[tokio::test]
async fn test_only_the_borrower_may_pay() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    let stranger = h.borrower(800).await;
    h.ledger.set_balance(stranger, dec!(10000)).await;

    let err = h
        .service
        .make_payment(loan.id(), stranger, amount(dec!(100)), PaymentMethod::BankBalance)
        .await
        .unwrap_err();
    assert!(matches!(err, LoanError::Unauthorized(_)));
}

#[tokio::test]
async fn test_pending_loan_is_not_payable() {
    let h = Harness::new();
    let borrower = h.borrower(680).await;
    let submitted = h
        .originate(borrower, LoanType::Credit, dec!(5000), 12, Vec::new())
        .await;
    h.ledger.set_balance(borrower, dec!(1000)).await;

    let err = h
        .service
        .make_payment(submitted.loan.id(), borrower, amount(dec!(100)), PaymentMethod::BankBalance)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoanError::LoanNotPayable {
            status: LoanStatus::PendingReview,
            ..
        }
    ));
}

#[tokio::test]
async fn test_paying_every_installment_closes_the_loan() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(3000), 3).await;
    h.ledger.set_balance(loan.borrower(), dec!(5000)).await;

    let mut last = None;
    for _ in 0..3 {
        let due = h.loan(&loan).await.amounts_due().total();
        let result = h
            .service
            .make_payment(
                loan.id(),
                loan.borrower(),
                amount(due.value()),
                PaymentMethod::BankBalance,
            )
            .await
            .unwrap();
        assert_eq!(result.installments_completed, 1);
        last = Some(result);
    }

    let last = last.unwrap();
    assert_eq!(last.loan_status, LoanStatus::Closed);
    assert_eq!(last.remaining_balance, Money::ZERO);

    let closed = h.loan(&loan).await;
    assert_eq!(closed.payments_made(), 3);
    assert_eq!(closed.total_principal_paid(), Money::new(dec!(3000)));
    assert_eq!(closed.next_due_date(), None);

    let err = h
        .service
        .make_payment(loan.id(), loan.borrower(), amount(dec!(10)), PaymentMethod::BankBalance)
        .await
        .unwrap_err();
    assert!(matches!(err, LoanError::LoanNotPayable { .. }));
}

#[tokio::test]
async fn test_catch_up_payment_restores_overdue_loan() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.clock.set(loan.next_due_date().unwrap() + Duration::days(10));
    h.service.run_overdue_sweep().await.unwrap();

    let overdue = h.loan(&loan).await;
    assert_eq!(overdue.status(), LoanStatus::Overdue);
    let record = h.service.overdue_record(loan.id()).await.unwrap().unwrap();
    let penalty = record.outstanding_penalty();
    assert!(penalty.is_positive());
    assert!(h.repo.active_workflow(loan.id()).await.unwrap().is_some());

    h.ledger.set_balance(loan.borrower(), dec!(10000)).await;
    let owed = overdue.amounts_due().total() + penalty;
    let result = h
        .service
        .make_payment(loan.id(), loan.borrower(), amount(owed.value()), PaymentMethod::BankBalance)
        .await
        .unwrap();

    assert_eq!(result.allocation.penalty, penalty);
    assert_eq!(result.outstanding_penalty, Money::ZERO);
    assert_eq!(result.loan_status, LoanStatus::Active);
    assert!(h.service.overdue_record(loan.id()).await.unwrap().is_none());
    assert!(h.repo.active_workflow(loan.id()).await.unwrap().is_none());

    let restored = h.loan(&loan).await;
    assert_eq!(restored.overdue_payments(), 0);
    assert_eq!(restored.total_penalty_paid(), penalty);
}

#[tokio::test]
async fn test_penalty_only_payment_keeps_loan_overdue() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.clock.set(loan.next_due_date().unwrap() + Duration::days(10));
    h.service.run_overdue_sweep().await.unwrap();
    let penalty = h
        .service
        .overdue_record(loan.id())
        .await
        .unwrap()
        .unwrap()
        .outstanding_penalty();

    h.ledger.set_balance(loan.borrower(), dec!(10000)).await;
    let result = h
        .service
        .make_payment(
            loan.id(),
            loan.borrower(),
            amount(penalty.value()),
            PaymentMethod::BankBalance,
        )
        .await
        .unwrap();
    assert_eq!(result.allocation.penalty, penalty);
    assert_eq!(result.allocation.interest, Money::ZERO);
    assert_eq!(result.loan_status, LoanStatus::Overdue);
    assert!(h.service.overdue_record(loan.id()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_schedule_query_tracks_progress() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;

    let schedule = h.service.get_payment_schedule(loan.id()).await.unwrap();
    assert_eq!(schedule.upcoming.len(), 12);
    assert_eq!(schedule.upcoming[0].period, 1);
    assert_eq!(schedule.upcoming[11].remaining_balance, Decimal::ZERO);

    h.ledger.set_balance(loan.borrower(), dec!(10000)).await;
    let due = loan.amounts_due().total();
    h.service
        .make_payment(loan.id(), loan.borrower(), amount(due.value()), PaymentMethod::BankBalance)
        .await
        .unwrap();

    let schedule = h.service.get_payment_schedule(loan.id()).await.unwrap();
    assert_eq!(schedule.payments_made, 1);
    assert_eq!(schedule.upcoming.len(), 11);
    assert_eq!(schedule.upcoming[0].period, 2);
}

#[tokio::test]
async fn test_payoff_and_refinance_queries() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;

    let payoff = h.service.get_early_payoff_options(loan.id()).await.unwrap();
    assert_eq!(payoff.remaining_months, 12);
    let targets: Vec<u32> = payoff.early_payoff.iter().map(|s| s.target_months).collect();
    assert_eq!(targets, vec![3, 6, 9]);
    assert!(payoff.early_payoff.iter().all(|s| s.interest_saved > Decimal::ZERO));
    assert!(payoff.biweekly.interest_saved > Decimal::ZERO);

    let comparison = h
        .service
        .compare_refinance(loan.id(), dec!(5.0), 12)
        .await
        .unwrap();
    assert_eq!(comparison.closing_costs, dec!(600));
    assert!(comparison.monthly_savings > Decimal::ZERO);
}

#[tokio::test]
async fn test_concurrent_payments_are_serialized() {
    let h = Harness::new();
    let loan = h.active_loan(dec!(30000), 12).await;
    h.ledger.set_balance(loan.borrower(), dec!(1000)).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = h.service.clone();
        let (loan_id, payer) = (loan.id(), loan.borrower());
        handles.push(tokio::spawn(async move {
            service
                .make_payment(loan_id, payer, Amount::new(dec!(20)).unwrap(), PaymentMethod::Wallet)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = h.service.payment_history(loan.id()).await.unwrap();
    assert_eq!(history.len(), 10);
    let interest_paid: Money = history.iter().map(|p| p.allocation.interest).sum();
    let principal_paid: Money = history.iter().map(|p| p.allocation.principal).sum();
    assert_eq!(interest_paid, Money::new(dec!(187.50)));
    assert_eq!(principal_paid, Money::new(dec!(12.50)));

    let stored = h.loan(&loan).await;
    assert_eq!(stored.current_balance(), Money::new(dec!(29987.50)));
    assert_eq!(h.ledger.balance(loan.borrower()).await.unwrap(), dec!(800));
}
