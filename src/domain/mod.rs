//! Loan domain types, calculations and the ports to the outside world.

pub mod amortization;
pub mod application;
pub mod borrower;
pub mod collection;
pub mod ids;
pub mod loan;
pub mod money;
pub mod overdue;
pub mod payment;
pub mod policy;
pub mod ports;
