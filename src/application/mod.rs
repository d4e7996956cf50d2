//! Application layer orchestrating the domain through its ports.
//!
//! Each component owns one part of the loan lifecycle; all of them share a
//! [`locks::LoanLocks`] table so that mutations of a single loan are
//! serialized while different loans proceed concurrently. [`service::LoanService`]
//! is the entry point callers use.

pub mod escalation;
pub mod locks;
pub mod repayment;
pub mod scheduler;
pub mod service;
pub mod sessions;
pub mod workflow;
