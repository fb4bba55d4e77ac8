//! Core business logic for Cadence.
//!
//! This crate contains pure business logic with ZERO web or database dependencies.
//! All domain types, validation rules, and calculations live here.
//!
//! # Modules
//!
//! - `ledger` - Student ledger entries, credit application, decoupling, running balances
//! - `invoice` - Invoice aggregate, numbering, payments and credit invoices
//! - `schedule` - Time slots, week parity and schedule conflict detection
//! - `book` - In-memory books of one student running all of the above atomically

pub mod book;
pub mod invoice;
pub mod ledger;
pub mod schedule;

pub use book::{IssuedInvoice, StudentBook};
