//! Student billing ledger.
//!
//! This module implements the ledger and invoice-credit reconciliation:
//! - Ledger entries (credit and debit corrections) and their status
//! - Applications of credit to invoices and their decoupling
//! - Year-scoped correction references
//! - FIFO credit allocation
//! - Student transactions with running balances
//! - Statements and balance summaries
//! - Error types for ledger operations

pub mod allocation;
pub mod application;
pub mod balance;
pub mod entry;
pub mod error;
pub mod reference;
pub mod service;
pub mod statement;

#[cfg(test)]
mod balance_props;
#[cfg(test)]
mod service_props;

pub use allocation::{Allocation, CreditSource, allocate_fifo};
pub use application::{ApplicationStatus, Decoupling, LedgerApplication};
pub use balance::{
    BalanceSummary, PostingLine, RunningBalance, StudentTransaction, TransactionType,
    available_credit, current_balance, verify_running_balances,
};
pub use entry::{EntryReversal, EntryStatus, EntryType, LedgerEntry};
pub use error::LedgerError;
pub use reference::{CorrectionReference, CorrectionSequence};
pub use service::{
    CreditApplicationOutcome, DecoupleOutcome, DecouplePolicy, EntryUpdate, InvoiceCreditUpdate,
    LedgerService, NewLedgerEntry, ReversalOutcome,
};
pub use statement::{StatementLine, StudentStatement};
