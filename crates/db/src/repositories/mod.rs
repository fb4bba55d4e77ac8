//! Repositories over the billing tables.
//!
//! Mutations lock the student's balance row before anything else and run
//! inside one database transaction each, retried as a whole on conflicts.

pub mod invoice;
pub mod ledger;
pub mod statement;
mod store;

pub use invoice::{ConfirmedCreditInvoice, InvoiceRepository, RecordedPayment};
pub use ledger::LedgerRepository;
pub use statement::{Discrepancy, Reconciliation, StatementRepository};
