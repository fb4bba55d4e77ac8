//! `SeaORM` entity definitions.
//!
//! Status and type columns are stored as `VARCHAR` guarded by `CHECK`
//! constraints and mapped to the core enums in `crate::mapping`.

pub mod decouplings;
pub mod invoice_lines;
pub mod invoices;
pub mod ledger_applications;
pub mod ledger_entries;
pub mod payments;
pub mod student_balances;
pub mod student_transactions;
