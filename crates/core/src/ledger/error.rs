//! Ledger error types for validation, ownership, state and invariant errors.
//!
//! This module defines all errors that can occur while recording ledger
//! entries, applying credit to invoices, decoupling applications and
//! posting student transactions.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use cadence_shared::AppError;
use cadence_shared::types::{
    InvoiceId, LedgerApplicationId, LedgerEntryId, StudentId, StudentTransactionId,
};

use crate::invoice::InvoiceStatus;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Amount must be positive with at most two decimal places.
    #[error("Invalid amount {0}: must be positive with at most two decimal places")]
    InvalidAmount(Decimal),

    /// Ledger entry description is empty.
    #[error("Ledger entry description is required")]
    DescriptionRequired,

    /// Audit reason is empty.
    #[error("A reason is required for this operation")]
    ReasonRequired,

    /// Requested credit exceeds what the invoice still needs.
    #[error("Requested amount {requested} exceeds invoice balance {balance}")]
    AmountExceedsInvoiceBalance {
        /// Requested amount.
        requested: Decimal,
        /// Outstanding invoice balance.
        balance: Decimal,
    },

    /// Requested credit exceeds the student's available credit.
    #[error("Requested amount {requested} exceeds available credit {available}")]
    InsufficientCredit {
        /// Requested amount.
        requested: Decimal,
        /// Available credit.
        available: Decimal,
    },

    /// Correction reference is malformed.
    #[error("Invalid correction reference: {0}")]
    InvalidReference(String),

    /// No correction references left for the year.
    #[error("Correction reference sequence exhausted for {0}")]
    ReferenceSequenceExhausted(i32),

    /// A posting line must carry exactly one non-negative side.
    #[error("Posting must specify either a debit or a credit amount, not both")]
    InvalidPosting,

    /// Posting would be dated before the latest transaction.
    #[error("Transaction dated {date} precedes latest transaction dated {latest}")]
    OutOfOrderTransaction {
        /// Date of the new transaction.
        date: NaiveDate,
        /// Date of the latest recorded transaction.
        latest: NaiveDate,
    },

    // ========== Ownership Errors ==========
    /// Invoice or entry belongs to another student.
    #[error("Ownership mismatch: expected student {expected}, found {found}")]
    OwnershipMismatch {
        /// Student the operation was requested for.
        expected: StudentId,
        /// Student the record belongs to.
        found: StudentId,
    },

    // ========== State Errors ==========
    /// Student has no open credit.
    #[error("No credit available")]
    NoCreditAvailable,

    /// Invoice has nothing left to settle.
    #[error("Invoice {0} is already settled")]
    InvoiceAlreadySettled(InvoiceId),

    /// Invoice does not accept ledger credit in its current state.
    #[error("Invoice {invoice_id} does not accept credit in status {status}")]
    InvoiceNotOpen {
        /// Invoice ID.
        invoice_id: InvoiceId,
        /// Current status.
        status: InvoiceStatus,
    },

    /// Decoupling from a paid invoice is disabled by policy.
    #[error("Invoice {0} is paid; decoupling from paid invoices is disabled")]
    InvoiceAlreadyPaid(InvoiceId),

    /// Application was decoupled earlier.
    #[error("Application {0} is already decoupled")]
    AlreadyDecoupled(LedgerApplicationId),

    /// Entry still has active applications.
    #[error("Ledger entry {entry_id} has {active} active application(s)")]
    EntryHasActiveApplications {
        /// Entry ID.
        entry_id: LedgerEntryId,
        /// Number of active applications.
        active: usize,
    },

    /// Entry was reversed earlier.
    #[error("Ledger entry {0} is already reversed")]
    AlreadyReversed(LedgerEntryId),

    // ========== Consistency Errors ==========
    /// Decoupling would contradict the invoice's recorded payments or credit.
    #[error("Inconsistent accounting on invoice {invoice_id}: {detail}")]
    InconsistentInvoiceAccounting {
        /// Invoice ID.
        invoice_id: InvoiceId,
        /// What does not add up.
        detail: String,
    },

    /// A stored running balance disagrees with the prefix sum.
    #[error("Running balance drift at {transaction_id}: expected {expected}, recorded {recorded}")]
    RunningBalanceDrift {
        /// Transaction carrying the wrong balance.
        transaction_id: StudentTransactionId,
        /// Balance reproduced from the prefix sum.
        expected: Decimal,
        /// Balance stored on the transaction.
        recorded: Decimal,
    },

    /// Arithmetic invariant broken; indicates a bug, aborts the operation.
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    // ========== Not Found ==========
    /// Ledger entry not found.
    #[error("Ledger entry not found: {0}")]
    EntryNotFound(LedgerEntryId),

    /// Application not found.
    #[error("Ledger application not found: {0}")]
    ApplicationNotFound(LedgerApplicationId),

    /// Invoice not found.
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    // ========== Concurrency Errors ==========
    /// Concurrent modification detected.
    #[error("Concurrent modification detected, please retry")]
    ConcurrentModification,
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::DescriptionRequired => "DESCRIPTION_REQUIRED",
            Self::ReasonRequired => "REASON_REQUIRED",
            Self::AmountExceedsInvoiceBalance { .. } => "AMOUNT_EXCEEDS_INVOICE_BALANCE",
            Self::InsufficientCredit { .. } => "INSUFFICIENT_CREDIT",
            Self::InvalidReference(_) => "INVALID_REFERENCE",
            Self::ReferenceSequenceExhausted(_) => "REFERENCE_SEQUENCE_EXHAUSTED",
            Self::InvalidPosting => "INVALID_POSTING",
            Self::OutOfOrderTransaction { .. } => "OUT_OF_ORDER_TRANSACTION",
            Self::OwnershipMismatch { .. } => "OWNERSHIP_MISMATCH",
            Self::NoCreditAvailable => "NO_CREDIT_AVAILABLE",
            Self::InvoiceAlreadySettled(_) => "INVOICE_ALREADY_SETTLED",
            Self::InvoiceNotOpen { .. } => "INVOICE_NOT_OPEN",
            Self::InvoiceAlreadyPaid(_) => "INVOICE_ALREADY_PAID",
            Self::AlreadyDecoupled(_) => "ALREADY_DECOUPLED",
            Self::EntryHasActiveApplications { .. } => "ENTRY_HAS_ACTIVE_APPLICATIONS",
            Self::AlreadyReversed(_) => "ALREADY_REVERSED",
            Self::InconsistentInvoiceAccounting { .. } => "INCONSISTENT_INVOICE_ACCOUNTING",
            Self::RunningBalanceDrift { .. } => "RUNNING_BALANCE_DRIFT",
            Self::InvariantViolation(_) => "INVARIANT_VIOLATION",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::ApplicationNotFound(_) => "APPLICATION_NOT_FOUND",
            Self::InvoiceNotFound(_) => "INVOICE_NOT_FOUND",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::InvalidAmount(_)
            | Self::DescriptionRequired
            | Self::ReasonRequired
            | Self::AmountExceedsInvoiceBalance { .. }
            | Self::InsufficientCredit { .. }
            | Self::InvalidReference(_)
            | Self::InvalidPosting
            | Self::OutOfOrderTransaction { .. } => 400,

            // 403 Forbidden - ownership errors are never corrected
            Self::OwnershipMismatch { .. } => 403,

            // 404 Not Found
            Self::EntryNotFound(_) | Self::ApplicationNotFound(_) | Self::InvoiceNotFound(_) => {
                404
            }

            // 409 Conflict - concurrency errors
            Self::ConcurrentModification => 409,

            // 422 Unprocessable - expected business states
            Self::NoCreditAvailable
            | Self::InvoiceAlreadySettled(_)
            | Self::InvoiceNotOpen { .. }
            | Self::InvoiceAlreadyPaid(_)
            | Self::AlreadyDecoupled(_)
            | Self::EntryHasActiveApplications { .. }
            | Self::AlreadyReversed(_) => 422,

            // 500 Internal Server Error - broken books
            Self::ReferenceSequenceExhausted(_)
            | Self::InconsistentInvoiceAccounting { .. }
            | Self::RunningBalanceDrift { .. }
            | Self::InvariantViolation(_) => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification)
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err.http_status_code() {
            400 => Self::Validation(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            403 | 422 => Self::BusinessRule(message),
            _ => Self::Internal(message),
        }
    }
}
