//! Invoice error types.

use rust_decimal::Decimal;
use thiserror::Error;

use cadence_shared::AppError;
use cadence_shared::types::InvoiceId;

use super::types::InvoiceStatus;
use crate::ledger::LedgerError;

/// Errors that can occur while building, issuing, paying or crediting
/// invoices.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ========== Validation Errors ==========
    /// Invoice has no lines.
    #[error("Invoice must have at least one line")]
    NoLines,

    /// Line quantity must be positive.
    #[error("Invalid quantity {0}: must be positive")]
    InvalidQuantity(Decimal),

    /// Unit price must not be negative.
    #[error("Invalid unit price {0}: must not be negative")]
    InvalidUnitPrice(Decimal),

    /// VAT rate must lie in `0..=100`.
    #[error("Invalid VAT rate {0}: must be between 0 and 100")]
    InvalidVatRate(Decimal),

    /// Discount must be non-negative and not exceed subtotal plus VAT.
    #[error("Invalid discount {discount}: must be between 0 and {maximum}")]
    InvalidDiscount {
        /// Requested discount.
        discount: Decimal,
        /// Subtotal plus VAT.
        maximum: Decimal,
    },

    /// Due date lies before the issue date.
    #[error("Due date precedes issue date")]
    InvalidDueDate,

    /// Issuing requires a positive total.
    #[error("Invoice {0} has no positive total to charge")]
    NonPositiveTotal(InvoiceId),

    /// Invoice number is malformed.
    #[error("Invalid invoice number: {0}")]
    InvalidNumber(String),

    /// No invoice numbers left for the year.
    #[error("Invoice number sequence exhausted for {0}")]
    NumberSequenceExhausted(i32),

    // ========== State Errors ==========
    /// Operation needs a draft invoice.
    #[error("Invoice {invoice_id} is {status}, expected draft")]
    NotDraft {
        /// Invoice ID.
        invoice_id: InvoiceId,
        /// Current status.
        status: InvoiceStatus,
    },

    /// Payments are accepted only on sent or overdue invoices.
    #[error("Invoice {invoice_id} does not accept payments in status {status}")]
    NotPayable {
        /// Invoice ID.
        invoice_id: InvoiceId,
        /// Current status.
        status: InvoiceStatus,
    },

    /// Only issued standard invoices can be credited.
    #[error("Invoice {invoice_id} cannot be credited in status {status}")]
    NotCreditable {
        /// Invoice ID.
        invoice_id: InvoiceId,
        /// Current status.
        status: InvoiceStatus,
    },

    /// Expected a credit invoice.
    #[error("Invoice {0} is not a credit invoice")]
    NotACreditInvoice(InvoiceId),

    /// Credit invoice refers to another original.
    #[error("Credit invoice refers to {expected}, got {found}")]
    CreditInvoiceMismatch {
        /// Original referenced by the credit invoice.
        expected: InvoiceId,
        /// Invoice supplied as original.
        found: InvoiceId,
    },

    /// Ledger credit must be decoupled before the original is credited.
    #[error("Invoice {0} still has ledger credit applied; decouple it first")]
    OriginalHasLedgerCredit(InvoiceId),

    // ========== Ledger ==========
    /// Failure in the ledger part of an invoice operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl InvoiceError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoLines => "NO_LINES",
            Self::InvalidQuantity(_) => "INVALID_QUANTITY",
            Self::InvalidUnitPrice(_) => "INVALID_UNIT_PRICE",
            Self::InvalidVatRate(_) => "INVALID_VAT_RATE",
            Self::InvalidDiscount { .. } => "INVALID_DISCOUNT",
            Self::InvalidDueDate => "INVALID_DUE_DATE",
            Self::NonPositiveTotal(_) => "NON_POSITIVE_TOTAL",
            Self::InvalidNumber(_) => "INVALID_INVOICE_NUMBER",
            Self::NumberSequenceExhausted(_) => "INVOICE_NUMBER_EXHAUSTED",
            Self::NotDraft { .. } => "INVOICE_NOT_DRAFT",
            Self::NotPayable { .. } => "INVOICE_NOT_PAYABLE",
            Self::NotCreditable { .. } => "INVOICE_NOT_CREDITABLE",
            Self::NotACreditInvoice(_) => "NOT_A_CREDIT_INVOICE",
            Self::CreditInvoiceMismatch { .. } => "CREDIT_INVOICE_MISMATCH",
            Self::OriginalHasLedgerCredit(_) => "ORIGINAL_HAS_LEDGER_CREDIT",
            Self::Ledger(err) => err.error_code(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::NoLines
            | Self::InvalidQuantity(_)
            | Self::InvalidUnitPrice(_)
            | Self::InvalidVatRate(_)
            | Self::InvalidDiscount { .. }
            | Self::InvalidDueDate
            | Self::InvalidNumber(_)
            | Self::CreditInvoiceMismatch { .. } => 400,

            Self::NonPositiveTotal(_)
            | Self::NotDraft { .. }
            | Self::NotPayable { .. }
            | Self::NotCreditable { .. }
            | Self::NotACreditInvoice(_)
            | Self::OriginalHasLedgerCredit(_) => 422,

            Self::NumberSequenceExhausted(_) => 500,

            Self::Ledger(err) => err.http_status_code(),
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Ledger(err) if err.is_retryable())
    }
}

impl From<InvoiceError> for AppError {
    fn from(err: InvoiceError) -> Self {
        if let InvoiceError::Ledger(inner) = err {
            return inner.into();
        }
        let message = err.to_string();
        match err.http_status_code() {
            400 => Self::Validation(message),
            422 => Self::BusinessRule(message),
            _ => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_errors_pass_through() {
        let err: InvoiceError = LedgerError::ConcurrentModification.into();
        assert_eq!(err.error_code(), "CONCURRENT_MODIFICATION");
        assert_eq!(err.http_status_code(), 409);
        assert!(err.is_retryable());

        let app: AppError = err.into();
        assert_eq!(app.error_code(), "CONFLICT");
    }

    #[test]
    fn test_state_errors_are_business_rules() {
        let err = InvoiceError::NotDraft {
            invoice_id: InvoiceId::new(),
            status: InvoiceStatus::Sent,
        };
        assert_eq!(err.http_status_code(), 422);
        assert!(err.to_string().ends_with("is sent, expected draft"));
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 422);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(InvoiceError::NoLines.http_status_code(), 400);
        assert!(!InvoiceError::NoLines.is_retryable());
    }
}
