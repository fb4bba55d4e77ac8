//! Invoices: totals, numbering, issuing, payments and credit invoices.

pub mod error;
pub mod number;
pub mod service;
pub mod types;

pub use error::InvoiceError;
pub use number::{InvoiceNumber, InvoiceSeries};
pub use service::{
    CreditConfirmation, InvoiceIssue, InvoiceService, NewInvoice, NewPayment, PaymentOutcome,
};
pub use types::{
    Invoice, InvoiceKind, InvoiceLine, InvoiceStatus, InvoiceTotals, Payment, PaymentMethod,
};
