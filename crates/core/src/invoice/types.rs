//! Invoice domain types.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cadence_shared::types::{
    Currency, EnrollmentId, InvoiceId, LessonId, Money, PaymentId, StudentId, UserId,
};

use super::number::InvoiceNumber;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Being prepared; totals may still change.
    Draft,
    /// Issued and awaiting settlement.
    Sent,
    /// Fully settled.
    Paid,
    /// Issued, unsettled and past its due date.
    Overdue,
    /// Netted by a confirmed credit invoice.
    Cancelled,
}

impl InvoiceStatus {
    /// Returns the storage name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for issued invoices awaiting settlement.
    #[must_use]
    pub const fn is_outstanding(&self) -> bool {
        matches!(self, Self::Sent | Self::Overdue)
    }

    /// Returns true once the invoice has been issued.
    #[must_use]
    pub const fn is_issued(&self) -> bool {
        matches!(self, Self::Sent | Self::Overdue | Self::Paid)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normal invoice or credit invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InvoiceKind {
    /// Bills the student.
    Standard,
    /// Negative mirror of an original invoice.
    Credit {
        /// Invoice being credited.
        original_invoice_id: InvoiceId,
    },
}

/// One billed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// What is billed.
    pub description: String,
    /// Number of units (lessons, months).
    pub quantity: Decimal,
    /// Price per unit excluding VAT.
    pub unit_price: Decimal,
    /// VAT percentage (21 means 21%).
    pub vat_rate: Decimal,
    /// Lesson billed by this line, if any.
    pub lesson_id: Option<LessonId>,
}

/// Computed invoice amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    /// Sum of line amounts excluding VAT.
    pub subtotal: Decimal,
    /// Sum of per-line VAT.
    pub vat_amount: Decimal,
    /// Invoice-level discount.
    pub discount_amount: Decimal,
    /// `subtotal + vat_amount - discount_amount`.
    pub total: Decimal,
}

impl InvoiceTotals {
    /// Returns the mirrored totals of a credit invoice.
    #[must_use]
    pub fn negated(&self) -> Self {
        Self {
            subtotal: -self.subtotal,
            vat_amount: -self.vat_amount,
            discount_amount: -self.discount_amount,
            total: -self.total,
        }
    }

    /// Returns true when `total = subtotal + vat - discount`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total == self.subtotal + self.vat_amount - self.discount_amount
    }
}

/// Financial document billing a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier.
    pub id: InvoiceId,
    /// Sequential number.
    pub number: InvoiceNumber,
    /// Standard or credit invoice.
    pub kind: InvoiceKind,
    /// Billed student.
    pub student_id: StudentId,
    /// Enrollment the invoice originates from.
    pub enrollment_id: Option<EnrollmentId>,
    /// Issue date.
    pub issue_date: NaiveDate,
    /// Due date.
    pub due_date: NaiveDate,
    /// Invoice currency.
    pub currency: Currency,
    /// Billed lines.
    pub lines: Vec<InvoiceLine>,
    /// Computed amounts.
    pub totals: InvoiceTotals,
    /// Sum of payments applied to this invoice.
    pub amount_paid: Decimal,
    /// Sum of active ledger credit applications on this invoice.
    pub ledger_credit_applied: Decimal,
    /// Current status.
    pub status: InvoiceStatus,
}

impl Invoice {
    /// Outstanding amount: `total - amount_paid - ledger_credit_applied`.
    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.totals.total - self.amount_paid - self.ledger_credit_applied
    }

    /// Outstanding amount as money.
    #[must_use]
    pub fn balance_money(&self) -> Money {
        Money::new(self.balance(), self.currency)
    }

    /// Returns true for credit invoices.
    #[must_use]
    pub fn is_credit_invoice(&self) -> bool {
        matches!(self.kind, InvoiceKind::Credit { .. })
    }

    /// Status an issued invoice should have for the given balance.
    #[must_use]
    pub fn settlement_status(&self, balance: Decimal, today: NaiveDate) -> InvoiceStatus {
        if balance <= Decimal::ZERO {
            InvoiceStatus::Paid
        } else if self.due_date < today {
            InvoiceStatus::Overdue
        } else {
            InvoiceStatus::Sent
        }
    }
}

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Bank transfer.
    BankTransfer,
    /// SEPA direct debit.
    DirectDebit,
    /// Card payment.
    Card,
    /// Cash at the desk.
    Cash,
}

impl PaymentMethod {
    /// Returns the storage name of the method.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BankTransfer => "bank_transfer",
            Self::DirectDebit => "direct_debit",
            Self::Card => "card",
            Self::Cash => "cash",
        }
    }
}

/// Money received against an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier.
    pub id: PaymentId,
    /// Invoice paid.
    pub invoice_id: InvoiceId,
    /// Paying student.
    pub student_id: StudentId,
    /// Amount received, including any overpayment.
    pub amount: Decimal,
    /// Booking date.
    pub payment_date: NaiveDate,
    /// Payment method.
    pub method: PaymentMethod,
    /// Bank or provider reference.
    pub external_reference: Option<String>,
    /// Who recorded the payment.
    pub recorded_by: UserId,
    /// When the payment was recorded.
    pub recorded_at: DateTime<Utc>,
}
