//! Student transactions and running balance calculations.
//!
//! Every financial event for a student becomes one immutable
//! [`StudentTransaction`] carrying the running balance after it. The
//! running balance is what the student owes: debits raise it, credits
//! lower it. History is never edited; corrections are offsetting lines.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cadence_shared::types::{
    Currency, InvoiceId, LedgerEntryId, Money, PaymentId, StudentId, StudentTransactionId, UserId,
};

use super::application::LedgerApplication;
use super::entry::LedgerEntry;
use super::error::LedgerError;

/// Kind of financial event behind a transaction line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// An issued invoice charged to the student.
    InvoiceCharge,
    /// A payment received.
    Payment,
    /// A confirmed credit invoice netting an original invoice.
    CreditInvoice,
    /// A debit correction posted directly to the balance.
    DebitCorrection,
    /// Ledger credit applied to an invoice.
    CreditApplied,
    /// Offset of a decoupled credit application.
    CreditDecoupled,
    /// Offset of a reversed correction.
    CorrectionReversed,
}

impl TransactionType {
    /// Returns the storage name of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceCharge => "invoice_charge",
            Self::Payment => "payment",
            Self::CreditInvoice => "credit_invoice",
            Self::DebitCorrection => "debit_correction",
            Self::CreditApplied => "credit_applied",
            Self::CreditDecoupled => "credit_decoupled",
            Self::CorrectionReversed => "correction_reversed",
        }
    }
}

/// A line to be posted, before it receives its running balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostingLine {
    /// Kind of event.
    pub transaction_type: TransactionType,
    /// Human-readable description.
    pub description: String,
    /// Invoice number, payment reference or correction reference.
    pub reference_number: String,
    /// Amount raising the balance.
    pub debit: Decimal,
    /// Amount lowering the balance.
    pub credit: Decimal,
    /// Originating invoice.
    pub invoice_id: Option<InvoiceId>,
    /// Originating payment.
    pub payment_id: Option<PaymentId>,
    /// Originating ledger entry.
    pub ledger_entry_id: Option<LedgerEntryId>,
}

impl PostingLine {
    /// Creates a debit line.
    #[must_use]
    pub fn debit(
        transaction_type: TransactionType,
        amount: Decimal,
        description: impl Into<String>,
        reference_number: impl Into<String>,
    ) -> Self {
        Self {
            transaction_type,
            description: description.into(),
            reference_number: reference_number.into(),
            debit: amount,
            credit: Decimal::ZERO,
            invoice_id: None,
            payment_id: None,
            ledger_entry_id: None,
        }
    }

    /// Creates a credit line.
    #[must_use]
    pub fn credit(
        transaction_type: TransactionType,
        amount: Decimal,
        description: impl Into<String>,
        reference_number: impl Into<String>,
    ) -> Self {
        Self {
            credit: amount,
            debit: Decimal::ZERO,
            ..Self::debit(transaction_type, Decimal::ZERO, description, reference_number)
        }
    }

    /// Links the line to an invoice.
    #[must_use]
    pub fn with_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    /// Links the line to a payment.
    #[must_use]
    pub fn with_payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    /// Links the line to a ledger entry.
    #[must_use]
    pub fn with_ledger_entry(mut self, entry_id: LedgerEntryId) -> Self {
        self.ledger_entry_id = Some(entry_id);
        self
    }

    /// Net effect on the balance (`debit - credit`).
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.debit - self.credit
    }

    /// Validates that exactly one side carries a positive amount.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPosting` otherwise.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let one_sided = (self.debit > Decimal::ZERO && self.credit.is_zero())
            || (self.credit > Decimal::ZERO && self.debit.is_zero());
        if one_sided {
            Ok(())
        } else {
            Err(LedgerError::InvalidPosting)
        }
    }
}

/// Running balance before and after one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningBalance {
    /// Balance before this line.
    pub previous_balance: Decimal,
    /// Balance after this line.
    pub current_balance: Decimal,
}

impl RunningBalance {
    /// Running balance of the first line of a student.
    #[must_use]
    pub fn first_entry(change: Decimal) -> Self {
        Self {
            previous_balance: Decimal::ZERO,
            current_balance: change,
        }
    }

    /// Running balance following a previous balance.
    #[must_use]
    pub fn next_entry(previous_balance: Decimal, change: Decimal) -> Self {
        Self {
            previous_balance,
            current_balance: previous_balance + change,
        }
    }
}

/// An immutable, append-only ledger line for a student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentTransaction {
    /// Unique identifier.
    pub id: StudentTransactionId,
    /// Student the line belongs to.
    pub student_id: StudentId,
    /// Date the event is booked on.
    pub transaction_date: NaiveDate,
    /// Kind of event.
    pub transaction_type: TransactionType,
    /// Human-readable description.
    pub description: String,
    /// Invoice, payment or correction reference.
    pub reference_number: String,
    /// Amount raising the balance.
    pub debit: Decimal,
    /// Amount lowering the balance.
    pub credit: Decimal,
    /// Balance after this line.
    pub running_balance: Decimal,
    /// Originating invoice.
    pub invoice_id: Option<InvoiceId>,
    /// Originating payment.
    pub payment_id: Option<PaymentId>,
    /// Originating ledger entry.
    pub ledger_entry_id: Option<LedgerEntryId>,
    /// Insert timestamp; second ordering key after the date.
    pub created_at: DateTime<Utc>,
    /// Who caused the line.
    pub created_by: UserId,
}

impl StudentTransaction {
    /// Posts a line after `previous` (the student's latest transaction).
    ///
    /// # Errors
    ///
    /// Returns `InvalidPosting` for a malformed line and
    /// `OutOfOrderTransaction` when `date` precedes the latest line.
    pub fn post(
        previous: Option<&Self>,
        student_id: StudentId,
        line: PostingLine,
        date: NaiveDate,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        line.validate()?;

        let running = match previous {
            Some(prev) => {
                if date < prev.transaction_date {
                    return Err(LedgerError::OutOfOrderTransaction {
                        date,
                        latest: prev.transaction_date,
                    });
                }
                RunningBalance::next_entry(prev.running_balance, line.net())
            }
            None => RunningBalance::first_entry(line.net()),
        };

        Ok(Self {
            id: StudentTransactionId::new(),
            student_id,
            transaction_date: date,
            transaction_type: line.transaction_type,
            description: line.description,
            reference_number: line.reference_number,
            debit: line.debit,
            credit: line.credit,
            running_balance: running.current_balance,
            invoice_id: line.invoice_id,
            payment_id: line.payment_id,
            ledger_entry_id: line.ledger_entry_id,
            created_at,
            created_by,
        })
    }

    /// Net effect on the balance (`debit - credit`).
    #[must_use]
    pub fn net_change(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// Returns the transactions in audit order: `(transaction_date, created_at)`.
#[must_use]
pub fn in_audit_order(transactions: &[StudentTransaction]) -> Vec<&StudentTransaction> {
    let mut ordered: Vec<&StudentTransaction> = transactions.iter().collect();
    ordered.sort_by(|a, b| {
        a.transaction_date
            .cmp(&b.transaction_date)
            .then(a.created_at.cmp(&b.created_at))
    });
    ordered
}

/// Checks that prefix sums of `debit - credit` reproduce every stored
/// running balance, and returns the closing balance.
///
/// # Errors
///
/// Returns `RunningBalanceDrift` at the first line that disagrees.
pub fn verify_running_balances(transactions: &[StudentTransaction]) -> Result<Decimal, LedgerError> {
    let mut balance = Decimal::ZERO;
    for tx in in_audit_order(transactions) {
        balance += tx.net_change();
        if balance != tx.running_balance {
            return Err(LedgerError::RunningBalanceDrift {
                transaction_id: tx.id,
                expected: balance,
                recorded: tx.running_balance,
            });
        }
    }
    Ok(balance)
}

/// The student's current balance: the running balance of the latest line.
#[must_use]
pub fn current_balance(transactions: &[StudentTransaction]) -> Decimal {
    in_audit_order(transactions)
        .last()
        .map_or(Decimal::ZERO, |tx| tx.running_balance)
}

/// Credit still available across the student's open and partially applied
/// credit entries.
///
/// # Errors
///
/// Returns `InvariantViolation` if an entry is over-applied.
pub fn available_credit(
    entries: &[LedgerEntry],
    applications: &[LedgerApplication],
) -> Result<Decimal, LedgerError> {
    entries
        .iter()
        .filter(|e| e.is_credit() && e.status.has_remaining_credit())
        .try_fold(Decimal::ZERO, |acc, entry| {
            Ok(acc + entry.available_credit(applications)?)
        })
}

/// Balance and available credit of one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSummary {
    /// Student the summary describes.
    pub student_id: StudentId,
    /// What the student owes.
    pub balance: Money,
    /// Unapplied credit held for the student.
    pub available_credit: Money,
}

impl BalanceSummary {
    /// Builds the summary from the student's records.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if an entry is over-applied.
    pub fn compute(
        student_id: StudentId,
        currency: Currency,
        entries: &[LedgerEntry],
        applications: &[LedgerApplication],
        transactions: &[StudentTransaction],
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            student_id,
            balance: Money::new(current_balance(transactions), currency),
            available_credit: Money::new(available_credit(entries, applications)?, currency),
        })
    }

    /// Balance minus available credit: what the student would owe if all
    /// credit were applied.
    #[must_use]
    pub fn net_position(&self) -> Money {
        Money::new(
            self.balance.amount - self.available_credit.amount,
            self.balance.currency,
        )
    }
}
