//! Ledger service for corrections, credit application, decoupling and
//! reversal.
//!
//! This module provides the core business logic of the student ledger. It
//! holds no state and performs no I/O: every operation takes the current
//! records, validates them, and returns a plan describing the new records,
//! the status changes and the transaction lines to post. The caller applies
//! the plan in one transaction (see `StudentBook` and the database
//! repositories).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use cadence_shared::BillingConfig;
use cadence_shared::types::{
    CourseId, DecouplingId, InvoiceId, LedgerApplicationId, LedgerEntryId, StudentId, UserId,
};

use super::allocation::{CreditSource, allocate_fifo, allocated_total};
use super::application::{ApplicationStatus, Decoupling, LedgerApplication, applied_total};
use super::balance::{PostingLine, TransactionType};
use super::entry::{EntryReversal, EntryStatus, EntryType, LedgerEntry, validate_amount};
use super::error::LedgerError;
use super::reference::CorrectionReference;
use crate::invoice::{Invoice, InvoiceStatus};

/// Input for a new ledger entry.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    /// Student whose balance is corrected.
    pub student_id: StudentId,
    /// Related course.
    pub course_id: Option<CourseId>,
    /// Free-text description.
    pub description: String,
    /// Positive amount.
    pub amount: Decimal,
    /// Credit or debit.
    pub entry_type: EntryType,
    /// Who creates the entry.
    pub created_by: UserId,
}

/// Whether applications on paid invoices may be decoupled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecouplePolicy {
    /// Allow decoupling from invoices marked `Paid`.
    pub allow_paid_invoices: bool,
}

impl Default for DecouplePolicy {
    fn default() -> Self {
        Self {
            allow_paid_invoices: true,
        }
    }
}

impl From<&BillingConfig> for DecouplePolicy {
    fn from(config: &BillingConfig) -> Self {
        Self {
            allow_paid_invoices: config.allow_decouple_on_paid,
        }
    }
}

/// New applied sum and status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryUpdate {
    /// Entry ID.
    pub entry_id: LedgerEntryId,
    /// Applied sum after the operation.
    pub applied: Decimal,
    /// Status after the operation.
    pub status: EntryStatus,
}

/// New credit, balance and status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvoiceCreditUpdate {
    /// Invoice ID.
    pub invoice_id: InvoiceId,
    /// `ledger_credit_applied` after the operation.
    pub ledger_credit_applied: Decimal,
    /// Balance after the operation.
    pub balance: Decimal,
    /// Status after the operation.
    pub status: InvoiceStatus,
}

/// Result of applying credit to an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct CreditApplicationOutcome {
    /// Created applications, in FIFO order.
    pub applications: Vec<LedgerApplication>,
    /// Sum of the created applications.
    pub total_applied: Decimal,
    /// Entries whose applied sum changed.
    pub entry_updates: Vec<EntryUpdate>,
    /// Invoice after the application.
    pub invoice: InvoiceCreditUpdate,
    /// One `CreditApplied` line per application.
    pub postings: Vec<PostingLine>,
}

/// Result of decoupling an application.
#[derive(Debug, Clone, Serialize)]
pub struct DecoupleOutcome {
    /// Audit record of the decoupling.
    pub decoupling: Decoupling,
    /// Entry after the credit was restored.
    pub entry: EntryUpdate,
    /// Invoice after its balance was restored.
    pub invoice: InvoiceCreditUpdate,
    /// `CreditDecoupled` line offsetting the application.
    pub posting: PostingLine,
}

/// Result of reversing an entry.
#[derive(Debug, Clone, Serialize)]
pub struct ReversalOutcome {
    /// Reversed entry.
    pub entry_id: LedgerEntryId,
    /// Reversal audit.
    pub reversal: EntryReversal,
    /// `CorrectionReversed` line for debit entries.
    pub posting: Option<PostingLine>,
}

/// Ledger service.
///
/// This service contains pure business logic with no database dependencies.
pub struct LedgerService;

impl LedgerService {
    /// Builds a new entry with its allocated reference.
    ///
    /// # Errors
    ///
    /// Returns `DescriptionRequired` or `InvalidAmount`.
    pub fn create_entry(
        input: NewLedgerEntry,
        reference: CorrectionReference,
        created_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(LedgerError::DescriptionRequired);
        }
        validate_amount(input.amount)?;

        Ok(LedgerEntry {
            id: LedgerEntryId::new(),
            reference,
            description: description.to_string(),
            student_id: input.student_id,
            course_id: input.course_id,
            amount: input.amount,
            entry_type: input.entry_type,
            status: EntryStatus::Open,
            created_at,
            created_by: input.created_by,
            reversal: None,
        })
    }

    /// Line to post when an entry is created: debits post immediately,
    /// credits wait until they are applied.
    #[must_use]
    pub fn creation_posting(entry: &LedgerEntry) -> Option<PostingLine> {
        (entry.entry_type == EntryType::Debit).then(|| {
            PostingLine::debit(
                TransactionType::DebitCorrection,
                entry.amount,
                entry.description.clone(),
                entry.reference.to_string(),
            )
            .with_ledger_entry(entry.id)
        })
    }

    /// Applies the student's available credit to an invoice, oldest credit
    /// first.
    ///
    /// `entries` and `applications` are the student's ledger records;
    /// without `requested`, as much credit as possible is applied up to the
    /// invoice balance.
    ///
    /// # Errors
    ///
    /// Returns `OwnershipMismatch` for another student's records,
    /// `InvoiceNotOpen` for drafts, cancelled and credit invoices,
    /// `InvoiceAlreadySettled` when nothing is owed, `NoCreditAvailable`
    /// without credit, and a validation error for a bad requested amount.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_credit(
        student_id: StudentId,
        invoice: &Invoice,
        entries: &[LedgerEntry],
        applications: &[LedgerApplication],
        requested: Option<Decimal>,
        applied_by: UserId,
        applied_at: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<CreditApplicationOutcome, LedgerError> {
        ensure_owner(student_id, invoice.student_id)?;
        for entry in entries {
            ensure_owner(student_id, entry.student_id)?;
        }

        if invoice.is_credit_invoice()
            || matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Cancelled)
        {
            return Err(LedgerError::InvoiceNotOpen {
                invoice_id: invoice.id,
                status: invoice.status,
            });
        }
        let balance = invoice.balance();
        if invoice.status == InvoiceStatus::Paid || balance <= Decimal::ZERO {
            return Err(LedgerError::InvoiceAlreadySettled(invoice.id));
        }

        if let Some(amount) = requested {
            validate_amount(amount)?;
            if amount > balance {
                return Err(LedgerError::AmountExceedsInvoiceBalance {
                    requested: amount,
                    balance,
                });
            }
        }

        let sources = credit_sources(entries, applications)?;
        let available: Decimal = sources.iter().map(|s| s.available).sum();
        if available <= Decimal::ZERO {
            return Err(LedgerError::NoCreditAvailable);
        }
        if let Some(amount) = requested
            && amount > available
        {
            return Err(LedgerError::InsufficientCredit {
                requested: amount,
                available,
            });
        }

        let target = requested.unwrap_or(balance);
        let allocations = allocate_fifo(&sources, target);
        let total_applied = allocated_total(&allocations);
        if total_applied > target || total_applied > available {
            return Err(LedgerError::InvariantViolation(format!(
                "allocated {total_applied} for target {target} with {available} available"
            )));
        }

        let mut created = Vec::with_capacity(allocations.len());
        let mut entry_updates = Vec::with_capacity(allocations.len());
        let mut postings = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            let entry = find_entry(entries, allocation.entry_id)?;
            let applied = entry.applied_amount(applications) + allocation.amount;
            entry_updates.push(EntryUpdate {
                entry_id: entry.id,
                applied,
                status: entry.status_for(applied)?,
            });

            let application = LedgerApplication {
                id: LedgerApplicationId::new(),
                entry_id: entry.id,
                invoice_id: invoice.id,
                amount: allocation.amount,
                applied_at,
                applied_by,
                status: ApplicationStatus::Active,
            };
            postings.push(
                PostingLine::credit(
                    TransactionType::CreditApplied,
                    allocation.amount,
                    format!("Credit {} applied to invoice {}", entry.reference, invoice.number),
                    entry.reference.to_string(),
                )
                .with_invoice(invoice.id)
                .with_ledger_entry(entry.id),
            );
            created.push(application);
        }

        let new_balance = balance - total_applied;
        Ok(CreditApplicationOutcome {
            applications: created,
            total_applied,
            entry_updates,
            invoice: InvoiceCreditUpdate {
                invoice_id: invoice.id,
                ledger_credit_applied: invoice.ledger_credit_applied + total_applied,
                balance: new_balance,
                status: invoice.settlement_status(new_balance, today),
            },
            postings,
        })
    }

    /// Decouples an application, restoring the entry's credit and the
    /// invoice's balance.
    ///
    /// # Errors
    ///
    /// Returns `ReasonRequired`, `AlreadyDecoupled`, `InvoiceAlreadyPaid`
    /// when the policy forbids it, and `InconsistentInvoiceAccounting` when
    /// the invoice's recorded credit or payments do not allow it.
    #[allow(clippy::too_many_arguments)]
    pub fn decouple(
        application: &LedgerApplication,
        entry: &LedgerEntry,
        invoice: &Invoice,
        applications: &[LedgerApplication],
        reason: &str,
        policy: DecouplePolicy,
        decoupled_by: UserId,
        decoupled_at: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<DecoupleOutcome, LedgerError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::ReasonRequired);
        }
        if !application.is_active() {
            return Err(LedgerError::AlreadyDecoupled(application.id));
        }
        if application.entry_id != entry.id || application.invoice_id != invoice.id {
            return Err(LedgerError::InvariantViolation(format!(
                "application {} does not link entry {} and invoice {}",
                application.id, entry.id, invoice.id
            )));
        }
        ensure_owner(entry.student_id, invoice.student_id)?;
        if invoice.status == InvoiceStatus::Paid && !policy.allow_paid_invoices {
            return Err(LedgerError::InvoiceAlreadyPaid(invoice.id));
        }

        let amount = application.amount;
        if invoice.ledger_credit_applied < amount {
            return Err(LedgerError::InconsistentInvoiceAccounting {
                invoice_id: invoice.id,
                detail: format!(
                    "ledger credit {} is less than application {amount}",
                    invoice.ledger_credit_applied
                ),
            });
        }
        if invoice.amount_paid > invoice.totals.total {
            return Err(LedgerError::InconsistentInvoiceAccounting {
                invoice_id: invoice.id,
                detail: format!(
                    "payments {} exceed total {}",
                    invoice.amount_paid, invoice.totals.total
                ),
            });
        }

        let applied = applied_total(applications, entry.id) - amount;
        let entry_update = EntryUpdate {
            entry_id: entry.id,
            applied,
            status: entry.status_for(applied)?,
        };

        let ledger_credit_applied = invoice.ledger_credit_applied - amount;
        let balance = invoice.balance() + amount;
        let status = if invoice.status == InvoiceStatus::Cancelled {
            InvoiceStatus::Cancelled
        } else {
            invoice.settlement_status(balance, today)
        };

        let decoupling = Decoupling {
            id: DecouplingId::new(),
            application_id: application.id,
            entry_id: entry.id,
            invoice_id: invoice.id,
            amount,
            reason: reason.to_string(),
            decoupled_by,
            decoupled_at,
        };
        let posting = PostingLine::debit(
            TransactionType::CreditDecoupled,
            amount,
            format!("Credit {} decoupled from invoice {}: {reason}", entry.reference, invoice.number),
            entry.reference.to_string(),
        )
        .with_invoice(invoice.id)
        .with_ledger_entry(entry.id);

        Ok(DecoupleOutcome {
            decoupling,
            entry: entry_update,
            invoice: InvoiceCreditUpdate {
                invoice_id: invoice.id,
                ledger_credit_applied,
                balance,
                status,
            },
            posting,
        })
    }

    /// Reverses an entry without active applications.
    ///
    /// # Errors
    ///
    /// Returns `ReasonRequired`, `AlreadyReversed` or
    /// `EntryHasActiveApplications`.
    pub fn reverse_entry(
        entry: &LedgerEntry,
        applications: &[LedgerApplication],
        reason: &str,
        reversed_by: UserId,
        reversed_at: DateTime<Utc>,
    ) -> Result<ReversalOutcome, LedgerError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::ReasonRequired);
        }
        if entry.is_reversed() {
            return Err(LedgerError::AlreadyReversed(entry.id));
        }
        let active = applications
            .iter()
            .filter(|a| a.entry_id == entry.id && a.is_active())
            .count();
        if active > 0 {
            return Err(LedgerError::EntryHasActiveApplications {
                entry_id: entry.id,
                active,
            });
        }

        let posting = (entry.entry_type == EntryType::Debit).then(|| {
            PostingLine::credit(
                TransactionType::CorrectionReversed,
                entry.amount,
                format!("Reversal of {}: {reason}", entry.reference),
                entry.reference.to_string(),
            )
            .with_ledger_entry(entry.id)
        });

        Ok(ReversalOutcome {
            entry_id: entry.id,
            reversal: EntryReversal {
                reason: reason.to_string(),
                reversed_by,
                reversed_at,
            },
            posting,
        })
    }
}

/// Open and partially applied credit entries with their available credit.
///
/// # Errors
///
/// Returns `InvariantViolation` if an entry is over-applied.
pub fn credit_sources(
    entries: &[LedgerEntry],
    applications: &[LedgerApplication],
) -> Result<Vec<CreditSource>, LedgerError> {
    entries
        .iter()
        .filter(|e| e.is_credit() && e.status.has_remaining_credit())
        .map(|entry| {
            Ok(CreditSource {
                entry_id: entry.id,
                reference: entry.reference,
                created_at: entry.created_at,
                available: entry.available_credit(applications)?,
            })
        })
        .collect()
}

fn ensure_owner(expected: StudentId, found: StudentId) -> Result<(), LedgerError> {
    if expected == found {
        Ok(())
    } else {
        Err(LedgerError::OwnershipMismatch { expected, found })
    }
}

fn find_entry(entries: &[LedgerEntry], id: LedgerEntryId) -> Result<&LedgerEntry, LedgerError> {
    entries
        .iter()
        .find(|e| e.id == id)
        .ok_or(LedgerError::EntryNotFound(id))
}
