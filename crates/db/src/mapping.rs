//! Conversions between stored rows and core domain types.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::ActiveValue::Set;
use uuid::Uuid;

use cadence_core::invoice::{
    Invoice, InvoiceKind, InvoiceLine, InvoiceNumber, InvoiceSeries, InvoiceStatus, InvoiceTotals,
    Payment, PaymentMethod,
};
use cadence_core::ledger::{
    ApplicationStatus, CorrectionReference, Decoupling, EntryReversal, EntryStatus, EntryType,
    LedgerApplication, LedgerEntry, StudentTransaction, TransactionType,
};
use cadence_shared::types::{
    CourseId, Currency, EnrollmentId, InvoiceId, LedgerApplicationId, LedgerEntryId, LessonId,
    PaymentId, StudentId, StudentTransactionId, UserId,
};

use crate::entities::{
    decouplings, invoice_lines, invoices, ledger_applications, ledger_entries, payments,
    student_transactions,
};
use crate::error::RepositoryError;

const ENTRY_TYPES: [EntryType; 2] = [EntryType::Credit, EntryType::Debit];
const ENTRY_STATUSES: [EntryStatus; 4] = [
    EntryStatus::Open,
    EntryStatus::PartiallyApplied,
    EntryStatus::FullyApplied,
    EntryStatus::Reversed,
];
const APPLICATION_STATUSES: [ApplicationStatus; 2] =
    [ApplicationStatus::Active, ApplicationStatus::Decoupled];
const INVOICE_STATUSES: [InvoiceStatus; 5] = [
    InvoiceStatus::Draft,
    InvoiceStatus::Sent,
    InvoiceStatus::Paid,
    InvoiceStatus::Overdue,
    InvoiceStatus::Cancelled,
];
const PAYMENT_METHODS: [PaymentMethod; 4] = [
    PaymentMethod::BankTransfer,
    PaymentMethod::DirectDebit,
    PaymentMethod::Card,
    PaymentMethod::Cash,
];
const TRANSACTION_TYPES: [TransactionType; 7] = [
    TransactionType::InvoiceCharge,
    TransactionType::Payment,
    TransactionType::CreditInvoice,
    TransactionType::DebitCorrection,
    TransactionType::CreditApplied,
    TransactionType::CreditDecoupled,
    TransactionType::CorrectionReversed,
];

/// Finds the variant whose storage name is `value`.
fn stored<T: Copy>(
    table: &'static str,
    id: Uuid,
    value: &str,
    variants: &[T],
    name: impl Fn(&T) -> &'static str,
) -> Result<T, RepositoryError> {
    variants
        .iter()
        .copied()
        .find(|variant| name(variant) == value)
        .ok_or_else(|| RepositoryError::corrupt(table, id, format!("unknown value {value:?}")))
}

/// Converts a stored timestamp to UTC.
pub(crate) fn utc(at: DateTime<FixedOffset>) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

/// Converts a UTC timestamp for storage.
pub(crate) fn stored_at(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.fixed_offset()
}

// ========== Ledger entries ==========

/// Reads a ledger entry row.
pub(crate) fn entry_from_model(model: ledger_entries::Model) -> Result<LedgerEntry, RepositoryError> {
    const TABLE: &str = "ledger_entries";
    let reference = model
        .reference
        .parse::<CorrectionReference>()
        .map_err(|err| RepositoryError::corrupt(TABLE, model.id, err))?;
    let entry_type = stored(TABLE, model.id, &model.entry_type, &ENTRY_TYPES, EntryType::as_str)?;
    let status = stored(TABLE, model.id, &model.status, &ENTRY_STATUSES, EntryStatus::as_str)?;
    let reversal = match (model.reversed_at, model.reversed_by, model.reversal_reason) {
        (Some(at), Some(by), Some(reason)) => Some(EntryReversal {
            reason,
            reversed_by: UserId::from_uuid(by),
            reversed_at: utc(at),
        }),
        (None, None, None) => None,
        _ => return Err(RepositoryError::corrupt(TABLE, model.id, "incomplete reversal audit")),
    };

    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(model.id),
        reference,
        description: model.description,
        student_id: StudentId::from_uuid(model.student_id),
        course_id: model.course_id.map(CourseId::from_uuid),
        amount: model.amount,
        entry_type,
        status,
        created_at: utc(model.created_at),
        created_by: UserId::from_uuid(model.created_by),
        reversal,
    })
}

/// Row for a new ledger entry.
pub(crate) fn entry_active_model(entry: &LedgerEntry) -> ledger_entries::ActiveModel {
    ledger_entries::ActiveModel {
        id: Set(entry.id.into_inner()),
        reference: Set(entry.reference.to_string()),
        description: Set(entry.description.clone()),
        student_id: Set(entry.student_id.into_inner()),
        course_id: Set(entry.course_id.map(CourseId::into_inner)),
        amount: Set(entry.amount),
        entry_type: Set(entry.entry_type.as_str().to_string()),
        status: Set(entry.status.as_str().to_string()),
        applied_amount: Set(rust_decimal::Decimal::ZERO),
        version: Set(0),
        created_by: Set(entry.created_by.into_inner()),
        created_at: Set(stored_at(entry.created_at)),
        reversed_by: Set(None),
        reversed_at: Set(None),
        reversal_reason: Set(None),
    }
}

// ========== Applications ==========

/// Reads an application row.
pub(crate) fn application_from_model(
    model: ledger_applications::Model,
) -> Result<LedgerApplication, RepositoryError> {
    let status = stored(
        "ledger_applications",
        model.id,
        &model.status,
        &APPLICATION_STATUSES,
        ApplicationStatus::as_str,
    )?;
    Ok(LedgerApplication {
        id: LedgerApplicationId::from_uuid(model.id),
        entry_id: LedgerEntryId::from_uuid(model.ledger_entry_id),
        invoice_id: InvoiceId::from_uuid(model.invoice_id),
        amount: model.amount,
        applied_at: utc(model.applied_at),
        applied_by: UserId::from_uuid(model.applied_by),
        status,
    })
}

/// Row for a new application.
pub(crate) fn application_active_model(
    application: &LedgerApplication,
) -> ledger_applications::ActiveModel {
    ledger_applications::ActiveModel {
        id: Set(application.id.into_inner()),
        ledger_entry_id: Set(application.entry_id.into_inner()),
        invoice_id: Set(application.invoice_id.into_inner()),
        amount: Set(application.amount),
        status: Set(application.status.as_str().to_string()),
        applied_by: Set(application.applied_by.into_inner()),
        applied_at: Set(stored_at(application.applied_at)),
    }
}

/// Row for a decoupling audit record.
pub(crate) fn decoupling_active_model(decoupling: &Decoupling) -> decouplings::ActiveModel {
    decouplings::ActiveModel {
        id: Set(decoupling.id.into_inner()),
        application_id: Set(decoupling.application_id.into_inner()),
        ledger_entry_id: Set(decoupling.entry_id.into_inner()),
        invoice_id: Set(decoupling.invoice_id.into_inner()),
        amount: Set(decoupling.amount),
        reason: Set(decoupling.reason.clone()),
        decoupled_by: Set(decoupling.decoupled_by.into_inner()),
        decoupled_at: Set(stored_at(decoupling.decoupled_at)),
    }
}

// ========== Invoices ==========

/// Reads an invoice row with its lines (ordered by position).
pub(crate) fn invoice_from_models(
    model: invoices::Model,
    lines: Vec<invoice_lines::Model>,
) -> Result<Invoice, RepositoryError> {
    const TABLE: &str = "invoices";
    let number = model
        .number
        .parse::<InvoiceNumber>()
        .map_err(|err| RepositoryError::corrupt(TABLE, model.id, err))?;
    if number.series().as_str() != model.series {
        return Err(RepositoryError::corrupt(
            TABLE,
            model.id,
            format!("number {number} is not in series {}", model.series),
        ));
    }
    let kind = match (number.series(), model.original_invoice_id) {
        (InvoiceSeries::Standard, None) => InvoiceKind::Standard,
        (InvoiceSeries::Credit, Some(original)) => InvoiceKind::Credit {
            original_invoice_id: InvoiceId::from_uuid(original),
        },
        _ => return Err(RepositoryError::corrupt(TABLE, model.id, "series and original disagree")),
    };
    let currency = model
        .currency
        .parse::<Currency>()
        .map_err(|err| RepositoryError::corrupt(TABLE, model.id, err))?;
    let status = stored(TABLE, model.id, &model.status, &INVOICE_STATUSES, InvoiceStatus::as_str)?;

    Ok(Invoice {
        id: InvoiceId::from_uuid(model.id),
        number,
        kind,
        student_id: StudentId::from_uuid(model.student_id),
        enrollment_id: model.enrollment_id.map(EnrollmentId::from_uuid),
        issue_date: model.issue_date,
        due_date: model.due_date,
        currency,
        lines: lines
            .into_iter()
            .map(|line| InvoiceLine {
                description: line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                vat_rate: line.vat_rate,
                lesson_id: line.lesson_id.map(LessonId::from_uuid),
            })
            .collect(),
        totals: InvoiceTotals {
            subtotal: model.subtotal,
            vat_amount: model.vat_amount,
            discount_amount: model.discount_amount,
            total: model.total,
        },
        amount_paid: model.amount_paid,
        ledger_credit_applied: model.ledger_credit_applied,
        status,
    })
}

/// Row for a new invoice.
pub(crate) fn invoice_active_model(invoice: &Invoice, now: DateTime<Utc>) -> invoices::ActiveModel {
    let original_invoice_id = match invoice.kind {
        InvoiceKind::Standard => None,
        InvoiceKind::Credit { original_invoice_id } => Some(original_invoice_id.into_inner()),
    };
    invoices::ActiveModel {
        id: Set(invoice.id.into_inner()),
        number: Set(invoice.number.to_string()),
        series: Set(invoice.number.series().as_str().to_string()),
        original_invoice_id: Set(original_invoice_id),
        student_id: Set(invoice.student_id.into_inner()),
        enrollment_id: Set(invoice.enrollment_id.map(EnrollmentId::into_inner)),
        issue_date: Set(invoice.issue_date),
        due_date: Set(invoice.due_date),
        currency: Set(invoice.currency.to_string()),
        subtotal: Set(invoice.totals.subtotal),
        vat_amount: Set(invoice.totals.vat_amount),
        discount_amount: Set(invoice.totals.discount_amount),
        total: Set(invoice.totals.total),
        amount_paid: Set(invoice.amount_paid),
        ledger_credit_applied: Set(invoice.ledger_credit_applied),
        status: Set(invoice.status.as_str().to_string()),
        version: Set(0),
        created_at: Set(stored_at(now)),
        updated_at: Set(stored_at(now)),
    }
}

/// Rows for the lines of an invoice.
pub(crate) fn line_active_models(invoice: &Invoice) -> Vec<invoice_lines::ActiveModel> {
    invoice
        .lines
        .iter()
        .zip(1..)
        .map(|(line, position)| invoice_lines::ActiveModel {
            id: Set(Uuid::now_v7()),
            invoice_id: Set(invoice.id.into_inner()),
            position: Set(position),
            description: Set(line.description.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            vat_rate: Set(line.vat_rate),
            lesson_id: Set(line.lesson_id.map(LessonId::into_inner)),
        })
        .collect()
}

// ========== Payments ==========

/// Reads a payment row.
pub(crate) fn payment_from_model(model: payments::Model) -> Result<Payment, RepositoryError> {
    let method = stored("payments", model.id, &model.method, &PAYMENT_METHODS, PaymentMethod::as_str)?;
    Ok(Payment {
        id: PaymentId::from_uuid(model.id),
        invoice_id: InvoiceId::from_uuid(model.invoice_id),
        student_id: StudentId::from_uuid(model.student_id),
        amount: model.amount,
        payment_date: model.payment_date,
        method,
        external_reference: model.external_reference,
        recorded_by: UserId::from_uuid(model.recorded_by),
        recorded_at: utc(model.recorded_at),
    })
}

/// Row for a new payment.
pub(crate) fn payment_active_model(payment: &Payment) -> payments::ActiveModel {
    payments::ActiveModel {
        id: Set(payment.id.into_inner()),
        invoice_id: Set(payment.invoice_id.into_inner()),
        student_id: Set(payment.student_id.into_inner()),
        amount: Set(payment.amount),
        payment_date: Set(payment.payment_date),
        method: Set(payment.method.as_str().to_string()),
        external_reference: Set(payment.external_reference.clone()),
        recorded_by: Set(payment.recorded_by.into_inner()),
        recorded_at: Set(stored_at(payment.recorded_at)),
    }
}

// ========== Transactions ==========

/// Reads a transaction row.
pub(crate) fn transaction_from_model(
    model: student_transactions::Model,
) -> Result<StudentTransaction, RepositoryError> {
    let transaction_type = stored(
        "student_transactions",
        model.id,
        &model.transaction_type,
        &TRANSACTION_TYPES,
        TransactionType::as_str,
    )?;
    Ok(StudentTransaction {
        id: StudentTransactionId::from_uuid(model.id),
        student_id: StudentId::from_uuid(model.student_id),
        transaction_date: model.transaction_date,
        transaction_type,
        description: model.description,
        reference_number: model.reference_number,
        debit: model.debit,
        credit: model.credit,
        running_balance: model.running_balance,
        invoice_id: model.invoice_id.map(InvoiceId::from_uuid),
        payment_id: model.payment_id.map(PaymentId::from_uuid),
        ledger_entry_id: model.ledger_entry_id.map(LedgerEntryId::from_uuid),
        created_at: utc(model.created_at),
        created_by: UserId::from_uuid(model.created_by),
    })
}

/// Row for a posted transaction at position `sequence` of the student's log.
pub(crate) fn transaction_active_model(
    transaction: &StudentTransaction,
    sequence: i64,
) -> student_transactions::ActiveModel {
    student_transactions::ActiveModel {
        id: Set(transaction.id.into_inner()),
        student_id: Set(transaction.student_id.into_inner()),
        sequence: Set(sequence),
        transaction_date: Set(transaction.transaction_date),
        transaction_type: Set(transaction.transaction_type.as_str().to_string()),
        description: Set(transaction.description.clone()),
        reference_number: Set(transaction.reference_number.clone()),
        debit: Set(transaction.debit),
        credit: Set(transaction.credit),
        running_balance: Set(transaction.running_balance),
        invoice_id: Set(transaction.invoice_id.map(InvoiceId::into_inner)),
        payment_id: Set(transaction.payment_id.map(PaymentId::into_inner)),
        ledger_entry_id: Set(transaction.ledger_entry_id.map(LedgerEntryId::into_inner)),
        created_by: Set(transaction.created_by.into_inner()),
        created_at: Set(stored_at(transaction.created_at)),
    }
}
