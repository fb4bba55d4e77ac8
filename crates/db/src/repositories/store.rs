//! Steps shared by every ledger mutation inside one database transaction.
//!
//! Locks are always taken in the same order: the student's balance row,
//! then invoice rows, then ledger entry rows. Rows are written back with
//! version-checked updates so a lost lock or a foreign writer shows up as
//! `StaleVersion` instead of a silent overwrite.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Statement,
};
use tracing::debug;
use uuid::Uuid;

use cadence_core::invoice::{Invoice, InvoiceNumber, InvoiceSeries, Payment};
use cadence_core::ledger::{
    ApplicationStatus, CorrectionReference, CreditApplicationOutcome, Decoupling, EntryReversal,
    EntryStatus, EntryType, LedgerApplication, LedgerEntry, LedgerError, LedgerService,
    PostingLine, StudentTransaction, available_credit,
};
use cadence_shared::types::{InvoiceId, LedgerApplicationId, LedgerEntryId, StudentId, UserId};

use crate::entities::{
    invoice_lines, invoices, ledger_applications, ledger_entries, student_balances,
    student_transactions,
};
use crate::error::RepositoryError;
use crate::mapping::{
    application_active_model, application_from_model, decoupling_active_model, entry_active_model,
    entry_from_model, invoice_active_model, invoice_from_models, line_active_models,
    payment_active_model, stored_at, transaction_active_model, transaction_from_model,
};

/// A row together with the version it was read at.
#[derive(Debug, Clone)]
pub(crate) struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

/// A student whose balance row is locked for the rest of the transaction,
/// collecting the lines posted by the operation.
#[derive(Debug)]
pub(crate) struct LockedStudent {
    student_id: StudentId,
    row: student_balances::Model,
    latest: Option<StudentTransaction>,
    posted: Vec<StudentTransaction>,
    now: DateTime<Utc>,
}

impl LockedStudent {
    /// Locks the balance row, creating it on first use.
    pub(crate) async fn lock(
        txn: &DatabaseTransaction,
        student_id: StudentId,
    ) -> Result<Self, RepositoryError> {
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "INSERT INTO student_balances (student_id) VALUES ($1) ON CONFLICT (student_id) DO NOTHING",
            [student_id.into_inner().into()],
        ))
        .await?;

        let row = student_balances::Entity::find_by_id(student_id.into_inner())
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| {
                RepositoryError::corrupt("student_balances", student_id.into_inner(), "row vanished")
            })?;

        let latest = student_transactions::Entity::find()
            .filter(student_transactions::Column::StudentId.eq(student_id.into_inner()))
            .order_by_desc(student_transactions::Column::Sequence)
            .one(txn)
            .await?
            .map(transaction_from_model)
            .transpose()?;

        // audit order sorts by creation time, so it must never run backwards
        let now = latest
            .as_ref()
            .map_or_else(Utc::now, |tx| Utc::now().max(tx.created_at));

        debug!(
            student_id = %student_id,
            version = row.version,
            balance = %row.balance,
            "locked student balance"
        );
        Ok(Self {
            student_id,
            row,
            latest,
            posted: Vec::new(),
            now,
        })
    }

    pub(crate) fn student_id(&self) -> StudentId {
        self.student_id
    }

    /// Timestamp of the operation, not earlier than the latest transaction.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Chains lines onto the student's log; nothing is written yet.
    pub(crate) fn post(
        &mut self,
        lines: impl IntoIterator<Item = PostingLine>,
        date: NaiveDate,
        actor: UserId,
    ) -> Result<(), LedgerError> {
        for line in lines {
            let previous = self.posted.last().or(self.latest.as_ref());
            let tx = StudentTransaction::post(previous, self.student_id, line, date, actor, self.now)?;
            self.posted.push(tx);
        }
        Ok(())
    }

    /// Inserts the posted lines and moves the balance row forward.
    pub(crate) async fn save(
        self,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<StudentTransaction>, RepositoryError> {
        let Some(last) = self.posted.last() else {
            return Ok(self.posted);
        };
        let closing = last.running_balance;

        let mut sequence = self.row.last_sequence;
        for tx in &self.posted {
            sequence += 1;
            transaction_active_model(tx, sequence).insert(txn).await?;
        }

        let result = student_balances::Entity::update_many()
            .col_expr(student_balances::Column::Balance, Expr::value(closing))
            .col_expr(student_balances::Column::LastSequence, Expr::value(sequence))
            .col_expr(
                student_balances::Column::Version,
                Expr::col(student_balances::Column::Version).add(1),
            )
            .col_expr(student_balances::Column::UpdatedAt, Expr::value(stored_at(self.now)))
            .filter(student_balances::Column::StudentId.eq(self.student_id.into_inner()))
            .filter(student_balances::Column::Version.eq(self.row.version))
            .exec(txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::StaleVersion {
                table: "student_balances",
                id: self.student_id.into_inner(),
            });
        }

        debug!(
            student_id = %self.student_id,
            lines = self.posted.len(),
            balance = %closing,
            "posted student transactions"
        );
        Ok(self.posted)
    }
}

// ========== Counters ==========

/// Bumps a counter row and returns the new value; `None` when the update
/// was refused by the statement's guard.
async fn bump_counter(
    txn: &DatabaseTransaction,
    sql: &str,
    values: Vec<sea_orm::Value>,
) -> Result<Option<u32>, RepositoryError> {
    let Some(row) = txn
        .query_one(Statement::from_sql_and_values(DbBackend::Postgres, sql, values))
        .await?
    else {
        return Ok(None);
    };
    let value: i32 = row.try_get("", "last_value")?;
    u32::try_from(value).map(Some).map_err(|_| {
        LedgerError::InvariantViolation(format!("counter at {value}")).into()
    })
}

/// Next correction reference of `year`. The counter row stays locked until
/// commit, and a rollback returns the number, so references have no gaps.
pub(crate) async fn next_reference(
    txn: &DatabaseTransaction,
    year: i32,
) -> Result<CorrectionReference, RepositoryError> {
    let sequence = bump_counter(
        txn,
        "INSERT INTO correction_sequences (year, last_value) VALUES ($1, 1) \
         ON CONFLICT (year) DO UPDATE SET last_value = correction_sequences.last_value + 1 \
         WHERE correction_sequences.last_value < 9999 \
         RETURNING last_value",
        vec![year.into()],
    )
    .await?
    .ok_or(LedgerError::ReferenceSequenceExhausted(year))?;
    let reference = CorrectionReference::new(year, sequence)?;
    debug!(%reference, "allocated correction reference");
    Ok(reference)
}

/// Next invoice number of `series` in `year`.
pub(crate) async fn next_invoice_number(
    txn: &DatabaseTransaction,
    series: InvoiceSeries,
    year: i32,
) -> Result<InvoiceNumber, RepositoryError> {
    let sequence = bump_counter(
        txn,
        "INSERT INTO invoice_sequences (series, year, last_value) VALUES ($1, $2, 1) \
         ON CONFLICT (series, year) DO UPDATE SET last_value = invoice_sequences.last_value + 1 \
         RETURNING last_value",
        vec![series.as_str().into(), year.into()],
    )
    .await?
    .ok_or_else(|| LedgerError::InvariantViolation(format!("no {} counter for {year}", series.as_str())))?;
    let number = InvoiceNumber::new(series, year, sequence)?;
    debug!(%number, "allocated invoice number");
    Ok(number)
}

// ========== Invoices ==========

async fn lines_of(
    txn: &DatabaseTransaction,
    invoice_id: Uuid,
) -> Result<Vec<invoice_lines::Model>, RepositoryError> {
    Ok(invoice_lines::Entity::find()
        .filter(invoice_lines::Column::InvoiceId.eq(invoice_id))
        .order_by_asc(invoice_lines::Column::Position)
        .all(txn)
        .await?)
}

/// Student owning an invoice, read without locking to find the lock order.
pub(crate) async fn invoice_owner(
    txn: &DatabaseTransaction,
    invoice_id: InvoiceId,
) -> Result<StudentId, RepositoryError> {
    invoices::Entity::find_by_id(invoice_id.into_inner())
        .one(txn)
        .await?
        .map(|row| StudentId::from_uuid(row.student_id))
        .ok_or_else(|| LedgerError::InvoiceNotFound(invoice_id).into())
}

/// Locks an invoice row and reads it with its lines.
pub(crate) async fn lock_invoice(
    txn: &DatabaseTransaction,
    invoice_id: InvoiceId,
) -> Result<Versioned<Invoice>, RepositoryError> {
    let row = invoices::Entity::find_by_id(invoice_id.into_inner())
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or(LedgerError::InvoiceNotFound(invoice_id))?;
    let version = row.version;
    let lines = lines_of(txn, row.id).await?;
    debug!(invoice_id = %invoice_id, version, "locked invoice");
    Ok(Versioned {
        value: invoice_from_models(row, lines)?,
        version,
    })
}

/// Inserts a new invoice with its lines.
pub(crate) async fn insert_invoice(
    txn: &DatabaseTransaction,
    invoice: &Invoice,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    invoice_active_model(invoice, now)
        .insert(txn)
        .await?;
    let lines = line_active_models(invoice);
    if !lines.is_empty() {
        invoice_lines::Entity::insert_many(lines).exec(txn).await?;
    }
    Ok(())
}

/// Writes the settlement state of an invoice (status, paid, applied
/// credit), checking the version it was read at. Returns the new version.
pub(crate) async fn update_invoice_state(
    txn: &DatabaseTransaction,
    invoice: &Invoice,
    version: i64,
    now: DateTime<Utc>,
) -> Result<i64, RepositoryError> {
    let result = invoices::Entity::update_many()
        .col_expr(invoices::Column::Status, Expr::value(invoice.status.as_str()))
        .col_expr(invoices::Column::AmountPaid, Expr::value(invoice.amount_paid))
        .col_expr(
            invoices::Column::LedgerCreditApplied,
            Expr::value(invoice.ledger_credit_applied),
        )
        .col_expr(invoices::Column::Version, Expr::col(invoices::Column::Version).add(1))
        .col_expr(invoices::Column::UpdatedAt, Expr::value(stored_at(now)))
        .filter(invoices::Column::Id.eq(invoice.id.into_inner()))
        .filter(invoices::Column::Version.eq(version))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(RepositoryError::StaleVersion {
            table: "invoices",
            id: invoice.id.into_inner(),
        });
    }
    Ok(version + 1)
}

/// Replaces the lines and totals of a draft, checking its version.
pub(crate) async fn update_invoice_lines(
    txn: &DatabaseTransaction,
    invoice: &Invoice,
    version: i64,
    now: DateTime<Utc>,
) -> Result<i64, RepositoryError> {
    let result = invoices::Entity::update_many()
        .col_expr(invoices::Column::Subtotal, Expr::value(invoice.totals.subtotal))
        .col_expr(invoices::Column::VatAmount, Expr::value(invoice.totals.vat_amount))
        .col_expr(
            invoices::Column::DiscountAmount,
            Expr::value(invoice.totals.discount_amount),
        )
        .col_expr(invoices::Column::Total, Expr::value(invoice.totals.total))
        .col_expr(invoices::Column::Version, Expr::col(invoices::Column::Version).add(1))
        .col_expr(invoices::Column::UpdatedAt, Expr::value(stored_at(now)))
        .filter(invoices::Column::Id.eq(invoice.id.into_inner()))
        .filter(invoices::Column::Version.eq(version))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(RepositoryError::StaleVersion {
            table: "invoices",
            id: invoice.id.into_inner(),
        });
    }

    invoice_lines::Entity::delete_many()
        .filter(invoice_lines::Column::InvoiceId.eq(invoice.id.into_inner()))
        .exec(txn)
        .await?;
    let lines = line_active_models(invoice);
    if !lines.is_empty() {
        invoice_lines::Entity::insert_many(lines).exec(txn).await?;
    }
    Ok(version + 1)
}

// ========== Ledger entries ==========

/// Student owning an entry, read without locking to find the lock order.
pub(crate) async fn entry_owner(
    txn: &DatabaseTransaction,
    entry_id: LedgerEntryId,
) -> Result<StudentId, RepositoryError> {
    ledger_entries::Entity::find_by_id(entry_id.into_inner())
        .one(txn)
        .await?
        .map(|row| StudentId::from_uuid(row.student_id))
        .ok_or_else(|| LedgerError::EntryNotFound(entry_id).into())
}

/// Locks one entry.
pub(crate) async fn lock_entry(
    txn: &DatabaseTransaction,
    entry_id: LedgerEntryId,
) -> Result<Versioned<LedgerEntry>, RepositoryError> {
    let row = ledger_entries::Entity::find_by_id(entry_id.into_inner())
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or(LedgerError::EntryNotFound(entry_id))?;
    let version = row.version;
    Ok(Versioned {
        value: entry_from_model(row)?,
        version,
    })
}

/// Locks the student's credit entries that still hold credit, oldest first.
pub(crate) async fn lock_open_credit(
    txn: &DatabaseTransaction,
    student_id: StudentId,
) -> Result<Vec<Versioned<LedgerEntry>>, RepositoryError> {
    let rows = ledger_entries::Entity::find()
        .filter(ledger_entries::Column::StudentId.eq(student_id.into_inner()))
        .filter(ledger_entries::Column::EntryType.eq(EntryType::Credit.as_str()))
        .filter(ledger_entries::Column::Status.is_in([
            EntryStatus::Open.as_str(),
            EntryStatus::PartiallyApplied.as_str(),
        ]))
        .order_by_asc(ledger_entries::Column::CreatedAt)
        .order_by_asc(ledger_entries::Column::Reference)
        .lock_exclusive()
        .all(txn)
        .await?;
    debug!(student_id = %student_id, entries = rows.len(), "locked open credit");
    rows.into_iter()
        .map(|row| {
            let version = row.version;
            Ok(Versioned {
                value: entry_from_model(row)?,
                version,
            })
        })
        .collect()
}

/// Inserts a new entry.
pub(crate) async fn insert_entry(
    txn: &DatabaseTransaction,
    entry: &LedgerEntry,
) -> Result<(), RepositoryError> {
    entry_active_model(entry).insert(txn).await?;
    Ok(())
}

/// Writes an entry's applied sum and status, checking its version.
pub(crate) async fn update_entry_applied(
    txn: &DatabaseTransaction,
    entry_id: LedgerEntryId,
    version: i64,
    applied: Decimal,
    status: EntryStatus,
) -> Result<(), RepositoryError> {
    let result = ledger_entries::Entity::update_many()
        .col_expr(ledger_entries::Column::AppliedAmount, Expr::value(applied))
        .col_expr(ledger_entries::Column::Status, Expr::value(status.as_str()))
        .col_expr(
            ledger_entries::Column::Version,
            Expr::col(ledger_entries::Column::Version).add(1),
        )
        .filter(ledger_entries::Column::Id.eq(entry_id.into_inner()))
        .filter(ledger_entries::Column::Version.eq(version))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(RepositoryError::StaleVersion {
            table: "ledger_entries",
            id: entry_id.into_inner(),
        });
    }
    Ok(())
}

// ========== Applications ==========

/// All applications (active and decoupled) of the given entries.
pub(crate) async fn applications_of(
    txn: &DatabaseTransaction,
    entry_ids: impl IntoIterator<Item = LedgerEntryId>,
) -> Result<Vec<LedgerApplication>, RepositoryError> {
    let ids: Vec<Uuid> = entry_ids.into_iter().map(LedgerEntryId::into_inner).collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    ledger_applications::Entity::find()
        .filter(ledger_applications::Column::LedgerEntryId.is_in(ids))
        .order_by_asc(ledger_applications::Column::AppliedAt)
        .all(txn)
        .await?
        .into_iter()
        .map(application_from_model)
        .collect()
}

/// Inserts new applications.
pub(crate) async fn insert_applications(
    txn: &DatabaseTransaction,
    applications: &[LedgerApplication],
) -> Result<(), RepositoryError> {
    if applications.is_empty() {
        return Ok(());
    }
    ledger_applications::Entity::insert_many(applications.iter().map(application_active_model))
        .exec(txn)
        .await?;
    Ok(())
}

/// Marks an active application as decoupled and records the decoupling.
pub(crate) async fn decouple_application(
    txn: &DatabaseTransaction,
    decoupling: &Decoupling,
) -> Result<(), RepositoryError> {
    let result = ledger_applications::Entity::update_many()
        .col_expr(
            ledger_applications::Column::Status,
            Expr::value(ApplicationStatus::Decoupled.as_str()),
        )
        .filter(ledger_applications::Column::Id.eq(decoupling.application_id.into_inner()))
        .filter(ledger_applications::Column::Status.eq(ApplicationStatus::Active.as_str()))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(RepositoryError::StaleVersion {
            table: "ledger_applications",
            id: decoupling.application_id.into_inner(),
        });
    }
    decoupling_active_model(decoupling).insert(txn).await?;
    Ok(())
}

/// Reads one application.
pub(crate) async fn find_application(
    txn: &DatabaseTransaction,
    application_id: LedgerApplicationId,
) -> Result<LedgerApplication, RepositoryError> {
    let row = ledger_applications::Entity::find_by_id(application_id.into_inner())
        .one(txn)
        .await?
        .ok_or(LedgerError::ApplicationNotFound(application_id))?;
    application_from_model(row)
}

/// Writes the reversal of an entry, checking its version.
pub(crate) async fn reverse_entry_row(
    txn: &DatabaseTransaction,
    entry_id: LedgerEntryId,
    version: i64,
    reversal: &EntryReversal,
) -> Result<(), RepositoryError> {
    let result = ledger_entries::Entity::update_many()
        .col_expr(
            ledger_entries::Column::Status,
            Expr::value(EntryStatus::Reversed.as_str()),
        )
        .col_expr(
            ledger_entries::Column::ReversedBy,
            Expr::value(reversal.reversed_by.into_inner()),
        )
        .col_expr(
            ledger_entries::Column::ReversedAt,
            Expr::value(stored_at(reversal.reversed_at)),
        )
        .col_expr(
            ledger_entries::Column::ReversalReason,
            Expr::value(reversal.reason.clone()),
        )
        .col_expr(
            ledger_entries::Column::Version,
            Expr::col(ledger_entries::Column::Version).add(1),
        )
        .filter(ledger_entries::Column::Id.eq(entry_id.into_inner()))
        .filter(ledger_entries::Column::Version.eq(version))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(RepositoryError::StaleVersion {
            table: "ledger_entries",
            id: entry_id.into_inner(),
        });
    }
    Ok(())
}

// ========== Payments ==========

/// Inserts a payment.
pub(crate) async fn insert_payment(
    txn: &DatabaseTransaction,
    payment: &Payment,
) -> Result<(), RepositoryError> {
    payment_active_model(payment).insert(txn).await?;
    Ok(())
}

// ========== Credit ==========

/// The student's locked open credit with the applications it carries.
#[derive(Debug)]
pub(crate) struct CreditPool {
    entries: Vec<Versioned<LedgerEntry>>,
    applications: Vec<LedgerApplication>,
}

impl CreditPool {
    /// Locks the pool. The student and invoice rows must already be locked.
    pub(crate) async fn lock(
        txn: &DatabaseTransaction,
        student_id: StudentId,
    ) -> Result<Self, RepositoryError> {
        let entries = lock_open_credit(txn, student_id).await?;
        let applications = applications_of(txn, entries.iter().map(|e| e.value.id)).await?;
        Ok(Self {
            entries,
            applications,
        })
    }

    fn plain_entries(&self) -> Vec<LedgerEntry> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    /// Unapplied credit in the pool.
    pub(crate) fn available(&self) -> Result<Decimal, LedgerError> {
        available_credit(&self.plain_entries(), &self.applications)
    }

    /// Applies credit to `invoice` oldest first, posts the lines and writes
    /// the entries and applications. The invoice row itself is left to the
    /// caller.
    pub(crate) async fn apply(
        &self,
        txn: &DatabaseTransaction,
        student: &mut LockedStudent,
        invoice: &Invoice,
        requested: Option<Decimal>,
        actor: UserId,
        today: NaiveDate,
    ) -> Result<CreditApplicationOutcome, RepositoryError> {
        let outcome = LedgerService::apply_credit(
            student.student_id(),
            invoice,
            &self.plain_entries(),
            &self.applications,
            requested,
            actor,
            student.now(),
            today,
        )?;
        student.post(outcome.postings.iter().cloned(), today, actor)?;

        for update in &outcome.entry_updates {
            let version = self
                .entries
                .iter()
                .find(|e| e.value.id == update.entry_id)
                .map(|e| e.version)
                .ok_or(LedgerError::EntryNotFound(update.entry_id))?;
            update_entry_applied(txn, update.entry_id, version, update.applied, update.status)
                .await?;
        }
        insert_applications(txn, &outcome.applications).await?;
        Ok(outcome)
    }
}
