//! Ledger repository: correction entries, credit applications and
//! decouplings.
//!
//! Each mutation runs in one database transaction that locks the student's
//! balance row first, computes the change with `LedgerService`, writes it
//! with version checks and appends the posted transaction lines. Conflicts
//! roll back and are retried as a whole.

use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use tracing::{debug, info};

use cadence_core::ledger::{
    CreditApplicationOutcome, DecoupleOutcome, LedgerApplication, LedgerEntry, LedgerError,
    LedgerService, NewLedgerEntry, ReversalOutcome,
};
use cadence_shared::types::{InvoiceId, LedgerApplicationId, LedgerEntryId, StudentId, UserId};

use crate::entities::{ledger_applications, ledger_entries};
use crate::error::RepositoryError;
use crate::mapping::{application_from_model, entry_from_model};
use crate::retry::with_retry;
use crate::settings::BillingSettings;

use super::store::{
    self, CreditPool, LockedStudent, decouple_application, entry_owner, find_application,
    insert_entry, lock_entry, lock_invoice, next_reference, reverse_entry_row,
    update_entry_applied, update_invoice_state,
};

/// Ledger repository.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    db: DatabaseConnection,
    settings: BillingSettings,
}

impl LedgerRepository {
    /// Creates a new ledger repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection, settings: BillingSettings) -> Self {
        Self { db, settings }
    }

    /// Creates a credit or debit correction with the next reference of the
    /// current year. A debit is charged to the student right away; a credit
    /// only moves the balance once applied.
    ///
    /// # Errors
    ///
    /// Returns a validation error, `ReferenceSequenceExhausted`,
    /// `OutOfOrderTransaction`, or `ConcurrentModification` when retries run
    /// out.
    pub async fn create_entry(&self, input: NewLedgerEntry) -> Result<LedgerEntry, RepositoryError> {
        with_retry(self.settings.retry, "create_entry", move || {
            self.create_entry_once(input.clone())
        })
        .await
    }

    async fn create_entry_once(&self, input: NewLedgerEntry) -> Result<LedgerEntry, RepositoryError> {
        let txn = self.db.begin().await?;
        let mut student = LockedStudent::lock(&txn, input.student_id).await?;
        let now = student.now();
        let actor = input.created_by;

        let reference = next_reference(&txn, self.settings.reference_year(now)).await?;
        let entry = LedgerService::create_entry(input, reference, now)?;
        insert_entry(&txn, &entry).await?;
        student.post(
            LedgerService::creation_posting(&entry),
            self.settings.today(now),
            actor,
        )?;
        student.save(&txn).await?;
        txn.commit().await?;

        info!(
            entry_id = %entry.id,
            reference = %entry.reference,
            entry_type = entry.entry_type.as_str(),
            amount = %entry.amount,
            "ledger entry created"
        );
        Ok(entry)
    }

    /// Applies a student's available credit to one of their invoices,
    /// oldest credit first. Without `requested` the invoice balance is
    /// covered as far as the credit reaches.
    ///
    /// # Errors
    ///
    /// Returns `OwnershipMismatch` when the invoice belongs to another
    /// student, `InvoiceNotFound`, `InvoiceNotOpen`, `InvoiceAlreadySettled`,
    /// `NoCreditAvailable`, `InsufficientCredit`,
    /// `AmountExceedsInvoiceBalance`, or `ConcurrentModification`.
    pub async fn apply_credit(
        &self,
        student_id: StudentId,
        invoice_id: InvoiceId,
        requested: Option<Decimal>,
        applied_by: UserId,
    ) -> Result<CreditApplicationOutcome, RepositoryError> {
        with_retry(self.settings.retry, "apply_credit", move || {
            self.apply_credit_once(student_id, invoice_id, requested, applied_by)
        })
        .await
    }

    async fn apply_credit_once(
        &self,
        student_id: StudentId,
        invoice_id: InvoiceId,
        requested: Option<Decimal>,
        applied_by: UserId,
    ) -> Result<CreditApplicationOutcome, RepositoryError> {
        let txn = self.db.begin().await?;
        let mut student = LockedStudent::lock(&txn, student_id).await?;
        let now = student.now();
        let today = self.settings.today(now);

        let mut invoice = lock_invoice(&txn, invoice_id).await?;
        let pool = CreditPool::lock(&txn, student_id).await?;
        let outcome = pool
            .apply(&txn, &mut student, &invoice.value, requested, applied_by, today)
            .await?;

        invoice.value.ledger_credit_applied = outcome.invoice.ledger_credit_applied;
        invoice.value.status = outcome.invoice.status;
        update_invoice_state(&txn, &invoice.value, invoice.version, now).await?;
        student.save(&txn).await?;
        txn.commit().await?;

        info!(
            invoice_id = %invoice_id,
            applications = outcome.applications.len(),
            total_applied = %outcome.total_applied,
            invoice_balance = %outcome.invoice.balance,
            "credit applied"
        );
        Ok(outcome)
    }

    /// Takes applied credit back off an invoice. The entry regains the
    /// amount and the invoice balance grows by it.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationNotFound`, `AlreadyDecoupled`, `ReasonRequired`,
    /// `InvoiceAlreadyPaid` when the policy forbids decoupling from paid
    /// invoices, `InconsistentInvoiceAccounting`, or
    /// `ConcurrentModification`.
    pub async fn decouple(
        &self,
        application_id: LedgerApplicationId,
        reason: &str,
        decoupled_by: UserId,
    ) -> Result<DecoupleOutcome, RepositoryError> {
        with_retry(self.settings.retry, "decouple", move || {
            self.decouple_once(application_id, reason, decoupled_by)
        })
        .await
    }

    async fn decouple_once(
        &self,
        application_id: LedgerApplicationId,
        reason: &str,
        decoupled_by: UserId,
    ) -> Result<DecoupleOutcome, RepositoryError> {
        let txn = self.db.begin().await?;
        let located = find_application(&txn, application_id).await?;
        let student_id = entry_owner(&txn, located.entry_id).await?;
        let mut student = LockedStudent::lock(&txn, student_id).await?;
        let now = student.now();
        let today = self.settings.today(now);

        let mut invoice = lock_invoice(&txn, located.invoice_id).await?;
        let entry = lock_entry(&txn, located.entry_id).await?;
        // re-read under the entry lock
        let application = find_application(&txn, application_id).await?;
        let applications = store::applications_of(&txn, [entry.value.id]).await?;

        let outcome = LedgerService::decouple(
            &application,
            &entry.value,
            &invoice.value,
            &applications,
            reason,
            self.settings.decouple_policy,
            decoupled_by,
            now,
            today,
        )?;
        student.post([outcome.posting.clone()], today, decoupled_by)?;

        decouple_application(&txn, &outcome.decoupling).await?;
        update_entry_applied(
            &txn,
            entry.value.id,
            entry.version,
            outcome.entry.applied,
            outcome.entry.status,
        )
        .await?;
        invoice.value.ledger_credit_applied = outcome.invoice.ledger_credit_applied;
        invoice.value.status = outcome.invoice.status;
        update_invoice_state(&txn, &invoice.value, invoice.version, now).await?;
        student.save(&txn).await?;
        txn.commit().await?;

        info!(
            application_id = %application_id,
            entry_id = %outcome.decoupling.entry_id,
            invoice_id = %outcome.decoupling.invoice_id,
            amount = %outcome.decoupling.amount,
            "credit decoupled"
        );
        Ok(outcome)
    }

    /// Reverses an entry that has no active applications. Reversing a
    /// debit posts an offsetting credit line.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound`, `AlreadyReversed`,
    /// `EntryHasActiveApplications`, `ReasonRequired`, or
    /// `ConcurrentModification`.
    pub async fn reverse_entry(
        &self,
        entry_id: LedgerEntryId,
        reason: &str,
        reversed_by: UserId,
    ) -> Result<ReversalOutcome, RepositoryError> {
        with_retry(self.settings.retry, "reverse_entry", move || {
            self.reverse_entry_once(entry_id, reason, reversed_by)
        })
        .await
    }

    async fn reverse_entry_once(
        &self,
        entry_id: LedgerEntryId,
        reason: &str,
        reversed_by: UserId,
    ) -> Result<ReversalOutcome, RepositoryError> {
        let txn = self.db.begin().await?;
        let student_id = entry_owner(&txn, entry_id).await?;
        let mut student = LockedStudent::lock(&txn, student_id).await?;
        let now = student.now();

        let entry = lock_entry(&txn, entry_id).await?;
        let applications = store::applications_of(&txn, [entry_id]).await?;
        let outcome =
            LedgerService::reverse_entry(&entry.value, &applications, reason, reversed_by, now)?;
        student.post(outcome.posting.clone(), self.settings.today(now), reversed_by)?;

        reverse_entry_row(&txn, entry_id, entry.version, &outcome.reversal).await?;
        student.save(&txn).await?;
        txn.commit().await?;

        info!(
            entry_id = %entry_id,
            reference = %entry.value.reference,
            "ledger entry reversed"
        );
        Ok(outcome)
    }

    /// Finds an entry.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound`.
    pub async fn find_entry(&self, entry_id: LedgerEntryId) -> Result<LedgerEntry, RepositoryError> {
        let row = ledger_entries::Entity::find_by_id(entry_id.into_inner())
            .one(&self.db)
            .await?
            .ok_or(LedgerError::EntryNotFound(entry_id))?;
        entry_from_model(row)
    }

    /// Lists a student's entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn list_entries(&self, student_id: StudentId) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::StudentId.eq(student_id.into_inner()))
            .order_by_asc(ledger_entries::Column::CreatedAt)
            .order_by_asc(ledger_entries::Column::Reference)
            .all(&self.db)
            .await?;
        debug!(student_id = %student_id, entries = rows.len(), "listed ledger entries");
        rows.into_iter().map(entry_from_model).collect()
    }

    /// Lists all applications, active and decoupled, of a student's entries.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn list_applications(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<LedgerApplication>, RepositoryError> {
        let entry_ids: Vec<_> = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::StudentId.eq(student_id.into_inner()))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        ledger_applications::Entity::find()
            .filter(ledger_applications::Column::LedgerEntryId.is_in(entry_ids))
            .order_by_asc(ledger_applications::Column::AppliedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(application_from_model)
            .collect()
    }

    /// Lists the applications on one invoice.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn applications_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<LedgerApplication>, RepositoryError> {
        ledger_applications::Entity::find()
            .filter(ledger_applications::Column::InvoiceId.eq(invoice_id.into_inner()))
            .order_by_asc(ledger_applications::Column::AppliedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(application_from_model)
            .collect()
    }
}
