//! Invoice repository: drafts, issuing, payments, overdue marking and
//! credit invoices.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use tracing::{debug, info, warn};

use cadence_core::IssuedInvoice;
use cadence_core::invoice::{
    CreditConfirmation, Invoice, InvoiceError, InvoiceKind, InvoiceLine, InvoiceSeries,
    InvoiceService, InvoiceStatus, NewInvoice, NewPayment, Payment, PaymentOutcome,
};
use cadence_core::ledger::{LedgerEntry, LedgerError, LedgerService};
use cadence_shared::types::{InvoiceId, StudentId, UserId};

use crate::entities::{invoice_lines, invoices, payments};
use crate::error::RepositoryError;
use crate::mapping::{invoice_from_models, payment_from_model};
use crate::retry::with_retry;
use crate::settings::BillingSettings;

use super::store::{
    CreditPool, LockedStudent, insert_entry, insert_invoice, insert_payment, invoice_owner,
    lock_invoice, next_invoice_number, next_reference, update_invoice_lines, update_invoice_state,
};

/// A recorded payment with the credit entry holding any overpayment.
#[derive(Debug, Clone)]
pub struct RecordedPayment {
    /// Payment outcome.
    pub outcome: PaymentOutcome,
    /// Credit entry created for the overpayment.
    pub overpayment_entry: Option<LedgerEntry>,
}

/// A confirmed credit invoice with the credit entry releasing earlier
/// payments on the original.
#[derive(Debug, Clone)]
pub struct ConfirmedCreditInvoice {
    /// Confirmation outcome.
    pub confirmation: CreditConfirmation,
    /// Credit entry for the released payments.
    pub released_entry: Option<LedgerEntry>,
}

/// Invoice repository.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    db: DatabaseConnection,
    settings: BillingSettings,
}

impl InvoiceRepository {
    /// Creates a new invoice repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection, settings: BillingSettings) -> Self {
        Self { db, settings }
    }

    /// Creates a draft with the next standard number of its issue year.
    ///
    /// # Errors
    ///
    /// Returns a validation error or `ConcurrentModification`.
    pub async fn create_draft(&self, input: NewInvoice) -> Result<Invoice, RepositoryError> {
        with_retry(self.settings.retry, "create_draft", move || {
            self.create_draft_once(input.clone())
        })
        .await
    }

    async fn create_draft_once(&self, input: NewInvoice) -> Result<Invoice, RepositoryError> {
        let txn = self.db.begin().await?;
        let student = LockedStudent::lock(&txn, input.student_id).await?;
        let number =
            next_invoice_number(&txn, InvoiceSeries::Standard, input.issue_date.year()).await?;
        let invoice = InvoiceService::create_draft(input, number, self.settings.payment_term_days)?;
        insert_invoice(&txn, &invoice, student.now()).await?;
        txn.commit().await?;

        info!(
            invoice_id = %invoice.id,
            number = %invoice.number,
            total = %invoice.totals.total,
            "draft invoice created"
        );
        Ok(invoice)
    }

    /// Replaces the lines and discount of a draft and recomputes its totals.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound`, `NotDraft`, a validation error, or
    /// `ConcurrentModification`.
    pub async fn update_draft(
        &self,
        invoice_id: InvoiceId,
        lines: Vec<InvoiceLine>,
        discount_amount: Decimal,
    ) -> Result<Invoice, RepositoryError> {
        with_retry(self.settings.retry, "update_draft", move || {
            self.update_draft_once(invoice_id, lines.clone(), discount_amount)
        })
        .await
    }

    async fn update_draft_once(
        &self,
        invoice_id: InvoiceId,
        lines: Vec<InvoiceLine>,
        discount_amount: Decimal,
    ) -> Result<Invoice, RepositoryError> {
        let txn = self.db.begin().await?;
        let mut invoice = lock_invoice(&txn, invoice_id).await?;
        invoice.value.lines = lines;
        invoice.value.totals.discount_amount = discount_amount;
        InvoiceService::recalculate(&mut invoice.value)?;
        update_invoice_lines(&txn, &invoice.value, invoice.version, Utc::now()).await?;
        txn.commit().await?;

        debug!(invoice_id = %invoice_id, total = %invoice.value.totals.total, "draft updated");
        Ok(invoice.value)
    }

    /// Issues a draft and charges its total to the student. With
    /// `auto_apply_credit` set, available credit is applied in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound`, `NotDraft`, `NonPositiveTotal`,
    /// `OutOfOrderTransaction`, or `ConcurrentModification`.
    pub async fn issue(
        &self,
        invoice_id: InvoiceId,
        issued_by: UserId,
    ) -> Result<IssuedInvoice, RepositoryError> {
        with_retry(self.settings.retry, "issue_invoice", move || {
            self.issue_once(invoice_id, issued_by)
        })
        .await
    }

    async fn issue_once(
        &self,
        invoice_id: InvoiceId,
        issued_by: UserId,
    ) -> Result<IssuedInvoice, RepositoryError> {
        let txn = self.db.begin().await?;
        let student_id = invoice_owner(&txn, invoice_id).await?;
        let mut student = LockedStudent::lock(&txn, student_id).await?;
        let now = student.now();
        let today = self.settings.today(now);

        let mut invoice = lock_invoice(&txn, invoice_id).await?;
        let issue = InvoiceService::issue(&invoice.value)?;
        invoice.value.status = issue.status;
        student.post([issue.posting.clone()], today, issued_by)?;

        let credit = if self.settings.auto_apply_credit {
            let pool = CreditPool::lock(&txn, student_id).await?;
            if pool.available()? > Decimal::ZERO {
                let outcome = pool
                    .apply(&txn, &mut student, &invoice.value, None, issued_by, today)
                    .await?;
                invoice.value.ledger_credit_applied = outcome.invoice.ledger_credit_applied;
                invoice.value.status = outcome.invoice.status;
                Some(outcome)
            } else {
                None
            }
        } else {
            None
        };

        update_invoice_state(&txn, &invoice.value, invoice.version, now).await?;
        student.save(&txn).await?;
        txn.commit().await?;

        info!(
            invoice_id = %invoice_id,
            number = %invoice.value.number,
            total = %invoice.value.totals.total,
            credit_applied = %credit.as_ref().map_or(Decimal::ZERO, |c| c.total_applied),
            status = invoice.value.status.as_str(),
            "invoice issued"
        );
        Ok(IssuedInvoice { issue, credit })
    }

    /// Records a payment. The part above the invoice balance becomes a
    /// credit entry of the student.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound`, `NotPayable`, `InvoiceAlreadySettled`,
    /// `OwnershipMismatch`, `InvalidAmount`, `OutOfOrderTransaction`, or
    /// `ConcurrentModification`.
    pub async fn record_payment(
        &self,
        invoice_id: InvoiceId,
        input: NewPayment,
    ) -> Result<RecordedPayment, RepositoryError> {
        with_retry(self.settings.retry, "record_payment", move || {
            self.record_payment_once(invoice_id, input.clone())
        })
        .await
    }

    async fn record_payment_once(
        &self,
        invoice_id: InvoiceId,
        input: NewPayment,
    ) -> Result<RecordedPayment, RepositoryError> {
        let txn = self.db.begin().await?;
        let student_id = invoice_owner(&txn, invoice_id).await?;
        let mut student = LockedStudent::lock(&txn, student_id).await?;
        let now = student.now();

        let mut invoice = lock_invoice(&txn, invoice_id).await?;
        let actor = input.recorded_by;
        let outcome = InvoiceService::record_payment(&invoice.value, input, now)?;

        let overpayment_entry = match outcome.overpayment_entry(&invoice.value.number) {
            Some(entry_input) => {
                let reference = next_reference(&txn, self.settings.reference_year(now)).await?;
                let entry = LedgerService::create_entry(entry_input, reference, now)?;
                insert_entry(&txn, &entry).await?;
                Some(entry)
            }
            None => None,
        };
        insert_payment(&txn, &outcome.payment).await?;
        student.post([outcome.posting.clone()], outcome.payment.payment_date, actor)?;

        invoice.value.amount_paid = outcome.amount_paid;
        invoice.value.status = outcome.status;
        update_invoice_state(&txn, &invoice.value, invoice.version, now).await?;
        student.save(&txn).await?;
        txn.commit().await?;

        info!(
            invoice_id = %invoice_id,
            payment_id = %outcome.payment.id,
            applied = %outcome.applied,
            overpayment = %outcome.overpayment,
            status = outcome.status.as_str(),
            "payment recorded"
        );
        Ok(RecordedPayment {
            outcome,
            overpayment_entry,
        })
    }

    /// Marks sent invoices past their due date as overdue. Each invoice is
    /// handled in its own transaction; one that keeps conflicting is skipped
    /// and picked up by the next run.
    ///
    /// # Errors
    ///
    /// Returns a database error from the initial scan or a non-retryable
    /// error from an update.
    pub async fn mark_overdue(&self, today: NaiveDate) -> Result<Vec<InvoiceId>, RepositoryError> {
        let candidates: Vec<InvoiceId> = invoices::Entity::find()
            .filter(invoices::Column::Status.eq(InvoiceStatus::Sent.as_str()))
            .filter(invoices::Column::DueDate.lt(today))
            .order_by_asc(invoices::Column::DueDate)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| InvoiceId::from_uuid(row.id))
            .collect();
        debug!(candidates = candidates.len(), %today, "overdue scan");

        let mut marked = Vec::new();
        for invoice_id in candidates {
            let result = with_retry(self.settings.retry, "mark_overdue", move || {
                self.mark_overdue_once(invoice_id, today)
            })
            .await;
            match result {
                Ok(true) => marked.push(invoice_id),
                Ok(false) => {}
                Err(RepositoryError::ConcurrentModification { attempts }) => {
                    warn!(invoice_id = %invoice_id, attempts, "skipped overdue invoice");
                }
                Err(err) => return Err(err),
            }
        }

        info!(marked = marked.len(), %today, "overdue invoices marked");
        Ok(marked)
    }

    async fn mark_overdue_once(
        &self,
        invoice_id: InvoiceId,
        today: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        let txn = self.db.begin().await?;
        let mut invoice = lock_invoice(&txn, invoice_id).await?;
        let Some(status) = InvoiceService::mark_overdue(&invoice.value, today) else {
            return Ok(false);
        };
        invoice.value.status = status;
        update_invoice_state(&txn, &invoice.value, invoice.version, Utc::now()).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Creates a draft credit invoice mirroring an issued original, numbered
    /// in the credit series of `issue_date`'s year.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound`, `NotCreditable`, or
    /// `ConcurrentModification`.
    pub async fn create_credit_invoice(
        &self,
        original_id: InvoiceId,
        issue_date: NaiveDate,
    ) -> Result<Invoice, RepositoryError> {
        with_retry(self.settings.retry, "create_credit_invoice", move || {
            self.create_credit_invoice_once(original_id, issue_date)
        })
        .await
    }

    async fn create_credit_invoice_once(
        &self,
        original_id: InvoiceId,
        issue_date: NaiveDate,
    ) -> Result<Invoice, RepositoryError> {
        let txn = self.db.begin().await?;
        let original = lock_invoice(&txn, original_id).await?;
        let number = next_invoice_number(&txn, InvoiceSeries::Credit, issue_date.year()).await?;
        let credit = InvoiceService::create_credit_invoice(&original.value, number, issue_date)?;
        insert_invoice(&txn, &credit, Utc::now()).await?;
        txn.commit().await?;

        info!(
            invoice_id = %credit.id,
            number = %credit.number,
            original = %original.value.number,
            "credit invoice created"
        );
        Ok(credit)
    }

    /// Confirms a draft credit invoice. The original is cancelled, the
    /// outstanding part is credited to the student and payments already
    /// made on the original become ledger credit.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound`, `NotACreditInvoice`, `NotDraft`,
    /// `NotCreditable`, `OriginalHasLedgerCredit`, or
    /// `ConcurrentModification`.
    pub async fn confirm_credit_invoice(
        &self,
        credit_invoice_id: InvoiceId,
        confirmed_by: UserId,
    ) -> Result<ConfirmedCreditInvoice, RepositoryError> {
        with_retry(self.settings.retry, "confirm_credit_invoice", move || {
            self.confirm_credit_invoice_once(credit_invoice_id, confirmed_by)
        })
        .await
    }

    async fn confirm_credit_invoice_once(
        &self,
        credit_invoice_id: InvoiceId,
        confirmed_by: UserId,
    ) -> Result<ConfirmedCreditInvoice, RepositoryError> {
        let txn = self.db.begin().await?;
        let student_id = invoice_owner(&txn, credit_invoice_id).await?;
        let mut student = LockedStudent::lock(&txn, student_id).await?;
        let now = student.now();

        let mut credit = lock_invoice(&txn, credit_invoice_id).await?;
        let InvoiceKind::Credit { original_invoice_id } = credit.value.kind else {
            return Err(InvoiceError::NotACreditInvoice(credit_invoice_id).into());
        };
        let mut original = lock_invoice(&txn, original_invoice_id).await?;
        let confirmation = InvoiceService::confirm_credit_invoice(&credit.value, &original.value)?;

        let released_entry =
            match confirmation.released_entry(student_id, &original.value.number, confirmed_by) {
                Some(entry_input) => {
                    let reference = next_reference(&txn, self.settings.reference_year(now)).await?;
                    let entry = LedgerService::create_entry(entry_input, reference, now)?;
                    insert_entry(&txn, &entry).await?;
                    Some(entry)
                }
                None => None,
            };
        student.post(confirmation.posting.clone(), self.settings.today(now), confirmed_by)?;

        credit.value.amount_paid = confirmation.credit_amount_paid;
        credit.value.status = InvoiceStatus::Paid;
        original.value.status = InvoiceStatus::Cancelled;
        update_invoice_state(&txn, &credit.value, credit.version, now).await?;
        update_invoice_state(&txn, &original.value, original.version, now).await?;
        student.save(&txn).await?;
        txn.commit().await?;

        info!(
            credit_invoice = %credit.value.number,
            original = %original.value.number,
            outstanding = %confirmation.outstanding,
            released = %confirmation.released,
            "credit invoice confirmed"
        );
        Ok(ConfirmedCreditInvoice {
            confirmation,
            released_entry,
        })
    }

    /// Finds an invoice with its lines.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound`.
    pub async fn find(&self, invoice_id: InvoiceId) -> Result<Invoice, RepositoryError> {
        let row = invoices::Entity::find_by_id(invoice_id.into_inner())
            .one(&self.db)
            .await?
            .ok_or(LedgerError::InvoiceNotFound(invoice_id))?;
        let lines = invoice_lines::Entity::find()
            .filter(invoice_lines::Column::InvoiceId.eq(row.id))
            .order_by_asc(invoice_lines::Column::Position)
            .all(&self.db)
            .await?;
        invoice_from_models(row, lines)
    }

    /// Lists a student's invoices by issue date.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn list_for_student(&self, student_id: StudentId) -> Result<Vec<Invoice>, RepositoryError> {
        let rows = invoices::Entity::find()
            .filter(invoices::Column::StudentId.eq(student_id.into_inner()))
            .order_by_asc(invoices::Column::IssueDate)
            .order_by_asc(invoices::Column::Number)
            .find_with_related(invoice_lines::Entity)
            .all(&self.db)
            .await?;
        rows.into_iter()
            .map(|(row, mut lines)| {
                lines.sort_by_key(|line| line.position);
                invoice_from_models(row, lines)
            })
            .collect()
    }

    /// Lists the payments recorded on an invoice.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn payments(&self, invoice_id: InvoiceId) -> Result<Vec<Payment>, RepositoryError> {
        payments::Entity::find()
            .filter(payments::Column::InvoiceId.eq(invoice_id.into_inner()))
            .order_by_asc(payments::Column::RecordedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(payment_from_model)
            .collect()
    }
}
