//! Read side of the student ledger: transaction history, statements,
//! balance summaries and reconciliation of the stored balances.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::{info, warn};

use cadence_core::invoice::Invoice;
use cadence_core::ledger::application::applied_to_invoice;
use cadence_core::ledger::{
    BalanceSummary, LedgerApplication, LedgerEntry, StudentStatement, StudentTransaction,
    available_credit, verify_running_balances,
};
use cadence_shared::types::{Currency, StudentId};

use crate::entities::{student_balances, student_transactions};
use crate::error::RepositoryError;
use crate::mapping::transaction_from_model;

use super::{InvoiceRepository, LedgerRepository};

/// One disagreement found by [`Reconciliation::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discrepancy {
    /// A running balance does not match the prefix sum.
    RunningBalance(String),
    /// The balance row disagrees with the latest transaction.
    StoredBalance {
        /// Balance on `student_balances`.
        stored: Decimal,
        /// Balance reproduced from the transactions.
        computed: Decimal,
    },
    /// An entry's stored status disagrees with its applications.
    EntryStatus(String),
    /// An invoice's applied credit disagrees with its applications.
    InvoiceCredit(String),
}

/// Result of reconciling one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Student checked.
    pub student_id: StudentId,
    /// Transactions checked.
    pub transactions: usize,
    /// Balance reproduced from the transactions.
    pub computed_balance: Decimal,
    /// Balance stored on the balance row.
    pub stored_balance: Decimal,
    /// Everything that disagrees.
    pub discrepancies: Vec<Discrepancy>,
}

impl Reconciliation {
    /// Cross-checks a student's records.
    #[must_use]
    pub fn check(
        student_id: StudentId,
        stored_balance: Decimal,
        transactions: &[StudentTransaction],
        entries: &[LedgerEntry],
        applications: &[LedgerApplication],
        invoices: &[Invoice],
    ) -> Self {
        let mut discrepancies = Vec::new();

        let computed_balance = match verify_running_balances(transactions) {
            Ok(balance) => balance,
            Err(err) => {
                discrepancies.push(Discrepancy::RunningBalance(err.to_string()));
                transactions.last().map_or(Decimal::ZERO, |tx| tx.running_balance)
            }
        };
        if computed_balance != stored_balance {
            discrepancies.push(Discrepancy::StoredBalance {
                stored: stored_balance,
                computed: computed_balance,
            });
        }

        for entry in entries {
            let applied = entry.applied_amount(applications);
            match entry.status_for(applied) {
                Ok(expected) if expected == entry.status => {}
                Ok(expected) => discrepancies.push(Discrepancy::EntryStatus(format!(
                    "{} is {} but its applications say {expected}",
                    entry.reference, entry.status
                ))),
                Err(err) => {
                    discrepancies.push(Discrepancy::EntryStatus(format!("{}: {err}", entry.reference)));
                }
            }
        }

        for invoice in invoices {
            let applied = applied_to_invoice(applications, invoice.id);
            if applied != invoice.ledger_credit_applied {
                discrepancies.push(Discrepancy::InvoiceCredit(format!(
                    "{} records {} ledger credit, applications sum to {applied}",
                    invoice.number, invoice.ledger_credit_applied
                )));
            }
        }

        Self {
            student_id,
            transactions: transactions.len(),
            computed_balance,
            stored_balance,
            discrepancies,
        }
    }

    /// Returns true when nothing disagrees.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Statement repository.
#[derive(Debug, Clone)]
pub struct StatementRepository {
    db: DatabaseConnection,
    ledger: LedgerRepository,
    invoices: InvoiceRepository,
}

impl StatementRepository {
    /// Creates a new statement repository.
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        ledger: LedgerRepository,
        invoices: InvoiceRepository,
    ) -> Self {
        Self {
            db,
            ledger,
            invoices,
        }
    }

    /// A student's transactions in posting order.
    ///
    /// # Errors
    ///
    /// Returns a database error or `CorruptRow`.
    pub async fn transactions(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<StudentTransaction>, RepositoryError> {
        student_transactions::Entity::find()
            .filter(student_transactions::Column::StudentId.eq(student_id.into_inner()))
            .order_by_asc(student_transactions::Column::Sequence)
            .all(&self.db)
            .await?
            .into_iter()
            .map(transaction_from_model)
            .collect()
    }

    /// Statement over an optional period.
    ///
    /// # Errors
    ///
    /// Returns `RunningBalanceDrift` for corrupted history, or a database
    /// error.
    pub async fn statement(
        &self,
        student_id: StudentId,
        currency: Currency,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<StudentStatement, RepositoryError> {
        let transactions = self.transactions(student_id).await?;
        let entries = self.ledger.list_entries(student_id).await?;
        let applications = self.ledger.list_applications(student_id).await?;
        let credit = available_credit(&entries, &applications)?;
        Ok(StudentStatement::build(
            student_id,
            currency,
            &transactions,
            credit,
            from,
            to,
        )?)
    }

    /// Balance and available credit.
    ///
    /// # Errors
    ///
    /// Returns a database error or `InvariantViolation`.
    pub async fn summary(
        &self,
        student_id: StudentId,
        currency: Currency,
    ) -> Result<BalanceSummary, RepositoryError> {
        let transactions = self.transactions(student_id).await?;
        let entries = self.ledger.list_entries(student_id).await?;
        let applications = self.ledger.list_applications(student_id).await?;
        Ok(BalanceSummary::compute(
            student_id,
            currency,
            &entries,
            &applications,
            &transactions,
        )?)
    }

    /// Checks a student's stored balance, running balances, entry statuses
    /// and invoice credit against each other.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn reconcile(&self, student_id: StudentId) -> Result<Reconciliation, RepositoryError> {
        let stored_balance = student_balances::Entity::find_by_id(student_id.into_inner())
            .one(&self.db)
            .await?
            .map_or(Decimal::ZERO, |row| row.balance);
        let transactions = self.transactions(student_id).await?;
        let entries = self.ledger.list_entries(student_id).await?;
        let applications = self.ledger.list_applications(student_id).await?;
        let invoices = self.invoices.list_for_student(student_id).await?;

        let reconciliation = Reconciliation::check(
            student_id,
            stored_balance,
            &transactions,
            &entries,
            &applications,
            &invoices,
        );
        if reconciliation.is_consistent() {
            info!(
                student_id = %student_id,
                balance = %reconciliation.computed_balance,
                transactions = reconciliation.transactions,
                "student ledger reconciled"
            );
        } else {
            warn!(
                student_id = %student_id,
                discrepancies = reconciliation.discrepancies.len(),
                "student ledger has discrepancies"
            );
        }
        Ok(reconciliation)
    }

    /// Students that have a balance row.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn students(&self) -> Result<Vec<StudentId>, RepositoryError> {
        Ok(student_balances::Entity::find()
            .order_by_asc(student_balances::Column::StudentId)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| StudentId::from_uuid(row.student_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ledger::{
        ApplicationStatus, CorrectionReference, EntryStatus, EntryType, PostingLine,
        TransactionType,
    };
    use cadence_shared::types::{InvoiceId, LedgerApplicationId, LedgerEntryId, UserId};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap()
    }

    fn history(student_id: StudentId) -> Vec<StudentTransaction> {
        let actor = UserId::new();
        let charge = StudentTransaction::post(
            None,
            student_id,
            PostingLine::debit(
                TransactionType::InvoiceCharge,
                dec!(121.00),
                "Invoice 2026-01".to_string(),
                "2026-01".to_string(),
            ),
            at(3).date_naive(),
            actor,
            at(3),
        )
        .unwrap();
        let applied = StudentTransaction::post(
            Some(&charge),
            student_id,
            PostingLine::credit(
                TransactionType::CreditApplied,
                dec!(50.00),
                "Credit CR-2026-0001 applied".to_string(),
                "CR-2026-0001".to_string(),
            ),
            at(4).date_naive(),
            actor,
            at(4),
        )
        .unwrap();
        vec![charge, applied]
    }

    fn credit_entry(student_id: StudentId, status: EntryStatus) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::new(),
            reference: CorrectionReference::new(2026, 1).unwrap(),
            description: "Cancelled lesson".to_string(),
            student_id,
            course_id: None,
            amount: dec!(50.00),
            entry_type: EntryType::Credit,
            status,
            created_at: at(2),
            created_by: UserId::new(),
            reversal: None,
        }
    }

    fn application(entry: &LedgerEntry, invoice_id: InvoiceId) -> LedgerApplication {
        LedgerApplication {
            id: LedgerApplicationId::new(),
            entry_id: entry.id,
            invoice_id,
            amount: dec!(50.00),
            applied_at: at(4),
            applied_by: UserId::new(),
            status: ApplicationStatus::Active,
        }
    }

    #[test]
    fn test_consistent_records_reconcile() {
        let student_id = StudentId::new();
        let entry = credit_entry(student_id, EntryStatus::FullyApplied);
        let applications = vec![application(&entry, InvoiceId::new())];

        let result = Reconciliation::check(
            student_id,
            dec!(71.00),
            &history(student_id),
            &[entry],
            &applications,
            &[],
        );
        assert!(result.is_consistent(), "{:?}", result.discrepancies);
        assert_eq!(result.computed_balance, dec!(71.00));
        assert_eq!(result.transactions, 2);
    }

    #[test]
    fn test_stale_balance_row_is_reported() {
        let student_id = StudentId::new();
        let result = Reconciliation::check(student_id, dec!(121.00), &history(student_id), &[], &[], &[]);
        assert_eq!(
            result.discrepancies,
            vec![Discrepancy::StoredBalance {
                stored: dec!(121.00),
                computed: dec!(71.00),
            }]
        );
    }

    #[test]
    fn test_drifted_running_balance_is_reported() {
        let student_id = StudentId::new();
        let mut transactions = history(student_id);
        transactions[1].running_balance = dec!(70.00);

        let result = Reconciliation::check(student_id, dec!(70.00), &transactions, &[], &[], &[]);
        assert!(matches!(
            result.discrepancies.as_slice(),
            [Discrepancy::RunningBalance(_), ..]
        ));
    }

    #[test]
    fn test_entry_status_disagreeing_with_applications_is_reported() {
        let student_id = StudentId::new();
        let entry = credit_entry(student_id, EntryStatus::Open);
        let applications = vec![application(&entry, InvoiceId::new())];

        let result = Reconciliation::check(
            student_id,
            dec!(71.00),
            &history(student_id),
            &[entry],
            &applications,
            &[],
        );
        assert!(matches!(
            result.discrepancies.as_slice(),
            [Discrepancy::EntryStatus(detail)] if detail.contains("CR-2026-0001")
        ));
    }

    #[test]
    fn test_reconciliation_serializes_for_reports() {
        let student_id = StudentId::new();
        let result = Reconciliation::check(student_id, dec!(121.00), &history(student_id), &[], &[], &[]);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["student_id"], student_id.to_string());
        assert_eq!(json["transactions"], 2);
        assert_eq!(json["computed_balance"], "71.00");
        assert_eq!(
            json["discrepancies"][0]["stored_balance"]["stored"],
            "121.00"
        );
    }
}
