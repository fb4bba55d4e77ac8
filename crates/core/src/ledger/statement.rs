//! Student statement: the chronological, running-balance-annotated view of
//! a student's transactions.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cadence_shared::types::{Currency, Money, StudentId};

use super::balance::{StudentTransaction, TransactionType, in_audit_order, verify_running_balances};
use super::error::LedgerError;

/// One statement line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    /// Booking date.
    pub date: NaiveDate,
    /// Kind of event.
    pub transaction_type: TransactionType,
    /// Description.
    pub description: String,
    /// Invoice, payment or correction reference.
    pub reference_number: String,
    /// Amount raising the balance.
    pub debit: Decimal,
    /// Amount lowering the balance.
    pub credit: Decimal,
    /// Balance after the line.
    pub running_balance: Decimal,
}

/// Statement of one student over an optional period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentStatement {
    /// Student.
    pub student_id: StudentId,
    /// First day included.
    pub from: Option<NaiveDate>,
    /// Last day included.
    pub to: Option<NaiveDate>,
    /// Balance before the first line.
    pub opening_balance: Money,
    /// Lines in audit order.
    pub lines: Vec<StatementLine>,
    /// Sum of debits in the period.
    pub total_debit: Money,
    /// Sum of credits in the period.
    pub total_credit: Money,
    /// Balance after the last line.
    pub closing_balance: Money,
    /// Unapplied credit held for the student.
    pub available_credit: Money,
}

impl StudentStatement {
    /// Builds the statement, verifying the running balances first.
    ///
    /// # Errors
    ///
    /// Returns `RunningBalanceDrift` when stored balances disagree with the
    /// prefix sums.
    pub fn build(
        student_id: StudentId,
        currency: Currency,
        transactions: &[StudentTransaction],
        available_credit: Decimal,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Self, LedgerError> {
        verify_running_balances(transactions)?;

        let ordered = in_audit_order(transactions);
        let opening = ordered
            .iter()
            .take_while(|tx| from.is_some_and(|f| tx.transaction_date < f))
            .last()
            .map_or(Decimal::ZERO, |tx| tx.running_balance);

        let lines: Vec<StatementLine> = ordered
            .into_iter()
            .filter(|tx| from.is_none_or(|f| tx.transaction_date >= f))
            .filter(|tx| to.is_none_or(|t| tx.transaction_date <= t))
            .map(|tx| StatementLine {
                date: tx.transaction_date,
                transaction_type: tx.transaction_type,
                description: tx.description.clone(),
                reference_number: tx.reference_number.clone(),
                debit: tx.debit,
                credit: tx.credit,
                running_balance: tx.running_balance,
            })
            .collect();

        let total_debit: Decimal = lines.iter().map(|l| l.debit).sum();
        let total_credit: Decimal = lines.iter().map(|l| l.credit).sum();
        let closing = lines.last().map_or(opening, |l| l.running_balance);

        Ok(Self {
            student_id,
            from,
            to,
            opening_balance: Money::new(opening, currency),
            lines,
            total_debit: Money::new(total_debit, currency),
            total_credit: Money::new(total_credit, currency),
            closing_balance: Money::new(closing, currency),
            available_credit: Money::new(available_credit, currency),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::balance::PostingLine;
    use cadence_shared::types::UserId;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    fn history(student: StudentId) -> Vec<StudentTransaction> {
        let lines = [
            (PostingLine::debit(TransactionType::InvoiceCharge, dec!(100), "Invoice 2026-01", "2026-01"), date(1)),
            (PostingLine::credit(TransactionType::Payment, dec!(60), "Payment", "PAY-1"), date(10)),
            (PostingLine::debit(TransactionType::InvoiceCharge, dec!(80), "Invoice 2026-02", "2026-02"), date(20)),
        ];
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        let mut out: Vec<StudentTransaction> = Vec::new();
        for (i, (line, d)) in lines.into_iter().enumerate() {
            let created = base + Duration::minutes(i64::try_from(i).unwrap());
            let tx = StudentTransaction::post(out.last(), student, line, d, UserId::new(), created)
                .unwrap();
            out.push(tx);
        }
        out
    }

    #[test]
    fn test_full_statement() {
        let student = StudentId::new();
        let statement =
            StudentStatement::build(student, Currency::Eur, &history(student), dec!(5), None, None)
                .unwrap();
        assert_eq!(statement.lines.len(), 3);
        assert_eq!(statement.opening_balance.amount, Decimal::ZERO);
        assert_eq!(statement.closing_balance.amount, dec!(120));
        assert_eq!(statement.total_debit.amount, dec!(180));
        assert_eq!(statement.total_credit.amount, dec!(60));
        assert_eq!(statement.available_credit.amount, dec!(5));
    }

    #[test]
    fn test_period_statement_has_opening_balance() {
        let student = StudentId::new();
        let statement = StudentStatement::build(
            student,
            Currency::Eur,
            &history(student),
            Decimal::ZERO,
            Some(date(5)),
            Some(date(15)),
        )
        .unwrap();
        assert_eq!(statement.opening_balance.amount, dec!(100));
        assert_eq!(statement.lines.len(), 1);
        assert_eq!(statement.closing_balance.amount, dec!(40));
        assert_eq!(
            statement.opening_balance.amount + statement.total_debit.amount
                - statement.total_credit.amount,
            statement.closing_balance.amount
        );
    }

    #[test]
    fn test_statement_refuses_drifted_history() {
        let student = StudentId::new();
        let mut txs = history(student);
        txs[2].running_balance = dec!(999);
        assert!(matches!(
            StudentStatement::build(student, Currency::Eur, &txs, Decimal::ZERO, None, None),
            Err(LedgerError::RunningBalanceDrift { .. })
        ));
    }
}
