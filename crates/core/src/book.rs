//! In-memory books of one student.
//!
//! `StudentBook` holds a student's ledger entries, applications,
//! decouplings, invoices, payments and transactions, and runs every ledger
//! and invoice operation against them. Each operation first computes its
//! full plan, including the posted transaction lines, and only then
//! commits, so a failed operation leaves the book untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;

use cadence_shared::types::{
    Currency, InvoiceId, LedgerApplicationId, LedgerEntryId, StudentId, UserId,
};

use crate::invoice::{
    CreditConfirmation, Invoice, InvoiceError, InvoiceIssue, InvoiceKind, InvoiceNumber,
    InvoiceSeries, InvoiceService, InvoiceStatus, NewInvoice, NewPayment, Payment, PaymentOutcome,
};
use crate::ledger::application::applied_to_invoice;
use crate::ledger::{
    ApplicationStatus, BalanceSummary, CorrectionSequence, CreditApplicationOutcome, DecoupleOutcome,
    DecouplePolicy, Decoupling, EntryStatus, EntryUpdate, InvoiceCreditUpdate, LedgerApplication,
    LedgerEntry, LedgerError, LedgerService, NewLedgerEntry, PostingLine, ReversalOutcome,
    StudentStatement, StudentTransaction, available_credit, current_balance,
    verify_running_balances,
};

/// Result of issuing an invoice, with the credit applied automatically.
#[derive(Debug, Clone)]
pub struct IssuedInvoice {
    /// The issue itself.
    pub issue: InvoiceIssue,
    /// Credit applied right after issuing, if any.
    pub credit: Option<CreditApplicationOutcome>,
}

/// All financial records of one student.
#[derive(Debug, Clone)]
pub struct StudentBook {
    student_id: StudentId,
    currency: Currency,
    payment_term_days: u32,
    timezone: Tz,
    entries: Vec<LedgerEntry>,
    applications: Vec<LedgerApplication>,
    decouplings: Vec<Decoupling>,
    invoices: Vec<Invoice>,
    payments: Vec<Payment>,
    transactions: Vec<StudentTransaction>,
    references: CorrectionSequence,
    invoice_numbers: BTreeMap<(InvoiceSeries, i32), u32>,
}

impl StudentBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new(student_id: StudentId, currency: Currency) -> Self {
        Self {
            student_id,
            currency,
            payment_term_days: 14,
            timezone: chrono_tz::Europe::Amsterdam,
            entries: Vec::new(),
            applications: Vec::new(),
            decouplings: Vec::new(),
            invoices: Vec::new(),
            payments: Vec::new(),
            transactions: Vec::new(),
            references: CorrectionSequence::new(),
            invoice_numbers: BTreeMap::new(),
        }
    }

    /// Sets the payment term used for new invoices.
    #[must_use]
    pub fn with_payment_term(mut self, days: u32) -> Self {
        self.payment_term_days = days;
        self
    }

    /// Sets the school timezone, which decides posting dates and the year
    /// of new correction references.
    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// The school's calendar date at `now`.
    #[must_use]
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// The student this book belongs to.
    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    /// Ledger entries in creation order.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Applications, active and decoupled.
    #[must_use]
    pub fn applications(&self) -> &[LedgerApplication] {
        &self.applications
    }

    /// Decoupling audit records.
    #[must_use]
    pub fn decouplings(&self) -> &[Decoupling] {
        &self.decouplings
    }

    /// Invoices, standard and credit.
    #[must_use]
    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    /// Recorded payments.
    #[must_use]
    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    /// Posted transactions in posting order.
    #[must_use]
    pub fn transactions(&self) -> &[StudentTransaction] {
        &self.transactions
    }

    /// Looks up an entry.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound`.
    pub fn entry(&self, id: LedgerEntryId) -> Result<&LedgerEntry, LedgerError> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or(LedgerError::EntryNotFound(id))
    }

    /// Looks up an invoice.
    ///
    /// # Errors
    ///
    /// Returns `InvoiceNotFound`.
    pub fn invoice(&self, id: InvoiceId) -> Result<&Invoice, LedgerError> {
        self.invoices
            .iter()
            .find(|i| i.id == id)
            .ok_or(LedgerError::InvoiceNotFound(id))
    }

    /// What the student owes.
    #[must_use]
    pub fn balance(&self) -> Decimal {
        current_balance(&self.transactions)
    }

    /// Unapplied credit.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if an entry is over-applied.
    pub fn available_credit(&self) -> Result<Decimal, LedgerError> {
        available_credit(&self.entries, &self.applications)
    }

    /// Balance and available credit as money.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if an entry is over-applied.
    pub fn summary(&self) -> Result<BalanceSummary, LedgerError> {
        BalanceSummary::compute(
            self.student_id,
            self.currency,
            &self.entries,
            &self.applications,
            &self.transactions,
        )
    }

    /// Statement over an optional period.
    ///
    /// # Errors
    ///
    /// Returns `RunningBalanceDrift` for corrupted history.
    pub fn statement(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<StudentStatement, LedgerError> {
        StudentStatement::build(
            self.student_id,
            self.currency,
            &self.transactions,
            self.available_credit()?,
            from,
            to,
        )
    }

    /// Checks every cross-record invariant of the book and returns the
    /// balance.
    ///
    /// # Errors
    ///
    /// Returns the first broken invariant.
    pub fn verify(&self) -> Result<Decimal, LedgerError> {
        let balance = verify_running_balances(&self.transactions)?;

        for entry in &self.entries {
            let applied = entry.applied_amount(&self.applications);
            let expected = entry.status_for(applied)?;
            if expected != entry.status {
                return Err(LedgerError::InvariantViolation(format!(
                    "entry {} is {} but applications say {expected}",
                    entry.reference, entry.status
                )));
            }
        }

        for invoice in &self.invoices {
            let applied = applied_to_invoice(&self.applications, invoice.id);
            if applied != invoice.ledger_credit_applied {
                return Err(LedgerError::InconsistentInvoiceAccounting {
                    invoice_id: invoice.id,
                    detail: format!(
                        "records {} ledger credit, applications sum to {applied}",
                        invoice.ledger_credit_applied
                    ),
                });
            }
            if !invoice.totals.is_consistent() {
                return Err(LedgerError::InconsistentInvoiceAccounting {
                    invoice_id: invoice.id,
                    detail: "total differs from subtotal + vat - discount".to_string(),
                });
            }
        }

        Ok(balance)
    }

    // ========== Ledger operations ==========

    /// Creates a ledger entry with the next correction reference.
    ///
    /// # Errors
    ///
    /// Returns `OwnershipMismatch`, a validation error, or
    /// `OutOfOrderTransaction` for a debit dated before the latest line.
    pub fn create_entry(
        &mut self,
        input: NewLedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.ensure_student(input.student_id)?;
        let mut references = self.references.clone();
        let actor = input.created_by;
        let reference = references.allocate(self.today(now).year())?;
        let entry = LedgerService::create_entry(input, reference, now)?;
        let postings: Vec<PostingLine> = LedgerService::creation_posting(&entry).into_iter().collect();
        let transactions = self.prepare(postings, self.today(now), actor, now)?;

        self.references = references;
        self.entries.push(entry.clone());
        self.transactions.extend(transactions);
        Ok(entry)
    }

    /// Applies available credit to an invoice, oldest credit first.
    ///
    /// # Errors
    ///
    /// See [`LedgerService::apply_credit`].
    pub fn apply_credit(
        &mut self,
        invoice_id: InvoiceId,
        requested: Option<Decimal>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CreditApplicationOutcome, LedgerError> {
        let invoice = self.invoice(invoice_id)?;
        let outcome = LedgerService::apply_credit(
            self.student_id,
            invoice,
            &self.entries,
            &self.applications,
            requested,
            actor,
            now,
            self.today(now),
        )?;
        let transactions = self.prepare(outcome.postings.clone(), self.today(now), actor, now)?;
        self.commit_credit(&outcome, transactions)?;
        Ok(outcome)
    }

    /// Decouples an application.
    ///
    /// # Errors
    ///
    /// See [`LedgerService::decouple`].
    pub fn decouple(
        &mut self,
        application_id: LedgerApplicationId,
        reason: &str,
        policy: DecouplePolicy,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<DecoupleOutcome, LedgerError> {
        let application = self
            .applications
            .iter()
            .find(|a| a.id == application_id)
            .ok_or(LedgerError::ApplicationNotFound(application_id))?;
        let entry = self.entry(application.entry_id)?;
        let invoice = self.invoice(application.invoice_id)?;
        let outcome = LedgerService::decouple(
            application,
            entry,
            invoice,
            &self.applications,
            reason,
            policy,
            actor,
            now,
            self.today(now),
        )?;
        let transactions =
            self.prepare(vec![outcome.posting.clone()], self.today(now), actor, now)?;

        if let Some(app) = self.applications.iter_mut().find(|a| a.id == application_id) {
            app.status = ApplicationStatus::Decoupled;
        }
        self.apply_entry_update(&outcome.entry)?;
        self.apply_invoice_update(&outcome.invoice)?;
        self.decouplings.push(outcome.decoupling.clone());
        self.transactions.extend(transactions);
        Ok(outcome)
    }

    /// Reverses an entry without active applications.
    ///
    /// # Errors
    ///
    /// See [`LedgerService::reverse_entry`].
    pub fn reverse_entry(
        &mut self,
        entry_id: LedgerEntryId,
        reason: &str,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<ReversalOutcome, LedgerError> {
        let entry = self.entry(entry_id)?;
        let outcome = LedgerService::reverse_entry(entry, &self.applications, reason, actor, now)?;
        let postings: Vec<PostingLine> = outcome.posting.clone().into_iter().collect();
        let transactions = self.prepare(postings, self.today(now), actor, now)?;

        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == entry_id) {
            entry.status = EntryStatus::Reversed;
            entry.reversal = Some(outcome.reversal.clone());
        }
        self.transactions.extend(transactions);
        Ok(outcome)
    }

    // ========== Invoice operations ==========

    /// Creates a draft invoice with the next standard number of its issue
    /// year.
    ///
    /// # Errors
    ///
    /// See [`InvoiceService::create_draft`].
    pub fn create_invoice(&mut self, input: NewInvoice) -> Result<Invoice, InvoiceError> {
        self.ensure_student(input.student_id)?;
        let number = self.next_number(InvoiceSeries::Standard, input.issue_date.year())?;
        let invoice = InvoiceService::create_draft(input, number, self.payment_term_days)?;
        self.commit_number(number);
        self.invoices.push(invoice.clone());
        Ok(invoice)
    }

    /// Issues a draft; with `auto_apply_credit`, available credit is applied
    /// in the same step.
    ///
    /// # Errors
    ///
    /// See [`InvoiceService::issue`] and [`LedgerService::apply_credit`].
    pub fn issue_invoice(
        &mut self,
        invoice_id: InvoiceId,
        auto_apply_credit: bool,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<IssuedInvoice, InvoiceError> {
        let invoice = self.invoice(invoice_id)?;
        let issue = InvoiceService::issue(invoice)?;

        let mut issued = invoice.clone();
        issued.status = issue.status;
        let credit = if auto_apply_credit && self.available_credit()? > Decimal::ZERO {
            Some(LedgerService::apply_credit(
                self.student_id,
                &issued,
                &self.entries,
                &self.applications,
                None,
                actor,
                now,
                self.today(now),
            )?)
        } else {
            None
        };

        let mut postings = vec![issue.posting.clone()];
        if let Some(outcome) = &credit {
            postings.extend(outcome.postings.iter().cloned());
        }
        let transactions = self.prepare(postings, self.today(now), actor, now)?;

        self.invoice_mut(invoice_id)?.status = issue.status;
        match &credit {
            Some(outcome) => {
                let (charge, rest) = transactions.split_at(1);
                self.transactions.extend_from_slice(charge);
                self.commit_credit(outcome, rest.to_vec())?;
            }
            None => self.transactions.extend(transactions),
        }
        Ok(IssuedInvoice { issue, credit })
    }

    /// Records a payment; an overpayment becomes a credit entry.
    ///
    /// # Errors
    ///
    /// See [`InvoiceService::record_payment`].
    pub fn record_payment(
        &mut self,
        invoice_id: InvoiceId,
        input: NewPayment,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, InvoiceError> {
        let invoice = self.invoice(invoice_id)?;
        let number = invoice.number;
        let actor = input.recorded_by;
        let outcome = InvoiceService::record_payment(invoice, input, now)?;

        let mut references = self.references.clone();
        let overpayment = match outcome.overpayment_entry(&number) {
            Some(input) => {
                let reference = references.allocate(self.today(now).year())?;
                Some(LedgerService::create_entry(input, reference, now)?)
            }
            None => None,
        };
        let transactions =
            self.prepare(vec![outcome.posting.clone()], outcome.payment.payment_date, actor, now)?;

        let target = self.invoice_mut(invoice_id)?;
        target.amount_paid = outcome.amount_paid;
        target.status = outcome.status;
        self.references = references;
        self.entries.extend(overpayment);
        self.payments.push(outcome.payment.clone());
        self.transactions.extend(transactions);
        Ok(outcome)
    }

    /// Marks sent invoices past their due date as overdue.
    pub fn mark_overdue(&mut self, today: NaiveDate) -> Vec<InvoiceId> {
        let mut marked = Vec::new();
        for invoice in &mut self.invoices {
            if let Some(status) = InvoiceService::mark_overdue(invoice, today) {
                invoice.status = status;
                marked.push(invoice.id);
            }
        }
        marked
    }

    /// Creates a draft credit invoice for an issued invoice.
    ///
    /// # Errors
    ///
    /// See [`InvoiceService::create_credit_invoice`].
    pub fn create_credit_invoice(
        &mut self,
        original_id: InvoiceId,
        issue_date: NaiveDate,
    ) -> Result<Invoice, InvoiceError> {
        let number = self.next_number(InvoiceSeries::Credit, issue_date.year())?;
        let original = self.invoice(original_id)?;
        let credit = InvoiceService::create_credit_invoice(original, number, issue_date)?;
        self.commit_number(number);
        self.invoices.push(credit.clone());
        Ok(credit)
    }

    /// Confirms a credit invoice: the original is cancelled and any amount
    /// paid on it becomes ledger credit.
    ///
    /// # Errors
    ///
    /// See [`InvoiceService::confirm_credit_invoice`].
    pub fn confirm_credit_invoice(
        &mut self,
        credit_invoice_id: InvoiceId,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<CreditConfirmation, InvoiceError> {
        let credit = self.invoice(credit_invoice_id)?;
        let InvoiceKind::Credit { original_invoice_id } = credit.kind else {
            return Err(InvoiceError::NotACreditInvoice(credit_invoice_id));
        };
        let original = self.invoice(original_invoice_id)?;
        let confirmation = InvoiceService::confirm_credit_invoice(credit, original)?;

        let mut references = self.references.clone();
        let released = match confirmation.released_entry(self.student_id, &original.number, actor) {
            Some(input) => {
                let reference = references.allocate(self.today(now).year())?;
                Some(LedgerService::create_entry(input, reference, now)?)
            }
            None => None,
        };
        let postings: Vec<PostingLine> = confirmation.posting.clone().into_iter().collect();
        let transactions = self.prepare(postings, self.today(now), actor, now)?;

        let credit = self.invoice_mut(credit_invoice_id)?;
        credit.amount_paid = confirmation.credit_amount_paid;
        credit.status = InvoiceStatus::Paid;
        self.invoice_mut(original_invoice_id)?.status = InvoiceStatus::Cancelled;
        self.references = references;
        self.entries.extend(released);
        self.transactions.extend(transactions);
        Ok(confirmation)
    }

    // ========== Internals ==========

    fn ensure_student(&self, student_id: StudentId) -> Result<(), LedgerError> {
        if student_id == self.student_id {
            Ok(())
        } else {
            Err(LedgerError::OwnershipMismatch {
                expected: self.student_id,
                found: student_id,
            })
        }
    }

    fn prepare(
        &self,
        postings: Vec<PostingLine>,
        date: NaiveDate,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<StudentTransaction>, LedgerError> {
        let mut prepared: Vec<StudentTransaction> = Vec::with_capacity(postings.len());
        for line in postings {
            let previous = prepared.last().or_else(|| self.transactions.last());
            let tx = StudentTransaction::post(previous, self.student_id, line, date, actor, now)?;
            prepared.push(tx);
        }
        Ok(prepared)
    }

    fn commit_credit(
        &mut self,
        outcome: &CreditApplicationOutcome,
        transactions: Vec<StudentTransaction>,
    ) -> Result<(), LedgerError> {
        for update in &outcome.entry_updates {
            self.apply_entry_update(update)?;
        }
        self.apply_invoice_update(&outcome.invoice)?;
        self.applications.extend(outcome.applications.iter().cloned());
        self.transactions.extend(transactions);
        Ok(())
    }

    fn apply_entry_update(&mut self, update: &EntryUpdate) -> Result<(), LedgerError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == update.entry_id)
            .ok_or(LedgerError::EntryNotFound(update.entry_id))?;
        entry.status = update.status;
        Ok(())
    }

    fn apply_invoice_update(&mut self, update: &InvoiceCreditUpdate) -> Result<(), LedgerError> {
        let invoice = self.invoice_mut(update.invoice_id)?;
        invoice.ledger_credit_applied = update.ledger_credit_applied;
        invoice.status = update.status;
        Ok(())
    }

    fn invoice_mut(&mut self, id: InvoiceId) -> Result<&mut Invoice, LedgerError> {
        self.invoices
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(LedgerError::InvoiceNotFound(id))
    }

    fn next_number(&self, series: InvoiceSeries, year: i32) -> Result<InvoiceNumber, InvoiceError> {
        match self.invoice_numbers.get(&(series, year)) {
            Some(&last) => InvoiceNumber::new(series, year, last)?.next(),
            None => InvoiceNumber::new(series, year, 1),
        }
    }

    fn commit_number(&mut self, number: InvoiceNumber) {
        self.invoice_numbers
            .insert((number.series(), number.year()), number.sequence());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{InvoiceLine, PaymentMethod};
    use crate::ledger::{EntryType, TransactionType};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 10, 0, 0).unwrap()
    }

    fn staff() -> UserId {
        UserId::new()
    }

    fn credit_input(book: &StudentBook, amount: Decimal) -> NewLedgerEntry {
        NewLedgerEntry {
            student_id: book.student_id(),
            course_id: None,
            description: "Cancelled lesson".to_string(),
            amount,
            entry_type: EntryType::Credit,
            created_by: staff(),
        }
    }

    fn invoice_input(book: &StudentBook, net: Decimal) -> NewInvoice {
        NewInvoice {
            student_id: book.student_id(),
            enrollment_id: None,
            issue_date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
            due_date: None,
            currency: Currency::Eur,
            lines: vec![InvoiceLine {
                description: "Guitar lessons January".to_string(),
                quantity: Decimal::ONE,
                unit_price: net,
                vat_rate: dec!(21),
                lesson_id: None,
            }],
            discount_amount: Decimal::ZERO,
        }
    }

    fn issued_invoice(book: &mut StudentBook, net: Decimal) -> InvoiceId {
        let input = invoice_input(book, net);
        let invoice = book.create_invoice(input).unwrap();
        book.issue_invoice(invoice.id, false, staff(), now(3)).unwrap();
        invoice.id
    }

    #[test]
    fn test_end_to_end_apply_and_decouple() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        let entry = book.create_entry(credit_input(&book, dec!(50.00)), now(2)).unwrap();
        assert_eq!(entry.reference.to_string(), "CR-2026-0001");

        let invoice_id = issued_invoice(&mut book, dec!(100.00));
        assert_eq!(book.invoice(invoice_id).unwrap().number.to_string(), "2026-01");
        assert_eq!(book.invoice(invoice_id).unwrap().balance(), dec!(121.00));

        let outcome = book.apply_credit(invoice_id, None, staff(), now(4)).unwrap();
        assert_eq!(outcome.total_applied, dec!(50.00));
        assert_eq!(book.entry(entry.id).unwrap().status, EntryStatus::FullyApplied);
        assert_eq!(book.invoice(invoice_id).unwrap().balance(), dec!(71.00));
        assert_eq!(book.balance(), dec!(71.00));

        let application_id = outcome.applications[0].id;
        book.decouple(application_id, "Wrong invoice", DecouplePolicy::default(), staff(), now(5))
            .unwrap();
        assert_eq!(book.entry(entry.id).unwrap().status, EntryStatus::Open);
        assert_eq!(book.invoice(invoice_id).unwrap().balance(), dec!(121.00));
        assert_eq!(book.balance(), dec!(121.00));
        assert_eq!(book.available_credit().unwrap(), dec!(50.00));
        assert_eq!(book.decouplings().len(), 1);
        assert_eq!(book.verify().unwrap(), dec!(121.00));

        assert!(matches!(
            book.decouple(application_id, "again", DecouplePolicy::default(), staff(), now(5)),
            Err(LedgerError::AlreadyDecoupled(_))
        ));
    }

    #[test]
    fn test_references_are_sequential() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        let refs: Vec<String> = (0..3)
            .map(|_| {
                let input = credit_input(&book, dec!(5));
                book.create_entry(input, now(2)).unwrap().reference.to_string()
            })
            .collect();
        assert_eq!(refs, vec!["CR-2026-0001", "CR-2026-0002", "CR-2026-0003"]);
    }

    #[test]
    fn test_reference_year_follows_school_timezone() {
        // 23:30 UTC on New Year's Eve is already January 1st in Amsterdam
        let new_years_eve = Utc.with_ymd_and_hms(2025, 12, 31, 23, 30, 0).unwrap();

        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        let entry = book
            .create_entry(credit_input(&book, dec!(5)), new_years_eve)
            .unwrap();
        assert_eq!(entry.reference.to_string(), "CR-2026-0001");
        assert_eq!(book.today(new_years_eve), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());

        let mut utc_book =
            StudentBook::new(StudentId::new(), Currency::Eur).with_timezone(chrono_tz::UTC);
        let entry = utc_book
            .create_entry(credit_input(&utc_book, dec!(5)), new_years_eve)
            .unwrap();
        assert_eq!(entry.reference.to_string(), "CR-2025-0001");
    }

    #[test]
    fn test_failed_operation_leaves_book_untouched() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        book.create_entry(credit_input(&book, dec!(10)), now(2)).unwrap();
        let invoice_id = issued_invoice(&mut book, dec!(100));
        let before_tx = book.transactions().len();

        // dated before the latest transaction
        let result = book.apply_credit(invoice_id, None, staff(), now(1));
        assert!(matches!(result, Err(LedgerError::OutOfOrderTransaction { .. })));
        assert_eq!(book.transactions().len(), before_tx);
        assert!(book.applications().is_empty());
        assert_eq!(book.invoice(invoice_id).unwrap().ledger_credit_applied, Decimal::ZERO);
    }

    #[test]
    fn test_issue_applies_credit_automatically() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        book.create_entry(credit_input(&book, dec!(30)), now(2)).unwrap();
        let invoice = book.create_invoice(invoice_input(&book, dec!(100))).unwrap();

        let issued = book.issue_invoice(invoice.id, true, staff(), now(3)).unwrap();
        assert_eq!(issued.credit.unwrap().total_applied, dec!(30));
        assert_eq!(book.balance(), dec!(91));
        let types: Vec<TransactionType> =
            book.transactions().iter().map(|t| t.transaction_type).collect();
        assert_eq!(types, vec![TransactionType::InvoiceCharge, TransactionType::CreditApplied]);
        assert!(book.verify().is_ok());
    }

    #[test]
    fn test_debit_correction_and_reversal() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        let mut input = credit_input(&book, dec!(15));
        input.entry_type = EntryType::Debit;
        input.description = "Late registration fee".to_string();
        let entry = book.create_entry(input, now(2)).unwrap();
        assert_eq!(book.balance(), dec!(15));

        book.reverse_entry(entry.id, "Fee waived", staff(), now(3)).unwrap();
        assert_eq!(book.balance(), Decimal::ZERO);
        assert_eq!(book.entry(entry.id).unwrap().status, EntryStatus::Reversed);
        assert!(book.verify().is_ok());
    }

    #[test]
    fn test_overpayment_creates_credit() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        let invoice_id = issued_invoice(&mut book, dec!(100));
        let payment = NewPayment {
            student_id: book.student_id(),
            amount: dec!(150),
            payment_date: NaiveDate::from_ymd_opt(2026, 1, 4).unwrap(),
            method: PaymentMethod::BankTransfer,
            external_reference: Some("NL12BANK-778".to_string()),
            recorded_by: staff(),
        };
        let outcome = book.record_payment(invoice_id, payment, now(4)).unwrap();
        assert_eq!(outcome.overpayment, dec!(29));
        assert_eq!(book.invoice(invoice_id).unwrap().status, InvoiceStatus::Paid);
        assert_eq!(book.balance(), Decimal::ZERO);
        assert_eq!(book.available_credit().unwrap(), dec!(29));
        assert_eq!(book.entries()[0].reference.to_string(), "CR-2026-0001");
    }

    #[test]
    fn test_credit_invoice_cancels_original() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        let invoice_id = issued_invoice(&mut book, dec!(100));
        let payment = NewPayment {
            student_id: book.student_id(),
            amount: dec!(21),
            payment_date: NaiveDate::from_ymd_opt(2026, 1, 4).unwrap(),
            method: PaymentMethod::Cash,
            external_reference: None,
            recorded_by: staff(),
        };
        book.record_payment(invoice_id, payment, now(4)).unwrap();
        assert_eq!(book.balance(), dec!(100));

        let credit = book
            .create_credit_invoice(invoice_id, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap())
            .unwrap();
        assert_eq!(credit.number.to_string(), "C2026-01");
        book.confirm_credit_invoice(credit.id, staff(), now(5)).unwrap();

        assert_eq!(book.invoice(invoice_id).unwrap().status, InvoiceStatus::Cancelled);
        let credit = book.invoice(credit.id).unwrap();
        assert_eq!(credit.status, InvoiceStatus::Paid);
        assert_eq!(credit.balance(), Decimal::ZERO);
        assert_eq!(book.balance(), Decimal::ZERO);
        assert_eq!(book.available_credit().unwrap(), dec!(21));
        assert!(book.verify().is_ok());
    }

    #[test]
    fn test_mark_overdue_sweep() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        let invoice_id = issued_invoice(&mut book, dec!(100));
        assert!(book.mark_overdue(NaiveDate::from_ymd_opt(2026, 1, 17).unwrap()).is_empty());
        let marked = book.mark_overdue(NaiveDate::from_ymd_opt(2026, 1, 18).unwrap());
        assert_eq!(marked, vec![invoice_id]);
        assert_eq!(book.invoice(invoice_id).unwrap().status, InvoiceStatus::Overdue);
    }

    #[test]
    fn test_statement_reflects_history() {
        let mut book = StudentBook::new(StudentId::new(), Currency::Eur);
        book.create_entry(credit_input(&book, dec!(20)), now(2)).unwrap();
        let invoice_id = issued_invoice(&mut book, dec!(100));
        book.apply_credit(invoice_id, Some(dec!(20)), staff(), now(3) + Duration::hours(1))
            .unwrap();

        let statement = book.statement(None, None).unwrap();
        assert_eq!(statement.lines.len(), 2);
        assert_eq!(statement.closing_balance.amount, dec!(101));
        assert_eq!(statement.available_credit.amount, Decimal::ZERO);
        assert_eq!(book.summary().unwrap().net_position().amount, dec!(101));
    }
}
