//! Property-based tests for LedgerService.
//!
//! - Status derivation is idempotent and matches its thresholds
//! - Credit is conserved across any sequence of applications and decouplings
//! - Credit is consumed oldest first
//! - Decoupling restores both sides exactly

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use cadence_shared::types::{Currency, InvoiceId, StudentId, UserId};

use super::application::applied_to_invoice;
use super::entry::{EntryStatus, EntryType, LedgerEntry};
use super::error::LedgerError;
use super::reference::CorrectionReference;
use super::service::{DecouplePolicy, LedgerService, NewLedgerEntry};
use super::{LedgerApplication, available_credit};
use crate::invoice::{Invoice, InvoiceKind, InvoiceNumber, InvoiceSeries, InvoiceStatus, InvoiceTotals};

/// Strategy to generate positive decimal amounts (0.01 to 1,000.00).
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// One step of a random apply/decouple sequence.
#[derive(Debug, Clone)]
enum Step {
    Apply { invoice: usize, amount: Option<Decimal> },
    Decouple { pick: usize },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0usize..3, proptest::option::of(positive_amount()))
            .prop_map(|(invoice, amount)| Step::Apply { invoice, amount }),
        (0usize..16).prop_map(|pick| Step::Decouple { pick }),
    ]
}

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn make_credit(student_id: StudentId, sequence: u32, amount: Decimal) -> LedgerEntry {
    LedgerService::create_entry(
        NewLedgerEntry {
            student_id,
            course_id: None,
            description: "Credit".to_string(),
            amount,
            entry_type: EntryType::Credit,
            created_by: UserId::new(),
        },
        CorrectionReference::new(2026, sequence).unwrap(),
        at(i64::from(sequence)),
    )
    .unwrap()
}

fn make_invoice(student_id: StudentId, sequence: u32, total: Decimal) -> Invoice {
    Invoice {
        id: InvoiceId::new(),
        number: InvoiceNumber::new(InvoiceSeries::Standard, 2026, sequence).unwrap(),
        kind: InvoiceKind::Standard,
        student_id,
        enrollment_id: None,
        issue_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        due_date: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
        currency: Currency::Eur,
        lines: Vec::new(),
        totals: InvoiceTotals {
            subtotal: total,
            vat_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total,
        },
        amount_paid: Decimal::ZERO,
        ledger_credit_applied: Decimal::ZERO,
        status: InvoiceStatus::Sent,
    }
}

/// Minimal in-test state applying service outcomes.
struct State {
    student: StudentId,
    entries: Vec<LedgerEntry>,
    invoices: Vec<Invoice>,
    applications: Vec<LedgerApplication>,
}

impl State {
    fn apply(&mut self, invoice: usize, amount: Option<Decimal>) -> Result<(), LedgerError> {
        let outcome = LedgerService::apply_credit(
            self.student,
            &self.invoices[invoice],
            &self.entries,
            &self.applications,
            amount,
            UserId::new(),
            at(100),
            today(),
        )?;
        for update in &outcome.entry_updates {
            let entry = self.entries.iter_mut().find(|e| e.id == update.entry_id).unwrap();
            entry.status = update.status;
        }
        let target = &mut self.invoices[invoice];
        target.ledger_credit_applied = outcome.invoice.ledger_credit_applied;
        target.status = outcome.invoice.status;
        self.applications.extend(outcome.applications);
        Ok(())
    }

    fn decouple(&mut self, pick: usize) -> Result<(), LedgerError> {
        let active: Vec<usize> = (0..self.applications.len())
            .filter(|&i| self.applications[i].is_active())
            .collect();
        if active.is_empty() {
            return Ok(());
        }
        let index = active[pick % active.len()];
        let application = self.applications[index].clone();
        let entry = self.entries.iter().find(|e| e.id == application.entry_id).unwrap();
        let invoice_index = self
            .invoices
            .iter()
            .position(|i| i.id == application.invoice_id)
            .unwrap();
        let outcome = LedgerService::decouple(
            &application,
            entry,
            &self.invoices[invoice_index],
            &self.applications,
            "property test",
            DecouplePolicy::default(),
            UserId::new(),
            at(200),
            today(),
        )?;
        self.applications[index].status = super::ApplicationStatus::Decoupled;
        let entry = self.entries.iter_mut().find(|e| e.id == outcome.entry.entry_id).unwrap();
        entry.status = outcome.entry.status;
        let invoice = &mut self.invoices[invoice_index];
        invoice.ledger_credit_applied = outcome.invoice.ledger_credit_applied;
        invoice.status = outcome.invoice.status;
        Ok(())
    }

    fn active_applied(&self) -> Decimal {
        self.applications
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.amount)
            .sum()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Status derivation is a pure function of (amount, applied).
    #[test]
    fn prop_status_derivation_idempotent(
        amount in positive_amount(),
        fraction in 0u32..=100,
    ) {
        let applied = (amount * Decimal::from(fraction) / Decimal::ONE_HUNDRED).round_dp(2);
        let first = EntryStatus::derive(amount, applied).unwrap();
        let second = EntryStatus::derive(amount, applied).unwrap();
        prop_assert_eq!(first, second);

        let expected = if applied.is_zero() {
            EntryStatus::Open
        } else if applied == amount {
            EntryStatus::FullyApplied
        } else {
            EntryStatus::PartiallyApplied
        };
        prop_assert_eq!(first, expected);
    }

    /// Applied amounts above the entry amount never derive a status.
    #[test]
    fn prop_overapplication_rejected(
        amount in positive_amount(),
        excess in positive_amount(),
    ) {
        prop_assert!(matches!(
            EntryStatus::derive(amount, amount + excess),
            Err(LedgerError::InvariantViolation(_))
        ));
    }

    /// Sum of entry amounts = active applications + available credit, after
    /// every step; invoices never go below zero.
    #[test]
    fn prop_credit_is_conserved(
        credits in proptest::collection::vec(positive_amount(), 1..5),
        totals in proptest::collection::vec(positive_amount(), 3..=3),
        steps in proptest::collection::vec(step_strategy(), 1..20),
    ) {
        let student = StudentId::new();
        let entries: Vec<LedgerEntry> = credits
            .iter()
            .enumerate()
            .map(|(i, amount)| make_credit(student, u32::try_from(i + 1).unwrap(), *amount))
            .collect();
        let invoices: Vec<Invoice> = totals
            .iter()
            .enumerate()
            .map(|(i, total)| make_invoice(student, u32::try_from(i + 1).unwrap(), *total))
            .collect();
        let total_credit: Decimal = credits.iter().copied().sum();
        let mut state = State { student, entries, invoices, applications: Vec::new() };

        for step in steps {
            // rejected steps are expected business outcomes and change nothing
            let _ = match step {
                Step::Apply { invoice, amount } => state.apply(invoice, amount),
                Step::Decouple { pick } => state.decouple(pick),
            };

            let available = available_credit(&state.entries, &state.applications).unwrap();
            prop_assert_eq!(total_credit, state.active_applied() + available);

            for invoice in &state.invoices {
                prop_assert!(invoice.balance() >= Decimal::ZERO);
                prop_assert_eq!(
                    invoice.ledger_credit_applied,
                    applied_to_invoice(&state.applications, invoice.id)
                );
            }
            for entry in &state.entries {
                let applied = entry.applied_amount(&state.applications);
                prop_assert_eq!(entry.status, EntryStatus::derive(entry.amount, applied).unwrap());
            }
        }
    }

    /// An older entry is exhausted before a newer entry is touched.
    #[test]
    fn prop_fifo_consumption(
        older in positive_amount(),
        newer in positive_amount(),
        total in positive_amount(),
    ) {
        let student = StudentId::new();
        let first = make_credit(student, 1, older);
        let second = make_credit(student, 2, newer);
        let invoice = make_invoice(student, 1, total);

        let outcome = LedgerService::apply_credit(
            student,
            &invoice,
            &[second.clone(), first.clone()],
            &[],
            None,
            UserId::new(),
            at(100),
            today(),
        )
        .unwrap();

        prop_assert_eq!(outcome.applications[0].entry_id, first.id);
        prop_assert_eq!(outcome.applications[0].amount, older.min(total));
        if total > older {
            prop_assert_eq!(outcome.applications.len(), 2);
            prop_assert_eq!(outcome.applications[1].entry_id, second.id);
            prop_assert_eq!(outcome.applications[1].amount, newer.min(total - older));
        } else {
            prop_assert_eq!(outcome.applications.len(), 1);
        }
        prop_assert_eq!(outcome.total_applied, total.min(older + newer));
    }

    /// Apply followed by decouple restores the entry's credit and the
    /// invoice's balance exactly.
    #[test]
    fn prop_decouple_reverses_apply(
        credit in positive_amount(),
        total in positive_amount(),
    ) {
        let student = StudentId::new();
        let mut state = State {
            student,
            entries: vec![make_credit(student, 1, credit)],
            invoices: vec![make_invoice(student, 1, total)],
            applications: Vec::new(),
        };
        let balance_before = state.invoices[0].balance();
        let credit_before = available_credit(&state.entries, &state.applications).unwrap();

        state.apply(0, None).unwrap();
        state.decouple(0).unwrap();

        prop_assert_eq!(state.invoices[0].balance(), balance_before);
        prop_assert_eq!(state.invoices[0].status, InvoiceStatus::Sent);
        prop_assert_eq!(available_credit(&state.entries, &state.applications).unwrap(), credit_before);
        prop_assert_eq!(state.entries[0].status, EntryStatus::Open);
    }
}
