//! Invoice operations: totals, issuing, payments, overdue sweep and credit
//! invoices.
//!
//! Like the ledger service this is pure: each operation validates its input
//! against the current state and returns what has to change, including the
//! student transaction lines to post. Persisting the result is the caller's
//! job.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;

use cadence_shared::types::{
    Currency, EnrollmentId, InvoiceId, PaymentId, StudentId, UserId,
};
use cadence_shared::types::money::round_money;

use super::error::InvoiceError;
use super::number::{InvoiceNumber, InvoiceSeries};
use super::types::{
    Invoice, InvoiceKind, InvoiceLine, InvoiceStatus, InvoiceTotals, Payment, PaymentMethod,
};
use crate::ledger::entry::{EntryType, validate_amount};
use crate::ledger::{LedgerError, NewLedgerEntry, PostingLine, TransactionType};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Input for a new draft invoice.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    /// Billed student.
    pub student_id: StudentId,
    /// Originating enrollment.
    pub enrollment_id: Option<EnrollmentId>,
    /// Issue date.
    pub issue_date: NaiveDate,
    /// Due date; defaults to the issue date plus the payment term.
    pub due_date: Option<NaiveDate>,
    /// Invoice currency.
    pub currency: Currency,
    /// Billed lines.
    pub lines: Vec<InvoiceLine>,
    /// Invoice-level discount.
    pub discount_amount: Decimal,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    /// Paying student.
    pub student_id: StudentId,
    /// Amount received.
    pub amount: Decimal,
    /// Booking date.
    pub payment_date: NaiveDate,
    /// Payment method.
    pub method: PaymentMethod,
    /// Bank or provider reference.
    pub external_reference: Option<String>,
    /// Who records the payment.
    pub recorded_by: UserId,
}

/// Result of issuing a draft.
#[derive(Debug, Clone)]
pub struct InvoiceIssue {
    /// Issued invoice.
    pub invoice_id: InvoiceId,
    /// New status (`Sent`).
    pub status: InvoiceStatus,
    /// `InvoiceCharge` line for the total.
    pub posting: PostingLine,
}

/// Result of recording a payment.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    /// Payment record, carrying the full amount received.
    pub payment: Payment,
    /// Part settling the invoice.
    pub applied: Decimal,
    /// Part exceeding the invoice balance.
    pub overpayment: Decimal,
    /// New `amount_paid` of the invoice.
    pub amount_paid: Decimal,
    /// New invoice status.
    pub status: InvoiceStatus,
    /// `Payment` line for the applied part.
    pub posting: PostingLine,
}

impl PaymentOutcome {
    /// Credit entry holding the overpayment, if any.
    #[must_use]
    pub fn overpayment_entry(&self, invoice_number: &InvoiceNumber) -> Option<NewLedgerEntry> {
        (self.overpayment > Decimal::ZERO).then(|| NewLedgerEntry {
            student_id: self.payment.student_id,
            course_id: None,
            description: format!("Overpayment on invoice {invoice_number}"),
            amount: self.overpayment,
            entry_type: EntryType::Credit,
            created_by: self.payment.recorded_by,
        })
    }
}

/// Result of confirming a credit invoice.
#[derive(Debug, Clone)]
pub struct CreditConfirmation {
    /// Confirmed credit invoice, now `Paid`.
    pub credit_invoice_id: InvoiceId,
    /// Original invoice, now `Cancelled`.
    pub original_invoice_id: InvoiceId,
    /// `amount_paid` of the credit invoice, settling it to zero.
    pub credit_amount_paid: Decimal,
    /// Part of the original still owed, netted by the credit invoice.
    pub outstanding: Decimal,
    /// Part of the original already paid, released as ledger credit.
    pub released: Decimal,
    /// `CreditInvoice` line for the outstanding part.
    pub posting: Option<PostingLine>,
}

impl CreditConfirmation {
    /// Credit entry returning the released payments to the student.
    #[must_use]
    pub fn released_entry(
        &self,
        student_id: StudentId,
        original_number: &InvoiceNumber,
        created_by: UserId,
    ) -> Option<NewLedgerEntry> {
        (self.released > Decimal::ZERO).then(|| NewLedgerEntry {
            student_id,
            course_id: None,
            description: format!("Payments on credited invoice {original_number}"),
            amount: self.released,
            entry_type: EntryType::Credit,
            created_by,
        })
    }
}

/// Invoice service.
pub struct InvoiceService;

impl InvoiceService {
    /// Computes invoice totals with per-line VAT rounded to cents.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty invoices, bad lines or a discount
    /// outside `0..=subtotal + vat`.
    pub fn compute_totals(
        lines: &[InvoiceLine],
        discount_amount: Decimal,
    ) -> Result<InvoiceTotals, InvoiceError> {
        if lines.is_empty() {
            return Err(InvoiceError::NoLines);
        }

        let mut subtotal = Decimal::ZERO;
        let mut vat_amount = Decimal::ZERO;
        for line in lines {
            if line.quantity <= Decimal::ZERO {
                return Err(InvoiceError::InvalidQuantity(line.quantity));
            }
            if line.unit_price < Decimal::ZERO {
                return Err(InvoiceError::InvalidUnitPrice(line.unit_price));
            }
            if line.vat_rate < Decimal::ZERO || line.vat_rate > HUNDRED {
                return Err(InvoiceError::InvalidVatRate(line.vat_rate));
            }
            let net = round_money(line.quantity * line.unit_price);
            subtotal += net;
            vat_amount += round_money(net * line.vat_rate / HUNDRED);
        }

        let maximum = subtotal + vat_amount;
        if discount_amount < Decimal::ZERO
            || discount_amount > maximum
            || round_money(discount_amount) != discount_amount
        {
            return Err(InvoiceError::InvalidDiscount {
                discount: discount_amount,
                maximum,
            });
        }

        Ok(InvoiceTotals {
            subtotal,
            vat_amount,
            discount_amount,
            total: maximum - discount_amount,
        })
    }

    /// Builds a draft invoice.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad lines, a credit-series number or a
    /// due date before the issue date.
    pub fn create_draft(
        input: NewInvoice,
        number: InvoiceNumber,
        payment_term_days: u32,
    ) -> Result<Invoice, InvoiceError> {
        if number.series() != InvoiceSeries::Standard {
            return Err(InvoiceError::InvalidNumber(number.to_string()));
        }
        let totals = Self::compute_totals(&input.lines, input.discount_amount)?;
        let due_date = match input.due_date {
            Some(date) => date,
            None => input
                .issue_date
                .checked_add_days(Days::new(u64::from(payment_term_days)))
                .ok_or(InvoiceError::InvalidDueDate)?,
        };
        if due_date < input.issue_date {
            return Err(InvoiceError::InvalidDueDate);
        }

        Ok(Invoice {
            id: InvoiceId::new(),
            number,
            kind: InvoiceKind::Standard,
            student_id: input.student_id,
            enrollment_id: input.enrollment_id,
            issue_date: input.issue_date,
            due_date,
            currency: input.currency,
            lines: input.lines,
            totals,
            amount_paid: Decimal::ZERO,
            ledger_credit_applied: Decimal::ZERO,
            status: InvoiceStatus::Draft,
        })
    }

    /// Recomputes the totals of a draft from its lines.
    ///
    /// # Errors
    ///
    /// Returns `NotDraft` once issued, or a validation error for bad lines.
    pub fn recalculate(invoice: &mut Invoice) -> Result<(), InvoiceError> {
        Self::ensure_draft(invoice)?;
        invoice.totals = Self::compute_totals(&invoice.lines, invoice.totals.discount_amount)?;
        Ok(())
    }

    /// Issues a draft standard invoice.
    ///
    /// # Errors
    ///
    /// Returns `NotDraft` once issued and `NonPositiveTotal` for credit
    /// invoices or zero totals.
    pub fn issue(invoice: &Invoice) -> Result<InvoiceIssue, InvoiceError> {
        Self::ensure_draft(invoice)?;
        if invoice.is_credit_invoice() || invoice.totals.total <= Decimal::ZERO {
            return Err(InvoiceError::NonPositiveTotal(invoice.id));
        }

        let posting = PostingLine::debit(
            TransactionType::InvoiceCharge,
            invoice.totals.total,
            format!("Invoice {}", invoice.number),
            invoice.number.to_string(),
        )
        .with_invoice(invoice.id);

        Ok(InvoiceIssue {
            invoice_id: invoice.id,
            status: InvoiceStatus::Sent,
            posting,
        })
    }

    /// Records a payment; the part above the balance is an overpayment.
    ///
    /// # Errors
    ///
    /// Returns `NotPayable` unless the invoice is sent or overdue,
    /// `OwnershipMismatch` for another student's invoice, `InvalidAmount`
    /// for a bad amount and `InvoiceAlreadySettled` when nothing is owed.
    pub fn record_payment(
        invoice: &Invoice,
        input: NewPayment,
        recorded_at: DateTime<Utc>,
    ) -> Result<PaymentOutcome, InvoiceError> {
        if invoice.student_id != input.student_id {
            return Err(LedgerError::OwnershipMismatch {
                expected: input.student_id,
                found: invoice.student_id,
            }
            .into());
        }
        if invoice.is_credit_invoice() || !invoice.status.is_outstanding() {
            return Err(InvoiceError::NotPayable {
                invoice_id: invoice.id,
                status: invoice.status,
            });
        }
        validate_amount(input.amount)?;

        let balance = invoice.balance();
        if balance <= Decimal::ZERO {
            return Err(LedgerError::InvoiceAlreadySettled(invoice.id).into());
        }

        let applied = input.amount.min(balance);
        let overpayment = input.amount - applied;
        let amount_paid = invoice.amount_paid + applied;
        let status = invoice.settlement_status(balance - applied, input.payment_date);

        let payment = Payment {
            id: PaymentId::new(),
            invoice_id: invoice.id,
            student_id: input.student_id,
            amount: input.amount,
            payment_date: input.payment_date,
            method: input.method,
            external_reference: input.external_reference,
            recorded_by: input.recorded_by,
            recorded_at,
        };

        let reference = payment
            .external_reference
            .clone()
            .unwrap_or_else(|| invoice.number.to_string());
        let posting = PostingLine::credit(
            TransactionType::Payment,
            applied,
            format!("Payment on invoice {}", invoice.number),
            reference,
        )
        .with_invoice(invoice.id)
        .with_payment(payment.id);

        Ok(PaymentOutcome {
            payment,
            applied,
            overpayment,
            amount_paid,
            status,
            posting,
        })
    }

    /// Returns `Overdue` when a sent invoice with a balance is past due.
    #[must_use]
    pub fn mark_overdue(invoice: &Invoice, today: NaiveDate) -> Option<InvoiceStatus> {
        (invoice.status == InvoiceStatus::Sent
            && invoice.due_date < today
            && invoice.balance() > Decimal::ZERO)
            .then_some(InvoiceStatus::Overdue)
    }

    /// Builds a draft credit invoice mirroring an issued original.
    ///
    /// # Errors
    ///
    /// Returns `NotCreditable` for drafts, cancelled or credit invoices and
    /// `InvalidNumber` for a standard-series number.
    pub fn create_credit_invoice(
        original: &Invoice,
        number: InvoiceNumber,
        issue_date: NaiveDate,
    ) -> Result<Invoice, InvoiceError> {
        if original.is_credit_invoice() || !original.status.is_issued() {
            return Err(InvoiceError::NotCreditable {
                invoice_id: original.id,
                status: original.status,
            });
        }
        if number.series() != InvoiceSeries::Credit {
            return Err(InvoiceError::InvalidNumber(number.to_string()));
        }

        let lines = original
            .lines
            .iter()
            .map(|line| InvoiceLine {
                description: format!("Credit: {}", line.description),
                unit_price: -line.unit_price,
                ..line.clone()
            })
            .collect();

        Ok(Invoice {
            id: InvoiceId::new(),
            number,
            kind: InvoiceKind::Credit {
                original_invoice_id: original.id,
            },
            student_id: original.student_id,
            enrollment_id: original.enrollment_id,
            issue_date,
            due_date: issue_date,
            currency: original.currency,
            lines,
            totals: original.totals.negated(),
            amount_paid: Decimal::ZERO,
            ledger_credit_applied: Decimal::ZERO,
            status: InvoiceStatus::Draft,
        })
    }

    /// Confirms a draft credit invoice against its original.
    ///
    /// # Errors
    ///
    /// Returns a state error when the documents do not match or the original
    /// still carries ledger credit.
    pub fn confirm_credit_invoice(
        credit: &Invoice,
        original: &Invoice,
    ) -> Result<CreditConfirmation, InvoiceError> {
        let InvoiceKind::Credit { original_invoice_id } = credit.kind else {
            return Err(InvoiceError::NotACreditInvoice(credit.id));
        };
        Self::ensure_draft(credit)?;
        if original_invoice_id != original.id {
            return Err(InvoiceError::CreditInvoiceMismatch {
                expected: original_invoice_id,
                found: original.id,
            });
        }
        if credit.student_id != original.student_id {
            return Err(LedgerError::OwnershipMismatch {
                expected: original.student_id,
                found: credit.student_id,
            }
            .into());
        }
        if !original.status.is_issued() {
            return Err(InvoiceError::NotCreditable {
                invoice_id: original.id,
                status: original.status,
            });
        }
        if !original.ledger_credit_applied.is_zero() {
            return Err(InvoiceError::OriginalHasLedgerCredit(original.id));
        }

        let outstanding = original.totals.total - original.amount_paid;
        if outstanding < Decimal::ZERO {
            return Err(LedgerError::InconsistentInvoiceAccounting {
                invoice_id: original.id,
                detail: format!(
                    "paid {} exceeds total {}",
                    original.amount_paid, original.totals.total
                ),
            }
            .into());
        }

        let posting = (outstanding > Decimal::ZERO).then(|| {
            PostingLine::credit(
                TransactionType::CreditInvoice,
                outstanding,
                format!("Credit invoice {} for {}", credit.number, original.number),
                credit.number.to_string(),
            )
            .with_invoice(credit.id)
        });

        Ok(CreditConfirmation {
            credit_invoice_id: credit.id,
            original_invoice_id: original.id,
            credit_amount_paid: credit.totals.total,
            outstanding,
            released: original.amount_paid,
            posting,
        })
    }

    fn ensure_draft(invoice: &Invoice) -> Result<(), InvoiceError> {
        if invoice.status == InvoiceStatus::Draft {
            Ok(())
        } else {
            Err(InvoiceError::NotDraft {
                invoice_id: invoice.id,
                status: invoice.status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(quantity: Decimal, unit_price: Decimal, vat_rate: Decimal) -> InvoiceLine {
        InvoiceLine {
            description: "Piano lesson".to_string(),
            quantity,
            unit_price,
            vat_rate,
            lesson_id: None,
        }
    }

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, month, day).unwrap()
    }

    fn draft(lines: Vec<InvoiceLine>) -> Invoice {
        InvoiceService::create_draft(
            NewInvoice {
                student_id: StudentId::new(),
                enrollment_id: None,
                issue_date: date(1, 1),
                due_date: None,
                currency: Currency::Eur,
                lines,
                discount_amount: Decimal::ZERO,
            },
            InvoiceNumber::new(InvoiceSeries::Standard, 2026, 1).unwrap(),
            14,
        )
        .unwrap()
    }

    fn sent(total: Decimal) -> Invoice {
        let mut invoice = draft(vec![line(Decimal::ONE, total, Decimal::ZERO)]);
        invoice.status = InvoiceService::issue(&invoice).unwrap().status;
        invoice
    }

    fn payment(invoice: &Invoice, amount: Decimal) -> NewPayment {
        NewPayment {
            student_id: invoice.student_id,
            amount,
            payment_date: date(1, 5),
            method: PaymentMethod::BankTransfer,
            external_reference: None,
            recorded_by: UserId::new(),
        }
    }

    #[test]
    fn test_totals_with_vat_and_discount() {
        let totals = InvoiceService::compute_totals(
            &[line(dec!(4), dec!(25.00), dec!(21)), line(dec!(1), dec!(10.00), dec!(0))],
            dec!(5.00),
        )
        .unwrap();
        assert_eq!(totals.subtotal, dec!(110.00));
        assert_eq!(totals.vat_amount, dec!(21.00));
        assert_eq!(totals.total, dec!(126.00));
        assert!(totals.is_consistent());
    }

    #[test]
    fn test_vat_uses_bankers_rounding_per_line() {
        // 0.50 * 9% = 0.045 -> 0.04 (half to even)
        let totals =
            InvoiceService::compute_totals(&[line(dec!(1), dec!(0.50), dec!(9))], Decimal::ZERO)
                .unwrap();
        assert_eq!(totals.vat_amount, dec!(0.04));
    }

    #[test]
    fn test_totals_validation() {
        assert!(matches!(
            InvoiceService::compute_totals(&[], Decimal::ZERO),
            Err(InvoiceError::NoLines)
        ));
        assert!(matches!(
            InvoiceService::compute_totals(&[line(dec!(0), dec!(1), dec!(21))], Decimal::ZERO),
            Err(InvoiceError::InvalidQuantity(_))
        ));
        assert!(matches!(
            InvoiceService::compute_totals(&[line(dec!(1), dec!(1), dec!(101))], Decimal::ZERO),
            Err(InvoiceError::InvalidVatRate(_))
        ));
        assert!(matches!(
            InvoiceService::compute_totals(&[line(dec!(1), dec!(10), dec!(0))], dec!(10.01)),
            Err(InvoiceError::InvalidDiscount { .. })
        ));
    }

    #[test]
    fn test_draft_due_date_from_payment_term() {
        let invoice = draft(vec![line(dec!(1), dec!(100), dec!(21))]);
        assert_eq!(invoice.due_date, date(1, 15));
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.balance(), dec!(121));
    }

    #[test]
    fn test_recalculate_only_on_drafts() {
        let mut invoice = draft(vec![line(dec!(1), dec!(100), dec!(21))]);
        invoice.lines.push(line(dec!(1), dec!(50), dec!(0)));
        InvoiceService::recalculate(&mut invoice).unwrap();
        assert_eq!(invoice.totals.total, dec!(171));

        invoice.status = InvoiceStatus::Sent;
        assert!(matches!(
            InvoiceService::recalculate(&mut invoice),
            Err(InvoiceError::NotDraft { .. })
        ));
    }

    #[test]
    fn test_issue_posts_invoice_charge() {
        let invoice = draft(vec![line(dec!(1), dec!(100), dec!(21))]);
        let issue = InvoiceService::issue(&invoice).unwrap();
        assert_eq!(issue.status, InvoiceStatus::Sent);
        assert_eq!(issue.posting.transaction_type, TransactionType::InvoiceCharge);
        assert_eq!(issue.posting.debit, dec!(121));
        assert_eq!(issue.posting.reference_number, "2026-01");
    }

    #[test]
    fn test_partial_payment_keeps_invoice_open() {
        let invoice = sent(dec!(100));
        let outcome =
            InvoiceService::record_payment(&invoice, payment(&invoice, dec!(40)), Utc::now())
                .unwrap();
        assert_eq!(outcome.applied, dec!(40));
        assert_eq!(outcome.overpayment, Decimal::ZERO);
        assert_eq!(outcome.status, InvoiceStatus::Sent);
        assert!(outcome.overpayment_entry(&invoice.number).is_none());
    }

    #[test]
    fn test_overpayment_becomes_credit_entry() {
        let invoice = sent(dec!(100));
        let outcome =
            InvoiceService::record_payment(&invoice, payment(&invoice, dec!(130)), Utc::now())
                .unwrap();
        assert_eq!(outcome.applied, dec!(100));
        assert_eq!(outcome.posting.credit, dec!(100));
        assert_eq!(outcome.status, InvoiceStatus::Paid);

        let entry = outcome.overpayment_entry(&invoice.number).unwrap();
        assert_eq!(entry.amount, dec!(30));
        assert_eq!(entry.entry_type, EntryType::Credit);
    }

    #[test]
    fn test_payment_on_draft_rejected() {
        let invoice = draft(vec![line(dec!(1), dec!(100), dec!(0))]);
        assert!(matches!(
            InvoiceService::record_payment(&invoice, payment(&invoice, dec!(10)), Utc::now()),
            Err(InvoiceError::NotPayable { .. })
        ));
    }

    #[test]
    fn test_mark_overdue() {
        let invoice = sent(dec!(100));
        assert_eq!(InvoiceService::mark_overdue(&invoice, date(1, 15)), None);
        assert_eq!(
            InvoiceService::mark_overdue(&invoice, date(1, 16)),
            Some(InvoiceStatus::Overdue)
        );
    }

    #[test]
    fn test_credit_invoice_mirrors_original() {
        let original = sent(dec!(100));
        let number = InvoiceNumber::new(InvoiceSeries::Credit, 2026, 1).unwrap();
        let credit = InvoiceService::create_credit_invoice(&original, number, date(1, 10)).unwrap();
        assert_eq!(credit.totals.total, dec!(-100));
        assert_eq!(credit.number.to_string(), "C2026-01");
        assert!(credit.is_credit_invoice());
        assert_eq!(credit.status, InvoiceStatus::Draft);
    }

    #[test]
    fn test_confirm_credit_invoice_releases_payments() {
        let mut original = sent(dec!(100));
        original.amount_paid = dec!(30);
        let number = InvoiceNumber::new(InvoiceSeries::Credit, 2026, 1).unwrap();
        let credit = InvoiceService::create_credit_invoice(&original, number, date(1, 10)).unwrap();

        let confirmation = InvoiceService::confirm_credit_invoice(&credit, &original).unwrap();
        assert_eq!(confirmation.outstanding, dec!(70));
        assert_eq!(confirmation.released, dec!(30));
        assert_eq!(confirmation.posting.unwrap().credit, dec!(70));
        assert_eq!(confirmation.credit_amount_paid, dec!(-100));
    }

    #[test]
    fn test_confirm_requires_decoupled_ledger_credit() {
        let mut original = sent(dec!(100));
        let number = InvoiceNumber::new(InvoiceSeries::Credit, 2026, 1).unwrap();
        let credit = InvoiceService::create_credit_invoice(&original, number, date(1, 10)).unwrap();
        original.ledger_credit_applied = dec!(20);
        assert!(matches!(
            InvoiceService::confirm_credit_invoice(&credit, &original),
            Err(InvoiceError::OriginalHasLedgerCredit(_))
        ));
    }
}
