//! Applications of ledger credit to invoices, and their decoupling audit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cadence_shared::types::{
    DecouplingId, InvoiceId, LedgerApplicationId, LedgerEntryId, UserId,
};

/// Status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    /// The credit is consumed by the invoice.
    Active,
    /// The application was reversed; the record is kept for audit.
    Decoupled,
}

impl ApplicationStatus {
    /// Returns the storage name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Decoupled => "decoupled",
        }
    }
}

/// A specific amount of a credit entry applied against an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerApplication {
    /// Unique identifier.
    pub id: LedgerApplicationId,
    /// Credit entry the amount was taken from.
    pub entry_id: LedgerEntryId,
    /// Invoice the amount was applied to.
    pub invoice_id: InvoiceId,
    /// Applied amount (positive).
    pub amount: Decimal,
    /// When the credit was applied.
    pub applied_at: DateTime<Utc>,
    /// Who applied it.
    pub applied_by: UserId,
    /// Active or decoupled.
    pub status: ApplicationStatus,
}

impl LedgerApplication {
    /// Returns true while the application consumes credit.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ApplicationStatus::Active
    }
}

/// Immutable audit record of a decoupled application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoupling {
    /// Unique identifier.
    pub id: DecouplingId,
    /// Application that was decoupled.
    pub application_id: LedgerApplicationId,
    /// Entry the credit went back to.
    pub entry_id: LedgerEntryId,
    /// Invoice whose balance was restored.
    pub invoice_id: InvoiceId,
    /// Restored amount.
    pub amount: Decimal,
    /// Why the application was decoupled.
    pub reason: String,
    /// Who decoupled it.
    pub decoupled_by: UserId,
    /// When it was decoupled.
    pub decoupled_at: DateTime<Utc>,
}

/// Sum of the active applications of one entry.
#[must_use]
pub fn applied_total(applications: &[LedgerApplication], entry_id: LedgerEntryId) -> Decimal {
    applications
        .iter()
        .filter(|a| a.entry_id == entry_id && a.is_active())
        .map(|a| a.amount)
        .sum()
}

/// Sum of the active applications on one invoice.
#[must_use]
pub fn applied_to_invoice(applications: &[LedgerApplication], invoice_id: InvoiceId) -> Decimal {
    applications
        .iter()
        .filter(|a| a.invoice_id == invoice_id && a.is_active())
        .map(|a| a.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn application(entry_id: LedgerEntryId, invoice_id: InvoiceId, amount: Decimal) -> LedgerApplication {
        LedgerApplication {
            id: LedgerApplicationId::new(),
            entry_id,
            invoice_id,
            amount,
            applied_at: Utc::now(),
            applied_by: UserId::new(),
            status: ApplicationStatus::Active,
        }
    }

    #[test]
    fn test_totals_ignore_decoupled_applications() {
        let entry = LedgerEntryId::new();
        let invoice = InvoiceId::new();
        let mut decoupled = application(entry, invoice, dec!(15));
        decoupled.status = ApplicationStatus::Decoupled;
        let applications = vec![
            application(entry, invoice, dec!(10)),
            decoupled,
            application(LedgerEntryId::new(), invoice, dec!(5)),
        ];

        assert_eq!(applied_total(&applications, entry), dec!(10));
        assert_eq!(applied_to_invoice(&applications, invoice), dec!(15));
    }
}
