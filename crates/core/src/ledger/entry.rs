//! Student ledger entry domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cadence_shared::types::{CourseId, LedgerEntryId, StudentId, UserId};
use cadence_shared::types::money::round_money;

use super::application::{LedgerApplication, applied_total};
use super::error::LedgerError;
use super::reference::CorrectionReference;

/// Type of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Credit owed to the student, consumed by applying it to invoices.
    Credit,
    /// Extra charge to the student, posted to the balance directly.
    Debit,
}

impl EntryType {
    /// Returns the storage name of the entry type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }
}

/// Status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Nothing applied yet.
    Open,
    /// Part of the amount has been applied.
    PartiallyApplied,
    /// The full amount has been applied.
    FullyApplied,
    /// The entry has been reversed and no longer counts.
    Reversed,
}

impl EntryStatus {
    /// Derives the status of an entry from its amount and applied sum.
    ///
    /// This is the single place status is computed; every mutation path
    /// calls it after changing applications.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` when the amount is not positive, the
    /// applied sum is negative, or the applied sum exceeds the amount.
    pub fn derive(amount: Decimal, applied: Decimal) -> Result<Self, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvariantViolation(format!(
                "entry amount {amount} is not positive"
            )));
        }
        if applied < Decimal::ZERO {
            return Err(LedgerError::InvariantViolation(format!(
                "applied amount {applied} is negative"
            )));
        }
        if applied > amount {
            return Err(LedgerError::InvariantViolation(format!(
                "applied amount {applied} exceeds entry amount {amount}"
            )));
        }

        Ok(if applied.is_zero() {
            Self::Open
        } else if applied == amount {
            Self::FullyApplied
        } else {
            Self::PartiallyApplied
        })
    }

    /// Returns true if the entry may still be applied to invoices.
    #[must_use]
    pub fn has_remaining_credit(&self) -> bool {
        matches!(self, Self::Open | Self::PartiallyApplied)
    }

    /// Returns the storage name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::PartiallyApplied => "partially_applied",
            Self::FullyApplied => "fully_applied",
            Self::Reversed => "reversed",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of a reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReversal {
    /// Why the entry was reversed.
    pub reason: String,
    /// Who reversed it.
    pub reversed_by: UserId,
    /// When it was reversed.
    pub reversed_at: DateTime<Utc>,
}

/// A manual correction to a student's balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier for this entry.
    pub id: LedgerEntryId,
    /// Human-readable correction reference (`CR-2026-0007`).
    pub reference: CorrectionReference,
    /// Free-text description.
    pub description: String,
    /// Student whose balance is corrected.
    pub student_id: StudentId,
    /// Course the correction relates to, if any.
    pub course_id: Option<CourseId>,
    /// Positive amount; the sign follows from `entry_type`.
    pub amount: Decimal,
    /// Credit or debit.
    pub entry_type: EntryType,
    /// Current status.
    pub status: EntryStatus,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// Who created the entry.
    pub created_by: UserId,
    /// Reversal audit, present once reversed.
    pub reversal: Option<EntryReversal>,
}

impl LedgerEntry {
    /// Returns true for credit entries.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        self.entry_type == EntryType::Credit
    }

    /// Returns true once the entry has been reversed.
    #[must_use]
    pub fn is_reversed(&self) -> bool {
        self.reversal.is_some() || self.status == EntryStatus::Reversed
    }

    /// Returns the signed effect on what the student owes
    /// (negative for credit, positive for debit).
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Debit => self.amount,
            EntryType::Credit => -self.amount,
        }
    }

    /// Sum of this entry's active applications.
    #[must_use]
    pub fn applied_amount(&self, applications: &[LedgerApplication]) -> Decimal {
        applied_total(applications, self.id)
    }

    /// Credit still available for application.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the applications exceed the amount.
    pub fn available_credit(
        &self,
        applications: &[LedgerApplication],
    ) -> Result<Decimal, LedgerError> {
        if !self.is_credit() || self.is_reversed() {
            return Ok(Decimal::ZERO);
        }
        let applied = self.applied_amount(applications);
        EntryStatus::derive(self.amount, applied)?;
        Ok(self.amount - applied)
    }

    /// Status the entry should have for the given applied sum.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` for an impossible applied sum.
    pub fn status_for(&self, applied: Decimal) -> Result<EntryStatus, LedgerError> {
        if self.is_reversed() {
            if !applied.is_zero() {
                return Err(LedgerError::InvariantViolation(format!(
                    "reversed entry {} still has {applied} applied",
                    self.reference
                )));
            }
            return Ok(EntryStatus::Reversed);
        }
        EntryStatus::derive(self.amount, applied)
    }
}

/// Validates an amount entered by staff or produced by the invoicing run.
///
/// # Errors
///
/// Returns `InvalidAmount` for non-positive amounts or sub-cent precision.
pub fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO || round_money(amount) != amount {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}
