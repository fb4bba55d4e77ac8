//! FIFO allocation of available credit against a target amount.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use cadence_shared::types::LedgerEntryId;

use super::reference::CorrectionReference;

/// A credit entry with credit left to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditSource {
    /// Entry holding the credit.
    pub entry_id: LedgerEntryId,
    /// Entry reference, breaking ties between equal timestamps.
    pub reference: CorrectionReference,
    /// Entry creation time.
    pub created_at: DateTime<Utc>,
    /// Credit still available on the entry.
    pub available: Decimal,
}

/// Amount taken from one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Entry the amount is taken from.
    pub entry_id: LedgerEntryId,
    /// Amount taken.
    pub amount: Decimal,
}

/// Takes up to `target` from the sources, oldest first.
///
/// Sources are consumed in `(created_at, reference)` order; each gives
/// `min(available, remaining)`. Allocation stops when the target is met or
/// the sources run out, so the result may fall short of the target.
#[must_use]
pub fn allocate_fifo(sources: &[CreditSource], target: Decimal) -> Vec<Allocation> {
    let mut ordered: Vec<&CreditSource> = sources
        .iter()
        .filter(|s| s.available > Decimal::ZERO)
        .collect();
    ordered.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.reference.cmp(&b.reference))
    });

    let mut remaining = target;
    let mut allocations = Vec::new();
    for source in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        let amount = source.available.min(remaining);
        allocations.push(Allocation {
            entry_id: source.entry_id,
            amount,
        });
        remaining -= amount;
    }
    allocations
}

/// Sum of the allocated amounts.
#[must_use]
pub fn allocated_total(allocations: &[Allocation]) -> Decimal {
    allocations.iter().map(|a| a.amount).sum()
}
