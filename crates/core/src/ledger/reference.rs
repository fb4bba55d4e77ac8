//! Year-scoped correction references (`CR-2026-0007`).
//!
//! The pure part of reference generation: formatting, parsing and
//! incrementing. Allocation under concurrency is the job of whoever owns
//! the counter (an atomic counter row in the database, or
//! [`CorrectionSequence`] for an in-memory book).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Prefix of every correction reference.
pub const CORRECTION_PREFIX: &str = "CR";

/// Highest sequence number a year can hold (four digits).
pub const MAX_SEQUENCE: u32 = 9999;

/// A correction reference: prefix, year and four-digit sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrectionReference {
    year: i32,
    sequence: u32,
}

impl CorrectionReference {
    /// Creates a reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` when the year is not four digits or the
    /// sequence is outside `1..=9999`.
    pub fn new(year: i32, sequence: u32) -> Result<Self, LedgerError> {
        if !(1000..=9999).contains(&year) || !(1..=MAX_SEQUENCE).contains(&sequence) {
            return Err(LedgerError::InvalidReference(format!(
                "{CORRECTION_PREFIX}-{year}-{sequence:04}"
            )));
        }
        Ok(Self { year, sequence })
    }

    /// First reference of a year.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` for a year that is not four digits.
    pub fn first_of(year: i32) -> Result<Self, LedgerError> {
        Self::new(year, 1)
    }

    /// The year this reference is scoped to.
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// The sequence number within the year.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The following reference in the same year.
    ///
    /// # Errors
    ///
    /// Returns `ReferenceSequenceExhausted` after `9999`.
    pub fn next(&self) -> Result<Self, LedgerError> {
        if self.sequence >= MAX_SEQUENCE {
            return Err(LedgerError::ReferenceSequenceExhausted(self.year));
        }
        Ok(Self {
            year: self.year,
            sequence: self.sequence + 1,
        })
    }

    /// Next reference for `year` given the references issued so far.
    ///
    /// # Errors
    ///
    /// Returns an error when the year is invalid or exhausted.
    pub fn next_after<'a>(
        year: i32,
        existing: impl IntoIterator<Item = &'a CorrectionReference>,
    ) -> Result<Self, LedgerError> {
        existing
            .into_iter()
            .filter(|r| r.year == year)
            .max()
            .map_or_else(|| Self::first_of(year), Self::next)
    }
}

impl fmt::Display for CorrectionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CORRECTION_PREFIX}-{}-{:04}", self.year, self.sequence)
    }
}

impl FromStr for CorrectionReference {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LedgerError::InvalidReference(s.to_string());
        let mut parts = s.split('-');
        let (Some(prefix), Some(year), Some(sequence), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if prefix != CORRECTION_PREFIX || year.len() != 4 || sequence.len() != 4 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let sequence = sequence.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, sequence)
    }
}

impl TryFrom<String> for CorrectionReference {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CorrectionReference> for String {
    fn from(value: CorrectionReference) -> Self {
        value.to_string()
    }
}

/// In-memory per-year counter handing out gap-free references.
#[derive(Debug, Clone, Default)]
pub struct CorrectionSequence {
    last: BTreeMap<i32, u32>,
}

impl CorrectionSequence {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequence continuing after already issued references.
    #[must_use]
    pub fn seeded_from<'a>(existing: impl IntoIterator<Item = &'a CorrectionReference>) -> Self {
        let mut last = BTreeMap::new();
        for reference in existing {
            let slot = last.entry(reference.year).or_insert(0);
            *slot = (*slot).max(reference.sequence);
        }
        Self { last }
    }

    /// Allocates the next reference for `year`.
    ///
    /// # Errors
    ///
    /// Returns an error when the year is invalid or exhausted.
    pub fn allocate(&mut self, year: i32) -> Result<CorrectionReference, LedgerError> {
        let next = match self.last.get(&year) {
            Some(&sequence) => CorrectionReference::new(year, sequence)?.next()?,
            None => CorrectionReference::first_of(year)?,
        };
        self.last.insert(year, next.sequence);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse() {
        let reference = CorrectionReference::new(2026, 7).unwrap();
        assert_eq!(reference.to_string(), "CR-2026-0007");
        assert_eq!("CR-2026-0007".parse::<CorrectionReference>().unwrap(), reference);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "CR-2026", "CR-2026-7", "XX-2026-0007", "CR-26-0007", "CR-2026-0000", "CR-2026-0007-1"] {
            assert!(
                input.parse::<CorrectionReference>().is_err(),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_next_after_picks_highest_of_year() {
        let existing = vec![
            CorrectionReference::new(2025, 41).unwrap(),
            CorrectionReference::new(2026, 3).unwrap(),
            CorrectionReference::new(2026, 12).unwrap(),
        ];
        let next = CorrectionReference::next_after(2026, &existing).unwrap();
        assert_eq!(next.to_string(), "CR-2026-0013");

        let fresh = CorrectionReference::next_after(2027, &existing).unwrap();
        assert_eq!(fresh.to_string(), "CR-2027-0001");
    }

    #[test]
    fn test_sequence_exhaustion() {
        let last = CorrectionReference::new(2026, MAX_SEQUENCE).unwrap();
        assert!(matches!(
            last.next(),
            Err(LedgerError::ReferenceSequenceExhausted(2026))
        ));
    }

    #[test]
    fn test_sequential_allocation_has_no_gaps() {
        let mut sequence = CorrectionSequence::new();
        let refs: Vec<_> = (0..3).map(|_| sequence.allocate(2026).unwrap()).collect();
        let suffixes: Vec<u32> = refs.iter().map(CorrectionReference::sequence).collect();
        assert_eq!(suffixes, vec![1, 2, 3]);
        assert_eq!(refs[2].to_string(), "CR-2026-0003");
        assert_eq!(sequence.allocate(2027).unwrap().to_string(), "CR-2027-0001");
    }

    #[test]
    fn test_seeded_sequence_continues() {
        let existing = [CorrectionReference::new(2026, 9).unwrap()];
        let mut sequence = CorrectionSequence::seeded_from(&existing);
        assert_eq!(sequence.allocate(2026).unwrap().sequence(), 10);
    }

    #[test]
    fn test_ordering_follows_year_then_sequence() {
        let a = CorrectionReference::new(2025, 9999).unwrap();
        let b = CorrectionReference::new(2026, 1).unwrap();
        assert!(a < b);
    }
}
