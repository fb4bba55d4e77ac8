//! Sequential invoice numbers (`2026-07`, credit invoices `C2026-03`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::InvoiceError;

/// Prefix marking the credit invoice series.
pub const CREDIT_PREFIX: &str = "C";

/// Numbering series; each runs its own per-year sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceSeries {
    /// Normal invoices.
    Standard,
    /// Credit invoices.
    Credit,
}

impl InvoiceSeries {
    /// Returns the storage name of the series.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Credit => "credit",
        }
    }

    const fn prefix(self) -> &'static str {
        match self {
            Self::Standard => "",
            Self::Credit => CREDIT_PREFIX,
        }
    }
}

/// An invoice number: series, year and sequence (at least two digits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber {
    series: InvoiceSeries,
    year: i32,
    sequence: u32,
}

impl InvoiceNumber {
    /// Creates an invoice number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidNumber` for a year that is not four digits or a zero
    /// sequence.
    pub fn new(series: InvoiceSeries, year: i32, sequence: u32) -> Result<Self, InvoiceError> {
        if !(1000..=9999).contains(&year) || sequence == 0 {
            return Err(InvoiceError::InvalidNumber(format!(
                "{}{year}-{sequence:02}",
                series.prefix()
            )));
        }
        Ok(Self {
            series,
            year,
            sequence,
        })
    }

    /// The series this number belongs to.
    #[must_use]
    pub const fn series(&self) -> InvoiceSeries {
        self.series
    }

    /// The year the number is scoped to.
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// The sequence within series and year.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The following number in the same series and year.
    ///
    /// # Errors
    ///
    /// Returns `NumberSequenceExhausted` on overflow.
    pub fn next(&self) -> Result<Self, InvoiceError> {
        let sequence = self
            .sequence
            .checked_add(1)
            .ok_or(InvoiceError::NumberSequenceExhausted(self.year))?;
        Ok(Self { sequence, ..*self })
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-{:02}", self.series.prefix(), self.year, self.sequence)
    }
}

impl FromStr for InvoiceNumber {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvoiceError::InvalidNumber(s.to_string());
        let (series, rest) = match s.strip_prefix(CREDIT_PREFIX) {
            Some(rest) => (InvoiceSeries::Credit, rest),
            None => (InvoiceSeries::Standard, s),
        };
        let (year, sequence) = rest.split_once('-').ok_or_else(invalid)?;
        let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if year.len() != 4 || sequence.len() < 2 || !digits(year) || !digits(sequence) {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let sequence = sequence.parse::<u32>().map_err(|_| invalid())?;
        Self::new(series, year, sequence)
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = InvoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InvoiceNumber> for String {
    fn from(value: InvoiceNumber) -> Self {
        value.to_string()
    }
}
