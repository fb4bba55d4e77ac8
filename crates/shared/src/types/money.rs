//! Money type with decimal precision and currency.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! This type wraps `rust_decimal::Decimal` for arbitrary precision.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places used for stored amounts.
pub const MONEY_SCALE: u32 = 2;

/// Rounds an amount to cents using banker's rounding (round half to even).
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Represents a monetary amount with currency.
///
/// Uses `Decimal` internally to avoid floating-point precision errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount in major units (e.g. euros), two decimal places.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

/// ISO 4217 currency codes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Euro
    #[default]
    Eur,
    /// US Dollar
    Usd,
    /// Pound Sterling
    Gbp,
    /// Swiss Franc
    Chf,
}

impl Money {
    /// Creates a new Money instance.
    #[must_use]
    pub const fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Creates a zero amount in the specified currency.
    #[must_use]
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Returns true if the amount is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is negative.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Returns the amount rounded to cents.
    #[must_use]
    pub fn rounded(self) -> Self {
        Self::new(round_money(self.amount), self.currency)
    }

    /// Adds two amounts of the same currency.
    ///
    /// Returns `None` when the currencies differ.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        (self.currency == other.currency).then(|| Self::new(self.amount + other.amount, self.currency))
    }

    /// Subtracts an amount of the same currency.
    ///
    /// Returns `None` when the currencies differ.
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        (self.currency == other.currency).then(|| Self::new(self.amount - other.amount, self.currency))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.currency, round_money(self.amount))
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eur => write!(f, "EUR"),
            Self::Usd => write!(f, "USD"),
            Self::Gbp => write!(f, "GBP"),
            Self::Chf => write!(f, "CHF"),
        }
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EUR" => Ok(Self::Eur),
            "USD" => Ok(Self::Usd),
            "GBP" => Ok(Self::Gbp),
            "CHF" => Ok(Self::Chf),
            _ => Err(format!("Unknown currency: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    #[test]
    fn test_money_zero() {
        let money = Money::zero(Currency::Eur);
        assert!(money.is_zero());
        assert!(!money.is_negative());
        assert_eq!(money.currency, Currency::Eur);
    }

    #[test]
    fn test_money_is_negative() {
        assert!(Money::new(dec!(-10), Currency::Eur).is_negative());
        assert!(!Money::new(dec!(10), Currency::Eur).is_negative());
        assert!(!Money::new(dec!(-0), Currency::Eur).is_negative());
    }

    #[test]
    fn test_round_money_bankers() {
        assert_eq!(round_money(dec!(2.345)), dec!(2.34));
        assert_eq!(round_money(dec!(2.355)), dec!(2.36));
        assert_eq!(round_money(dec!(21.0000)), dec!(21.00));
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Money::new(dec!(50.00), Currency::Eur);
        let b = Money::new(dec!(121.00), Currency::Eur);
        assert_eq!(b.checked_sub(a), Some(Money::new(dec!(71.00), Currency::Eur)));
        assert_eq!(a.checked_add(b), Some(Money::new(dec!(171.00), Currency::Eur)));
        assert_eq!(a.checked_add(Money::new(dec!(1), Currency::Usd)), None);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::new(dec!(71), Currency::Eur).to_string(), "EUR 71");
        assert_eq!(Money::new(dec!(12.345), Currency::Gbp).to_string(), "GBP 12.34");
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!(Currency::from_str("EUR").unwrap(), Currency::Eur);
        assert_eq!(Currency::from_str("eur").unwrap(), Currency::Eur);
        assert_eq!(Currency::from_str("CHF").unwrap(), Currency::Chf);
        assert!(Currency::from_str("XXX").is_err());
        assert_eq!(Currency::default(), Currency::Eur);
    }
}
