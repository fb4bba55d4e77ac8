//! Billing settings resolved from configuration.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

use cadence_core::ledger::DecouplePolicy;
use cadence_shared::BillingConfig;

use crate::error::RepositoryError;
use crate::retry::RetryPolicy;

/// Billing configuration in the form the repositories use it.
#[derive(Debug, Clone)]
pub struct BillingSettings {
    /// Whether credit may be decoupled from paid invoices.
    pub decouple_policy: DecouplePolicy,
    /// Retry behavior for conflicting transactions.
    pub retry: RetryPolicy,
    /// School timezone; decides "today" and the year of references.
    pub timezone: Tz,
    /// Days between issue date and due date.
    pub payment_term_days: u32,
    /// Apply available credit when issuing an invoice.
    pub auto_apply_credit: bool,
}

impl BillingSettings {
    /// Resolves the settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unknown timezone.
    pub fn from_config(config: &BillingConfig) -> Result<Self, RepositoryError> {
        let timezone = config.timezone.parse::<Tz>().map_err(|err| {
            RepositoryError::InvalidConfig(format!("unknown timezone {}: {err}", config.timezone))
        })?;
        Ok(Self {
            decouple_policy: DecouplePolicy::from(config),
            retry: RetryPolicy::from(config),
            timezone,
            payment_term_days: config.payment_term_days,
            auto_apply_credit: config.auto_apply_credit,
        })
    }

    /// The school's calendar date at `now`.
    #[must_use]
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Year a correction reference created at `now` belongs to.
    #[must_use]
    pub fn reference_year(&self, now: DateTime<Utc>) -> i32 {
        self.today(now).year()
    }
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            decouple_policy: DecouplePolicy::default(),
            retry: RetryPolicy::default(),
            timezone: chrono_tz::Europe::Amsterdam,
            payment_term_days: 14,
            auto_apply_credit: true,
        }
    }
}
