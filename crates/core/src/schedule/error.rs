//! Schedule validation errors.
//!
//! Conflict detection itself never fails; these errors cover building the
//! slots and courses it runs on.

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

use cadence_shared::AppError;

use super::types::{Frequency, WeekParity};

/// Errors raised while building schedule descriptors.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Start time must be before end time.
    #[error("Invalid time range {start}-{end}: start must be before end")]
    InvalidTimeRange {
        /// Start time.
        start: NaiveTime,
        /// End time.
        end: NaiveTime,
    },

    /// Frequency and week parity do not fit together.
    #[error("{frequency} course cannot use week parity {parity}")]
    ParityMismatch {
        /// Course frequency.
        frequency: Frequency,
        /// Requested parity.
        parity: WeekParity,
    },

    /// Date range ends before it starts.
    #[error("Invalid date range {from} to {to}")]
    InvalidDateRange {
        /// First day.
        from: NaiveDate,
        /// Last day.
        to: NaiveDate,
    },

    /// Course name is empty.
    #[error("Course name is required")]
    NameRequired,
}

impl ScheduleError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTimeRange { .. } => "INVALID_TIME_RANGE",
            Self::ParityMismatch { .. } => "PARITY_MISMATCH",
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Self::NameRequired => "NAME_REQUIRED",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        400
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        Self::Validation(err.to_string())
    }
}
