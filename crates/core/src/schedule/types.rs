//! Schedule value types: week parity, frequency, time slots and courses.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use cadence_shared::types::{CourseId, RoomId, TeacherId};

use super::error::ScheduleError;

/// Which ISO weeks a commitment occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekParity {
    /// Every week.
    All,
    /// Odd ISO weeks.
    Odd,
    /// Even ISO weeks.
    Even,
}

impl WeekParity {
    /// Parity of the ISO week containing `date` (never `All`).
    #[must_use]
    pub fn of_date(date: NaiveDate) -> Self {
        if date.iso_week().week() % 2 == 1 {
            Self::Odd
        } else {
            Self::Even
        }
    }

    /// Returns the storage name of the parity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Odd => "odd",
            Self::Even => "even",
        }
    }
}

impl fmt::Display for WeekParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a course meets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Every week.
    Weekly,
    /// Every other week.
    Biweekly,
}

impl Frequency {
    /// Returns the storage name of the frequency.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Biweekly => "biweekly",
        }
    }

    /// Checks that `parity` fits this frequency: weekly courses use `All`,
    /// biweekly courses `Odd` or `Even`.
    ///
    /// # Errors
    ///
    /// Returns `ParityMismatch` otherwise.
    pub fn validate_parity(self, parity: WeekParity) -> Result<(), ScheduleError> {
        let fits = match self {
            Self::Weekly => parity == WeekParity::All,
            Self::Biweekly => parity != WeekParity::All,
        };
        if fits {
            Ok(())
        } else {
            Err(ScheduleError::ParityMismatch {
                frequency: self,
                parity,
            })
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurring weekly time slot `[start, end)` on one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    day: Weekday,
    start: NaiveTime,
    end: NaiveTime,
    parity: WeekParity,
}

impl TimeSlot {
    /// Creates a slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTimeRange` unless `start < end`.
    pub fn new(
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
        parity: WeekParity,
    ) -> Result<Self, ScheduleError> {
        if start >= end {
            return Err(ScheduleError::InvalidTimeRange { start, end });
        }
        Ok(Self {
            day,
            start,
            end,
            parity,
        })
    }

    /// Day of week.
    #[must_use]
    pub const fn day(&self) -> Weekday {
        self.day
    }

    /// Inclusive start.
    #[must_use]
    pub const fn start(&self) -> NaiveTime {
        self.start
    }

    /// Exclusive end.
    #[must_use]
    pub const fn end(&self) -> NaiveTime {
        self.end
    }

    /// Week parity.
    #[must_use]
    pub const fn parity(&self) -> WeekParity {
        self.parity
    }
}

/// A course as the conflict detector sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCourse {
    /// Course ID.
    pub id: CourseId,
    /// Display name.
    pub name: String,
    /// Teaching teacher.
    pub teacher_id: TeacherId,
    /// Room, if the course uses one.
    pub room_id: Option<RoomId>,
    /// Weekly slot.
    pub slot: TimeSlot,
    /// Weekly or biweekly.
    pub frequency: Frequency,
    /// First day of the course.
    pub starts_on: NaiveDate,
    /// Last day of the course, open-ended when absent.
    pub ends_on: Option<NaiveDate>,
}

impl ScheduledCourse {
    /// Creates a course after checking name, parity and date range.
    ///
    /// # Errors
    ///
    /// Returns `NameRequired`, `ParityMismatch` or `InvalidDateRange`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CourseId,
        name: impl Into<String>,
        teacher_id: TeacherId,
        room_id: Option<RoomId>,
        slot: TimeSlot,
        frequency: Frequency,
        starts_on: NaiveDate,
        ends_on: Option<NaiveDate>,
    ) -> Result<Self, ScheduleError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ScheduleError::NameRequired);
        }
        frequency.validate_parity(slot.parity())?;
        if let Some(to) = ends_on
            && to < starts_on
        {
            return Err(ScheduleError::InvalidDateRange {
                from: starts_on,
                to,
            });
        }
        Ok(Self {
            id,
            name,
            teacher_id,
            room_id,
            slot,
            frequency,
            starts_on,
            ends_on,
        })
    }

    /// Returns true if the course meets on `date`.
    #[must_use]
    pub fn meets_on(&self, date: NaiveDate) -> bool {
        date >= self.starts_on
            && self.ends_on.is_none_or(|end| date <= end)
            && date.weekday() == self.slot.day()
            && match self.slot.parity() {
                WeekParity::All => true,
                parity => WeekParity::of_date(date) == parity,
            }
    }
}
