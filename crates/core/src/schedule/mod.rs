//! Schedule conflict detection.
//!
//! Pure functions over recurring time slots with week-parity semantics,
//! used by enrollment validation, course creation and bulk lesson
//! generation. Nothing here performs I/O or keeps state.

pub mod conflict;
pub mod error;
pub mod generation;
pub mod overlap;
pub mod types;

#[cfg(test)]
mod overlap_props;

pub use conflict::{
    ConflictCheck, ConflictReason, ConflictingCourse, EnrollmentCheck, check_enrollment,
    find_student_conflicts, find_teacher_or_room_conflicts, has_student_schedule_conflict,
    has_teacher_or_room_conflict,
};
pub use error::ScheduleError;
pub use generation::{
    LessonGeneration, ScheduledLesson, SkippedLesson, generate_lessons, occurrence_dates,
};
pub use overlap::{has_time_slot_overlap, iso_week_parity, parities_compatible};
pub use types::{Frequency, ScheduledCourse, TimeSlot, WeekParity};
