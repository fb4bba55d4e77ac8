//! Materializing recurring courses into dated lessons.
//!
//! Weekly courses produce a lesson on every matching weekday, biweekly
//! courses only in weeks of their ISO parity. A lesson colliding with an
//! already scheduled lesson of the same teacher or room (including lessons
//! generated earlier in the same run) is skipped; the rest are still
//! created.

use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use cadence_shared::types::{CourseId, LessonId, RoomId, TeacherId};

use super::error::ScheduleError;
use super::overlap::times_overlap;
use super::types::ScheduledCourse;

/// A dated lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledLesson {
    /// Lesson ID.
    pub id: LessonId,
    /// Course the lesson belongs to.
    pub course_id: CourseId,
    /// Teacher.
    pub teacher_id: TeacherId,
    /// Room.
    pub room_id: Option<RoomId>,
    /// Date.
    pub date: NaiveDate,
    /// Start time.
    pub start: NaiveTime,
    /// End time.
    pub end: NaiveTime,
}

impl ScheduledLesson {
    /// Returns true if both lessons need the same teacher or room at
    /// overlapping times on the same day.
    #[must_use]
    pub fn collides_with(&self, other: &Self) -> bool {
        let shares_resource = self.teacher_id == other.teacher_id
            || matches!((self.room_id, other.room_id), (Some(a), Some(b)) if a == b);
        self.date == other.date
            && shares_resource
            && times_overlap(self.start, self.end, other.start, other.end)
    }
}

/// A lesson that was not created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLesson {
    /// Course of the skipped lesson.
    pub course_id: CourseId,
    /// Date of the skipped lesson.
    pub date: NaiveDate,
    /// Lesson it collided with.
    pub conflicting_lesson_id: LessonId,
}

/// Result of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonGeneration {
    /// Lessons to create.
    pub created: Vec<ScheduledLesson>,
    /// Lessons skipped because of a collision.
    pub skipped: Vec<SkippedLesson>,
}

/// Dates in `[from, to]` on which the course meets.
///
/// # Errors
///
/// Returns `InvalidDateRange` when `to < from`.
pub fn occurrence_dates(
    course: &ScheduledCourse,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<NaiveDate>, ScheduleError> {
    if to < from {
        return Err(ScheduleError::InvalidDateRange { from, to });
    }
    let mut dates = Vec::new();
    let mut day = from;
    while day <= to {
        if course.meets_on(day) {
            dates.push(day);
        }
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    Ok(dates)
}

/// Generates lessons for the courses in `[from, to]`, skipping collisions
/// with `existing` lessons and with lessons generated earlier in the run.
///
/// Courses are processed in the given order; dates ascending per course.
///
/// # Errors
///
/// Returns `InvalidDateRange` when `to < from`.
pub fn generate_lessons(
    courses: &[ScheduledCourse],
    existing: &[ScheduledLesson],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<LessonGeneration, ScheduleError> {
    let mut generation = LessonGeneration::default();
    for course in courses {
        for date in occurrence_dates(course, from, to)? {
            let lesson = ScheduledLesson {
                id: LessonId::new(),
                course_id: course.id,
                teacher_id: course.teacher_id,
                room_id: course.room_id,
                date,
                start: course.slot.start(),
                end: course.slot.end(),
            };
            let collision = existing
                .iter()
                .chain(generation.created.iter())
                .find(|other| lesson.collides_with(other))
                .map(|other| other.id);
            match collision {
                Some(conflicting_lesson_id) => generation.skipped.push(SkippedLesson {
                    course_id: course.id,
                    date,
                    conflicting_lesson_id,
                }),
                None => generation.created.push(lesson),
            }
        }
    }
    Ok(generation)
}
