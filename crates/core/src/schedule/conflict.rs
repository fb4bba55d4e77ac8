//! Teacher, room and student conflict detection.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use cadence_shared::types::{CourseId, StudentId};

use super::overlap::has_time_slot_overlap;
use super::types::{Frequency, ScheduledCourse, WeekParity};

/// Why an existing course collides with the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Same teacher.
    Teacher,
    /// Same room.
    Room,
    /// Same teacher and same room.
    TeacherAndRoom,
    /// The student already attends it.
    Student,
}

/// A colliding course, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingCourse {
    /// Course ID.
    pub course_id: CourseId,
    /// Course name.
    pub name: String,
    /// Weekday.
    pub day: Weekday,
    /// Start time.
    pub start: NaiveTime,
    /// End time.
    pub end: NaiveTime,
    /// Weekly or biweekly.
    pub frequency: Frequency,
    /// Week parity.
    pub parity: WeekParity,
    /// What is shared.
    pub reason: ConflictReason,
}

impl ConflictingCourse {
    fn from_course(course: &ScheduledCourse, reason: ConflictReason) -> Self {
        Self {
            course_id: course.id,
            name: course.name.clone(),
            day: course.slot.day(),
            start: course.slot.start(),
            end: course.slot.end(),
            frequency: course.frequency,
            parity: course.slot.parity(),
            reason,
        }
    }
}

/// Outcome of a conflict check; an empty list means no conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCheck {
    /// Colliding courses.
    pub conflicts: Vec<ConflictingCourse>,
}

impl ConflictCheck {
    /// Returns true if anything collides.
    #[must_use]
    pub fn has_conflict(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Courses sharing the candidate's teacher, or its room when both have one,
/// in an overlapping slot. The candidate never conflicts with itself.
#[must_use]
pub fn find_teacher_or_room_conflicts(
    candidate: &ScheduledCourse,
    existing: &[ScheduledCourse],
) -> ConflictCheck {
    let conflicts = existing
        .iter()
        .filter(|course| course.id != candidate.id)
        .filter(|course| has_time_slot_overlap(&candidate.slot, &course.slot))
        .filter_map(|course| {
            let same_teacher = course.teacher_id == candidate.teacher_id;
            let same_room = matches!(
                (candidate.room_id, course.room_id),
                (Some(a), Some(b)) if a == b
            );
            let reason = match (same_teacher, same_room) {
                (true, true) => ConflictReason::TeacherAndRoom,
                (true, false) => ConflictReason::Teacher,
                (false, true) => ConflictReason::Room,
                (false, false) => return None,
            };
            Some(ConflictingCourse::from_course(course, reason))
        })
        .collect();
    ConflictCheck { conflicts }
}

/// Returns true if the candidate collides on teacher or room.
#[must_use]
pub fn has_teacher_or_room_conflict(candidate: &ScheduledCourse, existing: &[ScheduledCourse]) -> bool {
    find_teacher_or_room_conflicts(candidate, existing).has_conflict()
}

/// Courses of the student overlapping the candidate's slot.
#[must_use]
pub fn find_student_conflicts(
    candidate: &ScheduledCourse,
    student_courses: &[ScheduledCourse],
) -> ConflictCheck {
    let conflicts = student_courses
        .iter()
        .filter(|course| course.id != candidate.id)
        .filter(|course| has_time_slot_overlap(&candidate.slot, &course.slot))
        .map(|course| ConflictingCourse::from_course(course, ConflictReason::Student))
        .collect();
    ConflictCheck { conflicts }
}

/// Returns true if enrolling would double-book the student.
#[must_use]
pub fn has_student_schedule_conflict(
    candidate: &ScheduledCourse,
    student_courses: &[ScheduledCourse],
) -> bool {
    find_student_conflicts(candidate, student_courses).has_conflict()
}

/// Enrollment validation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentCheck {
    /// Student asking to enroll.
    pub student_id: StudentId,
    /// Course asked for.
    pub course_id: CourseId,
    /// Courses of the student it would collide with.
    pub conflicts: Vec<ConflictingCourse>,
}

impl EnrollmentCheck {
    /// Returns true if the enrollment may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Validates an enrollment against the student's active courses.
#[must_use]
pub fn check_enrollment(
    student_id: StudentId,
    candidate: &ScheduledCourse,
    active_courses: &[ScheduledCourse],
) -> EnrollmentCheck {
    EnrollmentCheck {
        student_id,
        course_id: candidate.id,
        conflicts: find_student_conflicts(candidate, active_courses).conflicts,
    }
}
