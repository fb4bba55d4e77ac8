//! Pure overlap rules for recurring time slots.

use chrono::{NaiveDate, NaiveTime};

use super::types::{TimeSlot, WeekParity};

/// `All` fits anything; `Odd` and `Even` only fit themselves.
#[must_use]
pub fn parities_compatible(a: WeekParity, b: WeekParity) -> bool {
    a == WeekParity::All || b == WeekParity::All || a == b
}

/// Half-open interval intersection: touching endpoints do not overlap.
#[must_use]
pub fn times_overlap(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && a_end > b_start
}

/// Two recurring slots collide when they share a weekday, their times
/// intersect and their week parities are compatible.
#[must_use]
pub fn has_time_slot_overlap(a: &TimeSlot, b: &TimeSlot) -> bool {
    a.day() == b.day()
        && times_overlap(a.start(), a.end(), b.start(), b.end())
        && parities_compatible(a.parity(), b.parity())
}

/// Parity of the ISO week containing `date`.
#[must_use]
pub fn iso_week_parity(date: NaiveDate) -> WeekParity {
    WeekParity::of_date(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use rstest::rstest;

    fn slot(day: Weekday, start: (u32, u32), end: (u32, u32), parity: WeekParity) -> TimeSlot {
        TimeSlot::new(
            day,
            NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            parity,
        )
        .unwrap()
    }

    #[test]
    fn test_touching_slots_do_not_overlap() {
        let a = slot(Weekday::Mon, (9, 0), (10, 0), WeekParity::All);
        let b = slot(Weekday::Mon, (10, 0), (11, 0), WeekParity::All);
        assert!(!has_time_slot_overlap(&a, &b));
        assert!(!has_time_slot_overlap(&b, &a));
    }

    #[test]
    fn test_intersecting_slots_overlap() {
        let a = slot(Weekday::Mon, (9, 0), (10, 30), WeekParity::All);
        let b = slot(Weekday::Mon, (10, 0), (11, 0), WeekParity::All);
        assert!(has_time_slot_overlap(&a, &b));
    }

    #[test]
    fn test_contained_slot_overlaps() {
        let a = slot(Weekday::Wed, (14, 0), (18, 0), WeekParity::All);
        let b = slot(Weekday::Wed, (15, 0), (15, 30), WeekParity::All);
        assert!(has_time_slot_overlap(&a, &b));
    }

    #[test]
    fn test_different_days_never_overlap() {
        let a = slot(Weekday::Mon, (9, 0), (10, 0), WeekParity::All);
        let b = slot(Weekday::Tue, (9, 0), (10, 0), WeekParity::All);
        assert!(!has_time_slot_overlap(&a, &b));
    }

    #[rstest]
    #[case(WeekParity::All, WeekParity::All, true)]
    #[case(WeekParity::All, WeekParity::Odd, true)]
    #[case(WeekParity::All, WeekParity::Even, true)]
    #[case(WeekParity::Odd, WeekParity::Odd, true)]
    #[case(WeekParity::Even, WeekParity::Even, true)]
    #[case(WeekParity::Odd, WeekParity::Even, false)]
    fn test_parity_matrix(#[case] a: WeekParity, #[case] b: WeekParity, #[case] expected: bool) {
        assert_eq!(parities_compatible(a, b), expected);
        assert_eq!(parities_compatible(b, a), expected);

        let left = slot(Weekday::Thu, (18, 0), (19, 0), a);
        let right = slot(Weekday::Thu, (18, 0), (19, 0), b);
        assert_eq!(has_time_slot_overlap(&left, &right), expected);
    }
}
