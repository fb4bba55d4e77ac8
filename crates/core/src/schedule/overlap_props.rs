//! Property-based tests for slot overlap.

use chrono::{NaiveTime, Weekday};
use proptest::prelude::*;

use super::overlap::{has_time_slot_overlap, parities_compatible};
use super::types::{TimeSlot, WeekParity};

fn weekday() -> impl Strategy<Value = Weekday> {
    (0u8..7).prop_map(|d| match d {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    })
}

fn parity() -> impl Strategy<Value = WeekParity> {
    prop_oneof![Just(WeekParity::All), Just(WeekParity::Odd), Just(WeekParity::Even)]
}

/// Slots on a five-minute grid between 08:00 and 22:00.
fn slot() -> impl Strategy<Value = TimeSlot> {
    (weekday(), 96u32..264, 1u32..24, parity()).prop_map(|(day, start, length, parity)| {
        let end = (start + length).min(264);
        let to_time = |step: u32| NaiveTime::from_hms_opt(step / 12, (step % 12) * 5, 0).unwrap();
        TimeSlot::new(day, to_time(start), to_time(end.max(start + 1)), parity).unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Overlap is symmetric.
    #[test]
    fn prop_overlap_symmetric(a in slot(), b in slot()) {
        prop_assert_eq!(has_time_slot_overlap(&a, &b), has_time_slot_overlap(&b, &a));
    }

    /// A slot overlaps itself.
    #[test]
    fn prop_overlap_reflexive(a in slot()) {
        prop_assert!(has_time_slot_overlap(&a, &a));
    }

    /// A slot starting where another ends never overlaps it.
    #[test]
    fn prop_touching_slots_do_not_overlap(a in slot(), length in 1u32..60, p in parity()) {
        let start = a.end();
        let end = start + chrono::Duration::minutes(i64::from(length));
        prop_assume!(end > start);
        let b = TimeSlot::new(a.day(), start, end, p).unwrap();
        prop_assert!(!has_time_slot_overlap(&a, &b));
    }

    /// Overlap implies same day and compatible parities.
    #[test]
    fn prop_overlap_requires_day_and_parity(a in slot(), b in slot()) {
        if has_time_slot_overlap(&a, &b) {
            prop_assert_eq!(a.day(), b.day());
            prop_assert!(parities_compatible(a.parity(), b.parity()));
        }
    }
}
