use chrono::NaiveDate;

use crate::models::AppointmentEntity;

/// Smallest positive number not present in `taken`.
///
/// `taken` must be sorted ascending; duplicates and non-positive values are
/// tolerated.
pub fn next_gap_number(taken: &[i32]) -> i32 {
    let mut candidate = 1;
    for &number in taken {
        if number == candidate {
            candidate += 1;
        } else if number > candidate {
            break;
        }
    }
    candidate
}

/// Whether an appointment needs a number for `today`'s queue.
///
/// A number issued for an earlier day is stale; a number for today is kept.
pub fn needs_number(appointment: &AppointmentEntity, today: NaiveDate) -> bool {
    appointment.daily_queue_number.is_none() || appointment.queue_date != Some(today)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn starts_at_one() {
        assert_eq!(next_gap_number(&[]), 1);
    }

    #[test]
    fn appends_after_a_dense_run() {
        assert_eq!(next_gap_number(&[1, 2, 3]), 4);
    }

    #[test]
    fn fills_the_first_gap() {
        assert_eq!(next_gap_number(&[1, 2, 4, 5]), 3);
        assert_eq!(next_gap_number(&[2, 3]), 1);
    }

    #[test]
    fn tolerates_duplicates_and_junk() {
        assert_eq!(next_gap_number(&[-1, 0, 1, 1, 2]), 3);
    }

    #[test]
    fn repeated_assignment_keeps_numbers_dense() {
        let mut taken = BTreeSet::new();
        for _ in 0..25 {
            let sorted: Vec<i32> = taken.iter().copied().collect();
            let number = next_gap_number(&sorted);
            assert!(taken.insert(number), "issued {number} twice");
        }
        let expected: BTreeSet<i32> = (1..=25).collect();
        assert_eq!(taken, expected);
    }

    #[test]
    fn freed_numbers_are_reused_first() {
        let mut taken: BTreeSet<i32> = (1..=6).collect();
        taken.remove(&2);
        taken.remove(&5);
        let sorted: Vec<i32> = taken.iter().copied().collect();
        assert_eq!(next_gap_number(&sorted), 2);
    }
}
