// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Due-date calculation for recurring templates.

use chrono::{DateTime, Days, Months, Utc};

use crate::types::Frequency;

/// Next due timestamp for `frequency`, measured from `from` (or now).
///
/// Month arithmetic keeps the day-of-month and clamps to the target month's
/// length, so Jan 31 + 1 month is Feb 28 (or 29). Returns `None` for
/// `as_needed`, which is never scheduled automatically.
pub fn next_due_date(frequency: Frequency, from: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let from = from.unwrap_or_else(Utc::now);
    match frequency {
        Frequency::Daily => from.checked_add_days(Days::new(1)),
        Frequency::Weekly => from.checked_add_days(Days::new(7)),
        Frequency::Monthly => from.checked_add_months(Months::new(1)),
        Frequency::Quarterly => from.checked_add_months(Months::new(3)),
        Frequency::Yearly | Frequency::Annual => from.checked_add_months(Months::new(12)),
        Frequency::EveryThreeYears => from.checked_add_months(Months::new(36)),
        Frequency::AsNeeded => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_fixed_offsets() {
        let base = at(2025, 3, 10);
        assert_eq!(next_due_date(Frequency::Daily, Some(base)), Some(at(2025, 3, 11)));
        assert_eq!(next_due_date(Frequency::Weekly, Some(base)), Some(at(2025, 3, 17)));
        assert_eq!(
            next_due_date(Frequency::Quarterly, Some(base)),
            Some(at(2025, 6, 10))
        );
        assert_eq!(next_due_date(Frequency::Yearly, Some(base)), Some(at(2026, 3, 10)));
        assert_eq!(next_due_date(Frequency::Annual, Some(base)), Some(at(2026, 3, 10)));
        assert_eq!(
            next_due_date(Frequency::EveryThreeYears, Some(base)),
            Some(at(2028, 3, 10))
        );
    }

    #[test]
    fn test_monthly_clamps_to_end_of_february() {
        assert_eq!(
            next_due_date(Frequency::Monthly, Some(at(2025, 1, 31))),
            Some(at(2025, 2, 28))
        );
        assert_eq!(
            next_due_date(Frequency::Monthly, Some(at(2024, 1, 31))),
            Some(at(2024, 2, 29))
        );
    }

    #[test]
    fn test_yearly_from_leap_day() {
        assert_eq!(
            next_due_date(Frequency::Yearly, Some(at(2024, 2, 29))),
            Some(at(2025, 2, 28))
        );
    }

    #[test]
    fn test_as_needed_has_no_due_date() {
        assert_eq!(next_due_date(Frequency::AsNeeded, Some(at(2025, 1, 1))), None);
        assert_eq!(next_due_date(Frequency::AsNeeded, None), None);
    }

    #[test]
    fn test_defaults_to_now() {
        let before = Utc::now();
        let due = next_due_date(Frequency::Daily, None).unwrap();
        assert!(due >= before + chrono::Duration::days(1));
    }
}
