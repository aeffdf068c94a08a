//! Credit card billing cycle resolution.

use chrono::{Days, NaiveDate};
use serde::Serialize;

use tally_core::CreditCardBilling;

use crate::calendar::{clamped_date_at, month_index};
use crate::error::ScheduleError;

/// Days between the reminder and the payment due date.
pub const REMINDER_LEAD_DAYS: u64 = 1;

/// The billing cycle a reference date falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingCycle {
    /// Statement close preceding the due date. Informational only.
    pub closing_date: Option<NaiveDate>,
    pub due_date: NaiveDate,
}

impl BillingCycle {
    /// The single day on which a reminder for this cycle may fire.
    pub fn reminder_date(&self) -> Option<NaiveDate> {
        self.due_date.checked_sub_days(Days::new(REMINDER_LEAD_DAYS))
    }

    pub fn is_reminder_day(&self, today: NaiveDate) -> bool {
        self.reminder_date() == Some(today)
    }
}

/// Resolve the cycle whose due date is the next one on or after `reference`.
///
/// The due day is clamped to the due month's length; if it already passed
/// this month the cycle rolls to next month. The closing date is the latest
/// clamped `closing_day` strictly before the due date.
pub fn current_cycle(
    card: &CreditCardBilling,
    reference: NaiveDate,
) -> Result<BillingCycle, ScheduleError> {
    let due_day = ScheduleError::check_range("due_day", card.due_day, 1, 31)?;
    let closing_day = card
        .closing_day
        .map(|day| ScheduleError::check_range("closing_day", day, 1, 31))
        .transpose()?;

    let overflow = ScheduleError::DateOverflow(reference);
    let mut due_index = month_index(reference);
    let mut due_date = clamped_date_at(due_index, due_day).ok_or(overflow.clone())?;
    if due_date < reference {
        due_index += 1;
        due_date = clamped_date_at(due_index, due_day).ok_or(overflow.clone())?;
    }

    let closing_date = match closing_day {
        Some(day) => {
            let same_month = clamped_date_at(due_index, day).ok_or(overflow.clone())?;
            if same_month < due_date {
                Some(same_month)
            } else {
                Some(clamped_date_at(due_index - 1, day).ok_or(overflow)?)
            }
        }
        None => None,
    };

    Ok(BillingCycle { closing_date, due_date })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn card(due_day: u32, closing_day: Option<u32>) -> CreditCardBilling {
        CreditCardBilling {
            id: "card-1".into(),
            user_id: "user-1".into(),
            name: Some("Visa".into()),
            currency: "USD".into(),
            closing_day,
            due_day,
        }
    }

    #[test]
    fn due_date_this_month_when_not_passed() {
        let cycle = current_cycle(&card(15, None), d(2024, 3, 14)).unwrap();
        assert_eq!(cycle.due_date, d(2024, 3, 15));
        assert!(cycle.is_reminder_day(d(2024, 3, 14)));
        assert_eq!(cycle.closing_date, None);
    }

    #[test]
    fn due_day_itself_is_not_passed() {
        let cycle = current_cycle(&card(15, None), d(2024, 3, 15)).unwrap();
        assert_eq!(cycle.due_date, d(2024, 3, 15));
        assert!(!cycle.is_reminder_day(d(2024, 3, 15)));
    }

    #[test]
    fn rolls_to_next_month_after_due_day() {
        let cycle = current_cycle(&card(15, None), d(2024, 3, 16)).unwrap();
        assert_eq!(cycle.due_date, d(2024, 4, 15));
    }

    #[test]
    fn rolls_across_year_end() {
        let cycle = current_cycle(&card(1, None), d(2024, 12, 31)).unwrap();
        assert_eq!(cycle.due_date, d(2025, 1, 1));
        assert!(cycle.is_reminder_day(d(2024, 12, 31)));
    }

    #[test]
    fn due_day_clamps_to_short_month() {
        let cycle = current_cycle(&card(31, None), d(2023, 2, 10)).unwrap();
        assert_eq!(cycle.due_date, d(2023, 2, 28));
        assert!(cycle.is_reminder_day(d(2023, 2, 27)));

        let cycle = current_cycle(&card(31, None), d(2024, 4, 30)).unwrap();
        assert_eq!(cycle.due_date, d(2024, 4, 30));
    }

    #[test]
    fn closing_date_precedes_due_date() {
        // Closes on the 25th, due on the 10th of the following month.
        let cycle = current_cycle(&card(10, Some(25)), d(2024, 3, 5)).unwrap();
        assert_eq!(cycle.due_date, d(2024, 3, 10));
        assert_eq!(cycle.closing_date, Some(d(2024, 2, 25)));

        // Closes on the 5th, due on the 25th of the same month.
        let cycle = current_cycle(&card(25, Some(5)), d(2024, 3, 5)).unwrap();
        assert_eq!(cycle.closing_date, Some(d(2024, 3, 5)));
    }

    #[test]
    fn closing_day_clamps_in_previous_month() {
        let cycle = current_cycle(&card(5, Some(31)), d(2024, 3, 1)).unwrap();
        assert_eq!(cycle.due_date, d(2024, 3, 5));
        assert_eq!(cycle.closing_date, Some(d(2024, 2, 29)));
    }

    #[test]
    fn invalid_days_are_rejected() {
        assert!(matches!(
            current_cycle(&card(0, None), d(2024, 1, 1)),
            Err(ScheduleError::OutOfRange { field: "due_day", .. })
        ));
        assert!(matches!(
            current_cycle(&card(10, Some(40)), d(2024, 1, 1)),
            Err(ScheduleError::OutOfRange { field: "closing_day", .. })
        ));
    }
}
