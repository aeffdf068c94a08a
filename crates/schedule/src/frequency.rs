//! Occurrence resolution for recurrence rules.
//!
//! A rule's nominal occurrences form a lattice anchored on its start date:
//! the first matching date on or after `start_date`, then every `interval`
//! periods. The weekend policy is applied to each nominal date; the resolver
//! returns the first adjusted date strictly after the reference date, so
//! forward progress holds for every policy.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use tally_core::{FrequencySpec, FrequencyType, RecurrenceRule, WeekendHandling};

use crate::calendar::{clamped_date, clamped_date_at, is_weekend, month_index, weekday_from_index};
use crate::error::ScheduleError;

/// Max lattice points examined for one lookup before giving up.
const MAX_SCAN: u32 = 512;

/// Days to look back from the reference date; a weekend shift moves a date
/// by at most two days.
const SHIFT_SLACK_DAYS: u64 = 3;

/// Typed recurrence frequency; each variant carries only its own fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily { interval: u32 },
    Weekly { weekday: Weekday, interval: u32 },
    Monthly { day: u32, interval: u32 },
    Yearly { month: u32, day: u32, interval: u32 },
}

impl Frequency {
    pub fn interval(&self) -> u32 {
        match *self {
            Frequency::Daily { interval }
            | Frequency::Weekly { interval, .. }
            | Frequency::Monthly { interval, .. }
            | Frequency::Yearly { interval, .. } => interval,
        }
    }
}

impl TryFrom<&FrequencySpec> for Frequency {
    type Error = ScheduleError;

    fn try_from(spec: &FrequencySpec) -> Result<Self, Self::Error> {
        let interval = match spec.interval.unwrap_or(1) {
            0 => return Err(ScheduleError::ZeroInterval),
            n => n,
        };
        let day = |kind| {
            spec.day
                .ok_or(ScheduleError::MissingField { kind, field: "day" })
                .and_then(|d| ScheduleError::check_range("day", d, 1, 31))
        };

        Ok(match spec.kind {
            FrequencyType::Daily => Frequency::Daily { interval },
            FrequencyType::Weekly => {
                let index = spec.day_of_week.ok_or(ScheduleError::MissingField {
                    kind: "weekly",
                    field: "dayOfWeek",
                })?;
                let weekday = weekday_from_index(index).ok_or(ScheduleError::OutOfRange {
                    field: "dayOfWeek",
                    value: index,
                    min: 0,
                    max: 6,
                })?;
                Frequency::Weekly { weekday, interval }
            }
            FrequencyType::Monthly => Frequency::Monthly { day: day("monthly")?, interval },
            FrequencyType::Yearly => {
                let month = spec
                    .month
                    .ok_or(ScheduleError::MissingField { kind: "yearly", field: "month" })
                    .and_then(|m| ScheduleError::check_range("month", m, 1, 12))?;
                Frequency::Yearly { month, day: day("yearly")?, interval }
            }
        })
    }
}

/// Apply a weekend policy to a nominal date. `None` means the occurrence is
/// skipped.
pub fn apply_weekend_policy(date: NaiveDate, policy: WeekendHandling) -> Option<NaiveDate> {
    if !is_weekend(date) {
        return Some(date);
    }
    let saturday = date.weekday() == Weekday::Sat;
    match policy {
        WeekendHandling::None => Some(date),
        WeekendHandling::ShiftForward => {
            date.checked_add_days(Days::new(if saturday { 2 } else { 1 }))
        }
        WeekendHandling::ShiftBackward => {
            date.checked_sub_days(Days::new(if saturday { 1 } else { 2 }))
        }
        WeekendHandling::Skip => None,
    }
}

/// A validated rule schedule: frequency, weekend policy and date bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recurrence {
    pub frequency: Frequency,
    pub weekend: WeekendHandling,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl Recurrence {
    pub fn new(
        frequency: Frequency,
        weekend: WeekendHandling,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> Self {
        Self { frequency, weekend, start_date, end_date }
    }

    /// Validate a stored rule's frequency spec.
    pub fn from_rule(rule: &RecurrenceRule) -> Result<Self, ScheduleError> {
        Ok(Self::new(
            Frequency::try_from(&rule.frequency)?,
            rule.weekend_handling,
            rule.start_date,
            rule.end_date,
        ))
    }

    /// The first occurrence on or after `start_date`.
    pub fn first_occurrence(&self) -> Result<NaiveDate, ScheduleError> {
        let before_start = self
            .start_date
            .pred_opt()
            .ok_or(ScheduleError::DateOverflow(self.start_date))?;
        self.next_occurrence(before_start)
    }

    /// The first occurrence strictly after `from`. Ignores `end_date`; see
    /// [`Recurrence::within_end`].
    ///
    /// Periods are counted from `start_date`, not from `from`. For an
    /// `interval` above 1 and a `from` between lattice dates this returns the
    /// next lattice date: a 3-monthly rule on the 10th starting Jan 10 gives
    /// Apr 10 from Feb 1, where stepping from Feb 1 would give May 10. Both
    /// agree whenever `from` is itself an occurrence, which is how the engine
    /// calls it.
    pub fn next_occurrence(&self, from: NaiveDate) -> Result<NaiveDate, ScheduleError> {
        let lower = from
            .checked_sub_days(Days::new(SHIFT_SLACK_DAYS))
            .unwrap_or(from);
        let first_k = self.lower_index(lower);

        for k in first_k..first_k + MAX_SCAN as u64 {
            let nominal = self.nominal(k).ok_or(ScheduleError::DateOverflow(from))?;
            match apply_weekend_policy(nominal, self.weekend) {
                Some(date) if date > from && date >= self.start_date => return Ok(date),
                _ => continue,
            }
        }

        Err(ScheduleError::NoOccurrence { from, scanned: MAX_SCAN })
    }

    pub fn within_end(&self, date: NaiveDate) -> bool {
        self.end_date.map_or(true, |end| date <= end)
    }

    /// Nominal (unadjusted) occurrence number `k`, counting from 0.
    fn nominal(&self, k: u64) -> Option<NaiveDate> {
        let start = self.start_date;
        match self.frequency {
            Frequency::Daily { interval } => {
                start.checked_add_days(Days::new(k.checked_mul(interval as u64)?))
            }
            Frequency::Weekly { interval, .. } => {
                let step = k.checked_mul(interval as u64 * 7)?;
                self.weekly_anchor()?.checked_add_days(Days::new(step))
            }
            Frequency::Monthly { day, interval } => {
                let offset = i64::try_from(k.checked_mul(interval as u64)?).ok()?;
                clamped_date_at(self.monthly_anchor(day)? + offset, day)
            }
            Frequency::Yearly { month, day, interval } => {
                let offset = i64::try_from(k.checked_mul(interval as u64)?).ok()?;
                let year = i32::try_from(self.yearly_anchor(month, day)? as i64 + offset).ok()?;
                clamped_date(year, month, day)
            }
        }
    }

    /// Largest lattice index whose nominal date cannot exceed `lower`.
    fn lower_index(&self, lower: NaiveDate) -> u64 {
        let start = self.start_date;
        if lower <= start {
            return 0;
        }
        let interval = self.frequency.interval() as i64;
        let periods = match self.frequency {
            Frequency::Daily { .. } => (lower - start).num_days() / interval,
            Frequency::Weekly { .. } => (lower - start).num_days() / (7 * interval),
            Frequency::Monthly { .. } => {
                ((month_index(lower) - month_index(start)) / interval).saturating_sub(1)
            }
            Frequency::Yearly { .. } => {
                ((lower.year() - start.year()) as i64 / interval).saturating_sub(1)
            }
        };
        periods.max(0) as u64
    }

    fn weekly_anchor(&self) -> Option<NaiveDate> {
        let Frequency::Weekly { weekday, .. } = self.frequency else {
            return None;
        };
        let start = self.start_date;
        let ahead = (7 + weekday.num_days_from_sunday() - start.weekday().num_days_from_sunday()) % 7;
        start.checked_add_days(Days::new(ahead as u64))
    }

    /// Month index of the first monthly occurrence on or after the start.
    fn monthly_anchor(&self, day: u32) -> Option<i64> {
        let start = self.start_date;
        let in_start_month = clamped_date(start.year(), start.month(), day)?;
        let index = month_index(start);
        Some(if in_start_month >= start { index } else { index + 1 })
    }

    /// Year of the first yearly occurrence on or after the start.
    fn yearly_anchor(&self, month: u32, day: u32) -> Option<i32> {
        let start = self.start_date;
        let in_start_year = clamped_date(start.year(), month, day)?;
        Some(if in_start_year >= start { start.year() } else { start.year() + 1 })
    }
}

/// Resolve the next occurrence of a stored rule strictly after `from`,
/// counting periods from the rule's `start_date`.
pub fn next_occurrence(rule: &RecurrenceRule, from: NaiveDate) -> Result<NaiveDate, ScheduleError> {
    Recurrence::from_rule(rule)?.next_occurrence(from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn recurrence(spec: FrequencySpec, weekend: WeekendHandling, start: NaiveDate) -> Recurrence {
        Recurrence::new(Frequency::try_from(&spec).unwrap(), weekend, start, None)
    }

    /// First `n` occurrences, chaining `next_occurrence` like the engine does.
    fn take(rec: &Recurrence, n: usize) -> Vec<NaiveDate> {
        let mut out = vec![rec.first_occurrence().unwrap()];
        while out.len() < n {
            let next = rec.next_occurrence(*out.last().unwrap()).unwrap();
            out.push(next);
        }
        out
    }

    // -- frequency conversion -----------------------------------------------------

    #[test]
    fn missing_required_fields_are_malformed() {
        let mut weekly = FrequencySpec::weekly(1, 1);
        weekly.day_of_week = None;
        assert_eq!(
            Frequency::try_from(&weekly),
            Err(ScheduleError::MissingField { kind: "weekly", field: "dayOfWeek" })
        );

        let mut monthly = FrequencySpec::monthly(1, 1);
        monthly.day = None;
        assert!(matches!(
            Frequency::try_from(&monthly),
            Err(ScheduleError::MissingField { field: "day", .. })
        ));

        let mut yearly = FrequencySpec::yearly(3, 1, 1);
        yearly.month = None;
        assert!(matches!(
            Frequency::try_from(&yearly),
            Err(ScheduleError::MissingField { field: "month", .. })
        ));
    }

    #[test]
    fn out_of_range_fields_are_malformed() {
        assert!(matches!(
            Frequency::try_from(&FrequencySpec::monthly(32, 1)),
            Err(ScheduleError::OutOfRange { field: "day", .. })
        ));
        assert!(matches!(
            Frequency::try_from(&FrequencySpec::weekly(7, 1)),
            Err(ScheduleError::OutOfRange { field: "dayOfWeek", .. })
        ));
        assert_eq!(
            Frequency::try_from(&FrequencySpec::daily(0)),
            Err(ScheduleError::ZeroInterval)
        );
    }

    #[test]
    fn irrelevant_fields_are_ignored() {
        let mut spec = FrequencySpec::daily(2);
        spec.day = Some(99);
        spec.month = Some(42);
        assert_eq!(Frequency::try_from(&spec), Ok(Frequency::Daily { interval: 2 }));
    }

    // -- monthly clamping ----------------------------------------------------

    #[test]
    fn month_end_rule_generates_clamped_sequence() {
        let rec = recurrence(FrequencySpec::monthly(31, 1), WeekendHandling::None, d(2024, 1, 31));
        assert_eq!(
            take(&rec, 5),
            vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31), d(2024, 4, 30), d(2024, 5, 31)]
        );
    }

    #[test]
    fn day_31_in_february_by_leap_year() {
        let rec = recurrence(FrequencySpec::monthly(31, 1), WeekendHandling::None, d(2023, 1, 1));
        assert_eq!(rec.next_occurrence(d(2023, 1, 31)).unwrap(), d(2023, 2, 28));
        assert_eq!(rec.next_occurrence(d(2024, 1, 31)).unwrap(), d(2024, 2, 29));
    }

    #[test]
    fn monthly_start_after_target_day_begins_next_month() {
        let rec = recurrence(FrequencySpec::monthly(15, 1), WeekendHandling::None, d(2024, 1, 20));
        assert_eq!(rec.first_occurrence().unwrap(), d(2024, 2, 15));
    }

    #[test]
    fn monthly_interval_steps_whole_blocks() {
        let rec = recurrence(FrequencySpec::monthly(10, 3), WeekendHandling::None, d(2024, 1, 10));
        assert_eq!(take(&rec, 3), vec![d(2024, 1, 10), d(2024, 4, 10), d(2024, 7, 10)]);
        // Reference dates between lattice points resolve to the next block.
        assert_eq!(rec.next_occurrence(d(2024, 2, 1)).unwrap(), d(2024, 4, 10));
    }

    #[test]
    fn yearly_leap_day_clamps() {
        let rec = recurrence(FrequencySpec::yearly(2, 29, 1), WeekendHandling::None, d(2024, 2, 29));
        assert_eq!(
            take(&rec, 5),
            vec![d(2024, 2, 29), d(2025, 2, 28), d(2026, 2, 28), d(2027, 2, 28), d(2028, 2, 29)]
        );
    }

    // -- daily / weekly --------------------------------------------------------

    #[test]
    fn daily_interval() {
        let rec = recurrence(FrequencySpec::daily(3), WeekendHandling::None, d(2024, 1, 1));
        assert_eq!(take(&rec, 3), vec![d(2024, 1, 1), d(2024, 1, 4), d(2024, 1, 7)]);
    }

    #[test]
    fn weekly_interval_counts_weeks_not_days() {
        // 2024-01-01 is a Monday; 3 = Wednesday.
        let rec = recurrence(FrequencySpec::weekly(3, 2), WeekendHandling::None, d(2024, 1, 1));
        assert_eq!(take(&rec, 3), vec![d(2024, 1, 3), d(2024, 1, 17), d(2024, 1, 31)]);
    }

    // -- weekend policies ------------------------------------------------------

    #[test]
    fn saturday_shift_forward_lands_on_monday() {
        // 2024-06-01 is a Saturday.
        let rec = recurrence(FrequencySpec::weekly(6, 1), WeekendHandling::ShiftForward, d(2024, 6, 1));
        let dates = take(&rec, 4);
        assert_eq!(dates, vec![d(2024, 6, 3), d(2024, 6, 10), d(2024, 6, 17), d(2024, 6, 24)]);
        assert!(dates.iter().all(|date| date.weekday() == Weekday::Mon));
    }

    #[test]
    fn shift_backward_moves_to_friday() {
        // 2024-03-31 is a Sunday.
        let rec = recurrence(FrequencySpec::monthly(31, 1), WeekendHandling::ShiftBackward, d(2024, 1, 31));
        assert_eq!(rec.next_occurrence(d(2024, 2, 29)).unwrap(), d(2024, 3, 29));
    }

    #[test]
    fn shift_backward_never_repeats_reference_date() {
        // June 1 2024 is a Saturday, so June's occurrence moves back to
        // Friday May 31; the one after it is July 1.
        let rec = recurrence(FrequencySpec::monthly(1, 1), WeekendHandling::ShiftBackward, d(2024, 5, 1));
        let after_may = rec.next_occurrence(d(2024, 5, 1)).unwrap();
        assert_eq!(after_may, d(2024, 5, 31));
        assert_eq!(rec.next_occurrence(after_may).unwrap(), d(2024, 7, 1));
    }

    #[test]
    fn shift_forward_across_month_end_keeps_next_month() {
        // 2024-08-31 is a Saturday -> Monday Sept 2; September's own
        // occurrence (Sept 30) must still follow.
        let rec = recurrence(FrequencySpec::monthly(31, 1), WeekendHandling::ShiftForward, d(2024, 8, 1));
        let aug = rec.first_occurrence().unwrap();
        assert_eq!(aug, d(2024, 9, 2));
        assert_eq!(rec.next_occurrence(aug).unwrap(), d(2024, 9, 30));
    }

    #[test]
    fn skip_omits_weekend_instances() {
        let rec = recurrence(FrequencySpec::monthly(1, 1), WeekendHandling::Skip, d(2024, 5, 1));
        // June 1 2024 (Saturday) is dropped entirely.
        assert_eq!(take(&rec, 2), vec![d(2024, 5, 1), d(2024, 7, 1)]);
    }

    #[test]
    fn skip_daily_yields_weekdays_only() {
        let rec = recurrence(FrequencySpec::daily(1), WeekendHandling::Skip, d(2024, 6, 1));
        let dates = take(&rec, 5);
        assert_eq!(dates.first(), Some(&d(2024, 6, 3)));
        assert!(dates.iter().all(|date| !is_weekend(*date)));
    }

    #[test]
    fn skip_on_always_weekend_rule_reports_no_occurrence() {
        let rec = recurrence(FrequencySpec::weekly(6, 1), WeekendHandling::Skip, d(2024, 6, 1));
        assert!(matches!(rec.first_occurrence(), Err(ScheduleError::NoOccurrence { .. })));
    }

    #[test]
    fn shift_backward_never_precedes_start() {
        // Start on Saturday: shifting back to Friday would precede the start.
        let rec = recurrence(FrequencySpec::daily(1), WeekendHandling::ShiftBackward, d(2024, 6, 1));
        assert_eq!(rec.first_occurrence().unwrap(), d(2024, 6, 3));
    }

    // -- properties --------------------------------------------------------------

    #[test]
    fn next_occurrence_is_strictly_after_reference() {
        let specs = [
            FrequencySpec::daily(1),
            FrequencySpec::daily(5),
            FrequencySpec::weekly(0, 1),
            FrequencySpec::weekly(6, 3),
            FrequencySpec::monthly(31, 1),
            FrequencySpec::monthly(1, 2),
            FrequencySpec::yearly(2, 29, 1),
        ];
        let policies = [
            WeekendHandling::None,
            WeekendHandling::ShiftForward,
            WeekendHandling::ShiftBackward,
            WeekendHandling::Skip,
        ];
        for spec in &specs {
            for policy in policies {
                let rec = recurrence(spec.clone(), policy, d(2023, 12, 1));
                let mut from = d(2023, 11, 20);
                while from < d(2025, 3, 1) {
                    match rec.next_occurrence(from) {
                        Ok(next) => assert!(next > from, "{spec:?} {policy:?} from {from}"),
                        Err(ScheduleError::NoOccurrence { .. }) => {}
                        Err(e) => panic!("unexpected error {e}"),
                    }
                    from = from.succ_opt().unwrap();
                }
            }
        }
    }

    #[test]
    fn off_lattice_reference_snaps_to_start_anchored_period() {
        let rec = recurrence(FrequencySpec::monthly(10, 3), WeekendHandling::None, d(2024, 1, 10));
        assert_eq!(rec.next_occurrence(d(2024, 2, 1)).unwrap(), d(2024, 4, 10));
        assert_eq!(rec.next_occurrence(d(2024, 1, 10)).unwrap(), d(2024, 4, 10));
        assert_eq!(rec.next_occurrence(d(2024, 4, 10)).unwrap(), d(2024, 7, 10));
    }

    #[test]
    fn within_end_is_inclusive() {
        let mut rec = recurrence(FrequencySpec::daily(1), WeekendHandling::None, d(2024, 1, 1));
        rec.end_date = Some(d(2024, 1, 10));
        assert!(rec.within_end(d(2024, 1, 10)));
        assert!(!rec.within_end(d(2024, 1, 11)));
    }
}
