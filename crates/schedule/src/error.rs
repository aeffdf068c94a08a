use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised while resolving dates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("{kind} frequency requires `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("`{field}` value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("interval must be at least 1")]
    ZeroInterval,

    #[error("date arithmetic overflowed near {0}")]
    DateOverflow(NaiveDate),

    #[error("no occurrence after {from} within {scanned} periods")]
    NoOccurrence { from: NaiveDate, scanned: u32 },
}

impl ScheduleError {
    pub(crate) fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<u32, Self> {
        if (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(Self::OutOfRange { field, value, min, max })
        }
    }
}
