//! Pure date arithmetic for recurring obligations.
//!
//! This crate provides:
//! - Calendar math with per-month day clamping
//! - A typed frequency model and the occurrence resolver with weekend policies
//! - Credit card billing cycle resolution for due-date reminders
//!
//! Nothing here performs I/O; every function is deterministic in its inputs.

pub mod calendar;
pub mod due_date;
pub mod error;
pub mod frequency;

pub use due_date::{current_cycle, BillingCycle, REMINDER_LEAD_DAYS};
pub use error::ScheduleError;
pub use frequency::{next_occurrence, Frequency, Recurrence};
