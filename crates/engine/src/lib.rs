//! Scheduling engine for recurring obligations and card payment reminders.
//!
//! This crate provides:
//! - `GenerationEngine`, which advances due recurrence rules exactly once per
//!   occurrence and routes confirmation-mode occurrences to the dispatcher
//! - `ReminderScheduler`, which sends deduplicated due-date reminders
//! - Structured per-invocation summaries
//! - The `tally-worker` trigger binary

pub mod error;
pub mod generation;
pub mod reminders;
pub mod summary;

pub use error::EngineError;
pub use generation::GenerationEngine;
pub use reminders::ReminderScheduler;
pub use summary::{
    GeneratedOccurrence, GenerationSummary, ItemError, ReminderSummary, SentReminder, SkipReason,
    SkippedReminder,
};
