use tally_core::RepositoryError;
use tally_notify::NotifyError;
use tally_schedule::ScheduleError;
use thiserror::Error;

/// Failure processing a single rule, card or confirmation request.
///
/// Never aborts an invocation: the engine records it in the summary against
/// the item's id and moves on.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Malformed rule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}
