//! Storage contracts the engine consumes.
//!
//! The engine holds these as injected trait objects; it never reaches for a
//! process-wide client. Implementations must give each rule's state and each
//! reminder key serializable semantics through conditional writes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::RepositoryError;
use crate::model::{
    ConfirmationRequest, CreditCardBilling, NotificationPreference, RecurrenceRule, ReminderKey,
    ReminderStatus, TransactionIntent,
};

/// Everything one rule produced in one invocation, written as a unit.
#[derive(Debug, Clone)]
pub struct GenerationCommit {
    pub rule_id: String,
    /// `last_generated_date` as read before generation.
    pub expected_last_generated: Option<NaiveDate>,
    /// `next_execution_date` as read before generation.
    pub expected_next_execution: Option<NaiveDate>,
    pub last_generated_date: NaiveDate,
    /// `None` once the rule has run past its end date.
    pub next_execution_date: Option<NaiveDate>,
    pub intents: Vec<TransactionIntent>,
    pub requests: Vec<ConfirmationRequest>,
}

/// Result of applying a [`GenerationCommit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// State advanced. Lists the dedup keys that were newly inserted;
    /// keys already present were coalesced.
    Applied {
        inserted_intents: Vec<String>,
        inserted_requests: Vec<String>,
    },
    /// The rule's stored state no longer matches what was read, so another
    /// invocation already handled these occurrences. Nothing was written.
    Superseded,
}

/// Outcome of claiming a reminder key or a confirmation request before sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyHandled(ReminderStatus),
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// All rules. Eligibility filtering happens in the engine.
    async fn list_rules(&self) -> Result<Vec<RecurrenceRule>, RepositoryError>;

    /// Atomically write generated items and advance rule state, guarded by
    /// the expected state and by per-item dedup keys.
    async fn commit_generation(
        &self,
        commit: GenerationCommit,
    ) -> Result<CommitOutcome, RepositoryError>;

    /// Queued confirmation requests whose dispatch never completed.
    async fn undispatched_confirmations(&self)
        -> Result<Vec<ConfirmationRequest>, RepositoryError>;

    /// Claim a queued request for delivery. A dispatched request reports
    /// `AlreadyHandled(Sent)`; a claim younger than `lease` reports
    /// `AlreadyHandled(Pending)`, an older one is taken over.
    async fn claim_confirmation(
        &self,
        dedup_key: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError>;

    async fn mark_confirmation_dispatched(&self, dedup_key: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CardRepository: Send + Sync {
    /// Credit cards whose owning user is active.
    async fn active_cards(&self) -> Result<Vec<CreditCardBilling>, RepositoryError>;
}

#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn preference(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, RepositoryError>;
}

#[async_trait]
pub trait ReminderLog: Send + Sync {
    /// Insert a `pending` event for `key` unless one exists. A `pending`
    /// event older than `lease` is taken over.
    async fn claim(
        &self,
        key: &ReminderKey,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError>;

    /// Finish a claimed event as `sent` or `failed`.
    async fn complete(
        &self,
        key: &ReminderKey,
        status: ReminderStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
