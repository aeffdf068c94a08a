//! Lock-guarded in-memory implementation of the repository contracts.
//!
//! Every write runs under a single mutex, which gives each conditional write
//! the serializable semantics the engine relies on when invocations overlap.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tally_core::{
    CardRepository, ClaimOutcome, CommitOutcome, ConfirmationRequest, CreditCardBilling,
    GenerationCommit, NotificationPreference, PreferenceRepository, RecurrenceRule,
    ReminderEvent, ReminderKey, ReminderLog, ReminderStatus, RepositoryError, RuleRepository,
    TransactionIntent,
};

use crate::snapshot::{StoreState, StoredConfirmation};

/// Shared in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Open the snapshot at `path`; a missing file gives an empty store.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        Ok(Self::from_state(StoreState::load(path)?))
    }

    /// Persist the current contents to `path`.
    pub fn save(&self, path: &Path) -> Result<(), RepositoryError> {
        self.lock()?.save(path)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".to_string()))
    }

    // ── Seeding ─────────────────────────────────────────────────

    pub fn insert_rule(&self, rule: RecurrenceRule) -> Result<(), RepositoryError> {
        self.lock()?.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn insert_card(&self, card: CreditCardBilling) -> Result<(), RepositoryError> {
        self.lock()?.cards.insert(card.id.clone(), card);
        Ok(())
    }

    pub fn set_preference(&self, preference: NotificationPreference) -> Result<(), RepositoryError> {
        self.lock()?
            .preferences
            .insert(preference.user_id.clone(), preference);
        Ok(())
    }

    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if active {
            state.inactive_users.remove(user_id);
        } else {
            state.inactive_users.insert(user_id.to_string());
        }
        Ok(())
    }

    // ── Inspection ──────────────────────────────────────────────

    pub fn rule(&self, rule_id: &str) -> Result<Option<RecurrenceRule>, RepositoryError> {
        Ok(self.lock()?.rules.get(rule_id).cloned())
    }

    /// Stored transactions ordered by dedup key.
    pub fn transactions(&self) -> Result<Vec<TransactionIntent>, RepositoryError> {
        Ok(self.lock()?.transactions.values().cloned().collect())
    }

    pub fn confirmations(&self) -> Result<Vec<StoredConfirmation>, RepositoryError> {
        Ok(self.lock()?.confirmations.values().cloned().collect())
    }

    pub fn reminder_events(&self) -> Result<Vec<ReminderEvent>, RepositoryError> {
        Ok(self.lock()?.reminders.values().cloned().collect())
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn list_rules(&self) -> Result<Vec<RecurrenceRule>, RepositoryError> {
        Ok(self.lock()?.rules.values().cloned().collect())
    }

    async fn commit_generation(
        &self,
        commit: GenerationCommit,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut state = self.lock()?;
        let state = &mut *state;

        let rule = state
            .rules
            .get_mut(&commit.rule_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("rule {}", commit.rule_id)))?;

        if rule.last_generated_date != commit.expected_last_generated
            || rule.next_execution_date != commit.expected_next_execution
        {
            tracing::debug!(
                rule_id = %commit.rule_id,
                stored_last = ?rule.last_generated_date,
                expected_last = ?commit.expected_last_generated,
                "Rule state moved, commit superseded"
            );
            return Ok(CommitOutcome::Superseded);
        }

        let mut inserted_intents = Vec::new();
        for intent in commit.intents {
            if !state.transactions.contains_key(&intent.dedup_key) {
                inserted_intents.push(intent.dedup_key.clone());
                state.transactions.insert(intent.dedup_key.clone(), intent);
            }
        }

        let mut inserted_requests = Vec::new();
        for request in commit.requests {
            if !state.confirmations.contains_key(&request.dedup_key) {
                inserted_requests.push(request.dedup_key.clone());
                state
                    .confirmations
                    .insert(request.dedup_key.clone(), StoredConfirmation::queued(request));
            }
        }

        rule.last_generated_date = Some(commit.last_generated_date);
        rule.next_execution_date = commit.next_execution_date;

        Ok(CommitOutcome::Applied {
            inserted_intents,
            inserted_requests,
        })
    }

    async fn undispatched_confirmations(
        &self,
    ) -> Result<Vec<ConfirmationRequest>, RepositoryError> {
        Ok(self
            .lock()?
            .confirmations
            .values()
            .filter(|c| !c.dispatched)
            .map(|c| c.request.clone())
            .collect())
    }

    async fn claim_confirmation(
        &self,
        dedup_key: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let mut state = self.lock()?;
        let stored = state
            .confirmations
            .get_mut(dedup_key)
            .ok_or_else(|| RepositoryError::NotFound(format!("confirmation {dedup_key}")))?;

        if stored.dispatched {
            return Ok(ClaimOutcome::AlreadyHandled(ReminderStatus::Sent));
        }
        if let Some(claimed_at) = stored.claimed_at {
            if lease_held(claimed_at, now, lease)? {
                return Ok(ClaimOutcome::AlreadyHandled(ReminderStatus::Pending));
            }
            tracing::warn!(key = %dedup_key, %claimed_at, "Taking over stale confirmation claim");
        }
        stored.claimed_at = Some(now);
        Ok(ClaimOutcome::Claimed)
    }

    async fn mark_confirmation_dispatched(&self, dedup_key: &str) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let stored = state
            .confirmations
            .get_mut(dedup_key)
            .ok_or_else(|| RepositoryError::NotFound(format!("confirmation {dedup_key}")))?;
        stored.dispatched = true;
        Ok(())
    }
}

/// Whether a claim taken at `claimed_at` is still inside `lease` at `now`.
fn lease_held(
    claimed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    lease: Duration,
) -> Result<bool, RepositoryError> {
    let lease = chrono::Duration::from_std(lease)
        .map_err(|e| RepositoryError::Rejected(format!("invalid lease: {e}")))?;
    Ok(now.signed_duration_since(claimed_at) < lease)
}

#[async_trait]
impl CardRepository for MemoryStore {
    async fn active_cards(&self) -> Result<Vec<CreditCardBilling>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .cards
            .values()
            .filter(|card| !state.inactive_users.contains(&card.user_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PreferenceRepository for MemoryStore {
    async fn preference(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, RepositoryError> {
        Ok(self.lock()?.preferences.get(user_id).cloned())
    }
}

#[async_trait]
impl ReminderLog for MemoryStore {
    async fn claim(
        &self,
        key: &ReminderKey,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let mut state = self.lock()?;
        let id = key.to_string();

        if let Some(event) = state.reminders.get_mut(&id) {
            if event.status != ReminderStatus::Pending {
                return Ok(ClaimOutcome::AlreadyHandled(event.status));
            }
            if lease_held(event.attempted_at, now, lease)? {
                return Ok(ClaimOutcome::AlreadyHandled(ReminderStatus::Pending));
            }
            tracing::warn!(key = %id, claimed_at = %event.attempted_at, "Taking over stale reminder claim");
            event.attempted_at = now;
            event.error = None;
            return Ok(ClaimOutcome::Claimed);
        }

        state.reminders.insert(
            id,
            ReminderEvent {
                key: key.clone(),
                status: ReminderStatus::Pending,
                attempted_at: now,
                error: None,
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn complete(
        &self,
        key: &ReminderKey,
        status: ReminderStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let event = state
            .reminders
            .get_mut(&key.to_string())
            .ok_or_else(|| RepositoryError::NotFound(format!("reminder {key}")))?;
        event.status = status;
        event.error = error;
        event.attempted_at = at;
        Ok(())
    }
}
