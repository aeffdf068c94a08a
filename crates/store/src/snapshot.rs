//! Serializable store contents and their on-disk form.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{
    ConfirmationRequest, CreditCardBilling, NotificationPreference, RecurrenceRule,
    RepositoryError, ReminderEvent, TransactionIntent,
};

/// A queued confirmation request and whether its dispatch completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConfirmation {
    #[serde(flatten)]
    pub request: ConfirmationRequest,
    #[serde(default)]
    pub dispatched: bool,
    /// When an invocation last claimed the request for delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl StoredConfirmation {
    /// A freshly queued, unclaimed request.
    pub fn queued(request: ConfirmationRequest) -> Self {
        Self {
            request,
            dispatched: false,
            claimed_at: None,
        }
    }
}

/// Everything the store holds. Maps are keyed by id or dedup key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    pub rules: BTreeMap<String, RecurrenceRule>,
    pub cards: BTreeMap<String, CreditCardBilling>,
    pub preferences: BTreeMap<String, NotificationPreference>,
    /// Users whose cards are excluded from reminders.
    pub inactive_users: BTreeSet<String>,
    pub transactions: BTreeMap<String, TransactionIntent>,
    pub confirmations: BTreeMap<String, StoredConfirmation>,
    /// Keyed by the reminder key's display form.
    pub reminders: BTreeMap<String, ReminderEvent>,
}

impl StoreState {
    /// Read a snapshot. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, RepositoryError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No store snapshot, starting empty");
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&json)?;
        tracing::info!(
            path = %path.display(),
            rules = state.rules.len(),
            cards = state.cards.len(),
            "Loaded store snapshot"
        );
        Ok(state)
    }

    /// Write the snapshot, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), RepositoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        // Write beside the target and rename so a crash never leaves a torn file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
