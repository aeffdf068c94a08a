//! Structured results returned by one invocation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tally_core::{Channel, ReminderStatus};
use uuid::Uuid;

/// A per-item problem, keyed by the item's id (rule id, card id or dedup key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub id: String,
    pub message: String,
}

impl ItemError {
    pub fn new(id: impl Into<String>, message: impl ToString) -> Self {
        Self {
            id: id.into(),
            message: message.to_string(),
        }
    }
}

/// One occurrence written by this invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedOccurrence {
    pub dedup_key: String,
    pub rule_id: String,
    pub occurrence_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    /// Transaction intents newly written.
    pub generated: Vec<GeneratedOccurrence>,
    /// Confirmation requests newly queued.
    pub requests_queued: Vec<GeneratedOccurrence>,
    /// Queued requests from earlier invocations whose dispatch was completed
    /// by this one.
    pub requests_redispatched: usize,
    /// Rules another invocation advanced first.
    pub superseded: Vec<String>,
    /// Non-fatal conditions, such as a backfill that hit the cap.
    pub warnings: Vec<ItemError>,
    pub errors: Vec<ItemError>,
}

impl GenerationSummary {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            now,
            generated: Vec::new(),
            requests_queued: Vec::new(),
            requests_redispatched: 0,
            superseded: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn generated_count(&self) -> usize {
        self.generated.len()
    }

    pub fn queued_count(&self) -> usize {
        self.requests_queued.len()
    }

    /// Sort every list so output is stable across concurrent runs.
    pub(crate) fn sort(&mut self) {
        self.generated.sort_by(|a, b| a.dedup_key.cmp(&b.dedup_key));
        self.requests_queued.sort_by(|a, b| a.dedup_key.cmp(&b.dedup_key));
        self.superseded.sort();
        self.warnings.sort_by(|a, b| a.id.cmp(&b.id));
        self.errors.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

/// A reminder delivered on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentReminder {
    pub card_id: String,
    pub due_date: NaiveDate,
    pub channel: Channel,
    pub attempts: u32,
}

/// Why a card due for a reminder today produced no send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "status", rename_all = "snake_case")]
pub enum SkipReason {
    NoPreference,
    OutsideNotificationHour,
    NoChannelsEnabled,
    /// The `(card, due date, channel)` key was already claimed.
    AlreadyHandled(ReminderStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedReminder {
    pub card_id: String,
    pub due_date: NaiveDate,
    pub channel: Option<Channel>,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderSummary {
    pub run_id: Uuid,
    pub now: DateTime<Utc>,
    pub cards_checked: usize,
    pub sent: Vec<SentReminder>,
    pub skipped: Vec<SkippedReminder>,
    pub errors: Vec<ItemError>,
}

impl ReminderSummary {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            now,
            cards_checked: 0,
            sent: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub(crate) fn sort(&mut self) {
        self.sent
            .sort_by(|a, b| (&a.card_id, a.channel).cmp(&(&b.card_id, b.channel)));
        self.skipped
            .sort_by(|a, b| (&a.card_id, a.channel).cmp(&(&b.card_id, b.channel)));
        self.errors.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reason_serializes_flat() {
        let skipped = SkippedReminder {
            card_id: "card-1".into(),
            due_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            channel: Some(Channel::Push),
            reason: SkipReason::AlreadyHandled(ReminderStatus::Sent),
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["reason"], "already_handled");
        assert_eq!(json["status"], "sent");
        assert_eq!(json["channel"], "push");
    }

    #[test]
    fn summaries_sort_by_key() {
        let mut summary = GenerationSummary::new(Utc::now());
        summary.errors.push(ItemError::new("rule-b", "boom"));
        summary.errors.push(ItemError::new("rule-a", "boom"));
        summary.sort();
        assert_eq!(summary.errors[0].id, "rule-a");
    }
}
