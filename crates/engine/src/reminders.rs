//! Credit card due-date reminders.
//!
//! A reminder fires on the day before a card's due date, during the hour the
//! owner chose, once per enabled channel. The `(card, due date, channel)` key
//! is claimed in the reminder log before sending and completed afterwards, so
//! repeated or overlapping invocations send at most once per key.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use futures::stream::{self, StreamExt};
use tally_core::{
    CardRepository, ClaimOutcome, CreditCardBilling, NotificationPreference, PreferenceRepository,
    ReminderKey, ReminderLog, ReminderStatus,
};
use tally_notify::{Dispatcher, Notification, ReminderContext, TemplateRenderer};
use tally_schedule::{current_cycle, BillingCycle};

use crate::error::EngineError;
use crate::summary::{ItemError, ReminderSummary, SentReminder, SkipReason, SkippedReminder};

#[derive(Debug, Default)]
struct CardOutcome {
    sent: Vec<SentReminder>,
    skipped: Vec<SkippedReminder>,
    errors: Vec<ItemError>,
}

impl CardOutcome {
    fn skip(card: &CreditCardBilling, due_date: NaiveDate, reason: SkipReason) -> Self {
        Self {
            skipped: vec![SkippedReminder {
                card_id: card.id.clone(),
                due_date,
                channel: None,
                reason,
            }],
            ..Self::default()
        }
    }
}

pub struct ReminderScheduler {
    cards: Arc<dyn CardRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    log: Arc<dyn ReminderLog>,
    dispatcher: Arc<Dispatcher>,
    renderer: TemplateRenderer,
    concurrency: usize,
    claim_lease: Duration,
}

impl ReminderScheduler {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        log: Arc<dyn ReminderLog>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            cards,
            preferences,
            log,
            dispatcher,
            renderer: TemplateRenderer::new(),
            concurrency: 8,
            claim_lease: Duration::from_secs(900),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// How long an unfinished claim blocks other invocations.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Run one reminder invocation as of `now`. Day and hour are taken in UTC.
    pub async fn run_reminders(&self, now: DateTime<Utc>) -> ReminderSummary {
        let mut summary = ReminderSummary::new(now);
        tracing::info!(run_id = %summary.run_id, %now, "Reminder run starting");

        let cards = match self.cards.active_cards().await {
            Ok(cards) => cards,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list cards");
                summary.errors.push(ItemError::new("cards", e));
                return summary;
            }
        };
        summary.cards_checked = cards.len();

        let outcomes: Vec<(String, Result<CardOutcome, EngineError>)> = stream::iter(cards)
            .map(|card| async move {
                let card_id = card.id.clone();
                (card_id, self.process_card(&card, now).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (card_id, result) in outcomes {
            match result {
                Ok(outcome) => {
                    summary.sent.extend(outcome.sent);
                    summary.skipped.extend(outcome.skipped);
                    summary.errors.extend(outcome.errors);
                }
                Err(e) => {
                    tracing::warn!(card_id = %card_id, error = %e, "Card failed");
                    summary.errors.push(ItemError::new(card_id, e));
                }
            }
        }

        summary.sort();
        tracing::info!(
            run_id = %summary.run_id,
            cards = summary.cards_checked,
            sent = summary.sent_count(),
            skipped = summary.skipped.len(),
            errors = summary.errors.len(),
            "Reminder run complete"
        );
        summary
    }

    async fn process_card(
        &self,
        card: &CreditCardBilling,
        now: DateTime<Utc>,
    ) -> Result<CardOutcome, EngineError> {
        let today = now.date_naive();
        let cycle = current_cycle(card, today)?;
        if !cycle.is_reminder_day(today) {
            return Ok(CardOutcome::default());
        }

        let Some(preference) = self.preferences.preference(&card.user_id).await? else {
            return Ok(CardOutcome::skip(card, cycle.due_date, SkipReason::NoPreference));
        };
        if preference.notification_hour != now.hour() {
            tracing::debug!(
                card_id = %card.id,
                hour = now.hour(),
                notification_hour = preference.notification_hour,
                "Outside notification hour"
            );
            return Ok(CardOutcome::skip(
                card,
                cycle.due_date,
                SkipReason::OutsideNotificationHour,
            ));
        }

        let channels = preference.enabled_channels();
        if channels.is_empty() {
            return Ok(CardOutcome::skip(card, cycle.due_date, SkipReason::NoChannelsEnabled));
        }

        let message = self.render(card, &cycle)?;
        let mut outcome = CardOutcome::default();
        for channel in channels {
            let key = ReminderKey {
                card_id: card.id.clone(),
                due_date: cycle.due_date,
                channel,
            };
            let claim = match self.log.claim(&key, now, self.claim_lease).await {
                Ok(claim) => claim,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to claim reminder");
                    outcome.errors.push(ItemError::new(key.to_string(), e));
                    continue;
                }
            };
            match claim {
                ClaimOutcome::Claimed => {}
                ClaimOutcome::AlreadyHandled(status) => {
                    tracing::debug!(key = %key, ?status, "Reminder already handled");
                    outcome.skipped.push(SkippedReminder {
                        card_id: card.id.clone(),
                        due_date: cycle.due_date,
                        channel: Some(channel),
                        reason: SkipReason::AlreadyHandled(status),
                    });
                    continue;
                }
            }

            let notification = Notification {
                idempotency_key: key.to_string(),
                ..message.clone()
            };
            self.send_claimed(&key, &preference, &notification, now, &mut outcome)
                .await;
        }

        Ok(outcome)
    }

    /// Send on a claimed key and complete the claim as sent or failed.
    ///
    /// A delivered reminder is reported as sent even when recording the
    /// completion fails; the log failure is reported alongside it.
    async fn send_claimed(
        &self,
        key: &ReminderKey,
        preference: &NotificationPreference,
        notification: &Notification,
        now: DateTime<Utc>,
        outcome: &mut CardOutcome,
    ) {
        let result = self
            .dispatcher
            .send_to(key.channel, preference, notification)
            .await;

        let completed = if result.success {
            tracing::info!(key = %key, attempts = result.attempts, "Reminder sent");
            outcome.sent.push(SentReminder {
                card_id: key.card_id.clone(),
                due_date: key.due_date,
                channel: key.channel,
                attempts: result.attempts,
            });
            self.log.complete(key, ReminderStatus::Sent, None, now).await
        } else {
            let message = result
                .error
                .unwrap_or_else(|| "delivery failed".to_string());
            tracing::warn!(key = %key, attempts = result.attempts, error = %message, "Reminder failed");
            outcome
                .errors
                .push(ItemError::new(key.to_string(), message.clone()));
            self.log
                .complete(key, ReminderStatus::Failed, Some(message), now)
                .await
        };

        if let Err(e) = completed {
            tracing::warn!(key = %key, error = %e, "Failed to record reminder outcome");
            outcome
                .errors
                .push(ItemError::new(key.to_string(), format!("recording outcome: {e}")));
        }
    }

    /// Render once per card; each channel send gets its own idempotency key.
    fn render(
        &self,
        card: &CreditCardBilling,
        cycle: &BillingCycle,
    ) -> Result<Notification, EngineError> {
        let ctx = ReminderContext {
            card_id: card.id.clone(),
            card_name: card.label().to_string(),
            currency: card.currency.clone(),
            due_date: cycle.due_date.to_string(),
            closing_date: cycle.closing_date.map(|d| d.to_string()),
        };
        let key = format!("{}:{}", card.id, cycle.due_date);
        Ok(self.renderer.reminder(&ctx, key)?)
    }
}
