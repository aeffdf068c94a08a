//! Generation engine: turns due recurrence rules into transaction intents or
//! confirmation requests, exactly once per occurrence.
//!
//! Each invocation:
//! 1. Finishes dispatch of confirmation requests an earlier invocation queued
//!    but never delivered.
//! 2. Evaluates eligible rules concurrently. Per rule it walks occurrences from
//!    the stored cursor up to today (bounded by the backfill cap) and writes
//!    them with one conditional commit.
//! 3. Dispatches the confirmation requests the commit actually inserted.
//!
//! Safety across overlapping invocations comes from the repository's
//! conditional write and dedup keys, never from in-process locks. Every
//! confirmation send is preceded by a leased claim on the request, so a
//! request another invocation is still delivering is left alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tally_core::config::EngineConfig;
use tally_core::{
    occurrence_key, ClaimOutcome, CommitOutcome, ConfirmationRequest, GenerationCommit,
    PreferenceRepository, RecurrenceRule, RuleRepository, TransactionIntent,
};
use tally_notify::{ConfirmationContext, Dispatcher, TemplateRenderer};
use tally_schedule::Recurrence;

use crate::error::EngineError;
use crate::summary::{GeneratedOccurrence, GenerationSummary, ItemError};

/// What processing one rule produced.
#[derive(Debug, Default)]
struct RuleOutcome {
    generated: Vec<GeneratedOccurrence>,
    requests_queued: Vec<GeneratedOccurrence>,
    superseded: bool,
    warnings: Vec<ItemError>,
    /// Delivery failures for requests the commit inserted.
    errors: Vec<ItemError>,
}

/// How one confirmation delivery ended.
#[derive(Debug)]
enum Delivery {
    /// Claimed and sent; lists the channels that failed.
    Attempted(Vec<ItemError>),
    /// Another invocation holds the claim or already dispatched it.
    HandledElsewhere,
    /// Claiming, rendering or marking the request failed.
    Failed(ItemError),
}

/// Occurrences due for one rule, computed before anything is written.
#[derive(Debug, PartialEq, Eq)]
struct DuePlan {
    dates: Vec<NaiveDate>,
    /// Cursor after the last planned date; `None` once past the end date.
    next_execution: Option<NaiveDate>,
    /// More occurrences were due than the cap allowed.
    capped: bool,
}

pub struct GenerationEngine {
    rules: Arc<dyn RuleRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    dispatcher: Arc<Dispatcher>,
    renderer: TemplateRenderer,
    config: EngineConfig,
    claim_lease: Duration,
}

impl GenerationEngine {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            rules,
            preferences,
            dispatcher,
            renderer: TemplateRenderer::new(),
            config,
            claim_lease: Duration::from_secs(900),
        }
    }

    /// How long an unfinished confirmation claim blocks other invocations.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Run one generation invocation as of `now` (UTC calendar day).
    pub async fn run_generation(&self, now: DateTime<Utc>) -> GenerationSummary {
        let mut summary = GenerationSummary::new(now);
        let today = now.date_naive();
        tracing::info!(run_id = %summary.run_id, %today, "Generation run starting");

        self.redispatch_queued(now, &mut summary).await;

        let rules = match self.rules.list_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list rules");
                summary.errors.push(ItemError::new("rules", e));
                return summary;
            }
        };
        let eligible: Vec<RecurrenceRule> = rules.into_iter().filter(|r| r.is_eligible()).collect();

        let outcomes: Vec<(String, Result<RuleOutcome, EngineError>)> = stream::iter(eligible)
            .map(|rule| async move {
                let rule_id = rule.id.clone();
                (rule_id, self.process_rule(rule, now).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (rule_id, result) in outcomes {
            match result {
                Ok(outcome) => {
                    summary.generated.extend(outcome.generated);
                    summary.requests_queued.extend(outcome.requests_queued);
                    summary.warnings.extend(outcome.warnings);
                    summary.errors.extend(outcome.errors);
                    if outcome.superseded {
                        summary.superseded.push(rule_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(rule_id = %rule_id, error = %e, "Rule failed");
                    summary.errors.push(ItemError::new(rule_id, e));
                }
            }
        }

        summary.sort();
        tracing::info!(
            run_id = %summary.run_id,
            generated = summary.generated_count(),
            queued = summary.queued_count(),
            redispatched = summary.requests_redispatched,
            warnings = summary.warnings.len(),
            errors = summary.errors.len(),
            "Generation run complete"
        );
        summary
    }

    async fn process_rule(
        &self,
        rule: RecurrenceRule,
        now: DateTime<Utc>,
    ) -> Result<RuleOutcome, EngineError> {
        let today = now.date_naive();
        let recurrence = Recurrence::from_rule(&rule)?;

        if let Some(last) = rule.last_generated_date {
            if today < last {
                tracing::warn!(
                    rule_id = %rule.id,
                    %last,
                    %today,
                    "Clock is behind last generated date, nothing due"
                );
                return Ok(RuleOutcome::default());
            }
        }

        let plan = plan_due(&rule, &recurrence, today, self.config.backfill_cap)?;
        let Some(&last_date) = plan.dates.last() else {
            return Ok(RuleOutcome::default());
        };

        let mut outcome = RuleOutcome::default();
        let (intents, requests) = build_items(&rule, &plan.dates);
        let commit = GenerationCommit {
            rule_id: rule.id.clone(),
            expected_last_generated: rule.last_generated_date,
            expected_next_execution: rule.next_execution_date,
            last_generated_date: last_date,
            next_execution_date: plan.next_execution,
            intents,
            requests: requests.clone(),
        };

        let (inserted_intents, inserted_requests) = match self.rules.commit_generation(commit).await? {
            CommitOutcome::Applied {
                inserted_intents,
                inserted_requests,
            } => (inserted_intents, inserted_requests),
            CommitOutcome::Superseded => {
                tracing::info!(rule_id = %rule.id, "Rule already advanced by another invocation");
                outcome.superseded = true;
                return Ok(outcome);
            }
        };

        outcome.generated = inserted_occurrences(&rule.id, &plan.dates, &inserted_intents);
        outcome.requests_queued = inserted_occurrences(&rule.id, &plan.dates, &inserted_requests);

        if plan.capped {
            tracing::warn!(
                rule_id = %rule.id,
                cap = self.config.backfill_cap,
                resume_from = ?plan.next_execution,
                "Backfill cap reached, remainder deferred"
            );
            outcome.warnings.push(ItemError::new(
                rule.id.clone(),
                format!(
                    "backfill cap of {} reached; resuming from {} next run",
                    self.config.backfill_cap,
                    plan.next_execution.map_or_else(|| "-".to_string(), |d| d.to_string())
                ),
            ));
        }

        tracing::info!(
            rule_id = %rule.id,
            generated = outcome.generated.len(),
            queued = outcome.requests_queued.len(),
            last_generated = %last_date,
            next_execution = ?plan.next_execution,
            "Rule advanced"
        );

        let fresh: Vec<ConfirmationRequest> = requests
            .into_iter()
            .filter(|r| inserted_requests.contains(&r.dedup_key))
            .collect();
        for request in fresh {
            match self.deliver_confirmation(&request, now).await {
                Delivery::Attempted(errors) => outcome.errors.extend(errors),
                Delivery::HandledElsewhere => {}
                Delivery::Failed(error) => outcome.errors.push(error),
            }
        }

        Ok(outcome)
    }

    /// Deliver requests left undispatched by an earlier, interrupted run.
    async fn redispatch_queued(&self, now: DateTime<Utc>, summary: &mut GenerationSummary) {
        let queued = match self.rules.undispatched_confirmations().await {
            Ok(queued) => queued,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read queued confirmations");
                summary.errors.push(ItemError::new("confirmations", e));
                return;
            }
        };
        if queued.is_empty() {
            return;
        }

        tracing::info!(count = queued.len(), "Re-dispatching queued confirmation requests");
        let results: Vec<Delivery> = stream::iter(queued)
            .map(|request| async move { self.deliver_confirmation(&request, now).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for delivery in results {
            match delivery {
                Delivery::Attempted(errors) => {
                    summary.requests_redispatched += 1;
                    summary.errors.extend(errors);
                }
                Delivery::HandledElsewhere => {}
                Delivery::Failed(error) => summary.errors.push(error),
            }
        }
    }

    /// Claim a confirmation request, send it to the owner's enabled channels,
    /// then mark it dispatched. Failed channels are reported, not retried
    /// next run.
    async fn deliver_confirmation(
        &self,
        request: &ConfirmationRequest,
        now: DateTime<Utc>,
    ) -> Delivery {
        match self.try_deliver_confirmation(request, now).await {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!(key = %request.dedup_key, error = %e, "Confirmation dispatch failed");
                Delivery::Failed(ItemError::new(request.dedup_key.clone(), e))
            }
        }
    }

    async fn try_deliver_confirmation(
        &self,
        request: &ConfirmationRequest,
        now: DateTime<Utc>,
    ) -> Result<Delivery, EngineError> {
        match self
            .rules
            .claim_confirmation(&request.dedup_key, now, self.claim_lease)
            .await?
        {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyHandled(status) => {
                tracing::debug!(key = %request.dedup_key, ?status, "Confirmation already handled");
                return Ok(Delivery::HandledElsewhere);
            }
        }

        let mut errors = Vec::new();

        match self.preferences.preference(&request.user_id).await? {
            Some(preference) => {
                let ctx = ConfirmationContext {
                    rule_id: request.rule_id.clone(),
                    description: request
                        .description
                        .clone()
                        .unwrap_or_else(|| request.rule_id.clone()),
                    kind: request.effect.kind_label().to_string(),
                    amount: request.effect.amount(),
                    currency: request.effect.currency().to_string(),
                    occurrence_date: request.occurrence_date.to_string(),
                    mode: request.mode.as_str().to_string(),
                };
                let notification = self
                    .renderer
                    .confirmation(&ctx, request.dedup_key.clone())?;

                for result in self.dispatcher.dispatch(&preference, &notification).await {
                    if !result.success {
                        errors.push(ItemError::new(
                            format!("{}:{}", request.dedup_key, result.channel),
                            result.error.unwrap_or_else(|| "delivery failed".to_string()),
                        ));
                    }
                }
            }
            None => {
                tracing::debug!(
                    key = %request.dedup_key,
                    user_id = %request.user_id,
                    "No notification preference, request stays queued for the app"
                );
            }
        }

        self.rules
            .mark_confirmation_dispatched(&request.dedup_key)
            .await?;
        Ok(Delivery::Attempted(errors))
    }
}

/// Walk occurrences from the rule's cursor through `today`, stopping at the end
/// date or after `cap` occurrences.
fn plan_due(
    rule: &RecurrenceRule,
    recurrence: &Recurrence,
    today: NaiveDate,
    cap: u32,
) -> Result<DuePlan, EngineError> {
    let cap = cap.max(1) as usize;
    let mut cursor = seed_cursor(rule, recurrence)?;
    let mut dates = Vec::new();

    let due = |date: NaiveDate| date <= today && recurrence.within_end(date);
    while due(cursor) && dates.len() < cap {
        dates.push(cursor);
        cursor = recurrence.next_occurrence(cursor)?;
    }

    Ok(DuePlan {
        capped: dates.len() == cap && due(cursor),
        next_execution: recurrence.within_end(cursor).then_some(cursor),
        dates,
    })
}

/// The stored cursor when it is consistent with the rule, otherwise the next
/// occurrence after `last_generated_date` (or the first occurrence).
fn seed_cursor(rule: &RecurrenceRule, recurrence: &Recurrence) -> Result<NaiveDate, EngineError> {
    let cursor = match (rule.next_execution_date, rule.last_generated_date) {
        (Some(next), last) if next >= rule.start_date && last.map_or(true, |l| next > l) => next,
        (_, Some(last)) => recurrence.next_occurrence(last)?,
        (_, None) => recurrence.first_occurrence()?,
    };
    Ok(cursor)
}

/// The planned occurrences whose dedup keys the commit reported as inserted.
fn inserted_occurrences(
    rule_id: &str,
    dates: &[NaiveDate],
    inserted: &[String],
) -> Vec<GeneratedOccurrence> {
    dates
        .iter()
        .filter_map(|&date| {
            let dedup_key = occurrence_key(rule_id, date);
            inserted.contains(&dedup_key).then(|| GeneratedOccurrence {
                dedup_key,
                rule_id: rule_id.to_string(),
                occurrence_date: date,
            })
        })
        .collect()
}

fn build_items(
    rule: &RecurrenceRule,
    dates: &[NaiveDate],
) -> (Vec<TransactionIntent>, Vec<ConfirmationRequest>) {
    let mut intents = Vec::new();
    let mut requests = Vec::new();

    for &date in dates {
        let dedup_key = occurrence_key(&rule.id, date);
        if rule.creation_mode.requires_confirmation() {
            requests.push(ConfirmationRequest {
                dedup_key,
                rule_id: rule.id.clone(),
                user_id: rule.user_id.clone(),
                occurrence_date: date,
                mode: rule.creation_mode,
                effect: rule.effect.clone(),
                description: rule.description.clone(),
            });
        } else {
            intents.push(TransactionIntent {
                dedup_key,
                rule_id: rule.id.clone(),
                user_id: rule.user_id.clone(),
                occurrence_date: date,
                effect: rule.effect.clone(),
                description: rule.description.clone(),
            });
        }
    }

    (intents, requests)
}
