//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tally_core::config::EngineConfig;
use tally_core::{
    Channel, CreationMode, CreditCardBilling, FrequencySpec, NotificationPreference,
    RecurrenceRule, RuleEffect, WeekendHandling,
};
use tally_engine::{GenerationEngine, ReminderScheduler};
use tally_notify::{ChannelSender, Dispatcher, Notification, NotifyError, Recipient, RetryPolicy};
use tally_store::MemoryStore;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn at(y: i32, m: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, day, hour, 0, 0).unwrap()
}

// ── Mock sender ─────────────────────────────────────────────────────

/// Records every send; optionally slow, or failing every attempt with a
/// terminal error.
pub struct MockSender {
    channel: Channel,
    fail: bool,
    delay: Duration,
    pub send_count: Arc<AtomicUsize>,
    pub sent_keys: Mutex<Vec<String>>,
    pub sent_bodies: Mutex<Vec<String>>,
}

impl MockSender {
    fn build(channel: Channel, fail: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail,
            delay,
            send_count: Arc::new(AtomicUsize::new(0)),
            sent_keys: Mutex::new(Vec::new()),
            sent_bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn new(channel: Channel) -> Arc<Self> {
        Self::build(channel, false, Duration::ZERO)
    }

    pub fn failing(channel: Channel) -> Arc<Self> {
        Self::build(channel, true, Duration::ZERO)
    }

    /// Succeeds after `delay`, which must stay under the attempt timeout.
    pub fn slow(channel: Channel, delay: Duration) -> Arc<Self> {
        Self::build(channel, false, delay)
    }

    pub fn count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.sent_keys.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent_bodies.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChannelSender for MockSender {
    async fn send(&self, _recipient: &Recipient, notification: &Notification) -> Result<(), NotifyError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 400,
                body: "mock rejection".to_string(),
            });
        }
        self.sent_keys
            .lock()
            .unwrap()
            .push(notification.idempotency_key.clone());
        self.sent_bodies.lock().unwrap().push(notification.body.clone());
        Ok(())
    }

    fn channel(&self) -> Channel {
        self.channel
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        attempt_timeout: Duration::from_millis(200),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

pub fn dispatcher(senders: Vec<Arc<MockSender>>) -> Arc<Dispatcher> {
    let senders: Vec<Arc<dyn ChannelSender>> = senders
        .into_iter()
        .map(|s| s as Arc<dyn ChannelSender>)
        .collect();
    Arc::new(Dispatcher::with_senders(senders, fast_retry()))
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn rule(id: &str, frequency: FrequencySpec, start: NaiveDate) -> RecurrenceRule {
    RecurrenceRule {
        id: id.into(),
        user_id: "user-1".into(),
        description: Some(format!("{id} payment")),
        effect: RuleEffect::Expense {
            account_id: "acc-1".into(),
            category_id: Some("cat-1".into()),
            amount: 42.5,
            currency: "USD".into(),
        },
        frequency,
        weekend_handling: WeekendHandling::None,
        start_date: start,
        end_date: None,
        creation_mode: CreationMode::Automatic,
        is_active: true,
        is_paused: false,
        is_credit_card_recurring: false,
        last_generated_date: None,
        next_execution_date: None,
    }
}

pub fn card(id: &str, user_id: &str, due_day: u32) -> CreditCardBilling {
    CreditCardBilling {
        id: id.into(),
        user_id: user_id.into(),
        name: Some("Visa".into()),
        currency: "USD".into(),
        closing_day: Some(25),
        due_day,
    }
}

pub fn preference(user_id: &str, hour: u32, channels: &[Channel]) -> NotificationPreference {
    NotificationPreference {
        user_id: user_id.into(),
        push_enabled: channels.contains(&Channel::Push),
        telegram_enabled: channels.contains(&Channel::Telegram),
        whatsapp_enabled: channels.contains(&Channel::Whatsapp),
        notification_hour: hour,
        telegram_chat_id: Some("1001".into()),
        whatsapp_phone: Some("+15550100".into()),
    }
}

pub fn engine_config(backfill_cap: u32) -> EngineConfig {
    EngineConfig {
        backfill_cap,
        concurrency: 4,
    }
}

pub fn generation_engine(
    store: &Arc<MemoryStore>,
    dispatcher: Arc<Dispatcher>,
    backfill_cap: u32,
) -> GenerationEngine {
    GenerationEngine::new(
        store.clone(),
        store.clone(),
        dispatcher,
        engine_config(backfill_cap),
    )
}

pub fn reminder_scheduler(store: &Arc<MemoryStore>, dispatcher: Arc<Dispatcher>) -> ReminderScheduler {
    ReminderScheduler::new(store.clone(), store.clone(), store.clone(), dispatcher)
        .with_concurrency(4)
        .with_claim_lease(Duration::from_secs(900))
}

/// Occurrence dates of every stored transaction for `rule_id`, in order.
pub fn transaction_dates(store: &MemoryStore, rule_id: &str) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = store
        .transactions()
        .unwrap()
        .into_iter()
        .filter(|t| t.rule_id == rule_id)
        .map(|t| t.occurrence_date)
        .collect();
    dates.sort();
    dates
}
