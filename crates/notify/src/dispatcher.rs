//! Routes notifications to a user's enabled channels.
//!
//! Each channel send gets a bounded per-attempt timeout and a fixed number of
//! attempts with exponential backoff. Terminal errors are not retried.
//! Individual channel failures don't block other channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tally_core::config::{ChannelConfig, NotifyConfig};
use tally_core::{Channel, NotificationPreference};

use crate::telegram::TelegramSender;
use crate::traits::{ChannelSender, DispatchResult, Notification, NotifyError, Recipient};
use crate::webhook::WebhookSender;

/// Attempt bounds for one channel send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn delay_after(&self, attempt: u32, error: &NotifyError) -> Duration {
        match error {
            NotifyError::RateLimited { retry_after_secs } => {
                Duration::from_secs(*retry_after_secs).min(self.max_backoff)
            }
            _ => self.backoff_for(attempt),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&NotifyConfig::default())
    }
}

/// Dispatches notifications to channel senders, keyed by channel.
pub struct Dispatcher {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Create a dispatcher with no senders.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            senders: HashMap::new(),
            retry,
        }
    }

    /// Create a dispatcher from a set of senders. A later sender for the
    /// same channel replaces an earlier one.
    pub fn with_senders(senders: Vec<Arc<dyn ChannelSender>>, retry: RetryPolicy) -> Self {
        let mut dispatcher = Self::new(retry);
        for sender in senders {
            dispatcher.register(sender);
        }
        dispatcher
    }

    /// Build senders for every channel with configured credentials.
    ///
    /// Channels without credentials get no sender; sends to them fail with
    /// [`NotifyError::NoSender`] and are reported per item.
    pub fn from_channel_config(
        channels: &ChannelConfig,
        retry: RetryPolicy,
    ) -> Result<Self, NotifyError> {
        let mut dispatcher = Self::new(retry);
        let auth = channels.gateway_auth_token.as_deref();

        if let Some(token) = &channels.telegram_bot_token {
            dispatcher.register(Arc::new(TelegramSender::new(token)?));
        }
        if let Some(url) = &channels.push_gateway_url {
            dispatcher.register(Arc::new(WebhookSender::new(Channel::Push, url, auth)?));
        }
        if let Some(url) = &channels.whatsapp_gateway_url {
            dispatcher.register(Arc::new(WebhookSender::new(Channel::Whatsapp, url, auth)?));
        }

        tracing::info!(channels = ?dispatcher.channels(), "Notification dispatcher ready");
        Ok(dispatcher)
    }

    /// Register (or replace) the sender for its channel.
    pub fn register(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders.insert(sender.channel(), sender);
    }

    /// Channels with a registered sender.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.senders.keys().copied().collect();
        channels.sort();
        channels
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Deliver to every channel the user enabled.
    ///
    /// Channels are sent concurrently; results come back in the order of
    /// [`NotificationPreference::enabled_channels`].
    pub async fn dispatch(
        &self,
        preference: &NotificationPreference,
        notification: &Notification,
    ) -> Vec<DispatchResult> {
        let channels = preference.enabled_channels();
        if channels.is_empty() {
            tracing::debug!(user_id = %preference.user_id, "No notification channels enabled");
            return Vec::new();
        }

        join_all(
            channels
                .into_iter()
                .map(|channel| self.send_to(channel, preference, notification)),
        )
        .await
    }

    /// Deliver on a single channel, retrying transient failures.
    pub async fn send_to(
        &self,
        channel: Channel,
        preference: &NotificationPreference,
        notification: &Notification,
    ) -> DispatchResult {
        let start = Instant::now();
        let result = |success: bool, attempts: u32, error: Option<String>| DispatchResult {
            channel,
            idempotency_key: notification.idempotency_key.clone(),
            success,
            attempts,
            error,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let Some(sender) = self.senders.get(&channel) else {
            let e = NotifyError::NoSender(channel);
            tracing::warn!(user_id = %preference.user_id, %channel, error = %e, "Notification not delivered");
            return result(false, 0, Some(e.to_string()));
        };

        let recipient = Recipient::for_channel(preference, channel);
        let timeout_ms = self.retry.attempt_timeout.as_millis() as u64;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                self.retry.attempt_timeout,
                sender.send(&recipient, notification),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(NotifyError::Timeout(timeout_ms)),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!(
                        user_id = %recipient.user_id,
                        %channel,
                        attempt,
                        key = %notification.idempotency_key,
                        "Notification delivered"
                    );
                    return result(true, attempt, None);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt, &e);
                    tracing::warn!(
                        user_id = %recipient.user_id,
                        %channel,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %recipient.user_id,
                        %channel,
                        attempt,
                        error = %e,
                        "Notification delivery failed"
                    );
                    return result(false, attempt, Some(e.to_string()));
                }
            }
        }
    }
}
