//! Channel sender trait definition and shared error types.

use std::collections::HashMap;

use tally_core::{Channel, NotificationPreference};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Send timed out after {0}ms")]
    Timeout(u64),

    #[error("Gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No {channel} address on file for user {user_id}")]
    MissingAddress { channel: Channel, user_id: String },

    #[error("No sender configured for channel {0}")]
    NoSender(Channel),
}

impl NotifyError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Http(_) | NotifyError::Timeout(_) | NotifyError::RateLimited { .. } => {
                true
            }
            NotifyError::Rejected { status, .. } => *status >= 500 || *status == 408,
            NotifyError::Template(_)
            | NotifyError::Config(_)
            | NotifyError::MissingAddress { .. }
            | NotifyError::NoSender(_) => false,
        }
    }
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    /// The rendered subject/title.
    pub subject: String,
    /// The rendered body content.
    pub body: String,
    /// Stable key for this logical message; gateways use it to drop
    /// duplicates across retries.
    pub idempotency_key: String,
    /// Additional metadata (e.g. card id, rule id).
    pub metadata: HashMap<String, String>,
}

/// Who a notification goes to on one channel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Recipient {
    pub user_id: String,
    /// Channel-specific address (chat id, phone number) when the channel
    /// needs one.
    pub address: Option<String>,
}

impl Recipient {
    pub fn for_channel(preference: &NotificationPreference, channel: Channel) -> Self {
        Self {
            user_id: preference.user_id.clone(),
            address: preference.address_for(channel).map(str::to_string),
        }
    }

    /// The address, or [`NotifyError::MissingAddress`].
    pub fn require_address(&self, channel: Channel) -> Result<&str, NotifyError> {
        self.address
            .as_deref()
            .ok_or_else(|| NotifyError::MissingAddress {
                channel,
                user_id: self.user_id.clone(),
            })
    }
}

/// Trait for delivery channel implementations.
#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    /// Deliver a notification to one recipient through this channel.
    async fn send(&self, recipient: &Recipient, notification: &Notification)
        -> Result<(), NotifyError>;

    /// The channel this sender serves.
    fn channel(&self) -> Channel;
}

/// Result of delivering a notification on a single channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchResult {
    pub channel: Channel,
    pub idempotency_key: String,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(NotifyError::Timeout(10).is_retryable());
        assert!(NotifyError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(NotifyError::Rejected { status: 503, body: String::new() }.is_retryable());
        assert!(!NotifyError::Rejected { status: 400, body: String::new() }.is_retryable());
        assert!(!NotifyError::Config("bad".into()).is_retryable());
        assert!(!NotifyError::NoSender(Channel::Push).is_retryable());
    }

    #[test]
    fn recipient_requires_chat_address() {
        let pref = NotificationPreference {
            user_id: "u1".into(),
            push_enabled: true,
            telegram_enabled: true,
            whatsapp_enabled: false,
            notification_hour: 8,
            telegram_chat_id: None,
            whatsapp_phone: None,
        };
        let recipient = Recipient::for_channel(&pref, Channel::Telegram);
        let err = recipient.require_address(Channel::Telegram).unwrap_err();
        assert!(err.to_string().contains("telegram"));
        assert!(err.to_string().contains("u1"));
    }
}
