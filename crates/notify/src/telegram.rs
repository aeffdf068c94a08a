//! Telegram Bot API sender.
//!
//! Delivers notifications via the Telegram Bot API `sendMessage` endpoint to
//! the chat id stored on the user's preference. Honours the `retry_after`
//! hint Telegram returns with HTTP 429.

use tally_core::Channel;

use crate::traits::{ChannelSender, Notification, NotifyError, Recipient};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Seconds to wait when a 429 response carries no `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Escapes special characters for Telegram MarkdownV2 parse mode.
pub fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: [char; 18] = [
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut result = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        if SPECIAL.contains(&ch) {
            result.push('\\');
        }
        result.push(ch);
    }
    result
}

/// Sends notifications via the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramSender {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramSender {
    /// Creates a sender from a bot token.
    ///
    /// A token of the form `${VAR}` is resolved from the environment.
    /// Returns [`NotifyError::Config`] if the token is empty or the variable
    /// is missing.
    pub fn new(bot_token: &str) -> Result<Self, NotifyError> {
        let resolved = resolve_token(bot_token)?;
        if resolved.is_empty() {
            return Err(NotifyError::Config(
                "Telegram bot token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            bot_token: resolved,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Point the sender at a different Bot API host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn message_text(notification: &Notification) -> String {
        format!(
            "*{}*\n\n{}",
            escape_markdown_v2(&notification.subject),
            escape_markdown_v2(&notification.body)
        )
    }
}

fn resolve_token(token: &str) -> Result<String, NotifyError> {
    if !token.starts_with("${") {
        return Ok(token.to_string());
    }
    let var_name = token
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| NotifyError::Config(format!("Malformed env var reference: {token}")))?;
    std::env::var(var_name)
        .map_err(|_| NotifyError::Config(format!("Environment variable '{var_name}' is not set")))
}

/// Pull `parameters.retry_after` out of a Bot API error body.
fn retry_after(body: &serde_json::Value) -> u64 {
    body.get("parameters")
        .and_then(|p| p.get("retry_after"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[async_trait::async_trait]
impl ChannelSender for TelegramSender {
    async fn send(
        &self,
        recipient: &Recipient,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        let chat_id = recipient.require_address(Channel::Telegram)?;
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": Self::message_text(notification),
            "parse_mode": "MarkdownV2",
        });

        tracing::debug!(
            chat_id = %chat_id,
            key = %notification.idempotency_key,
            "Sending Telegram notification"
        );

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let resp_body: serde_json::Value = response.json().await?;

        if resp_body.get("ok") == Some(&serde_json::Value::Bool(true)) {
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NotifyError::RateLimited {
                retry_after_secs: retry_after(&resp_body),
            });
        }

        let description = resp_body
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown Telegram API error");

        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body: description.to_string(),
        })
    }

    fn channel(&self) -> Channel {
        Channel::Telegram
    }
}
