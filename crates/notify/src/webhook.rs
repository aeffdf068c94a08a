//! HTTP gateway sender for push and WhatsApp delivery.
//!
//! Each notification is POSTed as JSON to the channel's gateway URL with an
//! `Idempotency-Key` header so the gateway can drop duplicate deliveries
//! across retries.

use std::time::Duration;

use tally_core::Channel;

use crate::traits::{ChannelSender, Notification, NotifyError, Recipient};

/// Seconds to wait when a 429 response carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers notifications as JSON over HTTP to a channel gateway.
#[derive(Debug)]
pub struct WebhookSender {
    channel: Channel,
    /// Target URL (env vars already resolved).
    url: String,
    /// Bearer token sent on every request, if set.
    auth_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, serde::Serialize)]
struct GatewayPayload<'a> {
    user_id: &'a str,
    channel: Channel,
    address: Option<&'a str>,
    subject: &'a str,
    body: &'a str,
    idempotency_key: &'a str,
    metadata: &'a std::collections::HashMap<String, String>,
}

impl WebhookSender {
    /// Create a sender for `channel` posting to `url`.
    ///
    /// Environment variable references (`${VAR_NAME}`) in the URL and token
    /// are resolved eagerly. Telegram has its own sender and is rejected here.
    pub fn new(channel: Channel, url: &str, auth_token: Option<&str>) -> Result<Self, NotifyError> {
        if channel == Channel::Telegram {
            return Err(NotifyError::Config(
                "telegram delivery uses TelegramSender, not a gateway".to_string(),
            ));
        }

        let url = resolve_env_vars(url)?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(NotifyError::Config(format!(
                "{channel} gateway URL must be http(s): {url}"
            )));
        }

        let auth_token = auth_token.map(resolve_env_vars).transpose()?;

        Ok(Self {
            channel,
            url,
            auth_token,
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl ChannelSender for WebhookSender {
    async fn send(
        &self,
        recipient: &Recipient,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        // WhatsApp needs a phone number; push is addressed by user id.
        let address = match self.channel {
            Channel::Whatsapp => Some(recipient.require_address(self.channel)?),
            _ => recipient.address.as_deref(),
        };

        let payload = GatewayPayload {
            user_id: &recipient.user_id,
            channel: self.channel,
            address,
            subject: &notification.subject,
            body: &notification.body,
            idempotency_key: &notification.idempotency_key,
            metadata: &notification.metadata,
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &notification.idempotency_key)
            .json(&payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(
                channel = %self.channel,
                url = %self.url,
                %status,
                "Gateway accepted notification"
            );
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(NotifyError::RateLimited { retry_after_secs });
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        tracing::warn!(
            channel = %self.channel,
            url = %self.url,
            %status,
            body = %body,
            "Gateway returned non-2xx status"
        );
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn channel(&self) -> Channel {
        self.channel
    }
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            NotifyError::Config(format!("unclosed env var reference in: {input}"))
        })?;
        let var_name = &after[..end];
        let value = std::env::var(var_name)
            .map_err(|_| NotifyError::Config(format!("env var not found: {var_name}")))?;
        result.push_str(&value);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}
