//! Notification delivery for reminders and confirmation requests.
//!
//! This crate provides:
//! - `ChannelSender` trait, one implementation per delivery channel
//! - Telegram Bot API and HTTP gateway (push / WhatsApp) senders
//! - Minijinja rendering of reminder and confirmation messages
//! - Dispatcher that fans a notification out across a user's enabled
//!   channels with per-attempt timeouts and bounded retries

pub mod dispatcher;
pub mod telegram;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::{Dispatcher, RetryPolicy};
pub use telegram::TelegramSender;
pub use templating::{
    ConfirmationContext, MessageTemplate, MessageTemplates, ReminderContext, TemplateRenderer,
};
pub use traits::{ChannelSender, DispatchResult, Notification, NotifyError, Recipient};
pub use webhook::WebhookSender;
