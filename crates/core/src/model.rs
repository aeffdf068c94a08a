//! Persisted entities consumed and produced by the scheduling engine.
//!
//! Field names follow the stored schema; the engine never owns the storage
//! format, only the meaning of each field.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RuleId = String;
pub type UserId = String;
pub type CardId = String;

/// Build the deterministic dedup key for one occurrence of a rule.
pub fn occurrence_key(rule_id: &str, occurrence: NaiveDate) -> String {
    format!("{rule_id}:{occurrence}")
}

// ── Channels ──────────────────────────────────────────────────

/// Delivery channel a user can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    /// Telegram bot message to the user's chat id.
    Telegram,
    /// WhatsApp message through the messaging gateway.
    Whatsapp,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Push, Channel::Telegram, Channel::Whatsapp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Telegram => "telegram",
            Channel::Whatsapp => "whatsapp",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Recurrence rules ──────────────────────────────────────────

/// How a generated occurrence becomes a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationMode {
    /// Write the transaction directly.
    Automatic,
    /// Ask the user through a chat bot before writing.
    BotConfirmation,
    /// Ask the user through the app before writing.
    ManualConfirmation,
}

impl CreationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreationMode::Automatic => "automatic",
            CreationMode::BotConfirmation => "bot_confirmation",
            CreationMode::ManualConfirmation => "manual_confirmation",
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        !matches!(self, CreationMode::Automatic)
    }
}

/// What happens when an occurrence lands on Saturday or Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekendHandling {
    #[default]
    None,
    /// Move to the following Monday.
    ShiftForward,
    /// Move to the preceding Friday.
    ShiftBackward,
    /// Drop the occurrence entirely.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyType {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Stored, loosely-typed recurrence description.
///
/// Only the fields relevant to `kind` are meaningful. Converting it into a
/// typed frequency validates that the required ones are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencySpec {
    #[serde(rename = "type")]
    pub kind: FrequencyType,
    /// Day of month, 1-31. Clamped per target month at resolution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    /// Day of week, 0 = Sunday .. 6 = Saturday.
    #[serde(default, rename = "dayOfWeek", skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u32>,
    /// Month of year, 1-12 (yearly only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    /// Every N periods. Absent means 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

impl FrequencySpec {
    pub fn daily(interval: u32) -> Self {
        Self { kind: FrequencyType::Daily, day: None, day_of_week: None, month: None, interval: Some(interval) }
    }

    pub fn weekly(day_of_week: u32, interval: u32) -> Self {
        Self { day_of_week: Some(day_of_week), ..Self::with_kind(FrequencyType::Weekly, interval) }
    }

    pub fn monthly(day: u32, interval: u32) -> Self {
        Self { day: Some(day), ..Self::with_kind(FrequencyType::Monthly, interval) }
    }

    pub fn yearly(month: u32, day: u32, interval: u32) -> Self {
        Self { month: Some(month), day: Some(day), ..Self::with_kind(FrequencyType::Yearly, interval) }
    }

    fn with_kind(kind: FrequencyType, interval: u32) -> Self {
        Self { kind, day: None, day_of_week: None, month: None, interval: Some(interval) }
    }
}

/// The ledger effect a rule produces on each occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleEffect {
    Expense {
        account_id: String,
        #[serde(default)]
        category_id: Option<String>,
        amount: f64,
        currency: String,
    },
    Income {
        account_id: String,
        #[serde(default)]
        category_id: Option<String>,
        amount: f64,
        currency: String,
    },
    /// Both sides may carry different amounts when the accounts hold
    /// different currencies.
    Transfer {
        from_account_id: String,
        to_account_id: String,
        amount: f64,
        currency: String,
        #[serde(default)]
        to_amount: Option<f64>,
        #[serde(default)]
        to_currency: Option<String>,
    },
}

impl RuleEffect {
    pub fn amount(&self) -> f64 {
        match self {
            RuleEffect::Expense { amount, .. }
            | RuleEffect::Income { amount, .. }
            | RuleEffect::Transfer { amount, .. } => *amount,
        }
    }

    pub fn currency(&self) -> &str {
        match self {
            RuleEffect::Expense { currency, .. }
            | RuleEffect::Income { currency, .. }
            | RuleEffect::Transfer { currency, .. } => currency,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            RuleEffect::Expense { .. } => "expense",
            RuleEffect::Income { .. } => "income",
            RuleEffect::Transfer { .. } => "transfer",
        }
    }
}

/// A user-defined recurring obligation and its generation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub id: RuleId,
    pub user_id: UserId,
    #[serde(default)]
    pub description: Option<String>,
    pub effect: RuleEffect,
    pub frequency: FrequencySpec,
    #[serde(default)]
    pub weekend_handling: WeekendHandling,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub creation_mode: CreationMode,
    pub is_active: bool,
    #[serde(default)]
    pub is_paused: bool,
    /// The rule is the recurring payment of a credit card.
    #[serde(default)]
    pub is_credit_card_recurring: bool,
    #[serde(default)]
    pub last_generated_date: Option<NaiveDate>,
    #[serde(default)]
    pub next_execution_date: Option<NaiveDate>,
}

impl RecurrenceRule {
    /// Active and not paused. End dates are checked by the engine.
    pub fn is_eligible(&self) -> bool {
        self.is_active && !self.is_paused
    }

    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.id)
    }
}

// ── Credit cards & preferences ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCardBilling {
    pub id: CardId,
    pub user_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    pub currency: String,
    /// Statement closing day of month.
    #[serde(default)]
    pub closing_day: Option<u32>,
    /// Payment due day of month.
    pub due_day: u32,
}

impl CreditCardBilling {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: UserId,
    #[serde(default)]
    pub push_enabled: bool,
    #[serde(default)]
    pub telegram_enabled: bool,
    #[serde(default)]
    pub whatsapp_enabled: bool,
    /// Hour of day (0-23) during which reminders may fire.
    pub notification_hour: u32,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub whatsapp_phone: Option<String>,
}

impl NotificationPreference {
    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Push => self.push_enabled,
            Channel::Telegram => self.telegram_enabled,
            Channel::Whatsapp => self.whatsapp_enabled,
        }
    }

    /// Enabled channels in a stable order.
    pub fn enabled_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    /// Channel-specific address, when the channel needs one.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Push => None,
            Channel::Telegram => self.telegram_chat_id.as_deref(),
            Channel::Whatsapp => self.whatsapp_phone.as_deref(),
        }
    }
}

// ── Reminder dedup records ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Claimed by an invocation, send not finished.
    Pending,
    Sent,
    /// All attempts exhausted. Kept to stop retry storms.
    Failed,
}

/// Identity of one reminder: one card cycle on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReminderKey {
    pub card_id: CardId,
    pub due_date: NaiveDate,
    pub channel: Channel,
}

impl fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.card_id, self.due_date, self.channel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderEvent {
    #[serde(flatten)]
    pub key: ReminderKey,
    pub status: ReminderStatus,
    pub attempted_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

// ── Generation output ─────────────────────────────────────────

/// A ready-to-persist transaction for one occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub dedup_key: String,
    pub rule_id: RuleId,
    pub user_id: UserId,
    pub occurrence_date: NaiveDate,
    pub effect: RuleEffect,
    #[serde(default)]
    pub description: Option<String>,
}

/// A request asking the user to confirm one occurrence before it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub dedup_key: String,
    pub rule_id: RuleId,
    pub user_id: UserId,
    pub occurrence_date: NaiveDate,
    pub mode: CreationMode,
    pub effect: RuleEffect,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_spec_uses_stored_field_names() {
        let spec: FrequencySpec =
            serde_json::from_str(r#"{"type":"weekly","dayOfWeek":6,"interval":2}"#).unwrap();
        assert_eq!(spec, FrequencySpec::weekly(6, 2));

        let json = serde_json::to_value(FrequencySpec::monthly(31, 1)).unwrap();
        assert_eq!(json["type"], "monthly");
        assert_eq!(json["day"], 31);
        assert!(json.get("dayOfWeek").is_none());
    }

    #[test]
    fn interval_is_optional() {
        let spec: FrequencySpec = serde_json::from_str(r#"{"type":"daily"}"#).unwrap();
        assert_eq!(spec.interval, None);
    }

    #[test]
    fn transfer_effect_roundtrips_with_differing_sides() {
        let json = r#"{"kind":"transfer","from_account_id":"a","to_account_id":"b",
            "amount":100.0,"currency":"USD","to_amount":92.5,"to_currency":"EUR"}"#;
        let effect: RuleEffect = serde_json::from_str(json).unwrap();
        assert_eq!(effect.kind_label(), "transfer");
        assert_eq!(effect.amount(), 100.0);
        assert_eq!(effect.currency(), "USD");
    }

    #[test]
    fn enabled_channels_in_stable_order() {
        let pref = NotificationPreference {
            user_id: "u1".into(),
            push_enabled: true,
            telegram_enabled: false,
            whatsapp_enabled: true,
            notification_hour: 9,
            telegram_chat_id: None,
            whatsapp_phone: Some("+100".into()),
        };
        assert_eq!(pref.enabled_channels(), vec![Channel::Push, Channel::Whatsapp]);
        assert_eq!(pref.address_for(Channel::Whatsapp), Some("+100"));
        assert_eq!(pref.address_for(Channel::Push), None);
    }

    #[test]
    fn keys_are_deterministic() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(occurrence_key("rule-1", date), "rule-1:2024-02-29");

        let key = ReminderKey { card_id: "card-9".into(), due_date: date, channel: Channel::Telegram };
        assert_eq!(key.to_string(), "card-9:2024-02-29:telegram");
    }

    #[test]
    fn confirmation_modes() {
        assert!(!CreationMode::Automatic.requires_confirmation());
        assert!(CreationMode::BotConfirmation.requires_confirmation());
        assert!(CreationMode::ManualConfirmation.requires_confirmation());
    }
}
