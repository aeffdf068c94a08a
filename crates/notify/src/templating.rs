//! Minijinja rendering for reminder and confirmation messages.
//!
//! Templates are plain strings held by the renderer, so a fresh
//! [`minijinja::Environment`] is built per render call.

use std::collections::HashMap;

use crate::traits::{Notification, NotifyError};

/// Subject and body template for one message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

/// Templates for every message the engine sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    pub reminder: MessageTemplate,
    pub confirmation: MessageTemplate,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            reminder: MessageTemplate {
                subject: "Payment due tomorrow: {{ card_name }}".to_string(),
                body: "Your {{ card_name }} ({{ currency | upper }}) payment is due on \
                       {{ due_date }}.{% if closing_date %} The statement closed on \
                       {{ closing_date }}.{% endif %}"
                    .to_string(),
            },
            confirmation: MessageTemplate {
                subject: "Confirm {{ kind }}: {{ description }}".to_string(),
                body: "{{ description }}: {{ amount | round(2) }} {{ currency | upper }} \
                       on {{ occurrence_date }}. \
                       {% if mode == 'bot_confirmation' %}Reply to this message to confirm.\
                       {% else %}Open the app to confirm.{% endif %}"
                    .to_string(),
            },
        }
    }
}

/// Values available to the reminder template.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReminderContext {
    pub card_id: String,
    pub card_name: String,
    pub currency: String,
    /// ISO date.
    pub due_date: String,
    pub closing_date: Option<String>,
}

/// Values available to the confirmation template.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConfirmationContext {
    pub rule_id: String,
    pub description: String,
    /// `expense`, `income` or `transfer`.
    pub kind: String,
    pub amount: f64,
    pub currency: String,
    /// ISO date.
    pub occurrence_date: String,
    /// `bot_confirmation` or `manual_confirmation`.
    pub mode: String,
}

/// Renders notification templates using minijinja.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    templates: MessageTemplates,
}

impl TemplateRenderer {
    /// Create a renderer with the built-in templates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a renderer with custom templates, rejecting any that fail to
    /// parse.
    pub fn with_templates(templates: MessageTemplates) -> Result<Self, NotifyError> {
        let renderer = Self { templates };
        for tmpl in [
            &renderer.templates.reminder.subject,
            &renderer.templates.reminder.body,
            &renderer.templates.confirmation.subject,
            &renderer.templates.confirmation.body,
        ] {
            renderer.validate(tmpl)?;
        }
        Ok(renderer)
    }

    /// Build a configured minijinja environment with custom filters.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render<S: serde::Serialize>(&self, template_str: &str, ctx: &S) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Check that a template string parses, without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }

    /// Render the payment reminder for one card cycle.
    pub fn reminder(
        &self,
        ctx: &ReminderContext,
        idempotency_key: String,
    ) -> Result<Notification, NotifyError> {
        let mut metadata = HashMap::new();
        metadata.insert("card_id".to_string(), ctx.card_id.clone());
        metadata.insert("due_date".to_string(), ctx.due_date.clone());
        Ok(Notification {
            subject: self.render(&self.templates.reminder.subject, ctx)?,
            body: self.render(&self.templates.reminder.body, ctx)?,
            idempotency_key,
            metadata,
        })
    }

    /// Render the confirmation request for one pending occurrence.
    pub fn confirmation(
        &self,
        ctx: &ConfirmationContext,
        idempotency_key: String,
    ) -> Result<Notification, NotifyError> {
        let mut metadata = HashMap::new();
        metadata.insert("rule_id".to_string(), ctx.rule_id.clone());
        metadata.insert("occurrence_date".to_string(), ctx.occurrence_date.clone());
        Ok(Notification {
            subject: self.render(&self.templates.confirmation.subject, ctx)?,
            body: self.render(&self.templates.confirmation.body, ctx)?,
            idempotency_key,
            metadata,
        })
    }
}

/// Round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder_context() -> ReminderContext {
        ReminderContext {
            card_id: "card-1".to_string(),
            card_name: "Visa Gold".to_string(),
            currency: "usd".to_string(),
            due_date: "2024-03-15".to_string(),
            closing_date: Some("2024-02-28".to_string()),
        }
    }

    fn confirmation_context(mode: &str) -> ConfirmationContext {
        ConfirmationContext {
            rule_id: "rule-1".to_string(),
            description: "Rent".to_string(),
            kind: "expense".to_string(),
            amount: 1250.5,
            currency: "EUR".to_string(),
            occurrence_date: "2024-05-31".to_string(),
            mode: mode.to_string(),
        }
    }

    #[test]
    fn reminder_renders_subject_body_and_metadata() {
        let renderer = TemplateRenderer::new();
        let n = renderer
            .reminder(&reminder_context(), "card-1:2024-03-15:push".to_string())
            .unwrap();
        assert_eq!(n.subject, "Payment due tomorrow: Visa Gold");
        assert_eq!(
            n.body,
            "Your Visa Gold (USD) payment is due on 2024-03-15. The statement closed on 2024-02-28."
        );
        assert_eq!(n.idempotency_key, "card-1:2024-03-15:push");
        assert_eq!(n.metadata["card_id"], "card-1");
    }

    #[test]
    fn reminder_without_closing_date() {
        let renderer = TemplateRenderer::new();
        let mut ctx = reminder_context();
        ctx.closing_date = None;
        let n = renderer.reminder(&ctx, "k".to_string()).unwrap();
        assert_eq!(n.body, "Your Visa Gold (USD) payment is due on 2024-03-15.");
    }

    #[test]
    fn confirmation_wording_follows_mode() {
        let renderer = TemplateRenderer::new();
        let bot = renderer
            .confirmation(&confirmation_context("bot_confirmation"), "rule-1:2024-05-31".into())
            .unwrap();
        assert_eq!(bot.subject, "Confirm expense: Rent");
        assert_eq!(
            bot.body,
            "Rent: 1250.50 EUR on 2024-05-31. Reply to this message to confirm."
        );

        let manual = renderer
            .confirmation(&confirmation_context("manual_confirmation"), "k".into())
            .unwrap();
        assert!(manual.body.ends_with("Open the app to confirm."));
    }

    #[test]
    fn round_filter_precision() {
        let renderer = TemplateRenderer::new();
        let out = renderer
            .render("{{ amount | round(1) }}", &confirmation_context("x"))
            .unwrap();
        assert_eq!(out, "1250.5");
    }

    #[test]
    fn custom_templates_validated() {
        let mut templates = MessageTemplates::default();
        templates.reminder.body = "{{ unclosed".to_string();
        match TemplateRenderer::with_templates(templates).unwrap_err() {
            NotifyError::Template(msg) => assert!(!msg.is_empty()),
            other => panic!("Expected Template error, got: {:?}", other),
        }
    }

    #[test]
    fn custom_templates_used() {
        let mut templates = MessageTemplates::default();
        templates.reminder.subject = "{{ card_name | lower }} due".to_string();
        let renderer = TemplateRenderer::with_templates(templates).unwrap();
        let n = renderer.reminder(&reminder_context(), "k".into()).unwrap();
        assert_eq!(n.subject, "visa gold due");
    }
}
