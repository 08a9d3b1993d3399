//! Core authorization engine: rule matching, credit charging, and the
//! approval workflow. Handlers and the CLI go through this layer; all durable
//! state lives in the store.

pub mod approval;
pub mod matcher;

use uuid::Uuid;

use crate::config::{Config, COMMAND_COST};
use crate::errors::AppError;
use crate::models::audit::AuditEntry;
use crate::models::rule::{Rule, RuleAction};
use crate::notification::webhook::WebhookNotifier;
use crate::store::SqliteStore;

pub struct Engine {
    store: SqliteStore,
    notifier: WebhookNotifier,
    webhook_urls: Vec<String>,
    webhook_secret: Option<String>,
}

/// Disposition of a submitted command.
#[derive(Debug)]
pub enum CommandOutcome {
    /// An auto-accept rule matched and the charge committed.
    Executed { rule: Rule, entry: AuditEntry },
    /// Either an auto-reject rule matched (`rule` is set) or nothing matched
    /// and the command was denied by default (`rule` is None).
    Rejected { rule: Option<Rule> },
}

impl Engine {
    pub fn new(store: SqliteStore, notifier: WebhookNotifier, config: &Config) -> Self {
        Self {
            store,
            notifier,
            webhook_urls: config.webhook_urls.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Gate one command: match it against the rule set and, on an
    /// auto-accept match, debit the fixed cost and append the audit entry in
    /// one transaction. Rejections of any kind leave the balance untouched.
    pub async fn execute_command(
        &self,
        user_id: Uuid,
        command_text: &str,
    ) -> Result<CommandOutcome, AppError> {
        let command_text = command_text.trim();
        if command_text.is_empty() {
            return Err(AppError::Validation("command_text must not be empty".into()));
        }

        let rules = self.store.list_rules().await?;
        let matched = matcher::evaluate(&rules, command_text);

        match matched {
            None => {
                tracing::debug!(command = command_text, "no rule matched, denying by default");
                Ok(CommandOutcome::Rejected { rule: None })
            }
            Some(rule) if rule.action == RuleAction::AutoReject => {
                tracing::info!(
                    rule_id = %rule.id,
                    command = command_text,
                    "command rejected by rule"
                );
                Ok(CommandOutcome::Rejected {
                    rule: Some(rule.clone()),
                })
            }
            Some(rule) => {
                let entry = self
                    .store
                    .charge_command(user_id, command_text, COMMAND_COST)
                    .await?;
                tracing::info!(
                    rule_id = %rule.id,
                    user_id = %user_id,
                    deducted = entry.credits_deducted,
                    balance = entry.balance_after,
                    "command executed"
                );
                Ok(CommandOutcome::Executed {
                    rule: rule.clone(),
                    entry,
                })
            }
        }
    }

    /// Validate and add a rule. The pattern must compile and must not collide
    /// with an existing rule's pattern string.
    pub async fn add_rule(
        &self,
        pattern: &str,
        action: RuleAction,
        example: Option<&str>,
    ) -> Result<Rule, AppError> {
        matcher::validate_pattern(pattern)?;
        self.store.insert_rule(pattern, action, example).await
    }

    pub async fn update_rule(
        &self,
        id: Uuid,
        pattern: Option<&str>,
        action: Option<RuleAction>,
        example: Option<&str>,
    ) -> Result<Rule, AppError> {
        if let Some(p) = pattern {
            matcher::validate_pattern(p)?;
        }
        self.store.update_rule(id, pattern, action, example).await
    }

    pub(crate) fn webhook_targets(&self) -> (&[String], Option<&str>, &WebhookNotifier) {
        (
            &self.webhook_urls,
            self.webhook_secret.as_deref(),
            &self.notifier,
        )
    }
}
