use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pattern→action pair evaluated against submitted commands.
///
/// `seq` is the matching priority: rules are scanned in ascending insertion
/// order and the first whose pattern matches wins. Patterns are unique as
/// exact case-sensitive strings regardless of action.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rule {
    pub seq: i64,
    pub id: Uuid,
    pub pattern: String,
    pub action: RuleAction,
    pub example: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Terminal disposition a matched rule assigns to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "snake_case")]
pub enum RuleAction {
    AutoAccept,
    AutoReject,
}

impl RuleAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AUTO_ACCEPT" => Some(RuleAction::AutoAccept),
            "AUTO_REJECT" => Some(RuleAction::AutoReject),
            _ => None,
        }
    }
}
