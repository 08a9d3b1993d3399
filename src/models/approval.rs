use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::rule::Rule;

/// A human-review escalation for a command the requester wants whitelisted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub command_text: String,
    pub status: ApprovalStatus,
    pub approval_count: i64,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// `Pending` is the initial state; `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

/// Result of recording one approval vote.
#[derive(Debug)]
pub struct ApprovalOutcome {
    pub request_id: Uuid,
    pub approval_count: i64,
    pub threshold: i64,
    /// Populated only on the vote that reached the threshold.
    pub rule: Option<Rule>,
}
