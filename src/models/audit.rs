use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable record of one executed command's credit impact.
///
/// Written only inside the same transaction as the balance decrement it
/// documents; never mutated or deleted afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub command_text: String,
    pub credits_deducted: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}
