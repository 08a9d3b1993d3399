use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

/// Roles supported by the authorization gate.
/// Matches the `role` column in the `users` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Approver,
    Member,
    Lead,
    Junior,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "approver" => Some(Role::Approver),
            "member" => Some(Role::Member),
            "lead" => Some(Role::Lead),
            "junior" => Some(Role::Junior),
            _ => None,
        }
    }

    /// Lead and junior carry no extra privileges; they authorize as member.
    pub fn effective(self) -> Role {
        match self {
            Role::Lead | Role::Junior => Role::Member,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Approver => "approver",
            Role::Member => "member",
            Role::Lead => "lead",
            Role::Junior => "junior",
        }
    }
}

/// A freshly minted credential. The plaintext key is shown exactly once;
/// only its hash is stored.
#[derive(Debug)]
pub struct IssuedKey {
    pub user_id: Uuid,
    pub plaintext: String,
    pub prefix: String,
}

// ── Tests ───────────────────────────────────────────────────────
