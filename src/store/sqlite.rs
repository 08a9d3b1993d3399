use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::approval::{ApprovalOutcome, ApprovalRequest, ApprovalStatus};
use crate::models::audit::AuditEntry;
use crate::models::rule::{Rule, RuleAction};
use crate::models::user::{Role, User};

type Result<T> = std::result::Result<T, AppError>;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same in-memory database.
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- User Operations --

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        role: Role,
        credits: i64,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, username, email, role, credits, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               RETURNING id, username, email, role, credits, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .bind(role)
        .bind(credits)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "username or email already taken"))?;
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, role, credits, created_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, username, email, role, credits, created_at FROM users ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    /// Usernames of everyone who can review approval requests.
    pub async fn list_approver_usernames(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT username FROM users WHERE role = 'approver' ORDER BY username ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    // -- Credential Operations --

    pub async fn insert_api_key(
        &self,
        user_id: Uuid,
        key_hash: &str,
        key_prefix: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO api_keys (id, user_id, key_hash, key_prefix, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(key_hash)
        .bind(key_prefix)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "user already has a credential"))?;
        Ok(())
    }

    /// Resolve an opaque credential hash to its owning user, or None.
    pub async fn resolve_api_key(&self, key_hash: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT u.id, u.username, u.email, u.role, u.credits, u.created_at
               FROM users u
               JOIN api_keys k ON k.user_id = u.id
               WHERE k.key_hash = ?1"#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Record credential use. Best-effort bookkeeping, not part of any
    /// decision path.
    pub async fn touch_api_key(&self, key_hash: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = ?1 WHERE key_hash = ?2")
            .bind(Utc::now())
            .bind(key_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Rule Operations --

    pub async fn insert_rule(
        &self,
        pattern: &str,
        action: RuleAction,
        example: Option<&str>,
    ) -> Result<Rule> {
        let rule = sqlx::query_as::<_, Rule>(
            r#"INSERT INTO rules (id, pattern, action, example, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               RETURNING seq, id, pattern, action, example, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(pattern)
        .bind(action)
        .bind(example)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "a rule with this pattern already exists"))?;
        Ok(rule)
    }

    /// All rules in matching priority order (ascending insertion order).
    pub async fn list_rules(&self) -> Result<Vec<Rule>> {
        let rules = sqlx::query_as::<_, Rule>(
            "SELECT seq, id, pattern, action, example, created_at FROM rules ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Option<Rule>> {
        let rule = sqlx::query_as::<_, Rule>(
            "SELECT seq, id, pattern, action, example, created_at FROM rules WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        id: Uuid,
        pattern: Option<&str>,
        action: Option<RuleAction>,
        example: Option<&str>,
    ) -> Result<Rule> {
        let rule = sqlx::query_as::<_, Rule>(
            r#"UPDATE rules
               SET pattern = COALESCE(?1, pattern),
                   action = COALESCE(?2, action),
                   example = COALESCE(?3, example)
               WHERE id = ?4
               RETURNING seq, id, pattern, action, example, created_at"#,
        )
        .bind(pattern)
        .bind(action)
        .bind(example)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::conflict_on_unique(e, "a rule with this pattern already exists"))?
        .ok_or_else(|| AppError::NotFound(format!("rule {} not found", id)))?;
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Credit Ledger --

    /// Debit `amount` from the user and append the matching audit entry as a
    /// single transaction. The guarded UPDATE is the balance check: it runs
    /// first so the store's writer lock serializes competing charges, and a
    /// balance below `amount` leaves no mutation behind.
    pub async fn charge_command(
        &self,
        user_id: Uuid,
        command_text: &str,
        amount: i64,
    ) -> Result<AuditEntry> {
        let mut tx = self.pool.begin().await?;

        let debited = sqlx::query(
            "UPDATE users SET credits = credits - ?1 WHERE id = ?2 AND credits >= ?1",
        )
        .bind(amount)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            let balance = sqlx::query_scalar::<_, i64>("SELECT credits FROM users WHERE id = ?1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
            return match balance {
                Some(balance) => Err(AppError::InsufficientCredits {
                    balance,
                    required: amount,
                }),
                None => Err(AppError::NotFound(format!("user {} not found", user_id))),
            };
        }

        let after = sqlx::query_scalar::<_, i64>("SELECT credits FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"INSERT INTO audit_entries
                   (id, user_id, command_text, credits_deducted, balance_before, balance_after, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               RETURNING id, user_id, command_text, credits_deducted, balance_before, balance_after, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(command_text)
        .bind(amount)
        .bind(after + amount)
        .bind(after)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    // -- Audit Queries --

    pub async fn list_audit_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"SELECT id, user_id, command_text, credits_deducted, balance_before, balance_after, created_at
               FROM audit_entries
               WHERE user_id = ?1
               ORDER BY created_at DESC, id DESC
               LIMIT ?2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn list_audit_global(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"SELECT id, user_id, command_text, credits_deducted, balance_before, balance_after, created_at
               FROM audit_entries
               ORDER BY created_at DESC, id DESC
               LIMIT ?1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    // -- Approval Operations --

    pub async fn create_approval_request(
        &self,
        user_id: Uuid,
        command_text: &str,
    ) -> Result<ApprovalRequest> {
        let request = sqlx::query_as::<_, ApprovalRequest>(
            r#"INSERT INTO approval_requests (id, user_id, command_text, status, approval_count, created_at)
               VALUES (?1, ?2, ?3, 'pending', 0, ?4)
               RETURNING id, user_id, command_text, status, approval_count, reviewed_by, reviewed_at, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(command_text)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(request)
    }

    pub async fn get_approval_request(&self, id: Uuid) -> Result<Option<ApprovalRequest>> {
        let request = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT id, user_id, command_text, status, approval_count, reviewed_by, reviewed_at, created_at
               FROM approval_requests WHERE id = ?1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(request)
    }

    pub async fn list_approval_requests(&self) -> Result<Vec<ApprovalRequest>> {
        let requests = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT id, user_id, command_text, status, approval_count, reviewed_by, reviewed_at, created_at
               FROM approval_requests ORDER BY created_at DESC, id DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    pub async fn list_approval_requests_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ApprovalRequest>> {
        let requests = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT id, user_id, command_text, status, approval_count, reviewed_by, reviewed_at, created_at
               FROM approval_requests WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    pub async fn list_pending_approval_requests(&self) -> Result<Vec<ApprovalRequest>> {
        let requests = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT id, user_id, command_text, status, approval_count, reviewed_by, reviewed_at, created_at
               FROM approval_requests WHERE status = 'pending' ORDER BY created_at ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    /// Record one approval vote. The whole mutation is a single transaction:
    /// the guarded count increment doubles as the pending-status check, the
    /// vote insert's uniqueness constraint rejects duplicate voters, and when
    /// the incremented count reaches `threshold` the terminal transition and
    /// the new rule commit together. A losing concurrent approver observes
    /// either the duplicate-vote conflict or the already-terminal conflict,
    /// never a second rule.
    pub async fn approve_request(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        threshold: i64,
        rule_pattern: &str,
    ) -> Result<ApprovalOutcome> {
        let mut tx = self.pool.begin().await?;

        let incremented = sqlx::query(
            r#"UPDATE approval_requests SET approval_count = approval_count + 1
               WHERE id = ?1 AND status = 'pending'"#,
        )
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        if incremented.rows_affected() == 0 {
            let status = sqlx::query_scalar::<_, ApprovalStatus>(
                "SELECT status FROM approval_requests WHERE id = ?1",
            )
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;
            return match status {
                Some(status) => Err(AppError::Conflict(format!(
                    "request is already {}",
                    status.as_str()
                ))),
                None => Err(AppError::NotFound(format!(
                    "approval request {} not found",
                    request_id
                ))),
            };
        }

        sqlx::query(
            "INSERT INTO approval_votes (request_id, approver_id, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(request_id)
        .bind(approver_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::conflict_on_unique(e, "approver has already voted on this request")
        })?;

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT approval_count FROM approval_requests WHERE id = ?1",
        )
        .bind(request_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut rule = None;
        if count >= threshold {
            let command_text = sqlx::query_scalar::<_, String>(
                "SELECT command_text FROM approval_requests WHERE id = ?1",
            )
            .bind(request_id)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"UPDATE approval_requests
                   SET status = 'approved', reviewed_by = ?1, reviewed_at = ?2
                   WHERE id = ?3 AND status = 'pending'"#,
            )
            .bind(approver_id)
            .bind(Utc::now())
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

            let created = sqlx::query_as::<_, Rule>(
                r#"INSERT INTO rules (id, pattern, action, example, created_at)
                   VALUES (?1, ?2, 'auto_accept', ?3, ?4)
                   RETURNING seq, id, pattern, action, example, created_at"#,
            )
            .bind(Uuid::new_v4())
            .bind(rule_pattern)
            .bind(command_text)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::conflict_on_unique(e, "a rule with this pattern already exists")
            })?;
            rule = Some(created);
        }

        tx.commit().await?;
        Ok(ApprovalOutcome {
            request_id,
            approval_count: count,
            threshold,
            rule,
        })
    }

    /// A single rejecting vote is terminal, regardless of prior approvals.
    pub async fn reject_request(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
    ) -> Result<ApprovalRequest> {
        let mut tx = self.pool.begin().await?;

        let rejected = sqlx::query(
            r#"UPDATE approval_requests
               SET status = 'rejected', reviewed_by = ?1, reviewed_at = ?2
               WHERE id = ?3 AND status = 'pending'"#,
        )
        .bind(approver_id)
        .bind(Utc::now())
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        if rejected.rows_affected() == 0 {
            let status = sqlx::query_scalar::<_, ApprovalStatus>(
                "SELECT status FROM approval_requests WHERE id = ?1",
            )
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;
            return match status {
                Some(status) => Err(AppError::Conflict(format!(
                    "request is already {}",
                    status.as_str()
                ))),
                None => Err(AppError::NotFound(format!(
                    "approval request {} not found",
                    request_id
                ))),
            };
        }

        let request = sqlx::query_as::<_, ApprovalRequest>(
            r#"SELECT id, user_id, command_text, status, approval_count, reviewed_by, reviewed_at, created_at
               FROM approval_requests WHERE id = ?1"#,
        )
        .bind(request_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }
}
