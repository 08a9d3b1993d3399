use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::CommandOutcome;
use crate::errors::AppError;
use crate::middleware::auth::{AuthContext, ADMIN_ONLY, APPROVER_ONLY, REVIEWERS};
use crate::models::approval::ApprovalRequest;
use crate::models::audit::AuditEntry;
use crate::models::rule::{Rule, RuleAction};
use crate::AppState;

/// Most recent entries returned by the per-user history view.
const HISTORY_LIMIT: i64 = 100;
/// Most recent entries returned by the administrative audit view.
const AUDIT_LOG_LIMIT: i64 = 500;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CommandRequest {
    pub command_text: String,
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<Rule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_deducted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub username: String,
    pub credits: i64,
}

#[derive(Deserialize)]
pub struct CreateRuleRequest {
    pub pattern: String,
    pub action: RuleAction,
    pub example: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateRuleRequest {
    pub pattern: Option<String>,
    pub action: Option<RuleAction>,
    pub example: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitApprovalRequest {
    pub command_text: String,
}

#[derive(Serialize)]
pub struct ApprovalDecisionResponse {
    #[serde(rename = "approvalCount")]
    pub approval_count: i64,
    pub threshold: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
}

#[derive(Serialize)]
pub struct AuditLogsResponse {
    pub requested_by: String,
    pub entries: Vec<AuditEntry>,
}

// ── Command execution ────────────────────────────────────────

/// POST /command — gate a command through the rule set and, if accepted,
/// charge its fixed cost.
pub async fn execute_command(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<CommandRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .engine
        .execute_command(ctx.user_id, &payload.command_text)
        .await?;

    Ok(match outcome {
        CommandOutcome::Executed { rule, entry } => (
            StatusCode::OK,
            Json(CommandResponse {
                status: "executed".into(),
                matched_rule: Some(rule),
                credits_deducted: Some(entry.credits_deducted),
                new_balance: Some(entry.balance_after),
                reason: None,
            }),
        )
            .into_response(),
        CommandOutcome::Rejected { rule: Some(rule) } => (
            StatusCode::FORBIDDEN,
            Json(CommandResponse {
                status: "rejected".into(),
                matched_rule: Some(rule),
                credits_deducted: None,
                new_balance: None,
                reason: Some("command matched an auto-reject rule".into()),
            }),
        )
            .into_response(),
        CommandOutcome::Rejected { rule: None } => (
            StatusCode::FORBIDDEN,
            Json(CommandResponse {
                status: "rejected".into(),
                matched_rule: None,
                credits_deducted: None,
                new_balance: None,
                reason: Some("no rule matched the command; denied by default".into()),
            }),
        )
            .into_response(),
    })
}

/// GET /command-history — the caller's audit entries, newest first.
pub async fn command_history(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let entries = state.db.list_audit_for_user(ctx.user_id, HISTORY_LIMIT).await?;
    Ok(Json(entries))
}

/// GET /get-credit-balance
pub async fn credit_balance(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<BalanceResponse>, AppError> {
    let user = state
        .db
        .get_user(ctx.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", ctx.user_id)))?;
    Ok(Json(BalanceResponse {
        user_id: user.id,
        username: user.username,
        credits: user.credits,
    }))
}

// ── Rule administration ──────────────────────────────────────

/// POST /add-regex-rule — admin only.
pub async fn add_rule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<Rule>), AppError> {
    ctx.authorize(ADMIN_ONLY)?;
    let rule = state
        .engine
        .add_rule(&payload.pattern, payload.action, payload.example.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /regex-rules — admin only, in matching priority order.
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Rule>>, AppError> {
    ctx.authorize(ADMIN_ONLY)?;
    let rules = state.db.list_rules().await?;
    Ok(Json(rules))
}

/// PUT /regex-rules/:id — admin only.
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRuleRequest>,
) -> Result<Json<Rule>, AppError> {
    ctx.authorize(ADMIN_ONLY)?;
    let rule = state
        .engine
        .update_rule(
            id,
            payload.pattern.as_deref(),
            payload.action,
            payload.example.as_deref(),
        )
        .await?;
    Ok(Json(rule))
}

/// DELETE /regex-rules/:id — admin only.
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    ctx.authorize(ADMIN_ONLY)?;
    if state.db.delete_rule(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("rule {} not found", id)))
    }
}

// ── Approval workflow ────────────────────────────────────────

/// POST /approval-request — any authenticated user.
pub async fn submit_approval_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<SubmitApprovalRequest>,
) -> Result<(StatusCode, Json<ApprovalRequest>), AppError> {
    let user = state
        .db
        .get_user(ctx.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", ctx.user_id)))?;
    let request = state
        .engine
        .submit_request(&user, &payload.command_text)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /approval-requests — admins and approvers see all requests, everyone
/// else sees only their own.
pub async fn list_approval_requests(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<ApprovalRequest>>, AppError> {
    let requests = if ctx.has_any(REVIEWERS) {
        state.db.list_approval_requests().await?
    } else {
        state.db.list_approval_requests_for_user(ctx.user_id).await?
    };
    Ok(Json(requests))
}

/// POST /approval-requests/:id/approve — approver only.
pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalDecisionResponse>, AppError> {
    ctx.authorize(APPROVER_ONLY)?;
    let outcome = state.engine.approve_request(id, ctx.user_id).await?;
    Ok(Json(ApprovalDecisionResponse {
        approval_count: outcome.approval_count,
        threshold: outcome.threshold,
        rule: outcome.rule,
    }))
}

/// POST /approval-requests/:id/reject — approver only; one vote is terminal.
pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApprovalRequest>, AppError> {
    ctx.authorize(APPROVER_ONLY)?;
    let request = state.engine.reject_request(id, ctx.user_id).await?;
    Ok(Json(request))
}

// ── Audit ────────────────────────────────────────────────────

/// GET /audit-logs — admin only, global view with the requester's identity
/// attached.
pub async fn audit_logs(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<AuditLogsResponse>, AppError> {
    ctx.authorize(ADMIN_ONLY)?;
    let entries = state.db.list_audit_global(AUDIT_LOG_LIMIT).await?;
    tracing::info!(
        requested_by = %ctx.username,
        entry_count = entries.len(),
        "global audit log accessed"
    );
    Ok(Json(AuditLogsResponse {
        requested_by: ctx.username.clone(),
        entries,
    }))
}
