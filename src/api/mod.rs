use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::middleware::auth;
use crate::AppState;

pub mod handlers;

/// Build the authenticated API router. Every route runs behind credential
/// resolution; per-endpoint role gating happens inside the handlers through
/// `AuthContext::authorize`.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/command", post(handlers::execute_command))
        .route("/command-history", get(handlers::command_history))
        .route("/get-credit-balance", get(handlers::credit_balance))
        .route(
            "/add-regex-rule",
            post(handlers::add_rule),
        )
        .route("/regex-rules", get(handlers::list_rules))
        .route(
            "/regex-rules/:id",
            put(handlers::update_rule).delete(handlers::delete_rule),
        )
        .route("/approval-request", post(handlers::submit_approval_request))
        .route("/approval-requests", get(handlers::list_approval_requests))
        .route(
            "/approval-requests/:id/approve",
            post(handlers::approve_request),
        )
        .route(
            "/approval-requests/:id/reject",
            post(handlers::reject_request),
        )
        .route("/audit-logs", get(handlers::audit_logs))
        .layer(middleware::from_fn_with_state(state, auth::authenticate))
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
