use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Translate a constraint violation raised by a concurrent or duplicate
    /// writer into a `Conflict`, leaving other store failures untouched.
    pub fn conflict_on_unique(err: sqlx::Error, msg: &str) -> AppError {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(msg.to_string())
            }
            _ => AppError::Database(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Validation(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                m.clone(),
            ),
            AppError::Auth(m) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_credential",
                m.clone(),
            ),
            AppError::Forbidden(m) => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                m.clone(),
            ),
            AppError::NotFound(m) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                m.clone(),
            ),
            AppError::Conflict(m) => (
                StatusCode::CONFLICT,
                "conflict_error",
                "conflict",
                m.clone(),
            ),
            AppError::InsufficientCredits { balance, required } => (
                StatusCode::FORBIDDEN,
                "billing_error",
                "insufficient_credits",
                format!("insufficient credits: balance {}, required {}", balance, required),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

// ── Tests ───────────────────────────────────────────────────────
