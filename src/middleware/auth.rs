//! Credential resolution and the role gate.
//!
//! Every endpoint class (admin-only, approver-only, any-authenticated) goes
//! through the same `AuthContext::authorize` check parameterized by an
//! allowed-role set, so there is exactly one copy of the gating logic.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::{IssuedKey, Role, User};
use crate::AppState;

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const APPROVER_ONLY: &[Role] = &[Role::Approver];
/// Roles that see every approval request rather than just their own.
pub const REVIEWERS: &[Role] = &[Role::Admin, Role::Approver];

/// Identity resolved from the opaque credential, attached to the request
/// before any handler runs.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

impl AuthContext {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }

    /// Lead and junior are normalized to member before the check.
    pub fn has_any(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role.effective())
    }

    pub fn authorize(&self, allowed: &[Role]) -> Result<(), AppError> {
        if self.has_any(allowed) {
            return Ok(());
        }
        tracing::warn!(
            user = %self.username,
            role = self.role.as_str(),
            required = ?allowed.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            "access denied"
        );
        Err(AppError::Forbidden(format!(
            "role '{}' is not allowed to perform this operation",
            self.role.as_str()
        )))
    }
}

// ── Credential helpers ───────────────────────────────────────

/// Mint a fresh opaque API key. Only the sha256 hash is ever stored; the
/// plaintext is shown once at creation time.
pub fn generate_api_key(user_id: Uuid) -> IssuedKey {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let plaintext = format!("cg_v1_{}", hex::encode(bytes));
    let prefix = plaintext[..12].to_string();
    IssuedKey {
        user_id,
        plaintext,
        prefix,
    }
}

pub fn hash_api_key(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

// ── Middleware ───────────────────────────────────────────────

/// Resolve the `X-Api-Key` (or `Authorization: Bearer`) credential to a user
/// and stash the identity in request extensions. Rejects before any handler
/// or transaction runs; also bumps the credential's last-used timestamp.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
        })
        .ok_or_else(|| AppError::Auth("missing API key".into()))?;

    let key_hash = hash_api_key(provided);
    let user = state
        .db
        .resolve_api_key(&key_hash)
        .await?
        .ok_or_else(|| AppError::Auth("invalid API key".into()))?;

    // Usage bookkeeping must never fail the request.
    if let Err(e) = state.db.touch_api_key(&key_hash).await {
        tracing::warn!(error = %e, "failed to update key last_used_at");
    }

    req.extensions_mut().insert(AuthContext::from_user(&user));
    Ok(next.run(req).await)
}

// ── Tests ───────────────────────────────────────────────────────
