use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::models::approval::ApprovalRequest;

// ── Event payload ─────────────────────────────────────────────

/// Structured event sent to reviewer-facing webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalEvent {
    /// Event type identifier, currently only "approval_requested".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub request_id: String,
    pub requested_by: String,
    pub command_text: String,
    /// Usernames of the reviewers expected to act on this request.
    pub approvers: Vec<String>,
}

impl ApprovalEvent {
    pub fn requested(
        request: &ApprovalRequest,
        requested_by: &str,
        approvers: Vec<String>,
    ) -> Self {
        Self {
            event_type: "approval_requested".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: request.id.to_string(),
            requested_by: requested_by.to_string(),
            command_text: request.command_text.clone(),
            approvers,
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns "sha256=<lowercase hex>".
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    format!("sha256={}", hex::encode(bytes))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Best-effort fan-out of approval events to configured URLs.
///
/// One attempt per URL, no retries; delivery failure is logged and swallowed.
/// Dispatch happens on a spawned task so the triggering request never waits
/// on, or fails because of, notification delivery.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("cmdgate-webhook/1.0")
                .build()
                .expect("failed to build webhook HTTP client"),
        }
    }

    /// Send one signed event to a single URL. If `signing_secret` is `Some`,
    /// the body is signed with HMAC-SHA256 and the signature sent in the
    /// `X-Cmdgate-Signature` header.
    pub async fn send(
        &self,
        url: &str,
        event: &ApprovalEvent,
        signing_secret: Option<&str>,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        let delivery_id = uuid::Uuid::new_v4().to_string();

        let mut req = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("x-cmdgate-delivery-id", &delivery_id)
            .header("x-cmdgate-event", &event.event_type);

        if let Some(secret) = signing_secret {
            req = req.header("x-cmdgate-signature", hmac_sha256_hex(secret, &payload));
        }

        let resp = req.body(payload).send().await?;
        if resp.status().is_success() {
            info!(
                url,
                event_type = %event.event_type,
                delivery_id = %delivery_id,
                status = %resp.status(),
                "webhook delivered"
            );
            Ok(())
        } else {
            anyhow::bail!("webhook returned {}", resp.status())
        }
    }

    /// Fire-and-forget dispatch to all configured URLs. Each URL is attempted
    /// independently; failures in one do not block the others.
    pub fn dispatch(&self, urls: &[String], signing_secret: Option<&str>, event: ApprovalEvent) {
        if urls.is_empty() {
            return;
        }

        let notifier = self.clone();
        let urls = urls.to_vec();
        let secret = signing_secret.map(String::from);

        tokio::spawn(async move {
            for url in &urls {
                if let Err(e) = notifier.send(url, &event, secret.as_deref()).await {
                    warn!(url, error = %e, "webhook delivery failed");
                }
            }
        });
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────
