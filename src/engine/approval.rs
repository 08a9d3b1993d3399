//! Approval workflow: submit → approve/reject with a 2-of-N threshold.
//!
//! Submitting notifies reviewers best-effort after the request commits;
//! reaching the threshold transitions the request and materializes its
//! auto-accept rule inside one store transaction.

use uuid::Uuid;

use super::{matcher, Engine};
use crate::config::APPROVAL_THRESHOLD;
use crate::errors::AppError;
use crate::models::approval::{ApprovalOutcome, ApprovalRequest};
use crate::models::user::User;
use crate::notification::webhook::ApprovalEvent;

impl Engine {
    /// Create a pending request and fan out a notification to reviewers.
    /// The fan-out runs on a spawned task after the insert commits; its
    /// failure never propagates to the submitter.
    pub async fn submit_request(
        &self,
        user: &User,
        command_text: &str,
    ) -> Result<ApprovalRequest, AppError> {
        let command_text = command_text.trim();
        if command_text.is_empty() {
            return Err(AppError::Validation("command_text must not be empty".into()));
        }

        let request = self
            .store()
            .create_approval_request(user.id, command_text)
            .await?;

        let approvers = match self.store().list_approver_usernames().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list approvers for notification");
                Vec::new()
            }
        };

        tracing::info!(
            request_id = %request.id,
            requested_by = %user.username,
            approver_count = approvers.len(),
            "approval request submitted"
        );

        let event = ApprovalEvent::requested(&request, &user.username, approvers);
        let (urls, secret, notifier) = self.webhook_targets();
        notifier.dispatch(urls, secret, event);

        Ok(request)
    }

    /// Record one approval vote. On the vote that reaches the threshold the
    /// request turns terminal and an auto-accept rule matching exactly the
    /// requested command is created, both in the same transaction.
    pub async fn approve_request(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
    ) -> Result<ApprovalOutcome, AppError> {
        let request = self
            .store()
            .get_approval_request(request_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("approval request {} not found", request_id))
            })?;

        let pattern = matcher::exact_match_pattern(&request.command_text);
        let outcome = self
            .store()
            .approve_request(request_id, approver_id, APPROVAL_THRESHOLD, &pattern)
            .await?;

        if let Some(rule) = &outcome.rule {
            tracing::info!(
                request_id = %request_id,
                rule_id = %rule.id,
                "approval threshold reached, rule created"
            );
        } else {
            tracing::info!(
                request_id = %request_id,
                count = outcome.approval_count,
                threshold = outcome.threshold,
                "approval vote recorded"
            );
        }

        Ok(outcome)
    }

    /// One rejecting vote is terminal, regardless of prior approval votes.
    pub async fn reject_request(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
    ) -> Result<ApprovalRequest, AppError> {
        let request = self.store().reject_request(request_id, approver_id).await?;
        tracing::info!(request_id = %request_id, reviewed_by = %approver_id, "request rejected");
        Ok(request)
    }
}
