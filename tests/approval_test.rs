//! Integration tests for the approval workflow state machine.
//!
//! These verify:
//! 1. Requests start pending with zero votes; terminal states never transition
//! 2. The 2-of-N threshold materializes exactly one exact-match rule
//! 3. One rejecting vote is terminal regardless of prior approvals
//! 4. Duplicate votes and concurrent approvals cannot double-count

mod common;

use std::sync::Arc;

use cmdgate::engine::CommandOutcome;
use cmdgate::errors::AppError;
use cmdgate::models::approval::ApprovalStatus;
use cmdgate::models::user::Role;

#[tokio::test]
async fn submit_starts_pending_with_zero_votes() {
    let store = common::memory_store().await;
    let engine = common::engine(&store);
    let user = common::make_user(&store, "alice", Role::Member, 100).await;

    let request = engine
        .submit_request(&user, "terraform destroy")
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Pending);
    assert_eq!(request.approval_count, 0);
    assert!(request.reviewed_by.is_none());
    assert!(request.reviewed_at.is_none());
}

#[tokio::test]
async fn submit_rejects_blank_command() {
    let store = common::memory_store().await;
    let engine = common::engine(&store);
    let user = common::make_user(&store, "alice", Role::Member, 100).await;

    for text in ["", "   \t"] {
        let err = engine.submit_request(&user, text).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}

#[tokio::test]
async fn duplicate_vote_is_conflict_and_count_unchanged() {
    let store = common::memory_store().await;
    let engine = common::engine(&store);
    let user = common::make_user(&store, "alice", Role::Member, 100).await;
    let bob = common::make_user(&store, "bob", Role::Approver, 100).await;

    let request = engine.submit_request(&user, "deploy prod").await.unwrap();

    let outcome = engine.approve_request(request.id, bob.id).await.unwrap();
    assert_eq!(outcome.approval_count, 1);
    assert!(outcome.rule.is_none());

    let err = engine.approve_request(request.id, bob.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let request = store.get_approval_request(request.id).await.unwrap().unwrap();
    assert_eq!(request.approval_count, 1);
    assert_eq!(request.status, ApprovalStatus::Pending);
}

#[tokio::test]
async fn two_approvers_reach_threshold_and_create_exact_rule() {
    let store = common::memory_store().await;
    let engine = common::engine(&store);
    let user = common::make_user(&store, "alice", Role::Member, 100).await;
    let bob = common::make_user(&store, "bob", Role::Approver, 100).await;
    let carol = common::make_user(&store, "carol", Role::Approver, 100).await;
    let dave = common::make_user(&store, "dave", Role::Approver, 100).await;

    let command = "rm -rf ./build && make";
    let request = engine.submit_request(&user, command).await.unwrap();

    let first = engine.approve_request(request.id, bob.id).await.unwrap();
    assert_eq!(first.approval_count, 1);
    assert_eq!(first.threshold, 2);
    assert!(first.rule.is_none());

    let second = engine.approve_request(request.id, carol.id).await.unwrap();
    assert_eq!(second.approval_count, 2);
    let rule = second.rule.expect("threshold vote must carry the new rule");

    let request = store.get_approval_request(request.id).await.unwrap().unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
    assert_eq!(request.reviewed_by, Some(carol.id));
    assert!(request.reviewed_at.is_some());

    // The materialized rule matches exactly the requested command.
    let re = regex::Regex::new(&rule.pattern).unwrap();
    assert!(re.is_match(command));
    assert!(!re.is_match("rm -rf ./build && make install"));
    assert!(!re.is_match("xrm -rf ./build && make"));

    // The command is now auto-accepted end to end.
    let outcome = engine.execute_command(user.id, command).await.unwrap();
    assert!(matches!(outcome, CommandOutcome::Executed { .. }));

    // The request is terminal; a third vote is a conflict.
    let err = engine.approve_request(request.id, dave.id).await.unwrap_err();
    match err {
        AppError::Conflict(msg) => assert!(msg.contains("approved"), "got: {}", msg),
        other => panic!("expected Conflict, got {:?}", other),
    }
    assert_eq!(store.list_rules().await.unwrap().len(), 1);
}

#[tokio::test]
async fn single_reject_is_terminal_even_after_an_approval() {
    let store = common::memory_store().await;
    let engine = common::engine(&store);
    let user = common::make_user(&store, "alice", Role::Member, 100).await;
    let bob = common::make_user(&store, "bob", Role::Approver, 100).await;
    let carol = common::make_user(&store, "carol", Role::Approver, 100).await;

    let request = engine.submit_request(&user, "drop database").await.unwrap();
    engine.approve_request(request.id, bob.id).await.unwrap();

    let rejected = engine.reject_request(request.id, carol.id).await.unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert_eq!(rejected.reviewed_by, Some(carol.id));

    // No rule was created and the request stays terminal.
    assert!(store.list_rules().await.unwrap().is_empty());
    let err = engine.approve_request(request.id, carol.id).await.unwrap_err();
    match err {
        AppError::Conflict(msg) => assert!(msg.contains("rejected"), "got: {}", msg),
        other => panic!("expected Conflict, got {:?}", other),
    }
    let err = engine.reject_request(request.id, bob.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let store = common::memory_store().await;
    let engine = common::engine(&store);
    let bob = common::make_user(&store, "bob", Role::Approver, 100).await;

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        engine.approve_request(missing, bob.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        engine.reject_request(missing, bob.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn concurrent_approvals_create_exactly_one_rule() {
    let (store, _dir) = common::file_store().await;
    let engine = Arc::new(common::engine(&store));
    let user = common::make_user(&store, "alice", Role::Member, 100).await;
    let bob = common::make_user(&store, "bob", Role::Approver, 100).await;
    let carol = common::make_user(&store, "carol", Role::Approver, 100).await;

    let request = engine.submit_request(&user, "systemctl restart api").await.unwrap();

    let e1 = engine.clone();
    let e2 = engine.clone();
    let rid = request.id;
    let (bob_id, carol_id) = (bob.id, carol.id);
    let h1 = tokio::spawn(async move { e1.approve_request(rid, bob_id).await });
    let h2 = tokio::spawn(async move { e2.approve_request(rid, carol_id).await });
    let results = [h1.await.unwrap(), h2.await.unwrap()];

    // Both distinct votes land, but only one carries the rule.
    let with_rule = results
        .iter()
        .filter(|r| matches!(r, Ok(outcome) if outcome.rule.is_some()))
        .count();
    assert_eq!(with_rule, 1, "exactly one vote reaches the threshold");

    let request = store.get_approval_request(rid).await.unwrap().unwrap();
    assert_eq!(request.status, ApprovalStatus::Approved);
    assert_eq!(request.approval_count, 2);
    assert_eq!(store.list_rules().await.unwrap().len(), 1);
}

#[tokio::test]
async fn approving_same_command_twice_conflicts_on_rule_pattern() {
    let store = common::memory_store().await;
    let engine = common::engine(&store);
    let user = common::make_user(&store, "alice", Role::Member, 100).await;
    let bob = common::make_user(&store, "bob", Role::Approver, 100).await;
    let carol = common::make_user(&store, "carol", Role::Approver, 100).await;

    let first = engine.submit_request(&user, "make deploy").await.unwrap();
    engine.approve_request(first.id, bob.id).await.unwrap();
    engine.approve_request(first.id, carol.id).await.unwrap();

    // A second request for the identical command cannot mint a second rule.
    let second = engine.submit_request(&user, "make deploy").await.unwrap();
    engine.approve_request(second.id, bob.id).await.unwrap();
    let err = engine.approve_request(second.id, carol.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(store.list_rules().await.unwrap().len(), 1);

    // The failed threshold vote rolled back: the request is still pending
    // with the one surviving vote.
    let second = store.get_approval_request(second.id).await.unwrap().unwrap();
    assert_eq!(second.status, ApprovalStatus::Pending);
    assert_eq!(second.approval_count, 1);
}
