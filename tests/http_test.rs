//! End-to-end tests over the HTTP surface: credential resolution, role
//! gating, and the command/rule/approval endpoints.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use cmdgate::api;
use cmdgate::middleware::auth::{generate_api_key, hash_api_key};
use cmdgate::models::user::Role;
use cmdgate::store::SqliteStore;
use cmdgate::AppState;

async fn app(store: &SqliteStore) -> Router {
    let state = Arc::new(AppState {
        db: store.clone(),
        engine: common::engine(store),
        config: common::test_config(),
    });
    api::router(state.clone()).with_state(state)
}

/// Creates a user and mints a credential for them, returning the plaintext key.
async fn user_with_key(store: &SqliteStore, username: &str, role: Role, credits: i64) -> String {
    let user = common::make_user(store, username, role, credits).await;
    let issued = generate_api_key(user.id);
    store
        .insert_api_key(user.id, &hash_api_key(&issued.plaintext), &issued.prefix)
        .await
        .expect("insert api key");
    issued.plaintext
}

fn get(uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-api-key", key)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, key: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-api-key", key)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn missing_and_invalid_keys_are_unauthorized() {
    let store = common::memory_store().await;
    let app = app(&store).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/get-credit-balance")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "authentication_error");

    let response = app
        .oneshot(get("/get-credit-balance", "cg_v1_0000000000000000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_token_is_accepted_as_credential() {
    let store = common::memory_store().await;
    let app = app(&store).await;
    let key = user_with_key(&store, "alice", Role::Member, 100).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/get-credit-balance")
                .header("authorization", format!("Bearer {}", key))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["credits"], 100);
}

#[tokio::test]
async fn rule_administration_is_admin_only() {
    let store = common::memory_store().await;
    let app = app(&store).await;
    let member_key = user_with_key(&store, "alice", Role::Member, 100).await;
    let admin_key = user_with_key(&store, "root", Role::Admin, 0).await;

    let payload = json!({"pattern": "^git status$", "action": "AUTO_ACCEPT"});
    let response = app
        .clone()
        .oneshot(post("/add-regex-rule", &member_key, payload.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "permission_error");

    let response = app
        .clone()
        .oneshot(post("/add-regex-rule", &admin_key, payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let rule = body_json(response).await;
    assert_eq!(rule["pattern"], "^git status$");
    assert_eq!(rule["action"], "AUTO_ACCEPT");

    let response = app
        .clone()
        .oneshot(get("/regex-rules", &member_key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.oneshot(get("/regex-rules", &admin_key)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let rules = body_json(response).await;
    assert_eq!(rules.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn accepted_command_charges_and_reports_balance() {
    let store = common::memory_store().await;
    let app = app(&store).await;
    let admin_key = user_with_key(&store, "root", Role::Admin, 0).await;
    let alice_key = user_with_key(&store, "alice", Role::Member, 100).await;

    let response = app
        .clone()
        .oneshot(post(
            "/add-regex-rule",
            &admin_key,
            json!({"pattern": "^git .*$", "action": "AUTO_ACCEPT"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post("/command", &alice_key, json!({"command_text": "git pull"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "executed");
    assert_eq!(body["credits_deducted"], 10);
    assert_eq!(body["new_balance"], 90);
    assert_eq!(body["matched_rule"]["pattern"], "^git .*$");

    // The charge shows up in the caller's history.
    let response = app
        .clone()
        .oneshot(get("/command-history", &alice_key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    assert_eq!(history[0]["command_text"], "git pull");
    assert_eq!(history[0]["balance_after"], 90);

    // Unmatched commands are denied without a charge.
    let response = app
        .clone()
        .oneshot(post("/command", &alice_key, json!({"command_text": "rm -rf /"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["status"], "rejected");
    assert!(body.get("matched_rule").is_none());

    let response = app.oneshot(get("/get-credit-balance", &alice_key)).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["credits"], 90);
}

#[tokio::test]
async fn exhausted_balance_is_a_billing_error() {
    let store = common::memory_store().await;
    let app = app(&store).await;
    let admin_key = user_with_key(&store, "root", Role::Admin, 0).await;
    let poor_key = user_with_key(&store, "bob", Role::Member, 5).await;

    app.clone()
        .oneshot(post(
            "/add-regex-rule",
            &admin_key,
            json!({"pattern": "^ls$", "action": "AUTO_ACCEPT"}),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(post("/command", &poor_key, json!({"command_text": "ls"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "insufficient_credits");
}

#[tokio::test]
async fn approval_workflow_over_http() {
    let store = common::memory_store().await;
    let app = app(&store).await;
    let alice_key = user_with_key(&store, "alice", Role::Member, 100).await;
    let bob_key = user_with_key(&store, "bob", Role::Approver, 0).await;
    let carol_key = user_with_key(&store, "carol", Role::Approver, 0).await;

    let response = app
        .clone()
        .oneshot(post(
            "/approval-request",
            &alice_key,
            json!({"command_text": "terraform apply"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let request = body_json(response).await;
    assert_eq!(request["status"], "pending");
    let id = request["id"].as_str().unwrap().to_string();

    // The requester cannot vote.
    let response = app
        .clone()
        .oneshot(post(
            &format!("/approval-requests/{}/approve", id),
            &alice_key,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/approval-requests/{}/approve", id),
            &bob_key,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["approvalCount"], 1);
    assert_eq!(body["threshold"], 2);
    assert!(body.get("rule").is_none());

    let response = app
        .clone()
        .oneshot(post(
            &format!("/approval-requests/{}/approve", id),
            &carol_key,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["approvalCount"], 2);
    assert_eq!(body["rule"]["action"], "AUTO_ACCEPT");

    // The whitelisted command now executes.
    let response = app
        .clone()
        .oneshot(post(
            "/command",
            &alice_key,
            json!({"command_text": "terraform apply"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Members see only their own requests; approvers see everything.
    let response = app
        .clone()
        .oneshot(get("/approval-requests", &alice_key))
        .await
        .unwrap();
    let own = body_json(response).await;
    assert_eq!(own.as_array().map(Vec::len), Some(1));

    let response = app.oneshot(get("/approval-requests", &bob_key)).await.unwrap();
    let all = body_json(response).await;
    assert_eq!(all.as_array().map(Vec::len), Some(1));
    assert_eq!(all[0]["status"], "approved");
}

#[tokio::test]
async fn global_audit_log_is_admin_only_and_names_the_requester() {
    let store = common::memory_store().await;
    let app = app(&store).await;
    let admin_key = user_with_key(&store, "root", Role::Admin, 0).await;
    let member_key = user_with_key(&store, "alice", Role::Member, 100).await;

    let response = app
        .clone()
        .oneshot(get("/audit-logs", &member_key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.oneshot(get("/audit-logs", &admin_key)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["requested_by"], "root");
    assert!(body["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let store = common::memory_store().await;
    let app = app(&store).await;
    let key = user_with_key(&store, "alice", Role::Member, 100).await;

    let response = app.oneshot(get("/no-such-route", &key)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
