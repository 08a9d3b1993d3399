//! Shared fixtures: in-memory stores for single-connection tests, tempfile
//! stores for tests that need real write concurrency.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use cmdgate::config::Config;
use cmdgate::engine::Engine;
use cmdgate::models::user::{Role, User};
use cmdgate::notification::webhook::WebhookNotifier;
use cmdgate::store::SqliteStore;

pub async fn memory_store() -> SqliteStore {
    let store = SqliteStore::connect_in_memory()
        .await
        .expect("in-memory store");
    store.migrate().await.expect("migrations");
    store
}

/// File-backed store with a multi-connection pool, for tests that exercise
/// concurrent transactions. Returns the tempdir so it outlives the store.
pub async fn file_store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite:{}", dir.path().join("cmdgate-test.db").display());
    let store = SqliteStore::connect(&url).await.expect("file store");
    store.migrate().await.expect("migrations");
    (store, dir)
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        database_url: String::new(),
        webhook_urls: Vec::new(),
        webhook_secret: None,
    }
}

pub fn engine(store: &SqliteStore) -> Engine {
    Engine::new(store.clone(), WebhookNotifier::new(), &test_config())
}

pub async fn make_user(store: &SqliteStore, username: &str, role: Role, credits: i64) -> User {
    store
        .create_user(username, &format!("{}@example.com", username), role, credits)
        .await
        .expect("create user")
}
