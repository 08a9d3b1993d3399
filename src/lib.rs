//! cmdgate — command authorization gateway.
//!
//! Gates execution of user-submitted commands behind a regex rule filter, a
//! consumable credit budget, and a two-approver human-review escalation path,
//! with an immutable audit ledger kept consistent with every credit mutation.

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod store;

use engine::Engine;
use store::SqliteStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: SqliteStore,
    pub engine: Engine,
    pub config: config::Config,
}
