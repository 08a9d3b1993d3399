use serde::Deserialize;

/// Credits debited per successfully executed command. Fixed by design; not
/// parameterized by rule or command complexity.
pub const COMMAND_COST: i64 = 10;

/// Distinct approver votes required to approve a request and materialize its
/// auto-accept rule. A single rejecting vote is terminal regardless.
pub const APPROVAL_THRESHOLD: i64 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Comma-separated list of webhook URLs notified on approval events.
    pub webhook_urls: Vec<String>,
    /// Optional HMAC secret for signing webhook payloads.
    pub webhook_secret: Option<String>,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        port: std::env::var("CMDGATE_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://cmdgate.db".into()),
        webhook_urls: std::env::var("CMDGATE_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: std::env::var("CMDGATE_WEBHOOK_SECRET").ok(),
    })
}
