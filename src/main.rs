use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cmdgate::engine::Engine;
use cmdgate::models::rule::RuleAction;
use cmdgate::models::user::Role;
use cmdgate::notification::webhook::WebhookNotifier;
use cmdgate::store::SqliteStore;
use cmdgate::{api, cli, config, middleware as mw, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cmdgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::User { command }) => {
            let db = connect(&cfg).await?;
            handle_user_command(&db, command).await
        }
        Some(cli::Commands::Rule { command }) => {
            let db = connect(&cfg).await?;
            let engine = Engine::new(db.clone(), WebhookNotifier::new(), &cfg);
            handle_rule_command(&db, &engine, command).await
        }
        Some(cli::Commands::Approval { command }) => {
            let db = connect(&cfg).await?;
            handle_approval_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn connect(cfg: &config::Config) -> anyhow::Result<SqliteStore> {
    let db = SqliteStore::connect(&cfg.database_url).await?;
    db.migrate().await?;
    Ok(db)
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = SqliteStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let engine = Engine::new(db.clone(), WebhookNotifier::new(), &cfg);

    let state = Arc::new(AppState {
        db,
        engine,
        config: cfg,
    });

    let app = axum::Router::new()
        // Health endpoint (no auth)
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(api::router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_id_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("cmdgate listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response so clients
/// can correlate errors with gateway logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn handle_user_command(db: &SqliteStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Create {
            username,
            email,
            role,
            credits,
        } => {
            let role = Role::parse(&role)
                .with_context(|| format!("invalid role: {}", role))?;
            let user = db.create_user(&username, &email, role, credits).await?;
            let issued = mw::auth::generate_api_key(user.id);
            db.insert_api_key(
                user.id,
                &mw::auth::hash_api_key(&issued.plaintext),
                &issued.prefix,
            )
            .await?;

            println!("User created:");
            println!("  ID:       {}", user.id);
            println!("  Username: {}", user.username);
            println!("  Role:     {}", user.role.as_str());
            println!("  Credits:  {}", user.credits);
            println!("  API key:  {}  (shown once, store it now)", issued.plaintext);
        }
        cli::UserCommands::List => {
            let users = db.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<38} {:<16} {:<10} {:<8}",
                    "ID", "USERNAME", "ROLE", "CREDITS"
                );
                for u in users {
                    println!(
                        "{:<38} {:<16} {:<10} {:<8}",
                        u.id,
                        u.username,
                        u.role.as_str(),
                        u.credits
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_rule_command(
    db: &SqliteStore,
    engine: &Engine,
    cmd: cli::RuleCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::RuleCommands::Add {
            pattern,
            action,
            example,
        } => {
            let action = RuleAction::parse(&action)
                .with_context(|| format!("invalid action: {} (expected AUTO_ACCEPT or AUTO_REJECT)", action))?;
            let rule = engine.add_rule(&pattern, action, example.as_deref()).await?;
            println!("Rule created:");
            println!("  ID:      {}", rule.id);
            println!("  Pattern: {}", rule.pattern);
            println!("  Action:  {:?}", rule.action);
        }
        cli::RuleCommands::List => {
            let rules = db.list_rules().await?;
            if rules.is_empty() {
                println!("No rules found.");
            } else {
                println!("{:<6} {:<38} {:<12} PATTERN", "SEQ", "ID", "ACTION");
                for r in rules {
                    println!("{:<6} {:<38} {:<12} {}", r.seq, r.id, format!("{:?}", r.action), r.pattern);
                }
            }
        }
        cli::RuleCommands::Delete { id } => {
            let id = uuid::Uuid::parse_str(&id).context("invalid rule ID")?;
            if db.delete_rule(id).await? {
                println!("Rule deleted.");
            } else {
                println!("Rule not found.");
            }
        }
    }
    Ok(())
}

async fn handle_approval_command(
    db: &SqliteStore,
    cmd: cli::ApprovalCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::ApprovalCommands::List => {
            let requests = db.list_pending_approval_requests().await?;
            if requests.is_empty() {
                println!("No pending approvals.");
                return Ok(());
            }
            println!("{:<38} {:<8} COMMAND", "ID", "VOTES");
            for r in requests {
                let display = if r.command_text.chars().count() > 50 {
                    let head: String = r.command_text.chars().take(47).collect();
                    format!("{}...", head)
                } else {
                    r.command_text.clone()
                };
                println!("{:<38} {:<8} {}", r.id, r.approval_count, display);
            }
        }
    }
    Ok(())
}
