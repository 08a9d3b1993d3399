use clap::{Parser, Subcommand};

/// cmdgate — command authorization gateway with credit ledger and human
/// approval workflow
#[derive(Parser)]
#[command(name = "cmdgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Manage users and their credentials
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage regex rules
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },

    /// Inspect approval requests
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user and mint its API key (printed once)
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// One of: admin, approver, member, lead, junior
        #[arg(long, default_value = "member")]
        role: String,
        /// Initial credit balance
        #[arg(long, default_value = "100")]
        credits: i64,
    },
    /// List users
    List,
}

#[derive(Subcommand)]
pub enum RuleCommands {
    /// Add a rule
    Add {
        #[arg(long)]
        pattern: String,
        /// AUTO_ACCEPT or AUTO_REJECT
        #[arg(long)]
        action: String,
        #[arg(long)]
        example: Option<String>,
    },
    /// List rules in matching priority order
    List,
    /// Delete a rule by id
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List pending approval requests
    List,
}
