//! shepherd - church member management and bulk messaging from the terminal.

mod app;
mod commands;
mod progress;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

#[derive(Parser)]
#[command(name = "shepherd")]
#[command(version, about = "Church member management and bulk messaging")]
pub struct Cli {
    /// Print machine-readable JSON where a command supports it
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with an OAuth access token
    Login {
        /// Account email (defaults to the last user)
        #[arg(long)]
        email: Option<String>,
        /// Remember the token in the OS keychain
        #[arg(long)]
        remember: bool,
    },
    /// Sign out and forget any remembered token
    Logout,
    /// Show session, project and cache state
    Status,
    /// Fetch and cache every collection
    Sync,
    /// List members
    Members {
        #[arg(long)]
        district: Option<String>,
        #[arg(long)]
        ministry: Option<String>,
        /// Match against name, email or phone
        #[arg(long)]
        search: Option<String>,
    },
    /// Send one message to many members
    Broadcast(BroadcastArgs),
    /// Visitor follow-up pipeline
    Visitors {
        #[command(subcommand)]
        command: Option<VisitorCommands>,
    },
    /// District management
    Districts {
        #[command(subcommand)]
        command: DistrictCommands,
    },
    /// Register for an event, creating a payment intent when needed
    Checkout {
        event_id: String,
        #[arg(long, default_value = "1")]
        quantity: u32,
        /// Optional tip in cents
        #[arg(long, default_value = "0")]
        tip: i64,
        /// Receipt email (defaults to the signed-in account)
        #[arg(long)]
        email: Option<String>,
    },
    /// Look up an address and suggest a district for it
    Address {
        query: String,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("recipients").required(true).args(["all", "district", "ministry", "member"])))]
pub struct BroadcastArgs {
    #[arg(long, value_enum)]
    pub channel: ChannelArg,
    /// Every member
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub district: Option<String>,
    #[arg(long)]
    pub ministry: Option<String>,
    /// Individual member ids (repeatable)
    #[arg(long)]
    pub member: Vec<String>,
    #[arg(long)]
    pub subject: Option<String>,
    /// Message text; {first_name}, {last_name} and {name} are filled per recipient
    #[arg(long)]
    pub body: String,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Pause between batches in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,
    /// Show a single status line instead of the progress bar
    #[arg(long)]
    pub minimized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChannelArg {
    Email,
    Dm,
}

#[derive(Subcommand)]
pub enum VisitorCommands {
    /// Move a visitor to another pipeline stage
    Move { id: String, stage: String },
}

#[derive(Subcommand)]
pub enum DistrictCommands {
    /// Propose (and optionally apply) district assignments
    Assign {
        #[arg(long, value_enum)]
        strategy: StrategyArg,
        /// Write the proposed assignments
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Match the member's ZIP code against district postal codes
    Postal,
    /// Match the first letter of the last name against district ranges
    Alpha,
    /// Follow the district most of the member's family is in
    Affinity,
}

/// Initialize tracing: stderr plus a daily log file in the cache directory.
/// The returned guard must stay alive for file output to be flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // RUST_LOG controls the level (e.g. RUST_LOG=shepherd_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "shepherd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_dir = shepherd_core::Config::load()
        .ok()
        .map(|config| App::cache_dir_for(&config).join("logs"));
    let _guard = init_tracing(log_dir.as_deref());
    info!("shepherd starting");

    let mut app = App::new()?;
    let json = cli.json;

    match cli.command {
        Commands::Login { email, remember } => commands::login(&mut app, email, remember).await,
        Commands::Logout => commands::logout(&mut app),
        Commands::Status => commands::status(&app, json),
        Commands::Sync => commands::sync(&app).await,
        Commands::Members { district, ministry, search } => {
            commands::members(&app, district, ministry, search, json).await
        }
        Commands::Broadcast(args) => commands::broadcast(&app, args, json).await,
        Commands::Visitors { command: None } => commands::visitors(&app, json).await,
        Commands::Visitors { command: Some(VisitorCommands::Move { id, stage }) } => {
            commands::move_visitor(&app, &id, &stage).await
        }
        Commands::Districts { command: DistrictCommands::Assign { strategy, apply } } => {
            commands::assign_districts(&app, strategy, apply, json).await
        }
        Commands::Checkout { event_id, quantity, tip, email } => {
            commands::checkout(&app, &event_id, quantity, tip, email, json).await
        }
        Commands::Address { query } => commands::address(&app, &query, json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_broadcast_requires_a_recipient_selection() {
        let missing = Cli::try_parse_from(["shepherd", "broadcast", "--channel", "email", "--body", "Hi"]);
        assert!(missing.is_err());

        let two = Cli::try_parse_from([
            "shepherd", "broadcast", "--channel", "dm", "--all", "--district", "d1", "--body", "Hi",
        ]);
        assert!(two.is_err());

        let cli = Cli::try_parse_from([
            "shepherd", "broadcast", "--channel", "dm", "--member", "m1", "--member", "m2", "--body", "Hi",
            "--batch-size", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Broadcast(args) => {
                assert_eq!(args.channel, ChannelArg::Dm);
                assert_eq!(args.member, vec!["m1", "m2"]);
                assert_eq!(args.batch_size, Some(5));
                assert!(!args.minimized);
            }
            _ => panic!("expected broadcast"),
        }
    }

    #[test]
    fn test_checkout_defaults() {
        let cli = Cli::try_parse_from(["shepherd", "checkout", "ev1"]).unwrap();
        match cli.command {
            Commands::Checkout { event_id, quantity, tip, email } => {
                assert_eq!(event_id, "ev1");
                assert_eq!(quantity, 1);
                assert_eq!(tip, 0);
                assert!(email.is_none());
            }
            _ => panic!("expected checkout"),
        }
    }
}
