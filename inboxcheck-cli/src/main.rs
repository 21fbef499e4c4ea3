//! inboxcheck CLI: email deliverability testing from the terminal.
//!
//! Creates a test, tells you where to send your email, then watches the
//! test inboxes until the service reports where the email landed.

mod commands;
mod output;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// inboxcheck: find out whether your email lands in the inbox
#[derive(Parser, Debug)]
#[command(name = "inboxcheck", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Test service base URL (overrides configuration)
    #[arg(long)]
    base_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Create a new test and show where to send the email
    New {
        /// Your email address (defaults to the last one used)
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Start detection for a generated test code and wait for the result
    Detect {
        /// Test code printed by `new`
        code: String,
    },
    /// Create a test, wait until you have sent the email, then detect
    Run {
        /// Your email address (defaults to the last one used)
        #[arg(short, long)]
        email: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Poll a test whose detection is already running
    Watch {
        /// Test code
        code: String,
    },
    /// Fetch the current status and results of a test once
    Results {
        /// Test code
        code: String,
        /// Print the session as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the report of a finished test, download it, or email it
    Report {
        /// Test code
        code: String,
        /// Save the PDF report (defaults to email-test-report-<code>.pdf)
        #[arg(long)]
        pdf: Option<Option<PathBuf>>,
        /// Email the report to this address
        #[arg(long)]
        send: Option<String>,
    },
    /// List past tests for an email address
    History {
        /// Email address (defaults to the last one used)
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Show aggregate deliverability statistics for an email address
    Stats {
        /// Email address (defaults to the last one used)
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Check that the test service is reachable
    Health,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the current effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "inboxcheck", "inboxcheck")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "inboxcheck.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let command = match cli.command {
        Commands::Config { action } => {
            return commands::handle_config(action, &workspace, cli.base_url.as_deref());
        }
        other => other,
    };

    let mut config = inboxcheck_core::config::load_config(Some(&workspace))
        .map_err(inboxcheck_core::InboxCheckError::from)?;
    if let Some(base_url) = cli.base_url {
        config.service.base_url = base_url;
    }
    config
        .check()
        .map_err(inboxcheck_core::InboxCheckError::from)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let app = commands::App::from_config(config, workspace, cli.quiet)?;
    commands::handle_command(command, &app).await
}
