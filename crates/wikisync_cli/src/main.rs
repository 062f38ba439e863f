//! Wikisync CLI - publish the profile icon dataset to a wiki.

mod commands;
mod config;
mod progress;
mod shutdown;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use wikisync::Shutdown;

use crate::commands::ledger::LedgerAction;
use crate::commands::sync::SyncArgs;

/// Exit status after a run stopped by Ctrl+C.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "wikisync")]
#[command(version)]
#[command(about = "Incremental sync of the profile icon dataset into a wiki")]
#[command(
    long_about = "Wikisync publishes every profile icon as a data module and an image file. \
A ledger of content hashes, stored inside a PNG on the wiki itself, lets each run \
write only what changed since the previous one."
)]
#[command(after_long_help = r#"EXAMPLES
    Sync the whole dataset:
        $ wikisync sync

    Sync a few icons, saving the ledger after every 10 writes:
        $ wikisync sync --ids 7 29 588 --checkpoint-every 10

    Publish every item even when the wiki already holds the current ledger:
        $ wikisync sync --no-precheck

    Show what a downloaded lock file contains:
        $ wikisync ledger inspect Profile-Icons-V1-lockfile.png

    Generate shell completions:
        $ wikisync completions bash > ~/.local/share/bash-completion/completions/wikisync

CONFIGURATION
    Wikisync reads configuration from:
      1. ~/.config/wikisync/config.toml (or $XDG_CONFIG_HOME/wikisync/config.toml)
      2. ./wikisync.toml
      3. Environment variables (WIKISYNC_ prefix, `__` between section and key)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    WIKISYNC_WIKI__API_URL        Action API endpoint of the wiki
    WIKISYNC_WIKI__USERNAME       Bot account name
    WIKISYNC_WIKI__PASSWORD       Bot password
    WIKISYNC_SYNC__LEDGER_FILE    File name of the ledger image
    WIKISYNC_SYNC__PRECHECK       Compare the published ledger checksum first (default: true)
    WIKISYNC_SOURCE__PREFETCH     Images fetched ahead of the current item (default: 10)
    RUST_LOG                      Log filter (default: wikisync=info,wikisync_cli=info)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the dataset into the wiki
    Sync {
        #[command(flatten)]
        args: SyncArgs,
    },
    /// Inspect ledger carriers
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("wikisync=info,wikisync_cli=info"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(Term::stdout().is_term())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(shell)?;
        }
        Commands::Ledger { action } => {
            commands::ledger::handle_ledger(action)?;
        }
        Commands::Sync { args } => {
            let config = config::Config::load();

            let shutdown = Shutdown::new();
            shutdown::setup_shutdown_handler(shutdown.clone());

            let report = commands::sync::handle_sync(args, &config, shutdown).await?;
            if report.interrupted {
                std::process::exit(EXIT_INTERRUPTED);
            }
        }
    }

    Ok(())
}
