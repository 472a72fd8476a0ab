//! fracture CLI.
//!
//! Fractured SQL migrations: timestamp revisions that do not depend on each
//! other, tracked in a ledger table.
//!
//! # Quick Start
//!
//! ```bash
//! # Create fracture.toml and the migrations directory
//! fracture init
//!
//! # Write a revision, then fill in its SQL
//! fracture revision -m "add users table"
//!
//! # Apply everything that is missing
//! fracture upgrade
//! ```

mod commands;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// fracture - fractured SQL migrations with a revision ledger.
#[derive(Parser)]
#[command(name = "fracture")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project config file (default: fracture.toml in the current directory).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Create the migrations directory and fracture.toml.
    Init {
        /// Migrations directory (default: from config, "migrations").
        directory: Option<PathBuf>,
    },

    /// Create a new, empty revision script.
    Revision {
        /// Revision message.
        #[arg(short, long, default_value = "")]
        message: String,

        /// Revision id to use instead of the current timestamp.
        #[arg(long)]
        rev_id: Option<String>,
    },

    /// Autogenerate a revision from the schema file.
    Migrate {
        /// Revision message.
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Apply revisions missing from the ledger.
    Upgrade {
        /// Destination: "head" or a revision id ("start:dest" with --sql).
        #[arg(default_value = "head")]
        revision: String,

        /// Skip revisions older than the head by more than this many days (-1 disables).
        #[arg(short = 'D', long, allow_negative_numbers = true)]
        max_lookback_days: Option<i64>,

        /// Bring a legacy chain to its tip first.
        #[arg(short, long)]
        sync: bool,

        /// Print SQL instead of running it.
        #[arg(long)]
        sql: bool,

        /// Clear the head and ledger tables first.
        #[arg(long)]
        purge: bool,
    },

    /// Revert applied revisions.
    Downgrade {
        /// "-N" for the N newest revisions, a revision id, or "base".
        #[arg(default_value = "-1", allow_hyphen_values = true)]
        revision: String,

        /// Print SQL instead of running it.
        #[arg(long)]
        sql: bool,
    },

    /// Show pending revisions, or the operations of one revision.
    Check {
        /// Revision to inspect.
        revision: Option<String>,

        /// Skip revisions older than the head by more than this many days (-1 disables).
        #[arg(short = 'D', long, allow_negative_numbers = true)]
        max_lookback_days: Option<i64>,

        /// Include legacy revisions a sync would apply.
        #[arg(short, long)]
        sync: bool,
    },

    /// Drop every table and delete the migrations directory.
    Drop {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show applied revisions.
    History,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    style::set_no_color(cli.no_color || std::env::var_os("NO_COLOR").is_some());

    if let Err(e) = run(cli) {
        style::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Init { directory } => commands::init::run(config, directory),
        Commands::Revision { message, rev_id } => {
            commands::revision::create(config, &message, rev_id.as_deref())
        }
        Commands::Migrate { message } => commands::revision::autogenerate(config, &message),
        Commands::Upgrade {
            revision,
            max_lookback_days,
            sync,
            sql,
            purge,
        } => commands::migration::upgrade(
            config,
            fracture_migration::UpgradeOptions {
                revision,
                max_lookback_days,
                sync,
                sql,
                purge,
            },
        ),
        Commands::Downgrade { revision, sql } => commands::migration::downgrade(
            config,
            fracture_migration::DowngradeOptions { revision, sql },
        ),
        Commands::Check {
            revision,
            max_lookback_days,
            sync,
        } => match revision {
            Some(revision) => commands::inspect::check_revision(config, &revision),
            None => commands::inspect::check(config, max_lookback_days, sync),
        },
        Commands::Drop { yes } => commands::drop::run(config, yes),
        Commands::History => commands::inspect::history(config),
    }
}
