//! # Carryover CLI (`carryover`)
//!
//! Re-imports a regenerated content set into the entity store while
//! keeping the identifiers of entities that survived the regeneration.
//!
//! ## Usage
//!
//! ```bash
//! carryover --config ./config/carryover.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `carryover init` | Create the SQLite database and run schema migrations |
//! | `carryover plan` | Reconcile every group and print what would change |
//! | `carryover sync` | Back up the database, then apply the plan |
//! | `carryover stats` | Per-collection and per-group counts |
//!
//! ## Examples
//!
//! ```bash
//! # Review the plan, then apply exactly that plan
//! carryover plan
//! carryover sync --expect-digest 3f1c...
//!
//! # Machine-readable plan
//! carryover plan --json > plan.json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use carryover::progress::ProgressMode;
use carryover::sync::SyncOptions;
use carryover::{config, migrate, stats, sync};

/// Carryover: identifier-preserving re-import of regenerated content.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/carryover.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "carryover",
    about = "Carryover — identifier-preserving re-import of regenerated content",
    version,
    long_about = "Carryover matches freshly generated records to the stored entities they \
    replace (exact text, then similarity, then forced pairing of leftovers), updates matched \
    entities in place, inserts new ones, and deletes the rest, so that stable ids survive a \
    full regeneration."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/carryover.toml`.
    #[arg(long, global = true, default_value = "./config/carryover.toml")]
    config: PathBuf,

    /// Progress on stderr: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Log debug detail (every match and write) to stderr.
    /// `CARRYOVER_LOG` overrides this when set.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `records` table.
    /// This command is idempotent; running it multiple times is safe.
    Init,

    /// Dry run: reconcile every group and print the plan.
    ///
    /// Prints per-group counts, pairings that need review, malformed
    /// source records, and the plan digest. Nothing is written.
    Plan {
        /// Print the plan as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reconcile and apply.
    ///
    /// Backs up the database, applies each group's plan in one
    /// transaction, and prints post-update counts.
    Sync {
        /// Skip the pre-write backup.
        #[arg(long)]
        no_backup: bool,

        /// Only write if the plan digest equals this value (from `plan`).
        #[arg(long)]
        expect_digest: Option<String>,
    },

    /// Show record counts per collection and per group.
    Stats,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CARRYOVER_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Plan { json } => {
            sync::run_plan(&cfg, json, progress.as_ref()).await?;
        }
        Commands::Sync {
            no_backup,
            expect_digest,
        } => {
            let opts = SyncOptions {
                no_backup,
                expect_digest,
            };
            sync::run_sync(&cfg, &opts, progress.as_ref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
