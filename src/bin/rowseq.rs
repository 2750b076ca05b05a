//! rowseq - administer sequential row ids in a JSON table file.
//!
//! # Usage
//!
//! ```bash
//! # Assign the next id to row 7
//! rowseq --table rows.json --store counter.json allocate --row 7
//!
//! # Rewrite the id column to the canonical sequence
//! rowseq --table rows.json --store counter.json repair
//!
//! # Forget the stored counter (next allocation re-reads the table tail)
//! rowseq --store counter.json reset
//!
//! # Show the effective configuration
//! rowseq --config rowseq.toml config
//! ```
//!
//! The fast cache lives in process memory, so every invocation starts cold and
//! resolves from the durable store file. The document and allocation locks
//! are advisory file locks next to the store file (`<store>.document.lock`,
//! `<store>.allocation.lock`), so concurrent invocations against the same
//! store exclude each other.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use rowseq::AdminReset;
use rowseq::Allocation;
use rowseq::Allocator;
use rowseq::Collaborators;
use rowseq::Reconciler;
use rowseq::SequencerConfig;
use rowseq::Submission;
use rowseq::file::FileLockCoordinator;
use rowseq::file::JsonFileDurableStore;
use rowseq::file::JsonFileTable;
use rowseq::inmemory::MemoryCache;
use tracing_subscriber::EnvFilter;

/// Sequential row id administration.
#[derive(Parser)]
#[command(name = "rowseq")]
#[command(version)]
#[command(about = "Assign, repair and reset sequential row ids")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Clone)]
struct GlobalOptions {
    /// Table file (JSON with `header` and `rows`).
    #[arg(long, env = "ROWSEQ_TABLE", global = true, default_value = "rowseq-table.json")]
    table: PathBuf,

    /// Durable counter store file (JSON object).
    #[arg(long, env = "ROWSEQ_STORE", global = true, default_value = "rowseq-counter.json")]
    store: PathBuf,

    /// TOML configuration file layered over ROWSEQ_* environment variables.
    #[arg(long, env = "ROWSEQ_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output JSON instead of human-readable text.
    #[arg(long = "json", global = true)]
    is_json: bool,

    /// Enable debug logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    is_verbose: bool,

    /// Suppress all logging output.
    #[arg(short = 'q', long = "quiet", global = true)]
    is_quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Assign the next id to a data row.
    Allocate {
        /// 1-based row index (row 1 is the header).
        #[arg(long)]
        row: u32,
    },

    /// Rewrite the id column to the canonical sequence.
    Repair,

    /// Clear the stored counter.
    Reset,

    /// Show the last-assigned id and the tier it came from.
    Resolve,

    /// Print the effective configuration.
    Config,
}

/// Initialize tracing subscriber with environment-based filtering.
fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

/// Environment first, then the TOML file on top, then validation.
fn load_config(path: Option<&PathBuf>) -> Result<SequencerConfig> {
    let mut config = SequencerConfig::from_env();
    if let Some(path) = path {
        config.overlay_toml_file(path).with_context(|| format!("loading {}", path.display()))?;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn collaborators(global: &GlobalOptions) -> Collaborators {
    Collaborators::new(
        Arc::new(JsonFileTable::open(&global.table)),
        MemoryCache::new(),
        Arc::new(JsonFileDurableStore::open(&global.store)),
        FileLockCoordinator::beside(&global.store),
    )
}

fn print<T: serde::Serialize + std::fmt::Debug>(is_json: bool, value: &T) -> Result<()> {
    if is_json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{value:#?}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.is_quiet, cli.global.is_verbose);

    let config = Arc::new(load_config(cli.global.config.as_ref())?);
    let deps = collaborators(&cli.global);

    match cli.command {
        Command::Allocate { row } => {
            let allocation = Allocator::new(deps, config).allocate(Submission::new(row)).await;
            print(cli.global.is_json, &allocation)?;
            if allocation == Allocation::NoAssignment {
                bail!("no id assigned to row {row}");
            }
        }
        Command::Repair => {
            let report = Reconciler::new(deps, config).repair_all().await.context("reconciliation failed")?;
            print(cli.global.is_json, &report)?;
        }
        Command::Reset => {
            if !AdminReset::new(deps, config).reset_storage().await {
                bail!("counter reset failed");
            }
            print(cli.global.is_json, &true)?;
        }
        Command::Resolve => {
            let resolved = Allocator::new(deps, config).resolve_last_id().await.context("resolving last id")?;
            print(cli.global.is_json, &resolved)?;
        }
        Command::Config => {
            print(cli.global.is_json, config.as_ref())?;
        }
    }

    Ok(())
}
