//! BalanceIndex CLI.
//!
//! # Commands
//! ```text
//! balanceindex index           --input <records.jsonl> [--threads N] [--dry-run] [--timeout-ms MS]
//! balanceindex ledger          --balance-id <id> --chain <chain.json> [--prune]
//! balanceindex count-blk-files [--dir <path>] [--from-blk N] [--blk-count N]
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod cmd_index;
mod cmd_ledger;
mod config;
mod logging;

use config::CliConfig;

#[derive(Parser)]
#[command(
    name = "balanceindex",
    about = "Bulk-index balance changes and inspect reconciled ledgers",
    long_about = "
BalanceIndex CLI: write balance-change records into a partitioned table store
and read them back as a reconciled, chronologically ordered ledger.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter directives (overrides the config file's log level)
",
    version
)]
struct Cli {
    /// JSON config file (indexer settings and `log` section)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bulk-index balance-change records from a JSON-lines file
    Index {
        /// One balance-change record per line
        #[arg(short, long)]
        input: PathBuf,
        /// Maximum concurrent write tasks
        #[arg(long)]
        threads: Option<usize>,
        /// Plan the writes without touching storage
        #[arg(long)]
        dry_run: bool,
        /// Per-attempt write timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Reconcile one balance and print its ledger as JSON
    Ledger {
        /// Balance (partition) to read
        #[arg(long)]
        balance_id: String,
        /// Chain snapshot: {"block": height} map or ordered header array
        #[arg(long)]
        chain: PathBuf,
        /// Delete rows whose block left the chain
        #[arg(long)]
        prune: bool,
    },

    /// Count blk*.dat files in the block directory
    #[command(name = "count-blk-files")]
    CountBlkFiles {
        /// Block directory (overrides the config file)
        #[arg(long)]
        dir: Option<String>,
        /// First block file of the selected range
        #[arg(long)]
        from_blk: Option<u32>,
        /// Number of block files in the selected range
        #[arg(long)]
        blk_count: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.log.level = "debug".into();
    }
    logging::init_tracing(&config.log);

    let mut indexer = config.indexer;
    match cli.command {
        Commands::Index { input, threads, dry_run, timeout_ms } => {
            if let Some(n) = threads {
                indexer.task_count = Some(n);
            }
            if let Some(ms) = timeout_ms {
                indexer.request_timeout_ms = ms;
            }
            indexer.no_save |= dry_run;
            indexer.validate()?;
            cmd_index::run(&indexer, &input).await
        }

        Commands::Ledger { balance_id, chain, prune } => {
            indexer.validate()?;
            cmd_ledger::run(&indexer, &balance_id, &chain, prune).await
        }

        Commands::CountBlkFiles { dir, from_blk, blk_count } => {
            if let Some(dir) = dir {
                indexer.block_directory = dir;
            }
            if let Some(from) = from_blk {
                indexer.from_blk = from;
            }
            if blk_count.is_some() {
                indexer.blk_count = blk_count;
            }
            cmd_count_blk_files(&indexer)
        }
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

fn cmd_count_blk_files(config: &balanceindex_core::IndexerConfig) -> Result<()> {
    let dir = Path::new(&config.block_directory);
    if !dir.is_dir() {
        bail!("{} does not exist", dir.display());
    }
    let total = count_blk_files(dir)?;
    let selected = selected_blk_files(total, config.from_blk, config.blk_count);

    println!("Blk files count : {total}");
    if selected != total {
        println!(
            "Selected        : {selected} (from blk{:05}.dat)",
            config.from_blk
        );
    }
    Ok(())
}

/// How many of `total` block files fall in the `from_blk` / `blk_count` range.
fn selected_blk_files(total: usize, from_blk: u32, blk_count: Option<u32>) -> usize {
    total
        .saturating_sub(from_blk as usize)
        .min(blk_count.map_or(usize::MAX, |n| n as usize))
}

/// Files named `blk*.dat` directly under `dir`.
fn count_blk_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("list '{}'", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("blk") && name.ends_with(".dat") {
            count += 1;
        }
    }
    Ok(count)
}
