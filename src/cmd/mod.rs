mod order;
mod subset;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "db-subsetter")]
#[command(version)]
#[command(
    about = "Copy a referentially intact random subset of a database",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Whether the chosen subcommand asked for verbose logging
    pub fn verbose(&self) -> bool {
        match &self.command {
            Commands::Subset { verbose, .. } => *verbose,
            Commands::Order { .. } => false,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample a source database and copy the subset, with every referenced
    /// parent row, into a destination that already has the schema
    Subset {
        /// Source database (duckdb:///path.db, duckdb://:memory:, or a file path)
        source: String,

        /// Destination database (same forms as the source)
        dest: String,

        /// Fraction of each table to sample, in (0, 1]
        #[arg(short, long)]
        fraction: Option<f64>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// YAML config file for per-table settings and forced rows
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Concurrent source readers when writing (default: available cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Rows per lookup, read and insert batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Tables not to sample (comma-separated); referenced rows are still copied
        #[arg(short, long)]
        exclude: Option<String>,

        /// Compute the subset and print statistics without writing
        #[arg(long)]
        dry_run: bool,

        /// Print statistics as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Show progress during processing
        #[arg(short, long)]
        progress: bool,

        /// Log each phase and table (overridden by RUST_LOG)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the tables of a database in foreign-key insertion order
    Order {
        /// Database (duckdb:///path.db, duckdb://:memory:, or a file path)
        source: String,

        /// Print children before parents (deletion order)
        #[arg(long)]
        reverse: bool,

        /// Group tables by dependency level
        #[arg(long)]
        levels: bool,

        /// YAML config file whose declared foreign keys join the graph
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Subset {
            source,
            dest,
            fraction,
            seed,
            config,
            workers,
            batch_size,
            exclude,
            dry_run,
            json,
            progress,
            verbose: _,
        } => subset::run(subset::SubsetArgs {
            source,
            dest,
            fraction,
            seed,
            config,
            workers,
            batch_size,
            exclude,
            dry_run,
            json,
            progress,
        }),
        Commands::Order {
            source,
            reverse,
            levels,
            config,
        } => order::run(&source, reverse, levels, config.as_deref()),
    }
}
