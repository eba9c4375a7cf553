//! Subset command CLI handler.

use anyhow::{bail, Context};
use db_subsetter::store::open_store;
use db_subsetter::subset::{SubsetConfig, SubsetStats, SubsetYamlConfig, Subsetter};
use std::path::PathBuf;

pub struct SubsetArgs {
    pub source: String,
    pub dest: String,
    pub fraction: Option<f64>,
    pub seed: Option<u64>,
    pub config: Option<PathBuf>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub exclude: Option<String>,
    pub dry_run: bool,
    pub json: bool,
    pub progress: bool,
}

pub fn run(args: SubsetArgs) -> anyhow::Result<()> {
    let mut policy = match &args.config {
        Some(path) => SubsetYamlConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SubsetYamlConfig::default(),
    };

    // CLI flags win over file values
    let fraction = match args.fraction.or(policy.default.fraction) {
        Some(f) => f,
        None => bail!("Must specify --fraction or a default fraction in --config"),
    };
    policy.default.fraction = Some(fraction);

    let defaults = SubsetConfig::default();
    let exclude: Vec<String> = args
        .exclude
        .map(|e| e.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let config = SubsetConfig {
        fraction,
        seed: args.seed.or(policy.default.seed).unwrap_or(defaults.seed),
        batch_size: args
            .batch_size
            .or(policy.default.batch_size)
            .unwrap_or(defaults.batch_size),
        workers: args
            .workers
            .or(policy.default.workers)
            .unwrap_or(defaults.workers),
        dry_run: args.dry_run,
        progress: args.progress,
        policy,
        exclude,
    };

    let source = open_store(&args.source).with_context(|| format!("opening source {}", args.source))?;
    let destination =
        open_store(&args.dest).with_context(|| format!("opening destination {}", args.dest))?;

    if args.progress {
        eprintln!(
            "Subsetting {} -> {} (fraction {}, seed {})",
            source.describe(),
            destination.describe(),
            config.fraction,
            config.seed
        );
    }

    let stats = Subsetter::new(config).run(source.as_ref(), destination.as_ref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats);
    }

    Ok(())
}

fn print_stats(stats: &SubsetStats) {
    let percent = if stats.total_rows > 0 {
        (stats.total_rows_kept as f64 / stats.total_rows as f64) * 100.0
    } else {
        0.0
    };

    eprintln!();
    eprintln!("Subset Statistics:");
    eprintln!("  Seed: {}", stats.seed);
    eprintln!("  Tables: {}", stats.tables.len());
    eprintln!(
        "  Total rows: {} / {} ({:.1}%)",
        stats.total_rows_kept, stats.total_rows, percent
    );
    eprintln!("  Rows sampled: {}", stats.total_rows_sampled);
    eprintln!("  Rows added for foreign keys: {}", stats.rows_added_by_closure);

    if stats.dry_run {
        eprintln!();
        eprintln!("Per-table breakdown:");
        for table in &stats.tables {
            eprintln!(
                "  {} [{}]: {} sampled, {} kept / {} rows",
                table.name, table.mode, table.rows_sampled, table.rows_kept, table.rows_total
            );
        }
        eprintln!();
        eprintln!("Dry run: destination not modified.");
    } else {
        eprintln!("  Rows written: {}", stats.rows_written);
    }
    eprintln!("  Elapsed: {:.2}s", stats.elapsed_secs);
}
