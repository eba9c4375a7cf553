//! Referentially intact subsetting of relational databases.
//!
//! A run has four strictly sequential phases:
//!
//! 1. Introspect the source, add any foreign keys the policy declares, and
//!    build the [`SchemaGraph`] (fails on cycles).
//! 2. Sample each table independently ([`sampler`]).
//! 3. Grow the sample until every non-NULL foreign key of every kept row points
//!    at a kept row ([`closure`]).
//! 4. Copy the kept rows into the destination, parents first, in one
//!    transaction ([`writer`]).
//!
//! The destination schema must already exist and match the source.

pub mod closure;
pub mod config;
pub mod sampler;
pub mod writer;

pub use closure::{ClosureResolver, ClosureStats, KeepSet};
pub use config::{ForcedRow, KeyValue, SampleMode, SubsetYamlConfig, TableConfig};
pub use sampler::{rows_to_keep, validate_fraction};
pub use writer::{WriteOptions, WriteStats, Writer};

use crate::error::{Result, SubsetError};
use crate::schema::{Schema, SchemaGraph, TableId};
use crate::store::{format_tuple, KeyTuple, Store, Value};
use std::time::Instant;
use tracing::{debug, info};

/// Configuration for a subsetting run
#[derive(Debug, Clone)]
pub struct SubsetConfig {
    /// Fraction of each table to sample, in (0, 1]
    pub fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Rows per lookup, read and insert batch
    pub batch_size: usize,
    /// Concurrent source readers in the writer
    pub workers: usize,
    /// Compute the subset without writing it
    pub dry_run: bool,
    /// Show progress
    pub progress: bool,
    /// Per-table policy, declared foreign keys and forced rows
    pub policy: SubsetYamlConfig,
    /// Tables not to sample (the closure may still add rows to them)
    pub exclude: Vec<String>,
}

impl Default for SubsetConfig {
    fn default() -> Self {
        Self {
            fraction: 0.1,
            seed: rand::random(),
            batch_size: 500,
            workers: writer::default_workers(),
            dry_run: false,
            progress: false,
            policy: SubsetYamlConfig::default(),
            exclude: Vec::new(),
        }
    }
}

/// Statistics from a subsetting run
#[derive(Debug, Default, serde::Serialize)]
pub struct SubsetStats {
    /// Seed the sampler used
    pub seed: u64,
    /// Per-table statistics, in insertion order
    pub tables: Vec<TableSubsetStats>,
    /// Rows in the source
    pub total_rows: u64,
    /// Rows chosen by the sampler (including forced rows)
    pub total_rows_sampled: u64,
    /// Rows in the final subset
    pub total_rows_kept: u64,
    /// Rows added by the closure to satisfy foreign keys
    pub rows_added_by_closure: u64,
    /// Parent lookups issued by the closure
    pub parent_lookups: u64,
    /// Rows inserted into the destination (zero on a dry run)
    pub rows_written: u64,
    pub dry_run: bool,
    pub elapsed_secs: f64,
}

/// Per-table subsetting statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableSubsetStats {
    pub name: String,
    pub mode: String,
    pub rows_total: u64,
    pub rows_sampled: u64,
    pub rows_kept: u64,
}

/// Copy a referentially intact random subset of `source` into `destination`.
///
/// Roughly `fraction` of every table is sampled, then every row a sampled row
/// references through a non-NULL foreign key is added, transitively. The
/// destination schema must already exist.
pub fn create_subset(source: &dyn Store, destination: &dyn Store, fraction: f64) -> Result<()> {
    let config = SubsetConfig {
        fraction,
        ..SubsetConfig::default()
    };
    Subsetter::new(config).run(source, destination).map(|_| ())
}

/// A configured subsetting run
pub struct Subsetter {
    config: SubsetConfig,
}

impl Subsetter {
    pub fn new(config: SubsetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SubsetConfig {
        &self.config
    }

    /// Run all phases against `source` and (unless dry run) `destination`
    pub fn run(&self, source: &dyn Store, destination: &dyn Store) -> Result<SubsetStats> {
        let started = Instant::now();
        let config = &self.config;

        self.validate_fractions()?;

        info!(source = %source.describe(), seed = config.seed, "introspecting source schema");
        let mut schema = source.introspect()?;
        config.policy.apply_foreign_keys(&mut schema)?;
        let graph = SchemaGraph::build(schema)?;
        info!(tables = graph.len(), "schema graph built");

        if !config.dry_run {
            check_destination(&graph.schema, destination)?;
        }

        let mut stats = SubsetStats {
            seed: config.seed,
            dry_run: config.dry_run,
            ..Default::default()
        };

        // Sample
        let mut keep = KeepSet::new(graph.len());
        let mut rows_total = vec![0u64; graph.len()];
        let mut modes = vec![String::new(); graph.len()];
        for &table_id in graph.insertion_order() {
            let Some(table) = graph.table(table_id) else {
                continue;
            };
            let mode = self.mode_for(&table.name);
            let sample = sampler::sample_table(source, table, mode, config.seed)?;
            debug!(
                table = %table.name,
                %mode,
                rows = sample.rows_seen,
                sampled = sample.ids.len(),
                "sampled table"
            );
            rows_total[table_id.0 as usize] = sample.rows_seen as u64;
            modes[table_id.0 as usize] = mode.to_string();
            for id in sample.ids {
                keep.insert(table_id, id);
            }
        }

        self.apply_forced_rows(source, &graph, &mut keep)?;

        let sampled: Vec<u64> = (0..graph.len())
            .map(|i| keep.len(TableId(i as u32)) as u64)
            .collect();
        stats.total_rows_sampled = sampled.iter().sum();
        info!(rows = stats.total_rows_sampled, "sampling complete");

        // Close
        let closure = ClosureResolver::new(&graph, source, config.batch_size).resolve(&mut keep)?;
        stats.rows_added_by_closure = closure.rows_added;
        stats.parent_lookups = closure.parent_lookups;
        info!(
            added = closure.rows_added,
            lookups = closure.parent_lookups,
            null_references = closure.null_references,
            "referential closure complete"
        );

        for &table_id in graph.insertion_order() {
            let i = table_id.0 as usize;
            stats.tables.push(TableSubsetStats {
                name: graph.table_name(table_id).unwrap_or_default().to_string(),
                mode: std::mem::take(&mut modes[i]),
                rows_total: rows_total[i],
                rows_sampled: sampled[i],
                rows_kept: keep.len(table_id) as u64,
            });
        }
        stats.total_rows = rows_total.iter().sum();
        stats.total_rows_kept = keep.total() as u64;

        // Write
        if config.dry_run {
            info!(rows = stats.total_rows_kept, "dry run, destination untouched");
        } else {
            let options = WriteOptions {
                batch_size: config.batch_size,
                workers: config.workers,
                progress: config.progress,
            };
            let written = Writer::new(&graph, source, destination, options).write(&keep)?;
            stats.rows_written = written.rows_written;
        }

        stats.elapsed_secs = started.elapsed().as_secs_f64();
        Ok(stats)
    }

    fn validate_fractions(&self) -> Result<()> {
        validate_fraction(self.config.fraction, None)?;
        if let Some(f) = self.config.policy.default.fraction {
            validate_fraction(f, None)?;
        }
        for (table, f) in self.config.policy.table_fractions() {
            validate_fraction(f, Some(table))?;
        }
        Ok(())
    }

    fn mode_for(&self, table: &str) -> SampleMode {
        if self.config.exclude.iter().any(|t| t.eq_ignore_ascii_case(table)) {
            return SampleMode::Exclude;
        }
        self.config.policy.mode_for(table, self.config.fraction)
    }

    /// Seed the keep set with the configured forced rows
    fn apply_forced_rows(
        &self,
        source: &dyn Store,
        graph: &SchemaGraph,
        keep: &mut KeepSet,
    ) -> Result<()> {
        for forced in &self.config.policy.force {
            let table_id = graph.schema.get_table_id(&forced.table).ok_or_else(|| {
                SubsetError::Config(format!("forced row names unknown table '{}'", forced.table))
            })?;
            let table = graph
                .table(table_id)
                .ok_or_else(|| SubsetError::Schema(format!("unknown table id {}", table_id)))?;

            if !table.has_primary_key() {
                return Err(SubsetError::Config(format!(
                    "forced row for table '{}' needs a primary key",
                    table.name
                )));
            }
            let pk = table.primary_key_names();
            if pk.len() != forced.key.len() {
                return Err(SubsetError::Config(format!(
                    "forced row for table '{}' has {} key values, primary key has {} columns",
                    table.name,
                    forced.key.len(),
                    pk.len()
                )));
            }

            let key: KeyTuple = forced.key.iter().map(Value::from).collect();
            let found = source.find_parents(table, &pk, std::slice::from_ref(&key))?;
            let Some((_, row_id)) = found.into_iter().next() else {
                return Err(SubsetError::Config(format!(
                    "forced row {} does not exist in table '{}'",
                    format_tuple(&key),
                    table.name
                )));
            };
            debug!(table = %table.name, key = %format_tuple(&key), "forced row");
            keep.insert(table_id, row_id);
        }
        Ok(())
    }
}

/// Check that every source table and column exists in the destination
fn check_destination(source: &Schema, destination: &dyn Store) -> Result<()> {
    let dest = destination.introspect()?;
    for table in source.iter() {
        let Some(dest_table) = dest.get_table(&table.name) else {
            return Err(SubsetError::Schema(format!(
                "table '{}' does not exist in destination {}",
                table.name,
                destination.describe()
            )));
        };
        for column in &table.columns {
            if dest_table.get_column(&column.name).is_none() {
                return Err(SubsetError::Schema(format!(
                    "column '{}.{}' does not exist in destination {}",
                    table.name,
                    column.name,
                    destination.describe()
                )));
            }
        }
    }
    Ok(())
}
