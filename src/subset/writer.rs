//! Dependency-ordered writer.
//!
//! Copies every kept row from the source into the destination, parents before
//! children, inside one destination transaction. Tables in the same dependency
//! level are read concurrently, each worker on its own source handle; inserts
//! are always issued in the same order regardless of which worker finished
//! first.

use super::closure::KeepSet;
use crate::error::{Result, SubsetError};
use crate::schema::{SchemaGraph, TableId, TableSchema};
use crate::store::{Row, Store};
use indicatif::{ProgressBar, ProgressStyle};
use std::thread;
use tracing::{debug, info, warn};

/// Writer tuning
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Rows per source read and per INSERT statement
    pub batch_size: usize,
    /// Maximum concurrent source readers per level
    pub workers: usize,
    /// Show a progress bar on stderr
    pub progress: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            workers: default_workers(),
            progress: false,
        }
    }
}

/// Available parallelism, or one worker if it cannot be determined
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Counters from one write
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct WriteStats {
    pub tables_written: usize,
    pub rows_written: u64,
}

/// Writes a closed [`KeepSet`] into the destination
pub struct Writer<'a> {
    graph: &'a SchemaGraph,
    source: &'a dyn Store,
    destination: &'a dyn Store,
    options: WriteOptions,
}

impl<'a> Writer<'a> {
    pub fn new(
        graph: &'a SchemaGraph,
        source: &'a dyn Store,
        destination: &'a dyn Store,
        options: WriteOptions,
    ) -> Self {
        Self {
            graph,
            source,
            destination,
            options: WriteOptions {
                batch_size: options.batch_size.max(1),
                workers: options.workers.max(1),
                progress: options.progress,
            },
        }
    }

    /// Write every kept row. On failure the destination transaction is rolled
    /// back and the destination is left as it was.
    pub fn write(&self, keep: &KeepSet) -> Result<WriteStats> {
        let progress_bar = self.progress_bar(keep.total() as u64);

        self.destination.begin()?;
        let result = self.write_levels(keep, progress_bar.as_ref());

        if let Some(pb) = &progress_bar {
            pb.finish_and_clear();
        }

        match result {
            Ok(stats) => {
                self.destination.commit()?;
                info!(
                    destination = %self.destination.describe(),
                    tables = stats.tables_written,
                    rows = stats.rows_written,
                    "committed subset"
                );
                Ok(stats)
            }
            Err(err) => {
                warn!(error = %err, "write failed, rolling back destination");
                if let Err(rollback_err) = self.destination.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn write_levels(&self, keep: &KeepSet, progress: Option<&ProgressBar>) -> Result<WriteStats> {
        let mut stats = WriteStats::default();

        for (depth, level) in self.graph.levels().into_iter().enumerate() {
            let tables: Vec<TableId> = level.into_iter().filter(|&t| keep.len(t) > 0).collect();
            if tables.is_empty() {
                continue;
            }
            debug!(level = depth, tables = tables.len(), "writing level");

            for (table_id, rows) in self.read_level(&tables, keep)? {
                let table = table_of(self.graph, table_id)?;
                self.insert_table(table, &rows)?;

                stats.tables_written += 1;
                stats.rows_written += rows.len() as u64;
                if let Some(pb) = progress {
                    pb.inc(rows.len() as u64);
                }
                info!(table = %table.name, rows = rows.len(), "wrote table");
            }
        }

        Ok(stats)
    }

    /// Read the kept rows of every table in a level, returned in `tables` order
    fn read_level(&self, tables: &[TableId], keep: &KeepSet) -> Result<Vec<(TableId, Vec<Row>)>> {
        let workers = self.options.workers.min(tables.len());
        let graph = self.graph;
        let batch_size = self.options.batch_size;

        if workers <= 1 {
            return tables
                .iter()
                .map(|&t| read_table(self.source, graph, keep, t, batch_size).map(|rows| (t, rows)))
                .collect();
        }

        let handles = (0..workers)
            .map(|_| self.source.try_clone())
            .collect::<Result<Vec<_>>>()?;

        let mut results = thread::scope(|scope| -> Result<Vec<(TableId, Vec<Row>)>> {
            let joins: Vec<_> = handles
                .into_iter()
                .enumerate()
                .map(|(worker, store)| {
                    let assigned: Vec<TableId> =
                        tables.iter().skip(worker).step_by(workers).copied().collect();
                    scope.spawn(move || -> Result<Vec<(TableId, Vec<Row>)>> {
                        assigned
                            .into_iter()
                            .map(|t| {
                                read_table(store.as_ref(), graph, keep, t, batch_size)
                                    .map(|rows| (t, rows))
                            })
                            .collect()
                    })
                })
                .collect();

            let mut out = Vec::with_capacity(tables.len());
            for join in joins {
                match join.join() {
                    Ok(read) => out.extend(read?),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Ok(out)
        })?;

        results.sort_by_key(|(t, _)| tables.iter().position(|x| x == t));
        Ok(results)
    }

    fn insert_table(&self, table: &TableSchema, rows: &[Row]) -> Result<()> {
        let columns = table.column_names();
        for chunk in rows.chunks(self.options.batch_size) {
            self.destination
                .insert_rows(table, &columns, chunk)
                .map_err(|e| as_write_error(&table.name, e))?;
        }
        Ok(())
    }

    fn progress_bar(&self, total: u64) -> Option<ProgressBar> {
        if !self.options.progress {
            return None;
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({percent}%) {msg}",
        ) {
            pb.set_style(
                style
                    .progress_chars("█▓▒░  ")
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message("Writing subset...");
        Some(pb)
    }
}

/// Full column data of a table's kept rows, ordered by row identity
fn read_table(
    source: &dyn Store,
    graph: &SchemaGraph,
    keep: &KeepSet,
    table_id: TableId,
    batch_size: usize,
) -> Result<Vec<Row>> {
    let table = table_of(graph, table_id)?;
    let columns = table.column_names();
    let ids = keep.sorted_ids(table_id);

    let mut fetched = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(batch_size) {
        fetched.extend(source.fetch_rows(table, &columns, chunk)?);
    }

    if fetched.len() != ids.len() {
        return Err(SubsetError::store(
            format!("reading rows of {}", table.name),
            format!(
                "{} kept rows no longer exist in the source",
                ids.len().saturating_sub(fetched.len())
            ),
        ));
    }

    fetched.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(fetched.into_iter().map(|(_, row)| row).collect())
}

fn table_of(graph: &SchemaGraph, id: TableId) -> Result<&TableSchema> {
    graph
        .table(id)
        .ok_or_else(|| SubsetError::Schema(format!("unknown table id {}", id)))
}

/// Re-label a store failure during insert as a write failure on `table`
fn as_write_error(table: &str, err: SubsetError) -> SubsetError {
    match err {
        SubsetError::Store { source, .. } => SubsetError::Write {
            table: table.to_string(),
            source,
        },
        other => SubsetError::write(table, other),
    }
}
