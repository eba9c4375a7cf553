//! Referential closure over sampled rows.
//!
//! Starting from the sampled [`KeepSet`], every kept row's non-NULL foreign
//! keys are followed to their parent rows, which are added to the keep set and
//! processed in turn until nothing new is added. Rows are only ever added.

use crate::error::{Result, SubsetError};
use crate::schema::{ForeignKey, SchemaGraph, TableId, TableSchema};
use crate::store::{format_tuple, KeyTuple, RowId, Store};
use ahash::{AHashMap, AHashSet};
use std::collections::VecDeque;
use tracing::debug;

/// Which rows of each table will be carried over, indexed by [`TableId`]
#[derive(Debug, Clone, Default)]
pub struct KeepSet {
    tables: Vec<AHashSet<RowId>>,
}

impl KeepSet {
    /// Create an empty keep set for `table_count` tables
    pub fn new(table_count: usize) -> Self {
        Self {
            tables: vec![AHashSet::new(); table_count],
        }
    }

    /// Add a row; returns true if it was not already kept
    pub fn insert(&mut self, table: TableId, id: RowId) -> bool {
        self.tables[table.0 as usize].insert(id)
    }

    pub fn contains(&self, table: TableId, id: &RowId) -> bool {
        self.tables
            .get(table.0 as usize)
            .map(|s| s.contains(id))
            .unwrap_or(false)
    }

    /// Number of kept rows in a table
    pub fn len(&self, table: TableId) -> usize {
        self.tables.get(table.0 as usize).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of kept rows across all tables
    pub fn total(&self) -> usize {
        self.tables.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Kept identities of a table, in ascending order
    pub fn sorted_ids(&self, table: TableId) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self
            .tables
            .get(table.0 as usize)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

/// Counters from one closure pass
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ClosureStats {
    /// Parent rows added to satisfy foreign keys
    pub rows_added: u64,
    /// Parent lookup queries issued against the source
    pub parent_lookups: u64,
    /// Foreign key values skipped because they were NULL
    pub null_references: u64,
}

/// Resolves the referential closure of a keep set against the source
pub struct ClosureResolver<'a> {
    graph: &'a SchemaGraph,
    source: &'a dyn Store,
    batch_size: usize,
}

impl<'a> ClosureResolver<'a> {
    pub fn new(graph: &'a SchemaGraph, source: &'a dyn Store, batch_size: usize) -> Self {
        Self {
            graph,
            source,
            batch_size: batch_size.max(1),
        }
    }

    /// Grow `keep` until every kept row's non-NULL foreign keys point at kept rows.
    ///
    /// Fails with [`SubsetError::DanglingReference`] if a non-NULL foreign key
    /// value has no parent row in the source.
    pub fn resolve(&self, keep: &mut KeepSet) -> Result<ClosureStats> {
        let mut stats = ClosureStats::default();
        let mut queue: VecDeque<(TableId, Vec<RowId>)> = VecDeque::new();

        for &table_id in self.graph.insertion_order() {
            if self.has_foreign_keys(table_id) {
                self.enqueue(&mut queue, table_id, keep.sorted_ids(table_id));
            }
        }

        // Keys already looked up, per (parent table, referenced columns)
        let mut resolved: AHashMap<(TableId, Vec<String>), AHashSet<KeyTuple>> = AHashMap::new();

        while let Some((table_id, ids)) = queue.pop_front() {
            let table = self.table(table_id)?;
            let fk_columns = foreign_key_columns(table);
            let rows = self.source.fetch_rows(table, &fk_columns, &ids)?;

            for fk in &table.foreign_keys {
                let parent_id = fk.referenced_table_id.ok_or_else(|| {
                    SubsetError::Schema(format!(
                        "unresolved foreign key {}",
                        fk.describe(&table.name)
                    ))
                })?;
                let parent = self.table(parent_id)?;
                let positions: Vec<usize> = fk
                    .column_names
                    .iter()
                    .filter_map(|c| fk_columns.iter().position(|f| f.eq_ignore_ascii_case(c)))
                    .collect();

                let done = resolved
                    .entry((parent_id, fk.referenced_columns.clone()))
                    .or_default();

                // Distinct unresolved keys, remembering one referencing row each
                let mut pending: AHashMap<KeyTuple, &RowId> = AHashMap::new();
                for (row_id, values) in &rows {
                    let key: KeyTuple = positions.iter().map(|&p| values[p].clone()).collect();
                    if key.iter().any(|v| v.is_null()) {
                        stats.null_references += 1;
                        continue;
                    }
                    if !done.contains(&key) {
                        pending.entry(key).or_insert(row_id);
                    }
                }

                if pending.is_empty() {
                    continue;
                }

                let mut keys: Vec<KeyTuple> = pending.keys().cloned().collect();
                keys.sort();

                let matches = self
                    .source
                    .find_parents(parent, &fk.referenced_columns, &keys)?;
                stats.parent_lookups += 1;

                let mut matched: AHashSet<KeyTuple> = AHashSet::with_capacity(matches.len());
                let mut added: Vec<RowId> = Vec::new();
                for (key, parent_row) in matches {
                    matched.insert(key);
                    if keep.insert(parent_id, parent_row.clone()) {
                        added.push(parent_row);
                    }
                }

                if let Some(missing) = keys.iter().find(|k| !matched.contains(*k)) {
                    return Err(dangling(table, fk, pending[missing], missing));
                }

                debug!(
                    table = %table.name,
                    parent = %parent.name,
                    keys = keys.len(),
                    added = added.len(),
                    "resolved foreign key batch"
                );

                stats.rows_added += added.len() as u64;
                done.extend(keys);

                if self.has_foreign_keys(parent_id) {
                    added.sort();
                    self.enqueue(&mut queue, parent_id, added);
                }
            }
        }

        Ok(stats)
    }

    fn enqueue(&self, queue: &mut VecDeque<(TableId, Vec<RowId>)>, table: TableId, ids: Vec<RowId>) {
        for chunk in ids.chunks(self.batch_size) {
            queue.push_back((table, chunk.to_vec()));
        }
    }

    fn has_foreign_keys(&self, table: TableId) -> bool {
        self.graph
            .table(table)
            .map(|t| !t.foreign_keys.is_empty())
            .unwrap_or(false)
    }

    fn table(&self, id: TableId) -> Result<&'a TableSchema> {
        self.graph
            .table(id)
            .ok_or_else(|| SubsetError::Schema(format!("unknown table id {}", id)))
    }
}

/// Distinct columns of a table that take part in any foreign key, in declaration order
fn foreign_key_columns(table: &TableSchema) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for fk in &table.foreign_keys {
        for name in &fk.column_names {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

fn dangling(table: &TableSchema, fk: &ForeignKey, row: &RowId, key: &KeyTuple) -> SubsetError {
    SubsetError::DanglingReference {
        table: table.name.clone(),
        row: format_tuple(row),
        columns: fk.column_names.join(", "),
        parent_table: fk.referenced_table.clone(),
        value: format_tuple(key),
    }
}
