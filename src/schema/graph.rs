//! Schema dependency graph for FK-aware subsetting.
//!
//! Provides:
//! - Validated dependency graph construction from schema FK relationships
//! - Topological sorting for insertion order
//! - Dependency levels for concurrent processing of independent tables
//! - Cycle detection (cyclic schemas are rejected)

use super::{Schema, TableId, TableSchema};
use crate::error::{Result, SubsetError};
use std::collections::VecDeque;

/// Schema dependency graph built from foreign key relationships.
///
/// The graph represents parent → child relationships where:
/// - A parent is a table referenced by another table's FK
/// - A child is a table that has an FK referencing another table
///
/// A graph that exists has passed validation: every FK endpoint resolves
/// and the graph is acyclic.
#[derive(Debug)]
pub struct SchemaGraph {
    /// The underlying schema
    pub schema: Schema,
    /// For each table, list of parent tables (tables this table references via FK)
    pub parents: Vec<Vec<TableId>>,
    /// For each table, list of child tables (tables that reference this table via FK)
    pub children: Vec<Vec<TableId>>,
    /// Tables in topological order (parents before children)
    order: Vec<TableId>,
}

/// Result of topological sort
#[derive(Debug)]
pub struct TopoSortResult {
    /// Tables in topological order (parents before children)
    pub order: Vec<TableId>,
    /// Tables that are part of cycles (could not be ordered)
    pub cyclic_tables: Vec<TableId>,
}

impl SchemaGraph {
    /// Build and validate a dependency graph from a schema.
    ///
    /// Fails with [`SubsetError::Schema`] when a foreign key names an unknown
    /// table or column, and with [`SubsetError::CyclicSchema`] when the tables
    /// cannot be linearized. A self-referencing FK counts as a cycle.
    pub fn build(schema: Schema) -> Result<Self> {
        for table in schema.iter() {
            for fk in &table.foreign_keys {
                validate_foreign_key(&schema, table, fk)?;
            }
        }

        let n = schema.table_schemas.len();
        let mut parents: Vec<Vec<TableId>> = vec![Vec::new(); n];
        let mut children: Vec<Vec<TableId>> = vec![Vec::new(); n];

        for table in &schema.table_schemas {
            let child_id = table.id;

            for fk in &table.foreign_keys {
                if let Some(parent_id) = fk.referenced_table_id {
                    if !parents[child_id.0 as usize].contains(&parent_id) {
                        parents[child_id.0 as usize].push(parent_id);
                    }
                    if !children[parent_id.0 as usize].contains(&child_id) {
                        children[parent_id.0 as usize].push(child_id);
                    }
                }
            }
        }

        let mut graph = Self {
            schema,
            parents,
            children,
            order: Vec::new(),
        };

        let result = graph.topo_sort();
        if !result.cyclic_tables.is_empty() {
            let tables = result
                .cyclic_tables
                .iter()
                .filter_map(|&id| graph.table_name(id).map(str::to_string))
                .collect();
            return Err(SubsetError::CyclicSchema { tables });
        }
        graph.order = result.order;

        Ok(graph)
    }

    /// Get the number of tables in the graph
    pub fn len(&self) -> usize {
        self.schema.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// Get the table name for a table ID
    pub fn table_name(&self, id: TableId) -> Option<&str> {
        self.schema.table(id).map(|t| t.name.as_str())
    }

    /// Get the table schema for a table ID
    pub fn table(&self, id: TableId) -> Option<&TableSchema> {
        self.schema.table(id)
    }

    /// Perform topological sort using Kahn's algorithm.
    ///
    /// Returns tables in dependency order (parents before children).
    /// Tables that are part of cycles are returned separately.
    pub fn topo_sort(&self) -> TopoSortResult {
        let n = self.len();
        if n == 0 {
            return TopoSortResult {
                order: Vec::new(),
                cyclic_tables: Vec::new(),
            };
        }

        let mut in_degree: Vec<usize> = self.parents.iter().map(Vec::len).collect();

        let mut queue: VecDeque<TableId> = VecDeque::new();
        for (i, &deg) in in_degree.iter().enumerate() {
            if deg == 0 {
                queue.push_back(TableId(i as u32));
            }
        }

        let mut order = Vec::with_capacity(n);

        while let Some(table_id) = queue.pop_front() {
            order.push(table_id);

            for &child_id in &self.children[table_id.0 as usize] {
                in_degree[child_id.0 as usize] -= 1;
                if in_degree[child_id.0 as usize] == 0 {
                    queue.push_back(child_id);
                }
            }
        }

        let cyclic_tables: Vec<TableId> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg > 0)
            .map(|(i, _)| TableId(i as u32))
            .collect();

        TopoSortResult {
            order,
            cyclic_tables,
        }
    }

    /// Tables in insertion order (every parent before any child that references it)
    pub fn insertion_order(&self) -> &[TableId] {
        &self.order
    }

    /// Group tables by dependency depth.
    ///
    /// Level 0 holds tables with no parents; every other table sits one level
    /// below its deepest parent. Tables within a level share no FK edges.
    pub fn levels(&self) -> Vec<Vec<TableId>> {
        let mut depth = vec![0usize; self.len()];
        for &id in &self.order {
            depth[id.0 as usize] = self.parents[id.0 as usize]
                .iter()
                .map(|p| depth[p.0 as usize] + 1)
                .max()
                .unwrap_or(0);
        }

        let mut levels: Vec<Vec<TableId>> = Vec::new();
        for &id in &self.order {
            let d = depth[id.0 as usize];
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(id);
        }
        levels
    }
}

fn validate_foreign_key(
    schema: &Schema,
    table: &TableSchema,
    fk: &super::ForeignKey,
) -> Result<()> {
    let parent = fk
        .referenced_table_id
        .and_then(|id| schema.table(id))
        .ok_or_else(|| {
            SubsetError::Schema(format!(
                "foreign key {} references unknown table '{}'",
                fk.describe(&table.name),
                fk.referenced_table
            ))
        })?;

    if fk.column_names.len() != fk.referenced_columns.len() {
        return Err(SubsetError::Schema(format!(
            "foreign key {} has {} columns but references {}",
            fk.describe(&table.name),
            fk.column_names.len(),
            fk.referenced_columns.len()
        )));
    }

    if fk.columns.len() != fk.column_names.len() {
        return Err(SubsetError::Schema(format!(
            "foreign key {} names a column that does not exist in '{}'",
            fk.describe(&table.name),
            table.name
        )));
    }

    if let Some(missing) = fk
        .referenced_columns
        .iter()
        .find(|c| parent.get_column(c).is_none())
    {
        return Err(SubsetError::Schema(format!(
            "foreign key {} references unknown column '{}.{}'",
            fk.describe(&table.name),
            parent.name,
            missing
        )));
    }

    Ok(())
}
