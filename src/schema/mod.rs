//! Schema model for FK-aware subsetting.
//!
//! This module provides:
//! - Data models for table schemas, columns, and foreign keys
//! - Parsing of foreign key clauses declared outside the catalog
//! - Dependency graph construction with topological sorting
//! - Cycle detection (cyclic schemas are rejected)

mod ddl;
mod graph;

pub use ddl::*;
pub use graph::*;

use ahash::AHashMap;
use std::fmt;

/// Unique identifier for a table within a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

/// Unique identifier for a column within a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId(pub u16);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnId({})", self.0)
    }
}

/// Column definition within a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type as reported by the store (e.g. "VARCHAR", "INTEGER")
    pub data_type: String,
    /// Position in table (0-indexed)
    pub ordinal: ColumnId,
    /// Whether this column is part of the primary key
    pub is_primary_key: bool,
    /// Whether this column allows NULL values
    pub is_nullable: bool,
}

/// Foreign key constraint definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name (optional)
    pub name: Option<String>,
    /// Column IDs in this table that form the FK
    pub columns: Vec<ColumnId>,
    /// Column names in this table (before resolution)
    pub column_names: Vec<String>,
    /// Referenced table name
    pub referenced_table: String,
    /// Referenced column names
    pub referenced_columns: Vec<String>,
    /// Resolved referenced table ID (set after schema is complete)
    pub referenced_table_id: Option<TableId>,
}

impl ForeignKey {
    /// Human-readable `table(cols) -> parent(cols)` description
    pub fn describe(&self, owner: &str) -> String {
        format!(
            "{}({}) -> {}({})",
            owner,
            self.column_names.join(", "),
            self.referenced_table,
            self.referenced_columns.join(", ")
        )
    }
}

/// Complete table schema definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Table ID within the schema
    pub id: TableId,
    /// Column definitions in order
    pub columns: Vec<Column>,
    /// Primary key column IDs (ordered for composite PKs)
    pub primary_key: Vec<ColumnId>,
    /// Foreign key constraints
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Create a new empty table schema
    pub fn new(name: String, id: TableId) -> Self {
        Self {
            name,
            id,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get column ID by name
    pub fn get_column_id(&self, name: &str) -> Option<ColumnId> {
        self.get_column(name).map(|c| c.ordinal)
    }

    /// Get column by ID
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.get(id.0 as usize)
    }

    /// Check if column is part of the primary key
    pub fn is_pk_column(&self, col_id: ColumnId) -> bool {
        self.primary_key.contains(&col_id)
    }

    /// Names of all columns, in ordinal order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Names of the primary key columns, in key order
    pub fn primary_key_names(&self) -> Vec<String> {
        self.primary_key
            .iter()
            .filter_map(|id| self.column(*id))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Whether rows of this table are identified by a declared primary key
    /// (as opposed to the store's physical row position)
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Mark the named columns, in key order, as the primary key.
    /// Names that match no column are ignored.
    pub fn set_primary_key(&mut self, names: &[String]) {
        self.primary_key = names
            .iter()
            .filter_map(|n| self.get_column_id(n))
            .collect();
        for column in &mut self.columns {
            column.is_primary_key = self.primary_key.contains(&column.ordinal);
        }
    }

    /// Replace the column list, keeping PK flags by name and re-resolving
    /// primary key and foreign key column IDs.
    pub fn set_columns(&mut self, columns: Vec<(String, String, bool)>) {
        let pk_names = self.primary_key_names();

        self.columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, (name, data_type, is_nullable))| Column {
                is_primary_key: pk_names.iter().any(|p| p.eq_ignore_ascii_case(&name)),
                name,
                data_type,
                ordinal: ColumnId(i as u16),
                is_nullable,
            })
            .collect();

        self.primary_key = pk_names
            .iter()
            .filter_map(|n| self.get_column_id(n))
            .collect();

        let resolved: Vec<Vec<ColumnId>> = self
            .foreign_keys
            .iter()
            .map(|fk| {
                fk.column_names
                    .iter()
                    .filter_map(|n| self.get_column_id(n))
                    .collect()
            })
            .collect();
        for (fk, cols) in self.foreign_keys.iter_mut().zip(resolved) {
            fk.columns = cols;
        }
    }
}

/// Complete database schema
#[derive(Debug, Clone)]
pub struct Schema {
    /// Map from table name to table ID
    pub tables: AHashMap<String, TableId>,
    /// Table schemas indexed by TableId
    pub table_schemas: Vec<TableSchema>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.table_schemas == other.table_schemas
    }
}

impl Eq for Schema {}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self {
            tables: AHashMap::new(),
            table_schemas: Vec::new(),
        }
    }

    /// Get table ID by name (case-insensitive)
    pub fn get_table_id(&self, name: &str) -> Option<TableId> {
        if let Some(&id) = self.tables.get(name) {
            return Some(id);
        }
        let name_lower = name.to_lowercase();
        self.tables
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, &id)| id)
    }

    /// Get table schema by ID
    pub fn table(&self, id: TableId) -> Option<&TableSchema> {
        self.table_schemas.get(id.0 as usize)
    }

    /// Get mutable table schema by ID
    pub fn table_mut(&mut self, id: TableId) -> Option<&mut TableSchema> {
        self.table_schemas.get_mut(id.0 as usize)
    }

    /// Get table schema by name
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.get_table_id(name).and_then(|id| self.table(id))
    }

    /// Add a new table schema, returning its ID
    pub fn add_table(&mut self, mut schema: TableSchema) -> TableId {
        let id = TableId(self.table_schemas.len() as u32);
        schema.id = id;
        self.tables.insert(schema.name.clone(), id);
        self.table_schemas.push(schema);
        id
    }

    /// Resolve all foreign key references to table IDs.
    ///
    /// References to unknown tables stay `None`; graph construction reports them.
    pub fn resolve_foreign_keys(&mut self) {
        let table_ids: AHashMap<String, TableId> = self.tables.clone();

        for table in &mut self.table_schemas {
            for fk in &mut table.foreign_keys {
                fk.referenced_table_id = table_ids
                    .get(&fk.referenced_table)
                    .or_else(|| {
                        let lower = fk.referenced_table.to_lowercase();
                        table_ids
                            .iter()
                            .find(|(k, _)| k.to_lowercase() == lower)
                            .map(|(_, v)| v)
                    })
                    .copied();
            }
        }
    }

    /// Get the number of tables
    pub fn len(&self) -> usize {
        self.table_schemas.len()
    }

    /// Check if schema is empty
    pub fn is_empty(&self) -> bool {
        self.table_schemas.is_empty()
    }

    /// Iterate over all table schemas
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.table_schemas.iter()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}
