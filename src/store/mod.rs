//! Relational store abstraction.
//!
//! The subsetting engine talks to source and destination databases only
//! through the [`Store`] capability set: introspect the schema, read rows by
//! identity or by key, insert rows, and bracket writes in a transaction.
//!
//! [`DuckDbStore`] is the bundled implementation.

mod duckdb;
mod value;

pub use self::duckdb::DuckDbStore;
pub use value::{format_tuple, Value};

use crate::error::{Result, SubsetError};
use crate::schema::{Schema, TableSchema};
use smallvec::SmallVec;
use std::path::PathBuf;

/// Identity of a row within one table for the duration of a run: the primary
/// key tuple if the table declares one, otherwise the store's row position.
pub type RowId = SmallVec<[Value; 2]>;

/// A tuple of column values used to match a foreign key to its parent row
pub type KeyTuple = SmallVec<[Value; 2]>;

/// Full or partial column data of a single row
pub type Row = Vec<Value>;

/// Capability set the engine needs from a relational store.
///
/// Implementations must be usable from a worker thread; concurrent workers
/// each get their own handle via [`Store::try_clone`].
pub trait Store: Send {
    /// Short description for log messages (e.g. the database path)
    fn describe(&self) -> String;

    /// Enumerate tables (ordered by name), their columns (ordered by position),
    /// primary keys and foreign keys exactly as declared.
    fn introspect(&self) -> Result<Schema>;

    /// Every row identity of a table, in ascending identity order.
    fn row_ids(&self, table: &TableSchema) -> Result<Vec<RowId>>;

    /// Read `columns` for each of `ids`. Identities that no longer exist are
    /// simply absent from the result.
    fn fetch_rows(
        &self,
        table: &TableSchema,
        columns: &[String],
        ids: &[RowId],
    ) -> Result<Vec<(RowId, Row)>>;

    /// Find the identities of rows whose `columns` equal one of `keys`,
    /// returning each match paired with the key it matched.
    fn find_parents(
        &self,
        table: &TableSchema,
        columns: &[String],
        keys: &[KeyTuple],
    ) -> Result<Vec<(KeyTuple, RowId)>>;

    /// Insert rows (values in `columns` order).
    fn insert_rows(&self, table: &TableSchema, columns: &[String], rows: &[Row]) -> Result<()>;

    /// Start the logical transaction that brackets a write.
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Open an independent handle (own cursor) onto the same database.
    fn try_clone(&self) -> Result<Box<dyn Store>>;
}

/// Where a store lives, parsed from a connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    DuckDbFile(PathBuf),
    DuckDbMemory,
}

impl std::str::FromStr for StoreLocation {
    type Err = SubsetError;

    /// Accepts `duckdb:///abs/path.db`, `duckdb://rel/path.db`,
    /// `duckdb://:memory:`, or a bare file path.
    fn from_str(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SubsetError::Config("empty connection URL".to_string()));
        }

        let rest = match url.split_once("://") {
            Some(("duckdb", rest)) => rest,
            Some((scheme, _)) => {
                return Err(SubsetError::Config(format!(
                    "unsupported store scheme '{}' (expected duckdb://)",
                    scheme
                )))
            }
            None => url,
        };

        match rest {
            ":memory:" | "" => Ok(StoreLocation::DuckDbMemory),
            path => Ok(StoreLocation::DuckDbFile(PathBuf::from(path))),
        }
    }
}

/// Open a store from a connection URL
pub fn open_store(url: &str) -> Result<Box<dyn Store>> {
    let location: StoreLocation = url.parse()?;
    let store = match location {
        StoreLocation::DuckDbFile(path) => DuckDbStore::open(&path)?,
        StoreLocation::DuckDbMemory => DuckDbStore::open_in_memory()?,
    };
    Ok(Box::new(store))
}
