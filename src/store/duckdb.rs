//! DuckDB-backed [`Store`].
//!
//! Works against a database file or an in-memory database. Tables, columns
//! and keys come from the `duckdb_tables()`, `duckdb_columns()` and
//! `duckdb_constraints()` catalog functions. Tables without a primary key are
//! identified by DuckDB's `rowid`.
//!
//! Scalar columns are read natively. Columns of any other type (ENUM,
//! INTERVAL, LIST, STRUCT, MAP, UUID, UHUGEINT, TIMESTAMP WITH TIME ZONE, ...)
//! are read and compared through their VARCHAR cast, which DuckDB parses back
//! into the column type on insert.

use super::{KeyTuple, Row, RowId, Store, Value};
use crate::error::{Result, SubsetError};
use crate::schema::{ForeignKey, Schema, TableId, TableSchema};
use ::duckdb::types::{TimeUnit, ToSql, ToSqlOutput, Value as DuckValue, ValueRef};
use ::duckdb::{params_from_iter, Connection};
use smallvec::SmallVec;
use std::path::Path;
use tracing::debug;

/// Maximum identities or keys bound into one lookup statement
const LOOKUP_CHUNK: usize = 500;

/// Maximum rows per INSERT statement
const INSERT_CHUNK: usize = 500;

/// Pseudo-column used as row identity for tables without a primary key
const ROWID: &str = "rowid";

/// A DuckDB database opened as a subsetting source or destination
pub struct DuckDbStore {
    conn: Connection,
    label: String,
}

impl DuckDbStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            SubsetError::store(format!("opening DuckDB database {}", path.display()), e)
        })?;
        Ok(Self {
            conn,
            label: path.display().to_string(),
        })
    }

    /// Open a fresh in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SubsetError::store("opening in-memory DuckDB database", e))?;
        Ok(Self {
            conn,
            label: ":memory:".to_string(),
        })
    }

    /// Get the underlying DuckDB connection (for fixtures and advanced use)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute one or more SQL statements that return no rows
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .store_context(|| format!("executing batch on {}", self.label))
    }

    /// Count the rows of a table
    pub fn count_rows(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .store_context(|| format!("counting rows of {}", table))?;
        Ok(count as u64)
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let sql = "SELECT table_name FROM duckdb_tables() \
                   WHERE database_name = current_database() \
                     AND schema_name = current_schema() \
                     AND NOT internal AND NOT temporary \
                   ORDER BY table_name";
        let mut stmt = self
            .conn
            .prepare(sql)
            .store_context(|| "listing tables".to_string())?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .store_context(|| "listing tables".to_string())?;

        let mut tables = Vec::new();
        for row in rows {
            tables.push(row.store_context(|| "listing tables".to_string())?);
        }
        Ok(tables)
    }

    fn list_columns(&self, table: &str) -> Result<Vec<(String, String, bool)>> {
        let sql = "SELECT column_name, data_type, is_nullable FROM duckdb_columns() \
                   WHERE database_name = current_database() \
                     AND schema_name = current_schema() \
                     AND table_name = ? \
                   ORDER BY column_index";
        let mut stmt = self
            .conn
            .prepare(sql)
            .store_context(|| format!("listing columns of {}", table))?;
        let rows = stmt
            .query_map(::duckdb::params![table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })
            .store_context(|| format!("listing columns of {}", table))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row.store_context(|| format!("listing columns of {}", table))?);
        }
        Ok(columns)
    }

    /// Primary and foreign keys of every table, one entry per constraint with
    /// its columns in key order.
    fn list_key_constraints(&self) -> Result<Vec<KeyConstraint>> {
        let sql = "SELECT table_name, constraint_index, constraint_type, referenced_table, \
                          constraint_column_names[k], referenced_column_names[k] \
                   FROM ( \
                       SELECT *, generate_subscripts(constraint_column_names, 1) AS k \
                       FROM duckdb_constraints() \
                       WHERE database_name = current_database() \
                         AND schema_name = current_schema() \
                         AND constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY') \
                   ) \
                   ORDER BY table_name, constraint_index, k";
        let context = || "listing key constraints".to_string();
        let mut stmt = self.conn.prepare(sql).store_context(context)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .store_context(context)?;

        let mut constraints: Vec<KeyConstraint> = Vec::new();
        for row in rows {
            let (table, index, kind, referenced_table, column, referenced_column) =
                row.store_context(context)?;
            let same = constraints
                .last()
                .is_some_and(|c| c.table == table && c.index == index);
            if !same {
                constraints.push(KeyConstraint {
                    table,
                    index,
                    foreign: kind == "FOREIGN KEY",
                    referenced_table,
                    columns: Vec::new(),
                    referenced_columns: Vec::new(),
                });
            }
            if let Some(current) = constraints.last_mut() {
                current.columns.push(column);
                current.referenced_columns.extend(referenced_column);
            }
        }
        Ok(constraints)
    }

    /// Run a query whose result rows are `prefix_len` values followed by the rest,
    /// splitting each row into (prefix, rest).
    fn query_split(
        &self,
        sql: &str,
        params: &[&Value],
        prefix_len: usize,
        total_len: usize,
        context: &str,
    ) -> Result<Vec<(SmallVec<[Value; 2]>, Row)>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .store_context(|| format!("{}: preparing {}", context, sql))?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .store_context(|| format!("{}: executing {}", context, sql))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().store_context(|| context.to_string())? {
            let mut prefix = SmallVec::with_capacity(prefix_len);
            let mut rest = Vec::with_capacity(total_len - prefix_len);
            for i in 0..total_len {
                let value_ref = row.get_ref(i).store_context(|| context.to_string())?;
                let value = from_value_ref(value_ref).map_err(|msg| {
                    SubsetError::store(context.to_string(), msg)
                })?;
                if i < prefix_len {
                    prefix.push(value);
                } else {
                    rest.push(value);
                }
            }
            out.push((prefix, rest));
        }
        Ok(out)
    }
}

impl Store for DuckDbStore {
    fn describe(&self) -> String {
        format!("duckdb://{}", self.label)
    }

    fn introspect(&self) -> Result<Schema> {
        let mut schema = Schema::new();
        for name in self.list_tables()? {
            let mut table = TableSchema::new(name.clone(), TableId(0));
            table.set_columns(self.list_columns(&name)?);
            schema.add_table(table);
            debug!(table = %name, "introspected table");
        }

        for constraint in self.list_key_constraints()? {
            let table = schema
                .get_table_id(&constraint.table)
                .and_then(|id| schema.table_mut(id))
                .ok_or_else(|| {
                    SubsetError::Schema(format!(
                        "key constraint on unknown table '{}'",
                        constraint.table
                    ))
                })?;

            if !constraint.foreign {
                table.set_primary_key(&constraint.columns);
                continue;
            }
            let referenced_table = constraint.referenced_table.ok_or_else(|| {
                SubsetError::Schema(format!(
                    "foreign key on '{}' has no referenced table",
                    table.name
                ))
            })?;
            table.foreign_keys.push(ForeignKey {
                name: None,
                columns: constraint
                    .columns
                    .iter()
                    .filter_map(|c| table.get_column_id(c))
                    .collect(),
                column_names: constraint.columns,
                referenced_table,
                referenced_columns: constraint.referenced_columns,
                referenced_table_id: None,
            });
        }

        schema.resolve_foreign_keys();
        Ok(schema)
    }

    fn row_ids(&self, table: &TableSchema) -> Result<Vec<RowId>> {
        let id_exprs = column_exprs(table, &identity_columns(table));
        let id_list = id_exprs.join(", ");
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            id_list,
            quote_ident(&table.name),
            id_list
        );
        let width = id_exprs.len();
        let context = format!("reading row identities of {}", table.name);
        let rows = self.query_split(&sql, &[], width, width, &context)?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    fn fetch_rows(
        &self,
        table: &TableSchema,
        columns: &[String],
        ids: &[RowId],
    ) -> Result<Vec<(RowId, Row)>> {
        let id_exprs = column_exprs(table, &identity_columns(table));
        let select = id_exprs
            .iter()
            .cloned()
            .chain(column_exprs(table, columns))
            .collect::<Vec<_>>()
            .join(", ");
        let context = format!("reading rows of {}", table.name);

        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                select,
                quote_ident(&table.name),
                tuple_predicate(&id_exprs, chunk.len())
            );
            let params: Vec<&Value> = chunk.iter().flat_map(|id| id.iter()).collect();
            out.extend(self.query_split(
                &sql,
                &params,
                id_exprs.len(),
                id_exprs.len() + columns.len(),
                &context,
            )?);
        }
        Ok(out)
    }

    fn find_parents(
        &self,
        table: &TableSchema,
        columns: &[String],
        keys: &[KeyTuple],
    ) -> Result<Vec<(KeyTuple, RowId)>> {
        let key_exprs = column_exprs(table, columns);
        let id_exprs = column_exprs(table, &identity_columns(table));
        let select = key_exprs
            .iter()
            .chain(&id_exprs)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let context = format!("looking up parent rows in {}", table.name);

        let mut out = Vec::new();
        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                select,
                quote_ident(&table.name),
                tuple_predicate(&key_exprs, chunk.len())
            );
            let params: Vec<&Value> = chunk.iter().flat_map(|k| k.iter()).collect();
            let rows = self.query_split(
                &sql,
                &params,
                columns.len(),
                columns.len() + id_exprs.len(),
                &context,
            )?;
            out.extend(
                rows.into_iter()
                    .map(|(key, id)| (key, id.into_iter().collect::<RowId>())),
            );
        }
        Ok(out)
    }

    fn insert_rows(&self, table: &TableSchema, columns: &[String], rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));

        for chunk in rows.chunks(INSERT_CHUNK) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(&table.name),
                quote_list(columns),
                vec![placeholders.as_str(); chunk.len()].join(", ")
            );
            let params: Vec<&Value> = chunk.iter().flat_map(|r| r.iter()).collect();
            self.conn
                .execute(&sql, params_from_iter(params.iter()))
                .store_context(|| format!("inserting {} rows into {}", chunk.len(), table.name))?;
            debug!(table = %table.name, rows = chunk.len(), "inserted batch");
        }
        Ok(())
    }

    fn begin(&self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .store_context(|| format!("beginning transaction on {}", self.label))
    }

    fn commit(&self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .store_context(|| format!("committing transaction on {}", self.label))
    }

    fn rollback(&self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .store_context(|| format!("rolling back transaction on {}", self.label))
    }

    fn try_clone(&self) -> Result<Box<dyn Store>> {
        let conn = self
            .conn
            .try_clone()
            .store_context(|| format!("cloning connection to {}", self.label))?;
        Ok(Box::new(DuckDbStore {
            conn,
            label: self.label.clone(),
        }))
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> ::duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(DuckValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(DuckValue::Boolean(*b)),
            Value::Int(i) => ToSqlOutput::Owned(DuckValue::BigInt(*i)),
            Value::UInt(u) => ToSqlOutput::Owned(DuckValue::UBigInt(*u)),
            Value::Float(f) => ToSqlOutput::Owned(DuckValue::Double(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Attach store context to DuckDB results, like `anyhow::Context`
trait StoreContext<T> {
    fn store_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> StoreContext<T> for ::duckdb::Result<T> {
    fn store_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SubsetError::store(f(), e))
    }
}

/// Columns that identify a row: the primary key, or `rowid`
fn identity_columns(table: &TableSchema) -> Vec<String> {
    if table.has_primary_key() {
        table.primary_key_names()
    } else {
        vec![ROWID.to_string()]
    }
}

/// Quote an identifier for DuckDB, doubling embedded quotes
fn quote_ident(name: &str) -> String {
    if name == ROWID {
        return name.to_string();
    }
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// One PRIMARY KEY or FOREIGN KEY constraint as listed by the catalog
struct KeyConstraint {
    table: String,
    index: i64,
    foreign: bool,
    referenced_table: Option<String>,
    columns: Vec<String>,
    referenced_columns: Vec<String>,
}

/// How a column's values cross the store boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    /// Read as the matching [`Value`] variant
    Native,
    /// Read and compared as `CAST(column AS VARCHAR)`
    Text,
}

/// Classify a DuckDB column type as reported by `duckdb_columns()`
fn transport(data_type: &str) -> Transport {
    let upper = data_type.trim().to_ascii_uppercase();
    if upper.ends_with(']') {
        return Transport::Text;
    }
    match upper.split('(').next().unwrap_or_default().trim() {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "INTEGER" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" | "FLOAT" | "DOUBLE" | "DECIMAL" | "VARCHAR"
        | "BLOB" | "DATE" | "TIME" | "TIMESTAMP" => Transport::Native,
        _ => Transport::Text,
    }
}

/// Select and comparison expression for each named column of `table`
fn column_exprs(table: &TableSchema, names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| {
            let quoted = quote_ident(name);
            match table.get_column(name) {
                Some(c) if transport(&c.data_type) == Transport::Text => {
                    format!("CAST({} AS VARCHAR)", quoted)
                }
                _ => quoted,
            }
        })
        .collect()
}

/// WHERE predicate matching `count` tuples over the column expressions
/// `exprs`, with `?` placeholders in tuple-major order.
fn tuple_predicate(exprs: &[String], count: usize) -> String {
    if exprs.len() == 1 {
        return format!("{} IN ({})", exprs[0], vec!["?"; count].join(", "));
    }
    let one = format!(
        "({})",
        exprs
            .iter()
            .map(|e| format!("{} = ?", e))
            .collect::<Vec<_>>()
            .join(" AND ")
    );
    vec![one.as_str(); count].join(" OR ")
}

/// Convert a DuckDB value into a store-agnostic [`Value`].
///
/// Temporal and decimal values become their canonical text form, which
/// DuckDB casts back on insert. `TIMESTAMP` values carry no zone and render as
/// wall-clock text; zoned timestamps never reach here (see [`transport`]).
fn from_value_ref(value: ValueRef<'_>) -> std::result::Result<Value, String> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(n) => Value::Int(n as i64),
        ValueRef::SmallInt(n) => Value::Int(n as i64),
        ValueRef::Int(n) => Value::Int(n as i64),
        ValueRef::BigInt(n) => Value::Int(n),
        ValueRef::HugeInt(n) => match i64::try_from(n) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Text(n.to_string()),
        },
        ValueRef::UTinyInt(n) => Value::Int(n as i64),
        ValueRef::USmallInt(n) => Value::Int(n as i64),
        ValueRef::UInt(n) => Value::Int(n as i64),
        // Integers share one representation so keys compare equal across column widths
        ValueRef::UBigInt(n) => match i64::try_from(n) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::UInt(n),
        },
        ValueRef::Float(f) => Value::Float(f as f64),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => Value::Text(d.to_string()),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        ValueRef::Timestamp(unit, ts) => {
            let micros = to_micros(unit, ts);
            let secs = micros.div_euclid(1_000_000);
            let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;
            match chrono::DateTime::from_timestamp(secs, nanos) {
                Some(dt) => Value::Text(dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()),
                None => return Err(format!("timestamp out of range: {}", ts)),
            }
        }
        ValueRef::Date32(days) => {
            // 719163 = days from 0001-01-01 to 1970-01-01
            match chrono::NaiveDate::from_num_days_from_ce_opt(719163 + days) {
                Some(date) => Value::Text(date.format("%Y-%m-%d").to_string()),
                None => return Err(format!("date out of range: {}", days)),
            }
        }
        ValueRef::Time64(unit, t) => {
            let micros = to_micros(unit, t);
            let secs = (micros / 1_000_000) as u32;
            let nanos = ((micros % 1_000_000) * 1000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos) {
                Some(time) => Value::Text(time.format("%H:%M:%S%.f").to_string()),
                None => return Err(format!("time out of range: {}", t)),
            }
        }
        other => return Err(format!("unsupported native column value: {:?}", other)),
    })
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value * 1_000_000,
        TimeUnit::Millisecond => value * 1_000,
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}
