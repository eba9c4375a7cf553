//! Shared fixtures for subsetting tests.

#![allow(dead_code)]

use db_subsetter::error::Result;
use db_subsetter::schema::{Schema, TableSchema};
use db_subsetter::store::{DuckDbStore, KeyTuple, Row, RowId, Store};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Four states, one city per state
pub const STATES_CITIES_DDL: &str = r#"
CREATE TABLE states (abbrev VARCHAR PRIMARY KEY, name VARCHAR NOT NULL);
CREATE TABLE cities (
    name VARCHAR PRIMARY KEY,
    state_abbrev VARCHAR NOT NULL REFERENCES states(abbrev)
);
"#;

pub const STATES_CITIES_DATA: &str = r#"
INSERT INTO states VALUES ('MN', 'Minnesota'), ('OH', 'Ohio'), ('MA', 'Massachusetts'), ('MI', 'Michigan');
INSERT INTO cities VALUES ('Duluth', 'MN'), ('Dayton', 'OH'), ('Boston', 'MA'), ('Houghton', 'MI');
"#;

/// States and cities plus a grandchild table, a table whose foreign keys are
/// all NULL, an empty table without a primary key, and a two-row table
pub const TRAVEL_DDL: &str = r#"
CREATE TABLE states (abbrev VARCHAR PRIMARY KEY, name VARCHAR NOT NULL);
CREATE TABLE cities (
    name VARCHAR PRIMARY KEY,
    state_abbrev VARCHAR NOT NULL,
    FOREIGN KEY (state_abbrev) REFERENCES states(abbrev)
);
CREATE TABLE landmarks (
    name VARCHAR PRIMARY KEY,
    city VARCHAR,
    FOREIGN KEY (city) REFERENCES cities(name)
);
CREATE TABLE zeppelins (
    name VARCHAR PRIMARY KEY,
    home_city VARCHAR,
    FOREIGN KEY (home_city) REFERENCES cities(name)
);
CREATE TABLE languages (name VARCHAR);
CREATE TABLE colors (id INTEGER PRIMARY KEY, name VARCHAR);
"#;

pub const TRAVEL_DATA: &str = r#"
INSERT INTO states VALUES ('MN', 'Minnesota'), ('OH', 'Ohio'), ('MA', 'Massachusetts'), ('MI', 'Michigan');
INSERT INTO cities VALUES ('Duluth', 'MN'), ('Dayton', 'OH'), ('Boston', 'MA'), ('Houghton', 'MI');
INSERT INTO landmarks VALUES
    ('Lift Bridge', 'Duluth'),
    ('Mendelson''s', 'Dayton'),
    ('Trinity Church', 'Boston'),
    ('Michigan Tech', 'Houghton');
INSERT INTO zeppelins VALUES ('Graf Zeppelin', NULL), ('USS Los Angeles', NULL);
INSERT INTO colors VALUES (1, 'red'), (2, 'blue');
"#;

/// Composite keys: shipments reference (warehouse, bin) pairs
pub const COMPOSITE_DDL: &str = r#"
CREATE TABLE warehouses (code VARCHAR PRIMARY KEY);
CREATE TABLE bins (
    warehouse VARCHAR NOT NULL REFERENCES warehouses(code),
    bin INTEGER NOT NULL,
    label VARCHAR,
    PRIMARY KEY (warehouse, bin)
);
CREATE TABLE shipments (
    id INTEGER PRIMARY KEY,
    warehouse VARCHAR,
    bin INTEGER,
    FOREIGN KEY (warehouse, bin) REFERENCES bins(warehouse, bin)
);
"#;

pub const COMPOSITE_DATA: &str = r#"
INSERT INTO warehouses VALUES ('OSL'), ('BGO');
INSERT INTO bins VALUES ('OSL', 1, 'a'), ('OSL', 2, 'b'), ('BGO', 1, 'c');
INSERT INTO shipments VALUES (1, 'OSL', 2), (2, 'BGO', 1), (3, 'OSL', NULL), (4, NULL, NULL);
"#;

/// States and cities again, with table and column names that need quoting
pub const SPACED_NAMES_DDL: &str = r#"
CREATE TABLE "my states" ("state code" VARCHAR PRIMARY KEY, "full name" VARCHAR);
CREATE TABLE "my cities" (
    "city name" VARCHAR PRIMARY KEY,
    "state code" VARCHAR REFERENCES "my states"("state code")
);
"#;

pub const SPACED_NAMES_DATA: &str = r#"
INSERT INTO "my states" VALUES ('MN', 'Minnesota'), ('OH', 'Ohio'), ('MA', 'Massachusetts'), ('MI', 'Michigan');
INSERT INTO "my cities" VALUES ('Duluth', 'MN'), ('Dayton', 'OH'), ('Boston', 'MA'), ('Houghton', 'MI');
"#;

/// In-memory store with the given SQL executed
pub fn memory_store(sql: &str) -> DuckDbStore {
    let store = DuckDbStore::open_in_memory().unwrap();
    store.execute_batch(sql).unwrap();
    store
}

/// Source with schema and data, destination with schema only
pub fn source_and_destination(ddl: &str, data: &str) -> (DuckDbStore, DuckDbStore) {
    let source = memory_store(ddl);
    source.execute_batch(data).unwrap();
    let destination = memory_store(ddl);
    (source, destination)
}

pub fn count(store: &DuckDbStore, table: &str) -> u64 {
    store.count_rows(table).unwrap()
}

pub fn query_strings(store: &DuckDbStore, sql: &str) -> Vec<String> {
    let mut stmt = store.connection().prepare(sql).unwrap();
    let rows = stmt.query_map([], |row| row.get::<_, String>(0)).unwrap();
    rows.map(|r| r.unwrap()).collect()
}

/// Every row of a table rendered as `a|b|NULL`, sorted
pub fn dump_table(store: &DuckDbStore, table: &str) -> Vec<String> {
    let schema = store.introspect().unwrap();
    let columns = schema.get_table(table).unwrap().column_names();
    let render = columns
        .iter()
        .map(|c| format!("COALESCE(CAST(\"{}\" AS VARCHAR), 'NULL')", c))
        .collect::<Vec<_>>()
        .join(" || '|' || ");
    query_strings(
        store,
        &format!("SELECT {} AS r FROM \"{}\" ORDER BY r", render, table),
    )
}

/// Number of rows, across all tables, whose non-NULL foreign key has no
/// matching parent row in the same database
pub fn dangling_references(store: &DuckDbStore) -> u64 {
    let schema = store.introspect().unwrap();
    let mut total = 0;
    for table in schema.iter() {
        for fk in &table.foreign_keys {
            let not_null = fk
                .column_names
                .iter()
                .map(|c| format!("c.\"{}\" IS NOT NULL", c))
                .collect::<Vec<_>>()
                .join(" AND ");
            let join = fk
                .column_names
                .iter()
                .zip(&fk.referenced_columns)
                .map(|(c, p)| format!("p.\"{}\" = c.\"{}\"", p, c))
                .collect::<Vec<_>>()
                .join(" AND ");
            let sql = format!(
                "SELECT COUNT(*) FROM \"{}\" c WHERE {} AND NOT EXISTS \
                 (SELECT 1 FROM \"{}\" p WHERE {})",
                table.name, not_null, fk.referenced_table, join
            );
            let n: i64 = store
                .connection()
                .query_row(&sql, [], |row| row.get(0))
                .unwrap();
            total += n as u64;
        }
    }
    total
}

/// Store wrapper that counts parent lookups
pub struct CountingStore {
    pub inner: DuckDbStore,
    pub lookups: Arc<AtomicUsize>,
    pub keys_looked_up: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new(inner: DuckDbStore) -> Self {
        Self {
            inner,
            lookups: Arc::new(AtomicUsize::new(0)),
            keys_looked_up: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn keys_looked_up(&self) -> usize {
        self.keys_looked_up.load(Ordering::SeqCst)
    }
}

impl Store for CountingStore {
    fn describe(&self) -> String {
        format!("counting {}", self.inner.describe())
    }

    fn introspect(&self) -> Result<Schema> {
        self.inner.introspect()
    }

    fn row_ids(&self, table: &TableSchema) -> Result<Vec<RowId>> {
        self.inner.row_ids(table)
    }

    fn fetch_rows(
        &self,
        table: &TableSchema,
        columns: &[String],
        ids: &[RowId],
    ) -> Result<Vec<(RowId, Row)>> {
        self.inner.fetch_rows(table, columns, ids)
    }

    fn find_parents(
        &self,
        table: &TableSchema,
        columns: &[String],
        keys: &[KeyTuple],
    ) -> Result<Vec<(KeyTuple, RowId)>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.keys_looked_up.fetch_add(keys.len(), Ordering::SeqCst);
        self.inner.find_parents(table, columns, keys)
    }

    fn insert_rows(&self, table: &TableSchema, columns: &[String], rows: &[Row]) -> Result<()> {
        self.inner.insert_rows(table, columns, rows)
    }

    fn begin(&self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }

    fn try_clone(&self) -> Result<Box<dyn Store>> {
        self.inner.try_clone()
    }
}
