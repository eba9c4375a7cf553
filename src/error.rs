//! Error types for subsetting runs.

use thiserror::Error;

/// Boxed error from the underlying store driver.
pub type StoreSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every way a subsetting run can fail.
///
/// All variants halt the run. None are retried: each one is either a
/// structural precondition violation or a data-integrity problem.
#[derive(Error, Debug)]
pub enum SubsetError {
    /// Malformed or undiscoverable schema
    #[error("Schema error: {0}")]
    Schema(String),

    /// The foreign-key graph cannot be linearized
    #[error("Foreign key cycle detected among tables: {}", .tables.join(", "))]
    CyclicSchema { tables: Vec<String> },

    /// The source violates its own declared foreign keys
    #[error(
        "Dangling reference: {table} row {row} has {columns} = {value} \
         but no matching row exists in {parent_table}"
    )]
    DanglingReference {
        table: String,
        row: String,
        columns: String,
        parent_table: String,
        value: String,
    },

    /// Destination insert failed (the write transaction was rolled back)
    #[error("Write failed for table {table}: {source}")]
    Write {
        table: String,
        #[source]
        source: StoreSource,
    },

    /// Sampling fraction outside (0, 1]
    #[error("Invalid fraction {fraction}{}: must be greater than 0 and at most 1", .table.as_ref().map(|t| format!(" for table {t}")).unwrap_or_default())]
    InvalidFraction { fraction: f64, table: Option<String> },

    /// Source read or introspection failure
    #[error("Store error ({context}): {source}")]
    Store {
        context: String,
        #[source]
        source: StoreSource,
    },

    /// Bad connection URL, config file, or option combination
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl SubsetError {
    /// Create a Store error with context about where it occurred
    pub fn store(context: impl Into<String>, source: impl Into<StoreSource>) -> Self {
        SubsetError::Store {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Create a Write error for a table
    pub fn write(table: impl Into<String>, source: impl Into<StoreSource>) -> Self {
        SubsetError::Write {
            table: table.into(),
            source: source.into(),
        }
    }

    /// Create an InvalidFraction error, optionally naming the table it applies to
    pub fn invalid_fraction(fraction: f64, table: Option<&str>) -> Self {
        SubsetError::InvalidFraction {
            fraction,
            table: table.map(str::to_string),
        }
    }
}

/// Result type alias for subsetting operations.
pub type Result<T> = std::result::Result<T, SubsetError>;
