//! YAML configuration for subsetting runs.
//!
//! Supports per-table sampling policy, foreign keys the source catalog does
//! not record, and forced rows.

use crate::error::Result;
use crate::schema::{declare_foreign_key, Schema};
use crate::store::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// How the sampler treats one table
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleMode {
    /// Keep `ceil(n * f)` rows (at least one for a non-empty table)
    Fraction(f64),
    /// Keep up to N rows
    Rows(usize),
    /// Sample nothing; only rows required by the closure are kept
    Exclude,
}

impl std::fmt::Display for SampleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleMode::Fraction(x) => write!(f, "fraction {}", x),
            SampleMode::Rows(n) => write!(f, "{} rows", n),
            SampleMode::Exclude => write!(f, "excluded"),
        }
    }
}

/// Per-table sampling configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Sample fraction for this table (overrides default)
    pub fraction: Option<f64>,
    /// Fixed row count for this table (overrides default)
    pub rows: Option<usize>,
    /// Do not sample this table
    pub exclude: bool,
    /// Extra foreign keys of this table, as
    /// `FOREIGN KEY (col, ...) REFERENCES parent(col, ...)` clauses
    pub foreign_keys: Vec<String>,
}

/// Default run settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultConfig {
    /// Default sample fraction
    pub fraction: Option<f64>,
    /// Random seed
    pub seed: Option<u64>,
    /// Rows per lookup and insert batch
    pub batch_size: Option<usize>,
    /// Concurrent read workers in the writer
    pub workers: Option<usize>,
}

/// A scalar key component as written in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&KeyValue> for Value {
    fn from(v: &KeyValue) -> Self {
        match v {
            KeyValue::Bool(b) => Value::Bool(*b),
            KeyValue::Int(i) => Value::Int(*i),
            KeyValue::Float(f) => Value::Float(*f),
            KeyValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

/// A row that must be carried over regardless of sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcedRow {
    pub table: String,
    /// Primary key values, in key column order
    pub key: Vec<KeyValue>,
}

/// Complete YAML configuration for a subsetting run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetYamlConfig {
    /// Default settings
    pub default: DefaultConfig,
    /// Per-table settings
    pub tables: HashMap<String, TableConfig>,
    /// Rows to seed the keep set with
    pub force: Vec<ForcedRow>,
}

impl SubsetYamlConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: SubsetYamlConfig = serde_yaml_ng::from_str(&content)?;
        Ok(config)
    }

    /// Get configuration for a specific table
    pub fn get_table_config(&self, table_name: &str) -> Option<&TableConfig> {
        self.tables.get(table_name).or_else(|| {
            let lower = table_name.to_lowercase();
            self.tables
                .iter()
                .find(|(k, _)| k.to_lowercase() == lower)
                .map(|(_, v)| v)
        })
    }

    /// Check if a table is excluded from sampling
    pub fn should_exclude(&self, table_name: &str) -> bool {
        self.get_table_config(table_name)
            .map(|c| c.exclude)
            .unwrap_or(false)
    }

    /// Resolve the sampling mode for a table, falling back to `default_fraction`
    pub fn mode_for(&self, table_name: &str, default_fraction: f64) -> SampleMode {
        if let Some(config) = self.get_table_config(table_name) {
            if config.exclude {
                return SampleMode::Exclude;
            }
            if let Some(rows) = config.rows {
                return SampleMode::Rows(rows);
            }
            if let Some(fraction) = config.fraction {
                return SampleMode::Fraction(fraction);
            }
        }
        SampleMode::Fraction(self.default.fraction.unwrap_or(default_fraction))
    }

    /// Add every declared foreign key to `schema`, table by table in name order
    pub fn apply_foreign_keys(&self, schema: &mut Schema) -> Result<()> {
        let mut tables: Vec<(&String, &TableConfig)> = self.tables.iter().collect();
        tables.sort_by(|a, b| a.0.cmp(b.0));
        for (table, config) in tables {
            for clause in &config.foreign_keys {
                declare_foreign_key(schema, table, clause)?;
            }
        }
        Ok(())
    }

    /// Every per-table fraction override, for validation
    pub fn table_fractions(&self) -> impl Iterator<Item = (&str, f64)> {
        self.tables
            .iter()
            .filter_map(|(name, c)| c.fraction.map(|f| (name.as_str(), f)))
    }
}
