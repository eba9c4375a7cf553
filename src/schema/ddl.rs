//! Parsing of foreign key clauses declared outside the source catalog.
//!
//! Keys normally come from the store's catalog. Relationships the catalog
//! does not record (DuckDB cannot add a foreign key to an existing table, and
//! many legacy schemas never declared theirs) can be declared per table as
//! SQL clauses:
//! - `FOREIGN KEY (customer_id) REFERENCES customers(id)`
//! - `CONSTRAINT fk_bin FOREIGN KEY (warehouse, bin) REFERENCES "storage bins"(warehouse, bin)`

use super::{ForeignKey, Schema};
use crate::error::{Result, SubsetError};
use once_cell::sync::Lazy;
use regex::Regex;

/// Regex for a FOREIGN KEY clause with optional constraint name and schema-qualified parent.
/// Identifiers are bare words or double-quoted (with `""` escapes).
static FOREIGN_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^\s*(?:CONSTRAINT\s+(?:"((?:[^"]|"")+)"|(\w+))\s+)?FOREIGN\s+KEY\s*\(([^)]+)\)\s*REFERENCES\s+(?:(?:"(?:[^"]|"")+"|\w+)\s*\.\s*)*(?:"((?:[^"]|"")+)"|(\w+))\s*\(([^)]+)\)\s*;?\s*$"#,
    )
    .unwrap()
});

/// Parse one `FOREIGN KEY (...) REFERENCES parent(...)` clause.
///
/// Column IDs and the parent table ID are left unresolved.
pub fn parse_foreign_key(clause: &str) -> Option<ForeignKey> {
    let caps = FOREIGN_KEY_RE.captures(clause)?;
    let name = caps
        .get(1)
        .map(|m| unescape(m.as_str()))
        .or_else(|| caps.get(2).map(|m| m.as_str().to_string()));
    let column_names = parse_column_list(caps.get(3)?.as_str());
    let referenced_table = caps
        .get(4)
        .map(|m| unescape(m.as_str()))
        .or_else(|| caps.get(5).map(|m| m.as_str().to_string()))?;
    let referenced_columns = parse_column_list(caps.get(6)?.as_str());

    if column_names.is_empty() || referenced_columns.is_empty() {
        return None;
    }

    Some(ForeignKey {
        name,
        columns: Vec::new(),
        column_names,
        referenced_table,
        referenced_columns,
        referenced_table_id: None,
    })
}

/// Add a declared foreign key to `table`.
///
/// The clause must parse and its local columns must exist; a parent table or
/// column that does not exist is left for graph construction to report. A
/// key the schema already has is not added twice.
pub fn declare_foreign_key(schema: &mut Schema, table: &str, clause: &str) -> Result<()> {
    let mut fk = parse_foreign_key(clause).ok_or_else(|| {
        SubsetError::Config(format!(
            "cannot parse foreign key '{}' declared on table '{}'",
            clause.trim(),
            table
        ))
    })?;
    fk.referenced_table_id = schema.get_table_id(&fk.referenced_table);

    let target = schema
        .get_table_id(table)
        .and_then(|id| schema.table_mut(id))
        .ok_or_else(|| {
            SubsetError::Config(format!("foreign key declared on unknown table '{}'", table))
        })?;

    if let Some(missing) = fk
        .column_names
        .iter()
        .find(|c| target.get_column(c).is_none())
    {
        return Err(SubsetError::Config(format!(
            "foreign key {} names unknown column '{}'",
            fk.describe(&target.name),
            missing
        )));
    }
    fk.columns = fk
        .column_names
        .iter()
        .filter_map(|c| target.get_column_id(c))
        .collect();

    let duplicate = target.foreign_keys.iter().any(|existing| {
        existing.columns == fk.columns
            && existing.referenced_table.eq_ignore_ascii_case(&fk.referenced_table)
    });
    if !duplicate {
        target.foreign_keys.push(fk);
    }
    Ok(())
}

/// Parse a comma-separated column list, stripping quotes (double quotes, backticks, brackets)
pub fn parse_column_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|c| {
            let c = c.trim();
            if c.len() >= 2 && c.starts_with('"') && c.ends_with('"') {
                unescape(&c[1..c.len() - 1])
            } else {
                c.trim_matches('`')
                    .trim_matches('[')
                    .trim_matches(']')
                    .to_string()
            }
        })
        .filter(|c| !c.is_empty())
        .collect()
}

fn unescape(quoted: &str) -> String {
    quoted.replace("\"\"", "\"")
}
