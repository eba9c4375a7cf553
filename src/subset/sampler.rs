//! Per-table row sampling.
//!
//! Each table is sampled on its own, with no knowledge of foreign keys.
//! The identity list is fully shuffled with a table-specific RNG and then
//! truncated, so for a fixed seed a larger keep count always yields a
//! superset of a smaller one.

use super::config::SampleMode;
use crate::error::{Result, SubsetError};
use crate::schema::TableSchema;
use crate::store::{RowId, Store};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Tolerance applied before rounding `n * f` up, so that products like
/// `100 * 0.07 = 7.000000000000001` keep 7 rows and not 8
const ROUNDING_TOLERANCE: f64 = 1e-9;

/// Outcome of sampling one table
#[derive(Debug)]
pub struct TableSample {
    /// Rows in the source table
    pub rows_seen: usize,
    /// Identities chosen by the sampler
    pub ids: Vec<RowId>,
}

/// Check that a fraction lies in (0, 1]
pub fn validate_fraction(fraction: f64, table: Option<&str>) -> Result<()> {
    if fraction.is_finite() && fraction > 0.0 && fraction <= 1.0 {
        Ok(())
    } else {
        Err(SubsetError::invalid_fraction(fraction, table))
    }
}

/// Number of rows to keep from a table of `n` rows at `fraction`.
///
/// `ceil(n * f)`, never less than one row for a non-empty table and never
/// more than `n`.
pub fn rows_to_keep(n: usize, fraction: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let k = (n as f64 * fraction - ROUNDING_TOLERANCE).ceil();
    (k.max(1.0) as usize).min(n)
}

/// Keep count for a table of `n` rows under `mode`
pub fn keep_count(n: usize, mode: SampleMode) -> usize {
    match mode {
        SampleMode::Fraction(f) => rows_to_keep(n, f),
        SampleMode::Rows(rows) => rows.min(n),
        SampleMode::Exclude => 0,
    }
}

/// RNG for one table, derived from the run seed and the table name
pub fn table_rng(seed: u64, table: &str) -> StdRng {
    // FNV-1a over the lowercased name keeps the stream stable across runs
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in table.to_lowercase().bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    StdRng::seed_from_u64(seed ^ hash)
}

/// Choose `k` items uniformly at random without replacement.
///
/// The input order must be stable for results to be reproducible.
pub fn choose<T>(mut items: Vec<T>, k: usize, rng: &mut StdRng) -> Vec<T> {
    items.shuffle(rng);
    items.truncate(k);
    items
}

/// Sample one table from the source
pub fn sample_table(
    source: &dyn Store,
    table: &TableSchema,
    mode: SampleMode,
    seed: u64,
) -> Result<TableSample> {
    let ids = source.row_ids(table)?;
    let rows_seen = ids.len();
    let k = keep_count(rows_seen, mode);

    let mut rng = table_rng(seed, &table.name);
    let ids = choose(ids, k, &mut rng);

    Ok(TableSample { rows_seen, ids })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_to_keep_rounds_up() {
        assert_eq!(rows_to_keep(2, 0.25), 1);
        assert_eq!(rows_to_keep(4, 0.25), 1);
        assert_eq!(rows_to_keep(5, 0.25), 2);
        assert_eq!(rows_to_keep(10, 1.0), 10);
    }

    #[test]
    fn test_rows_to_keep_ignores_float_noise() {
        assert_eq!(rows_to_keep(100, 0.07), 7);
        assert_eq!(rows_to_keep(3, 0.1), 1);
    }

    #[test]
    fn test_rows_to_keep_minimum_one() {
        assert_eq!(rows_to_keep(1_000_000, 1e-12), 1);
        assert_eq!(rows_to_keep(0, 0.5), 0);
    }

    #[test]
    fn test_table_rng_is_per_table() {
        use rand::Rng;
        let a: u64 = table_rng(7, "users").random();
        let b: u64 = table_rng(7, "USERS").random();
        let c: u64 = table_rng(7, "orders").random();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
