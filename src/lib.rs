//! Referentially intact random subsets of relational databases.
//!
//! ```no_run
//! use db_subsetter::store::DuckDbStore;
//! use db_subsetter::subset::create_subset;
//! use std::path::Path;
//!
//! let source = DuckDbStore::open(Path::new("prod.db"))?;
//! let destination = DuckDbStore::open(Path::new("dev.db"))?;
//! create_subset(&source, &destination, 0.05)?;
//! # Ok::<(), db_subsetter::error::SubsetError>(())
//! ```

pub mod error;
pub mod schema;
pub mod store;
pub mod subset;

pub use error::{Result, SubsetError};
pub use subset::{create_subset, SubsetConfig, SubsetStats, Subsetter};
