//! # Kiln - JSON warehouse loader
//!
//! A pipeline that pulls semi-structured JSON records from an HTTP tenant
//! service and materializes them as relational tables in an analytics
//! warehouse.
//!
//! ## Modules
//!
//! - **stage**: the two-pass staging pipeline (scan, infer, load, publish)
//! - **extract**: paged retrieval of records into page files
//! - **db**: warehouse connection and SQL dialect handling
//! - **loader**: the per-run loop, one transaction per table
//!
//! ## Quick Start
//!
//! ```rust
//! use kiln::stage::{choose_column_type, PageScanner, RecordHandler};
//! use kiln::types::{ColumnType, FieldStats};
//! use serde_json::{Map, Value};
//!
//! # fn main() -> anyhow::Result<()> {
//! struct Tally(FieldStats);
//!
//! impl RecordHandler for Tally {
//!     fn on_record(&mut self, record: Map<String, Value>) -> anyhow::Result<()> {
//!         for (field, value) in &record {
//!             let counts = self.0.entry(field.clone()).or_default();
//!             match value {
//!                 Value::Number(_) => counts.number += 1,
//!                 Value::String(_) => counts.string += 1,
//!                 _ => {}
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let page = r#"{"records":[{"id":"a","name":"x"},{"id":"b","name":"y"}]}"#;
//! let mut tally = Tally(FieldStats::new());
//! PageScanner::new(page.as_bytes()).scan(&mut tally)?;
//!
//! assert_eq!(
//!     choose_column_type("name", &tally.0["name"]),
//!     Some(ColumnType::Varchar)
//! );
//! # Ok(())
//! # }
//! ```

pub mod anonymize;
pub mod catalog;
pub mod config;
pub mod db;
pub mod extract;
pub mod loader;
pub mod names;
pub mod stage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use config::Config;
pub use db::{DbClient, DbFlavor, SqlExecutor};
pub use loader::{load_catalog, LoadOutcome};
pub use stage::{InsertBatcher, PageScanner, RecordProcessor, TableStager};
pub use types::{ColumnSpec, ColumnType, Counts, TableSpec};
