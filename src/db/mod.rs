//! Database access for the warehouse connection
//!
//! The loader speaks to the warehouse through a narrow [`SqlExecutor`]
//! trait so the staging pipeline can be exercised against a recording
//! executor in tests. [`DbFlavor`] isolates the few places where the SQL
//! dialect differs (JSON column type, distribution keys, index policy).

pub mod client;
pub mod flavor;

pub use client::{DbClient, SqlExecutor};
pub use flavor::DbFlavor;
