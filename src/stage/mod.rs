//! JSON-to-relational staging
//!
//! This module turns a directory of extracted page files into a published
//! warehouse table. The page set is streamed twice: the analyze pass
//! tallies per-field type statistics and infers a column schema, the load
//! pass re-reads the same pages and emits batched inserts conformant to
//! that schema, keeping the original document verbatim alongside. The
//! stager wraps both passes with the DDL, indexing, and publish steps.

pub mod batcher;
pub mod infer;
pub mod processor;
pub mod scanner;
pub mod stager;

pub use batcher::InsertBatcher;
pub use infer::choose_column_type;
pub use processor::{Pass, RecordProcessor};
pub use scanner::{canonical_sort, PageScanner, RecordHandler};
pub use stager::TableStager;
