//! Batched INSERT accumulation for the load pass

use anyhow::Result;
use tracing::debug;

use crate::db::SqlExecutor;

/// Upper bound on accumulated INSERT text before a batch is executed
const MAX_BUFFER_BYTES: usize = 16_500_000;

/// Accumulates `INSERT INTO <loading_table> VALUES (…),(…),…` text and
/// executes it in bounded batches
///
/// Tuples are appended in arrival order, so rows land in the warehouse in
/// the order their source records appeared across pages.
pub struct InsertBatcher {
    loading_table: String,
    buffer: String,
    record_count: usize,
    total_count: usize,
    max_buffer: usize,
}

impl InsertBatcher {
    pub fn new(loading_table: impl Into<String>) -> Self {
        Self::with_buffer_limit(loading_table, MAX_BUFFER_BYTES)
    }

    /// Construct with a custom flush threshold; tests use small limits
    pub fn with_buffer_limit(loading_table: impl Into<String>, max_buffer: usize) -> Self {
        let loading_table = loading_table.into();
        let mut batcher = InsertBatcher {
            loading_table,
            buffer: String::new(),
            record_count: 0,
            total_count: 0,
            max_buffer,
        };
        batcher.begin_batch();
        batcher
    }

    /// Total number of tuples appended over the batcher's lifetime
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    fn begin_batch(&mut self) {
        self.buffer.clear();
        self.buffer.push_str("INSERT INTO ");
        self.buffer.push_str(&self.loading_table);
        self.buffer.push_str(" VALUES ");
        self.record_count = 0;
    }

    /// Append one parenthesized tuple, executing the pending batch first if
    /// it has grown past the buffer limit
    pub fn append(&mut self, tuple: &str, db: &mut dyn SqlExecutor) -> Result<()> {
        if self.buffer.len() > self.max_buffer {
            self.execute_batch(db)?;
            self.begin_batch();
        }
        if self.record_count > 0 {
            self.buffer.push(',');
        }
        self.buffer.push_str(tuple);
        self.record_count += 1;
        self.total_count += 1;
        Ok(())
    }

    /// Execute whatever remains in the buffer, if anything
    pub fn flush(&mut self, db: &mut dyn SqlExecutor) -> Result<()> {
        if self.record_count == 0 {
            return Ok(());
        }
        self.execute_batch(db)?;
        self.begin_batch();
        Ok(())
    }

    fn execute_batch(&mut self, db: &mut dyn SqlExecutor) -> Result<()> {
        self.buffer.push_str(";\n");
        debug!(
            table = %self.loading_table,
            tuples = self.record_count,
            bytes = self.buffer.len(),
            "loading batch"
        );
        db.exec(&self.buffer)
    }
}
