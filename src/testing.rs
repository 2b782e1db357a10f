//! Test doubles shared by the staging tests

use anyhow::{bail, Result};

use crate::db::SqlExecutor;

/// A SQL executor that records every statement instead of running it
pub struct RecordingDb {
    pub statements: Vec<String>,
    fail_on: Option<String>,
}

impl RecordingDb {
    pub fn new() -> Self {
        RecordingDb {
            statements: Vec::new(),
            fail_on: None,
        }
    }

    /// Fail any statement containing `fragment`, after recording it
    pub fn failing_on(fragment: impl Into<String>) -> Self {
        RecordingDb {
            statements: Vec::new(),
            fail_on: Some(fragment.into()),
        }
    }

    /// All recorded statements joined, for substring assertions
    pub fn script(&self) -> String {
        self.statements.join("")
    }
}

impl SqlExecutor for RecordingDb {
    fn exec(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        if let Some(fragment) = &self.fail_on {
            if sql.contains(fragment.as_str()) {
                bail!("injected failure on statement containing {:?}", fragment);
            }
        }
        Ok(())
    }
}
