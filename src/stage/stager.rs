//! Stage-and-publish coordination for one table
//!
//! The stager drives the full per-table protocol: read the page count,
//! analyze every page to infer a column schema, create the loading table,
//! load every page as batched inserts, index, then swap the loading table
//! into the published name. The caller wraps the whole call in one
//! transaction and rolls back on error.

use anyhow::{bail, Context, Result};
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::db::{DbFlavor, SqlExecutor};
use crate::names::{decode_camel_case, loading_table_name};
use crate::stage::batcher::InsertBatcher;
use crate::stage::infer::choose_column_type;
use crate::stage::processor::{Pass, RecordProcessor};
use crate::stage::scanner::PageScanner;
use crate::types::{ColumnSpec, ColumnType, FieldStats, TableSpec};

/// Per-run settings the stager needs for every table
pub struct TableStager<'a> {
    flavor: DbFlavor,
    load_dir: &'a Path,
    reader_roles: &'a [String],
    cancel: &'a AtomicBool,
    /// Include `<table>_test.json` pages (directory-load runs only)
    include_test_files: bool,
}

impl<'a> TableStager<'a> {
    pub fn new(
        flavor: DbFlavor,
        load_dir: &'a Path,
        reader_roles: &'a [String],
        cancel: &'a AtomicBool,
    ) -> Self {
        TableStager {
            flavor,
            load_dir,
            reader_roles,
            cancel,
            include_test_files: false,
        }
    }

    pub fn include_test_files(mut self, include: bool) -> Self {
        self.include_test_files = include;
        self
    }

    /// Run the full stage-and-publish protocol for one table
    ///
    /// On success the published table holds the freshly loaded data and no
    /// loading table remains. Any error leaves the transaction for the
    /// caller to roll back.
    pub fn stage_table(&self, table: &mut TableSpec, db: &mut dyn SqlExecutor) -> Result<()> {
        let page_count = self.read_page_count(&table.table_name)?;
        info!(table = %table.table_name, pages = page_count, "staging");

        let loading_table = loading_table_name(&table.table_name);
        let mut stats = FieldStats::new();
        let mut batcher = InsertBatcher::new(&loading_table);

        for pass in [Pass::Analyze, Pass::Load] {
            debug!(
                table = %table.table_name,
                pass = match pass {
                    Pass::Analyze => "analyze",
                    Pass::Load => "load",
                },
                "staging pass"
            );

            for page in 0..page_count {
                if self.cancel.load(Ordering::Relaxed) {
                    bail!("load canceled while staging table {}", table.table_name);
                }
                let path = self.page_path(&table.table_name, &format!("_{}.json", page));
                debug!(table = %table.table_name, page, "staging page");
                self.stage_page(pass, table, db, &mut stats, &mut batcher, &path)?;
            }

            if self.include_test_files {
                let path = self.page_path(&table.table_name, "_test.json");
                if path.exists() {
                    debug!(table = %table.table_name, "staging test file");
                    self.stage_page(pass, table, db, &mut stats, &mut batcher, &path)?;
                }
            }

            match pass {
                Pass::Analyze => {
                    select_columns(table, &stats);
                    self.create_loading_table(table, db)?;
                }
                Pass::Load => {
                    batcher.flush(db)?;
                    self.index_loading_table(table, db)?;
                }
            }
        }

        info!(
            table = %table.table_name,
            records = batcher.total_count(),
            "loaded"
        );

        self.publish_table(table, db)?;
        Ok(())
    }

    fn page_path(&self, table_name: &str, suffix: &str) -> PathBuf {
        self.load_dir.join(format!("{}{}", table_name, suffix))
    }

    /// Read the page count file; a missing file means zero pages
    fn read_page_count(&self, table_name: &str) -> Result<usize> {
        let path = self.page_path(table_name, "_count.txt");
        if !path.exists() {
            warn!(path = %path.display(), "file not found");
            return Ok(0);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading page count from {}", path.display()))?;
        text.split_whitespace()
            .next()
            .and_then(|token| token.parse::<usize>().ok())
            .with_context(|| format!("unable to read page count from {}", path.display()))
    }

    fn stage_page(
        &self,
        pass: Pass,
        table: &TableSpec,
        db: &mut dyn SqlExecutor,
        stats: &mut FieldStats,
        batcher: &mut InsertBatcher,
        path: &Path,
    ) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("opening page file {} for table {}", path.display(), table.table_name))?;
        let scanner = PageScanner::new(BufReader::new(file));
        let result = match pass {
            Pass::Analyze => {
                let mut processor = RecordProcessor::analyze(table, stats);
                scanner.scan(&mut processor)
            }
            Pass::Load => {
                let mut processor = RecordProcessor::load(table, self.flavor, batcher, db);
                scanner.scan(&mut processor)
            }
        };
        result
            .map(|_| ())
            .with_context(|| format!("staging page file {} for table {}", path.display(), table.table_name))
    }

    fn create_loading_table(&self, table: &TableSpec, db: &mut dyn SqlExecutor) -> Result<()> {
        let loading_table = loading_table_name(&table.table_name);

        let mut sql = format!(
            "CREATE TABLE {} (\n    id VARCHAR(36) NOT NULL,\n",
            loading_table
        );
        for column in &table.columns {
            if column.column_name == "id" {
                continue;
            }
            sql.push_str(&format!(
                "    \"{}\" {},\n",
                column.column_name,
                column.column_type.sql_type()
            ));
        }
        sql.push_str(&format!(
            "    data {},\n    tenant_id SMALLINT NOT NULL\n){};",
            self.flavor.json_type(),
            self.flavor.table_key_clause("id", "id")
        ));
        db.exec(&sql)?;

        if table.module_name != "mod-agreements" {
            let comment = format!("{} in {}", table.source_path, table.module_name);
            let sql = format!(
                "COMMENT ON TABLE {} IS {};",
                loading_table,
                self.flavor.encode_string_literal(&comment)
            );
            db.exec(&sql)?;
        }

        for role in self.reader_roles {
            let sql = format!("GRANT SELECT ON {} TO {};", loading_table, role);
            db.exec(&sql)?;
        }
        Ok(())
    }

    fn index_loading_table(&self, table: &TableSpec, db: &mut dyn SqlExecutor) -> Result<()> {
        debug!(table = %table.table_name, "creating indexes");
        let loading_table = loading_table_name(&table.table_name);
        let sql = format!("ALTER TABLE {}\n    ADD PRIMARY KEY (id);", loading_table);
        db.exec(&sql)?;
        if !self.flavor.supports_indexes() {
            return Ok(());
        }
        for column in &table.columns {
            if column.column_name == "id" {
                continue;
            }
            let sql = format!(
                "CREATE INDEX ON\n    {}\n    (\"{}\");",
                loading_table, column.column_name
            );
            db.exec(&sql)?;
        }
        Ok(())
    }

    /// Replace the published table with the freshly loaded one
    fn publish_table(&self, table: &TableSpec, db: &mut dyn SqlExecutor) -> Result<()> {
        let loading_table = loading_table_name(&table.table_name);
        db.exec(&format!("DROP TABLE IF EXISTS {};", table.table_name))?;
        db.exec(&format!(
            "ALTER TABLE {} RENAME TO {};",
            loading_table, table.table_name
        ))?;
        for role in self.reader_roles {
            let sql = format!("GRANT SELECT ON ALL TABLES IN SCHEMA public TO {};", role);
            db.exec(&sql)?;
        }
        Ok(())
    }
}

/// Turn accumulated field statistics into the table's column list
///
/// The implicit `id` column always comes first; the remaining columns
/// follow in source-field order so repeated runs produce the same schema.
fn select_columns(table: &mut TableSpec, stats: &FieldStats) {
    table.columns.clear();
    table.columns.push(ColumnSpec {
        column_name: "id".to_string(),
        source_field_name: "id".to_string(),
        column_type: ColumnType::Id,
    });
    for (field, counts) in stats {
        if field == "id" {
            continue;
        }
        if let Some(column_type) = choose_column_type(field, counts) {
            table.columns.push(ColumnSpec {
                column_name: decode_camel_case(field),
                source_field_name: field.clone(),
                column_type,
            });
        }
    }
}
