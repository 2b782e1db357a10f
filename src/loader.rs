//! The per-run load loop
//!
//! Tables are loaded one at a time, each on a fresh connection inside its
//! own transaction. A failing table is rolled back and logged; the run
//! carries on with the remaining tables and reports the failure count at
//! the end.

use anyhow::Result;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::db::SqlExecutor;
use crate::stage::TableStager;
use crate::types::TableSpec;

/// What happened to the catalog over one run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub loaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Load every table in the catalog, one transaction per table
///
/// `connect` opens a fresh warehouse connection; it is called once per
/// non-skipped table. Connection failure is fatal for the run, while a
/// staging failure only fails its table.
pub fn load_catalog(
    tables: &mut [TableSpec],
    stager: &TableStager,
    mut connect: impl FnMut() -> Result<Box<dyn SqlExecutor>>,
) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();
    for table in tables.iter_mut() {
        if table.skip {
            debug!(table = %table.table_name, "skipping, no data extracted");
            outcome.skipped += 1;
            continue;
        }
        info!(table = %table.table_name, "loading table");
        let started = Instant::now();

        let mut db = connect()?;
        db.begin()?;
        match stager.stage_table(table, db.as_mut()) {
            Ok(()) => {
                db.commit()?;
                outcome.loaded += 1;
                info!(
                    table = %table.table_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "load time"
                );
            }
            Err(e) => {
                error!(table = %table.table_name, error = %e, "table failed, rolling back");
                db.rollback()?;
                table.skip = true;
                outcome.failed += 1;
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbFlavor;
    use crate::testing::RecordingDb;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    /// Hands out recording connections and keeps them inspectable
    struct Connections {
        all: Rc<RefCell<Vec<Rc<RefCell<RecordingDb>>>>>,
        fail_on: Option<String>,
    }

    struct SharedDb(Rc<RefCell<RecordingDb>>);

    impl SqlExecutor for SharedDb {
        fn exec(&mut self, sql: &str) -> Result<()> {
            self.0.borrow_mut().exec(sql)
        }
    }

    impl Connections {
        fn new(fail_on: Option<&str>) -> Self {
            Connections {
                all: Rc::new(RefCell::new(Vec::new())),
                fail_on: fail_on.map(|s| s.to_string()),
            }
        }

        fn connector(&self) -> Box<dyn FnMut() -> Result<Box<dyn SqlExecutor>>> {
            let all = self.all.clone();
            let fail_on = self.fail_on.clone();
            Box::new(move || {
                let db = match &fail_on {
                    Some(fragment) => RecordingDb::failing_on(fragment.clone()),
                    None => RecordingDb::new(),
                };
                let shared = Rc::new(RefCell::new(db));
                all.borrow_mut().push(shared.clone());
                Ok(Box::new(SharedDb(shared)) as Box<dyn SqlExecutor>)
            })
        }

        fn scripts(&self) -> Vec<String> {
            self.all
                .borrow()
                .iter()
                .map(|db| db.borrow().script())
                .collect()
        }
    }

    fn write_table(dir: &TempDir, table: &str, page: &str) {
        fs::write(dir.path().join(format!("{}_count.txt", table)), "1\n").unwrap();
        fs::write(dir.path().join(format!("{}_0.json", table)), page).unwrap();
    }

    #[test]
    fn test_each_table_gets_its_own_transaction() {
        let dir = TempDir::new().unwrap();
        write_table(&dir, "alpha", r#"{"records":[{"id":"a"}]}"#);
        write_table(&dir, "beta", r#"{"records":[{"id":"b"}]}"#);

        let roles = vec!["ldp".to_string()];
        let cancel = AtomicBool::new(false);
        let stager = TableStager::new(DbFlavor::Postgres, dir.path(), &roles, &cancel);
        let mut tables = vec![
            TableSpec::new("alpha", "mod-a", "/a"),
            TableSpec::new("beta", "mod-b", "/b"),
        ];

        let connections = Connections::new(None);
        let outcome = load_catalog(&mut tables, &stager, connections.connector()).unwrap();
        assert_eq!(
            outcome,
            LoadOutcome {
                loaded: 2,
                skipped: 0,
                failed: 0
            }
        );

        let scripts = connections.scripts();
        assert_eq!(scripts.len(), 2);
        for script in &scripts {
            assert!(script.starts_with("BEGIN;"));
            assert!(script.ends_with("COMMIT;"));
            assert!(!script.contains("ROLLBACK"));
        }
        assert!(scripts[0].contains("RENAME TO alpha;"));
        assert!(scripts[1].contains("RENAME TO beta;"));
    }

    #[test]
    fn test_failed_table_rolls_back_and_run_continues() {
        let dir = TempDir::new().unwrap();
        write_table(&dir, "alpha", r#"{"records":[{"id":"#);
        write_table(&dir, "beta", r#"{"records":[{"id":"b"}]}"#);

        let roles = vec!["ldp".to_string()];
        let cancel = AtomicBool::new(false);
        let stager = TableStager::new(DbFlavor::Postgres, dir.path(), &roles, &cancel);
        let mut tables = vec![
            TableSpec::new("alpha", "mod-a", "/a"),
            TableSpec::new("beta", "mod-b", "/b"),
        ];

        let connections = Connections::new(None);
        let outcome = load_catalog(&mut tables, &stager, connections.connector()).unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.loaded, 1);
        assert!(tables[0].skip);

        let scripts = connections.scripts();
        assert!(scripts[0].ends_with("ROLLBACK;"));
        assert!(scripts[1].ends_with("COMMIT;"));
    }

    #[test]
    fn test_sql_failure_rolls_back_table() {
        let dir = TempDir::new().unwrap();
        write_table(&dir, "alpha", r#"{"records":[{"id":"a"}]}"#);

        let roles = vec!["ldp".to_string()];
        let cancel = AtomicBool::new(false);
        let stager = TableStager::new(DbFlavor::Postgres, dir.path(), &roles, &cancel);
        let mut tables = vec![TableSpec::new("alpha", "mod-a", "/a")];

        let connections = Connections::new(Some("CREATE TABLE"));
        let outcome = load_catalog(&mut tables, &stager, connections.connector()).unwrap();
        assert_eq!(outcome.failed, 1);
        assert!(connections.scripts()[0].ends_with("ROLLBACK;"));
    }

    #[test]
    fn test_skipped_tables_never_connect() {
        let dir = TempDir::new().unwrap();
        let roles = vec!["ldp".to_string()];
        let cancel = AtomicBool::new(false);
        let stager = TableStager::new(DbFlavor::Postgres, dir.path(), &roles, &cancel);
        let mut table = TableSpec::new("alpha", "mod-a", "/a");
        table.skip = true;
        let mut tables = vec![table];

        let connections = Connections::new(None);
        let outcome = load_catalog(&mut tables, &stager, connections.connector()).unwrap();
        assert_eq!(outcome.skipped, 1);
        assert!(connections.scripts().is_empty());
    }
}
