//! Per-record processing for the analyze and load passes
//!
//! The same scanner drives both passes. In the analyze pass each record
//! contributes type tallies for its top-level fields; in the load pass each
//! record becomes one tuple in the batched INSERT, with the original
//! document carried verbatim in the `data` column.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use tracing::warn;

use crate::anonymize;
use crate::db::{DbFlavor, SqlExecutor};
use crate::stage::batcher::InsertBatcher;
use crate::stage::infer::{looks_like_datetime, looks_like_uuid};
use crate::stage::scanner::RecordHandler;
use crate::types::{ColumnType, FieldStats, TableSpec};

/// Which traversal of the page set is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Analyze,
    Load,
}

/// Longest value text stored in a VARCHAR(65535) column
const MAX_VALUE_BYTES: usize = 65_535;

/// Largest magnitude a NUMERIC(12,2) column accepts
const MAX_NUMERIC_MAGNITUDE: f64 = 1e10;

/// Tenant discriminator stored with every row
const TENANT_ID: &str = "1";

enum Mode<'a> {
    Analyze {
        stats: &'a mut FieldStats,
    },
    Load {
        flavor: DbFlavor,
        batcher: &'a mut InsertBatcher,
        db: &'a mut dyn SqlExecutor,
    },
}

/// Handles one record at a time on behalf of the stager
pub struct RecordProcessor<'a> {
    table: &'a TableSpec,
    anonymize: bool,
    mode: Mode<'a>,
}

impl<'a> RecordProcessor<'a> {
    /// Pass-1 processor: accumulate field statistics
    pub fn analyze(table: &'a TableSpec, stats: &'a mut FieldStats) -> Self {
        RecordProcessor {
            table,
            anonymize: false,
            mode: Mode::Analyze { stats },
        }
    }

    /// Pass-2 processor: emit tuples into the insert batch
    pub fn load(
        table: &'a TableSpec,
        flavor: DbFlavor,
        batcher: &'a mut InsertBatcher,
        db: &'a mut dyn SqlExecutor,
    ) -> Self {
        RecordProcessor {
            table,
            anonymize: false,
            mode: Mode::Load {
                flavor,
                batcher,
                db,
            },
        }
    }
}

impl RecordHandler for RecordProcessor<'_> {
    fn on_record(&mut self, mut record: Map<String, Value>) -> Result<()> {
        if self.anonymize {
            anonymize::scrub_personal_data(&mut record);
        }
        match &mut self.mode {
            Mode::Analyze { stats } => {
                collect_stats(&record, stats);
                Ok(())
            }
            Mode::Load {
                flavor,
                batcher,
                db,
            } => {
                let tuple = build_tuple(self.table, record, *flavor)?;
                batcher.append(&tuple, &mut **db)
            }
        }
    }
}

/// Tally one record's top-level fields
///
/// Nested objects and arrays never become columns, so their contents do not
/// reach the tallies; they are preserved only through the `data` column.
fn collect_stats(record: &Map<String, Value>, stats: &mut FieldStats) {
    for (field, value) in record {
        match value {
            Value::Null => stats.entry(field.clone()).or_default().null += 1,
            Value::Bool(_) => stats.entry(field.clone()).or_default().boolean += 1,
            Value::Number(n) => {
                let counts = stats.entry(field.clone()).or_default();
                counts.number += 1;
                if n.is_i64() || n.is_u64() {
                    counts.integer += 1;
                } else {
                    counts.floating += 1;
                }
            }
            Value::String(s) => {
                let counts = stats.entry(field.clone()).or_default();
                counts.string += 1;
                if looks_like_uuid(s) {
                    counts.uuid += 1;
                }
                if looks_like_datetime(s) {
                    counts.datetime += 1;
                }
            }
            Value::Array(_) | Value::Object(_) => {}
        }
    }
}

/// Render one record as a parenthesized VALUES tuple
fn build_tuple(table: &TableSpec, record: Map<String, Value>, flavor: DbFlavor) -> Result<String> {
    let doc = Value::Object(record);
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("record in table {} has no string \"id\"", table.table_name))?
        .to_string();

    let mut tuple = String::from("(");
    tuple.push_str(&flavor.encode_string_literal(&id));

    for column in &table.columns {
        if column.column_name == "id" {
            continue;
        }
        tuple.push(',');
        match doc.get(&column.source_field_name) {
            None | Some(Value::Null) => tuple.push_str("NULL"),
            Some(value) => append_column_value(&mut tuple, table, column, &id, value, flavor),
        }
    }

    tuple.push(',');
    append_data_value(&mut tuple, table, &id, &doc, flavor);
    tuple.push(',');
    tuple.push_str(TENANT_ID);
    tuple.push(')');
    Ok(tuple)
}

fn append_column_value(
    tuple: &mut String,
    table: &TableSpec,
    column: &crate::types::ColumnSpec,
    id: &str,
    value: &Value,
    flavor: DbFlavor,
) {
    match column.column_type {
        ColumnType::BigInt => match value.as_i64() {
            Some(i) => tuple.push_str(&i.to_string()),
            None => match value.as_u64() {
                Some(u) => tuple.push_str(&u.to_string()),
                None => tuple.push_str("NULL"),
            },
        },
        ColumnType::Boolean => match value.as_bool() {
            Some(true) => tuple.push_str("TRUE"),
            Some(false) => tuple.push_str("FALSE"),
            None => tuple.push_str("NULL"),
        },
        ColumnType::Numeric => {
            let d = value.as_f64().unwrap_or(0.0);
            if d.abs() > MAX_NUMERIC_MAGNITUDE {
                warn!(
                    table = %table.table_name,
                    column = %column.column_name,
                    id,
                    value = d,
                    "numeric value exceeds 10^10, value set to 0"
                );
                tuple.push('0');
            } else {
                tuple.push_str(&value.to_string());
            }
        }
        ColumnType::Id | ColumnType::TimestampTz | ColumnType::Varchar => {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if text.len() >= MAX_VALUE_BYTES {
                warn!(
                    table = %table.table_name,
                    column = %column.column_name,
                    id,
                    length = text.len(),
                    "string length exceeds database limit, value set to NULL"
                );
                tuple.push_str("NULL");
            } else {
                tuple.push_str(&flavor.encode_string_literal(&text));
            }
        }
    }
}

/// Append the verbatim document, falling back from pretty to compact to
/// NULL as the database limit requires
fn append_data_value(tuple: &mut String, table: &TableSpec, id: &str, doc: &Value, flavor: DbFlavor) {
    let pretty = serde_json::to_string_pretty(doc).unwrap_or_default();
    if pretty.len() <= MAX_VALUE_BYTES {
        tuple.push_str(&flavor.encode_string_literal(&pretty));
        return;
    }
    let compact = serde_json::to_string(doc).unwrap_or_default();
    if compact.len() <= MAX_VALUE_BYTES {
        tuple.push_str(&flavor.encode_string_literal(&compact));
        return;
    }
    warn!(
        table = %table.table_name,
        id,
        length = compact.len(),
        "document size exceeds database limit, data column set to NULL"
    );
    tuple.push_str("NULL");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDb;
    use crate::types::ColumnSpec;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn table_with(columns: Vec<ColumnSpec>) -> TableSpec {
        let mut table = TableSpec::new("user_users", "mod-users", "/users");
        table.columns = columns;
        table
    }

    fn column(name: &str, source: &str, column_type: ColumnType) -> ColumnSpec {
        ColumnSpec {
            column_name: name.to_string(),
            source_field_name: source.to_string(),
            column_type,
        }
    }

    fn load_one(table: &TableSpec, record: Value) -> String {
        build_tuple(table, as_map(record), DbFlavor::Postgres).unwrap()
    }

    #[test]
    fn test_analyze_tallies_top_level_scalars() {
        let table = table_with(vec![]);
        let mut stats = FieldStats::new();
        let mut processor = RecordProcessor::analyze(&table, &mut stats);
        processor
            .on_record(as_map(json!({
                "id": "550e8400-e29b-41d4-a716-446655440000",
                "active": true,
                "age": 7,
                "rate": 2.5,
                "when": "2024-03-01T09:30:00",
                "gone": null,
                "nested": {"inner": 1},
                "list": [1, 2]
            })))
            .unwrap();
        assert_eq!(stats["id"].string, 1);
        assert_eq!(stats["id"].uuid, 1);
        assert_eq!(stats["active"].boolean, 1);
        assert_eq!(stats["age"].number, 1);
        assert_eq!(stats["age"].integer, 1);
        assert_eq!(stats["rate"].floating, 1);
        assert_eq!(stats["when"].datetime, 1);
        assert_eq!(stats["gone"].null, 1);
        assert!(!stats.contains_key("nested"));
        assert!(!stats.contains_key("list"));
        assert!(!stats.contains_key("inner"));
    }

    #[test]
    fn test_load_emits_tuple_through_batcher() {
        let table = table_with(vec![column("name", "name", ColumnType::Varchar)]);
        let mut db = RecordingDb::new();
        let mut batcher = InsertBatcher::new("loading_user_users");
        {
            let mut processor =
                RecordProcessor::load(&table, DbFlavor::Postgres, &mut batcher, &mut db);
            processor
                .on_record(as_map(json!({"id": "a", "name": "x"})))
                .unwrap();
        }
        batcher.flush(&mut db).unwrap();
        assert_eq!(db.statements.len(), 1);
        assert!(db.statements[0].starts_with("INSERT INTO loading_user_users VALUES ('a','x',"));
        assert!(db.statements[0].ends_with(",1);\n"));
    }

    #[test]
    fn test_tuple_missing_field_is_null() {
        let table = table_with(vec![
            column("name", "name", ColumnType::Varchar),
            column("age", "age", ColumnType::BigInt),
        ]);
        let tuple = load_one(&table, json!({"id": "a", "age": null}));
        assert!(tuple.starts_with("('a',NULL,NULL,"));
    }

    #[test]
    fn test_tuple_typed_values() {
        let table = table_with(vec![
            column("active", "active", ColumnType::Boolean),
            column("count", "count", ColumnType::BigInt),
            column("rate", "rate", ColumnType::Numeric),
            column("when", "when", ColumnType::TimestampTz),
        ]);
        let tuple = load_one(
            &table,
            json!({
                "id": "a",
                "active": true,
                "count": -12,
                "rate": 2.5,
                "when": "2024-03-01T09:30:00"
            }),
        );
        assert!(tuple.starts_with("('a',TRUE,-12,2.5,'2024-03-01T09:30:00',"));
    }

    #[test]
    fn test_numeric_at_limit_is_preserved() {
        let table = table_with(vec![column("n", "n", ColumnType::Numeric)]);
        let tuple = load_one(&table, json!({"id": "a", "n": 1.0e10}));
        assert!(tuple.contains(",10000000000"));
    }

    #[test]
    fn test_numeric_over_limit_becomes_zero() {
        let table = table_with(vec![column("n", "n", ColumnType::Numeric)]);
        let tuple = load_one(&table, json!({"id": "a", "n": 1.00001e10}));
        assert!(tuple.starts_with("('a',0,"));
    }

    #[test]
    fn test_negative_numeric_over_limit_becomes_zero() {
        let table = table_with(vec![column("n", "n", ColumnType::Numeric)]);
        let tuple = load_one(&table, json!({"id": "a", "n": -1.00001e10}));
        assert!(tuple.starts_with("('a',0,"));
    }

    #[test]
    fn test_oversize_string_becomes_null() {
        let table = table_with(vec![column("note", "note", ColumnType::Varchar)]);
        let long = "x".repeat(80_000);
        let tuple = load_one(&table, json!({"id": "a", "note": long}));
        assert!(tuple.starts_with("('a',NULL,"));
    }

    #[test]
    fn test_string_below_limit_is_preserved() {
        let table = table_with(vec![column("note", "note", ColumnType::Varchar)]);
        let long = "x".repeat(65_534);
        let tuple = load_one(&table, json!({"id": "a", "note": long.clone()}));
        assert!(tuple.contains(&long));
    }

    #[test]
    fn test_quote_escaping_in_values() {
        let table = table_with(vec![column("name", "name", ColumnType::Varchar)]);
        let tuple = load_one(&table, json!({"id": "a", "name": "O'Brien"}));
        assert!(tuple.contains("'O''Brien'"));
    }

    #[test]
    fn test_data_column_is_pretty_json() {
        let table = table_with(vec![]);
        let tuple = load_one(&table, json!({"id": "a", "name": "x"}));
        let pretty = serde_json::to_string_pretty(&json!({"id": "a", "name": "x"})).unwrap();
        assert!(tuple.contains(&DbFlavor::Postgres.encode_string_literal(&pretty)));
        assert!(tuple.ends_with(",1)"));
    }

    #[test]
    fn test_data_falls_back_to_compact() {
        let table = table_with(vec![]);
        // Sized so the indented form is over the limit but the compact
        // form is under it
        let mut record = Map::new();
        record.insert("id".to_string(), json!("a"));
        for i in 0..4500 {
            record.insert(format!("k{:04}", i), json!(1));
        }
        let doc = Value::Object(record.clone());
        assert!(serde_json::to_string_pretty(&doc).unwrap().len() > 65_535);
        assert!(serde_json::to_string(&doc).unwrap().len() <= 65_535);
        let tuple = build_tuple(&table, record, DbFlavor::Postgres).unwrap();
        let compact = serde_json::to_string(&doc).unwrap();
        assert!(tuple.contains(&DbFlavor::Postgres.encode_string_literal(&compact)));
    }

    #[test]
    fn test_data_null_when_compact_still_too_large() {
        let table = table_with(vec![]);
        let long = "x".repeat(80_000);
        let tuple = load_one(&table, json!({"id": "a", "note": long}));
        assert!(tuple.ends_with(",NULL,1)"));
    }

    #[test]
    fn test_record_without_id_is_an_error() {
        let table = table_with(vec![]);
        let result = build_tuple(&table, as_map(json!({"name": "x"})), DbFlavor::Postgres);
        assert!(result.is_err());
    }
}
