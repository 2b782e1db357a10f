use std::collections::BTreeMap;

/// SQL column type selected for an inferred column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// UUID-valued string, stored as VARCHAR(36)
    Id,
    BigInt,
    Numeric,
    Boolean,
    TimestampTz,
    /// Catch-all string type, stored as VARCHAR(65535)
    Varchar,
}

impl ColumnType {
    /// SQL type name used in CREATE TABLE
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Id => "VARCHAR(36)",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Numeric => "NUMERIC(12,2)",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
            ColumnType::Varchar => "VARCHAR(65535)",
        }
    }
}

/// One inferred column of a loading table
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Normalized SQL identifier, e.g. "user_id"
    pub column_name: String,

    /// Original JSON key this column is read from, e.g. "userId"
    pub source_field_name: String,

    pub column_type: ColumnType,
}

/// The unit of loading: one source interface mapped to one published table
#[derive(Debug, Clone)]
pub struct TableSpec {
    /// Published table name, e.g. "user_users"
    pub table_name: String,

    /// Source module the interface belongs to, used in the table comment
    pub module_name: String,

    /// URL path of the interface, e.g. "/users"
    pub source_path: String,

    /// Set when extraction produced no data for this table
    pub skip: bool,

    /// Populated by the analyze pass; empty on entry
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(
        table_name: impl Into<String>,
        module_name: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        TableSpec {
            table_name: table_name.into(),
            module_name: module_name.into(),
            source_path: source_path.into(),
            skip: false,
            columns: Vec::new(),
        }
    }
}

/// Per-field observation histogram accumulated during the analyze pass
///
/// Each top-level field occurrence tallies one primary category; strings
/// additionally tally `uuid` and `datetime` when they match those shapes,
/// and numbers additionally tally `integer` or `floating`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub null: u64,
    pub boolean: u64,
    pub number: u64,
    pub integer: u64,
    pub floating: u64,
    pub string: u64,
    pub uuid: u64,
    pub datetime: u64,
}

/// Field statistics for one table, keyed by source field name
///
/// BTreeMap iteration keeps column selection deterministic across runs.
pub type FieldStats = BTreeMap<String, Counts>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_names() {
        assert_eq!(ColumnType::Id.sql_type(), "VARCHAR(36)");
        assert_eq!(ColumnType::BigInt.sql_type(), "BIGINT");
        assert_eq!(ColumnType::Varchar.sql_type(), "VARCHAR(65535)");
    }

    #[test]
    fn test_table_spec_starts_empty() {
        let table = TableSpec::new("user_users", "mod-users", "/users");
        assert!(!table.skip);
        assert!(table.columns.is_empty());
    }
}
