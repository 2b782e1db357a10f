//! Column type selection from accumulated field statistics
//!
//! The analyze pass tallies what each top-level field looked like across
//! every record; once the whole table has been read, one column type is
//! chosen per field from the tallies alone. The decision rules are ordered:
//! the first one whose conditions hold wins.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::types::{ColumnType, Counts};

static UUID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});

static DATETIME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").unwrap());

/// Whether a string has the canonical 8-4-4-4-12 UUID shape
pub fn looks_like_uuid(s: &str) -> bool {
    UUID_REGEX.is_match(s)
}

/// Whether a string starts with an ISO-8601 date-time
pub fn looks_like_datetime(s: &str) -> bool {
    DATETIME_REGEX.is_match(s)
}

/// Choose a column type for one field from its observation counts
///
/// Returns `None` when the field should not become a column, which happens
/// when only nulls were ever observed. Fields with conflicting observations
/// fall back to varchar so no data is lost.
pub fn choose_column_type(field: &str, counts: &Counts) -> Option<ColumnType> {
    let chosen = select(counts);
    match chosen {
        Some(t) => debug!(field, column_type = ?t, "column type selected"),
        None => debug!(field, "only nulls observed, field dropped"),
    }
    chosen
}

fn select(c: &Counts) -> Option<ColumnType> {
    // 1. Every string was a UUID and nothing else was seen
    if c.string > 0 && c.uuid == c.string && c.number == 0 && c.boolean == 0 && c.datetime == 0 {
        return Some(ColumnType::Id);
    }
    // 2. Every string was a date-time and nothing else was seen
    if c.string > 0 && c.datetime == c.string && c.number == 0 && c.boolean == 0 && c.uuid == 0 {
        return Some(ColumnType::TimestampTz);
    }
    // 3. Booleans only
    if c.boolean > 0 && c.string == 0 && c.number == 0 {
        return Some(ColumnType::Boolean);
    }
    // 4. Numbers only, all integral
    if c.number > 0 && c.string == 0 && c.boolean == 0 && c.floating == 0 {
        return Some(ColumnType::BigInt);
    }
    // 5. Numbers only, some fractional
    if c.number > 0 && c.string == 0 && c.boolean == 0 {
        return Some(ColumnType::Numeric);
    }
    // 6. Any strings at all
    if c.string > 0 {
        return Some(ColumnType::Varchar);
    }
    // 7. Nothing but nulls: no column
    if c.boolean == 0 && c.number == 0 && c.string == 0 {
        return None;
    }
    // 8. Conflicting observations
    Some(ColumnType::Varchar)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts() -> Counts {
        Counts::default()
    }

    #[test]
    fn test_uuid_detection() {
        assert!(looks_like_uuid("550e8400-e29b-41d4-a716-446655440000"));
        assert!(looks_like_uuid("550E8400-E29B-41D4-A716-446655440000"));
        assert!(!looks_like_uuid("550e8400-e29b-41d4-a716"));
        assert!(!looks_like_uuid("not a uuid"));
    }

    #[test]
    fn test_datetime_detection() {
        assert!(looks_like_datetime("2024-03-01T09:30:00"));
        assert!(looks_like_datetime("2024-03-01T09:30:00.000+00:00"));
        assert!(!looks_like_datetime("2024-03-01"));
        assert!(!looks_like_datetime("yesterday"));
    }

    #[test]
    fn test_all_uuid_strings_become_id() {
        let c = Counts {
            string: 3,
            uuid: 3,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), Some(ColumnType::Id));
    }

    #[test]
    fn test_uuid_mixed_with_plain_strings_is_varchar() {
        let c = Counts {
            string: 3,
            uuid: 2,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), Some(ColumnType::Varchar));
    }

    #[test]
    fn test_all_datetime_strings_become_timestamptz() {
        let c = Counts {
            string: 4,
            datetime: 4,
            null: 1,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), Some(ColumnType::TimestampTz));
    }

    #[test]
    fn test_booleans_only() {
        let c = Counts {
            boolean: 2,
            null: 1,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), Some(ColumnType::Boolean));
    }

    #[test]
    fn test_integers_only_become_bigint() {
        let c = Counts {
            number: 5,
            integer: 5,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), Some(ColumnType::BigInt));
    }

    #[test]
    fn test_any_float_becomes_numeric() {
        let c = Counts {
            number: 2,
            integer: 1,
            floating: 1,
            ..counts()
        };
        assert_eq!(choose_column_type("n", &c), Some(ColumnType::Numeric));
    }

    #[test]
    fn test_strings_dominate_numbers() {
        let c = Counts {
            string: 1,
            number: 1,
            integer: 1,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), Some(ColumnType::Varchar));
    }

    #[test]
    fn test_only_nulls_drops_field() {
        let c = Counts {
            null: 7,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), None);
    }

    #[test]
    fn test_boolean_number_conflict_falls_back_to_varchar() {
        let c = Counts {
            boolean: 1,
            number: 1,
            integer: 1,
            ..counts()
        };
        assert_eq!(choose_column_type("k", &c), Some(ColumnType::Varchar));
    }
}
