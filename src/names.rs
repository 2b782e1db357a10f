//! Identifier mapping between JSON field names and SQL names
//!
//! Source field names arrive in camelCase and become snake_case SQL
//! identifiers. Loading tables get a fixed prefix so they can never collide
//! with published table names.

/// Prefix attached to a table name while it is being loaded
const LOADING_PREFIX: &str = "loading_";

/// Name of the transient table that the load pass inserts into
pub fn loading_table_name(table_name: &str) -> String {
    format!("{}{}", LOADING_PREFIX, table_name)
}

/// Convert a camelCase JSON field name to a snake_case SQL identifier
///
/// An underscore is inserted where a lowercase or digit character is
/// followed by an uppercase one; all letters are lowercased. Names that are
/// already snake_case pass through unchanged.
pub fn decode_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_camel_case() {
        assert_eq!(decode_camel_case("userId"), "user_id");
        assert_eq!(decode_camel_case("holdingsRecordId"), "holdings_record_id");
        assert_eq!(decode_camel_case("id"), "id");
        assert_eq!(decode_camel_case("already_snake"), "already_snake");
        assert_eq!(decode_camel_case("pathID"), "path_id");
        assert_eq!(decode_camel_case("HTTPStatus"), "httpstatus");
        assert_eq!(decode_camel_case("code3"), "code3");
        assert_eq!(decode_camel_case("code3Value"), "code3_value");
    }

    #[test]
    fn test_loading_name_distinct_from_published() {
        let loading = loading_table_name("user_users");
        assert_eq!(loading, "loading_user_users");
        assert_ne!(loading, "user_users");
    }
}
