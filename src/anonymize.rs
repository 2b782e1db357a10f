//! Personal-data recognition and scrubbing
//!
//! Scrubbing is currently switched off in the load pass; the predicate and
//! rewrite are kept so the switch stays a one-line change.

use serde_json::{Map, Value};

/// Field names whose values may contain personal data
const PERSONAL_FIELDS: &[&str] = &[
    "barcode",
    "email",
    "externalSystemId",
    "firstName",
    "lastName",
    "middleName",
    "mobilePhone",
    "personal",
    "phone",
    "username",
];

/// Whether a field path may hold personal data
///
/// The path is slash-separated from the record root, e.g.
/// `/personal/email`; a match on any segment qualifies the whole path.
pub fn possible_personal_data(path: &str) -> bool {
    path.split('/')
        .any(|segment| PERSONAL_FIELDS.contains(&segment))
}

/// Rewrite personal values in place: strings empty, numbers zero,
/// booleans false
pub fn scrub_personal_data(record: &mut Map<String, Value>) {
    for (field, value) in record.iter_mut() {
        scrub_value(&format!("/{}", field), value);
    }
}

fn scrub_value(path: &str, value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (field, inner) in map.iter_mut() {
                scrub_value(&format!("{}/{}", path, field), inner);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                scrub_value(&format!("{}/{}", path, index), item);
            }
        }
        Value::String(s) => {
            if possible_personal_data(path) {
                s.clear();
            }
        }
        Value::Number(_) => {
            if possible_personal_data(path) {
                *value = Value::from(0);
            }
        }
        Value::Bool(b) => {
            if possible_personal_data(path) {
                *b = false;
            }
        }
        Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicate_matches_segments() {
        assert!(possible_personal_data("/email"));
        assert!(possible_personal_data("/personal/lastName"));
        assert!(possible_personal_data("/personal/addresses/0/city"));
        assert!(!possible_personal_data("/id"));
        assert!(!possible_personal_data("/status"));
    }

    #[test]
    fn test_scrub_rewrites_matching_values() {
        let mut record = match json!({
            "id": "u1",
            "username": "jdoe",
            "active": true,
            "personal": {"lastName": "Doe", "age": 44}
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        scrub_personal_data(&mut record);
        assert_eq!(record["id"], json!("u1"));
        assert_eq!(record["username"], json!(""));
        assert_eq!(record["active"], json!(true));
        assert_eq!(record["personal"]["lastName"], json!(""));
        assert_eq!(record["personal"]["age"], json!(0));
    }
}
