//! Scalar type inference and the widening lattice.
//!
//! Both functions are pure: inference looks at one value, merging combines
//! two previously inferred types. Merging is commutative and associative,
//! so a column's type stabilizes to the same result regardless of document
//! arrival order. Callers persist results into the schema; nothing here
//! mutates shared state.

use crate::schema::ColumnType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
});

/// Infer the semantic type of a scalar value. `None` for null: a null tells
/// us a column exists but nothing about its type until a non-null instance
/// is observed.
///
/// Binary is never inferred from JSON scalars; it enters a schema only
/// through import or an explicit edit.
pub fn infer_type(value: &Value) -> Option<ColumnType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(ColumnType::Boolean),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(ColumnType::Integer)
            } else {
                Some(ColumnType::Float)
            }
        }
        Value::String(s) => {
            if is_iso_datetime(s) {
                Some(ColumnType::Timestamp)
            } else {
                Some(ColumnType::Text)
            }
        }
        // Composites are decomposed by the normalizer before inference.
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Merge two observed types into the narrowest type that can represent
/// both. Text is the universal fallback.
pub fn merge_types(a: ColumnType, b: ColumnType) -> ColumnType {
    use ColumnType::*;
    match (a, b) {
        _ if a == b => a,
        (Integer, Float) | (Float, Integer) => Float,
        (Timestamp, Text) | (Text, Timestamp) => Text,
        _ => Text,
    }
}

/// Whether a column of type `existing` can accept an observation of type
/// `observed` without a conflict: either the merge changes nothing, or the
/// pair is one of the sanctioned upgrades (integer to float, timestamp to
/// text). Everything else is surfaced as a type conflict for the caller to
/// resolve.
pub fn is_widening(existing: ColumnType, observed: ColumnType) -> bool {
    use ColumnType::*;
    merge_types(existing, observed) == existing
        || matches!((existing, observed), (Integer, Float) | (Timestamp, Text))
}

fn is_iso_datetime(s: &str) -> bool {
    // Cheap length/separator check before the regex, same as the string
    // format detection in the schema builder this was lifted from.
    s.len() >= 19 && s.as_bytes().get(10) == Some(&b'T') && ISO_DATETIME_REGEX.is_match(s)
}
