//! Content-derived row identity.
//!
//! The record hash covers the structural path (table name, list position,
//! parent identity) and the row's own flattened fields, in sorted column
//! order. Identical content at the same path always produces the same
//! hash, which is what makes re-loading unchanged data a no-op at the
//! destination.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const SEP: [u8; 1] = [0];

/// Hash a row's identity. Child rows never feed into their parent's hash;
/// callers compute this after a row's own fields are known and before
/// descending into its array children.
pub fn record_hash(
    table: &str,
    list_position: Option<u64>,
    parent_hash: Option<&str>,
    fields: &Map<String, Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update(SEP);
    if let Some(position) = list_position {
        hasher.update(position.to_be_bytes());
    }
    hasher.update(SEP);
    if let Some(parent) = parent_hash {
        hasher.update(parent.as_bytes());
    }
    hasher.update(SEP);

    // serde_json's Map may or may not preserve insertion order depending
    // on feature unification; sort explicitly so the hash never depends
    // on it.
    let mut names: Vec<&String> = fields.keys().collect();
    names.sort_unstable();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(SEP);
        // JSON-encode the scalar: deterministic, and keeps 1 and "1" distinct.
        if let Ok(encoded) = serde_json::to_vec(&fields[name]) {
            hasher.update(&encoded);
        }
        hasher.update(SEP);
    }

    hex::encode(hasher.finalize())
}
