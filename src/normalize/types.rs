use crate::schema::{IdentityColumns, TableObservation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Configuration for document normalization.
#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    /// Separator between a parent table name and the array field that
    /// generated a child table, e.g. `json_doc__children`.
    pub table_separator: String,

    /// Separator used when flattening nested object fields into column
    /// names of the same row.
    pub column_separator: String,

    /// Maximum table nesting depth (levels of child tables under the root).
    pub max_depth: usize,

    /// Names of the generated identity columns.
    pub identity: IdentityColumns,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig {
            table_separator: String::from("__"),
            column_separator: String::from("__"),
            max_depth: 10,
            identity: IdentityColumns::default(),
        }
    }
}

/// One flattened row, tagged with its content-derived identity and the
/// linkage back to the rows that contained it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Flattened scalar fields, column name to value.
    pub data: Map<String, Value>,

    /// Deterministic identity of this row's content at its structural path.
    pub record_hash: String,

    /// `record_hash` of the row in the immediate parent table; `None` for
    /// root-table rows.
    pub parent_hash: Option<String>,

    /// `record_hash` of the top-level row that ultimately contains this
    /// one; a root row's own hash for root rows.
    pub root_hash: String,

    /// Zero-based index within the array that produced this row, when it
    /// came from an array element.
    pub list_position: Option<u64>,
}

impl Row {
    /// The row as the destination sees it: data fields plus the identity
    /// columns under their configured names. `load_id` is stamped when the
    /// row travels inside a load package; pass `None` when writing rows
    /// that are not part of a load.
    pub fn materialize(&self, identity: &IdentityColumns, load_id: Option<&str>) -> Map<String, Value> {
        let mut out = self.data.clone();
        out.insert(
            identity.record_hash.clone(),
            Value::String(self.record_hash.clone()),
        );
        out.insert(
            identity.parent_hash.clone(),
            match &self.parent_hash {
                Some(hash) => Value::String(hash.clone()),
                None => Value::Null,
            },
        );
        out.insert(
            identity.root_hash.clone(),
            Value::String(self.root_hash.clone()),
        );
        out.insert(
            identity.list_position.clone(),
            match self.list_position {
                Some(position) => Value::Number(position.into()),
                None => Value::Null,
            },
        );
        if let Some(id) = load_id {
            out.insert(identity.load_id.clone(), Value::String(id.to_string()));
        }
        out
    }
}

/// Everything one document normalized into: row batches keyed by table
/// name, plus the per-table observations the schema evolver consumes.
#[derive(Debug, Clone, Default)]
pub struct NormalizedDoc {
    pub tables: BTreeMap<String, Vec<Row>>,
    pub observations: Vec<TableObservation>,
}

impl NormalizedDoc {
    /// Total number of rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_materialize_root_row() {
        let row = Row {
            data: match json!({"name": "Ana"}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            },
            record_hash: "h1".to_string(),
            parent_hash: None,
            root_hash: "h1".to_string(),
            list_position: None,
        };

        let out = row.materialize(&IdentityColumns::default(), Some("load-1"));
        assert_eq!(out["name"], "Ana");
        assert_eq!(out["record_hash"], "h1");
        assert_eq!(out["parent_hash"], Value::Null);
        assert_eq!(out["root_hash"], "h1");
        assert_eq!(out["list_position"], Value::Null);
        assert_eq!(out["load_id"], "load-1");
    }

    #[test]
    fn test_materialize_without_load() {
        let row = Row {
            data: Map::new(),
            record_hash: "h2".to_string(),
            parent_hash: Some("h1".to_string()),
            root_hash: "h1".to_string(),
            list_position: Some(3),
        };

        let out = row.materialize(&IdentityColumns::default(), None);
        assert_eq!(out["parent_hash"], "h1");
        assert_eq!(out["list_position"], 3);
        assert!(!out.contains_key("load_id"));
    }
}
