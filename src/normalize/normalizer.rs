use crate::error::NormalizeError;
use crate::normalize::hash::record_hash;
use crate::normalize::types::{NormalizeConfig, NormalizedDoc, Row};
use crate::schema::infer::{infer_type, merge_types};
use crate::schema::{ColumnType, TableObservation};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::trace;

/// Recursive-descent document normalizer.
///
/// One input document becomes rows across one or more tables: scalar
/// fields stay on the current row, nested objects flatten into it under
/// path-joined column names, and nested arrays generate child tables with
/// one row per element. Identity hashes are assigned on the way down, so
/// every child row carries its parent's and root's identity at creation.
pub struct Normalizer {
    config: NormalizeConfig,
}

/// Linkage of a child row back to the row whose array produced it.
struct Linkage<'a> {
    parent_table: &'a str,
    parent_hash: &'a str,
    root_hash: &'a str,
    position: u64,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Normalizer { config }
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    /// Normalize one document into per-table row batches plus the type
    /// observations for schema evolution. A top-level array is treated as
    /// the record stream itself: each element becomes an independent
    /// root-table row. A bare scalar becomes a single-column `value` row.
    pub fn normalize(&self, doc: Value, table_name: &str) -> Result<NormalizedDoc, NormalizeError> {
        let mut acc = Accumulator::default();
        match doc {
            Value::Array(elements) => {
                for element in elements {
                    self.extract_element(element, table_name, None, 0, &mut acc)?;
                }
            }
            other => {
                self.extract_element(other, table_name, None, 0, &mut acc)?;
            }
        }
        Ok(acc.finish())
    }

    /// Extract one array element (or the document itself) as a row of
    /// `table`. Non-object elements are wrapped under a single `value`
    /// field, which also routes arrays-of-arrays through the ordinary
    /// child-table path.
    fn extract_element(
        &self,
        element: Value,
        table: &str,
        link: Option<Linkage<'_>>,
        depth: usize,
        acc: &mut Accumulator,
    ) -> Result<(), NormalizeError> {
        let obj = match element {
            Value::Object(obj) => obj,
            other => {
                let mut wrapped = Map::new();
                wrapped.insert("value".to_string(), other);
                wrapped
            }
        };
        self.extract_row(obj, table, link, depth, acc)
    }

    fn extract_row(
        &self,
        obj: Map<String, Value>,
        table: &str,
        link: Option<Linkage<'_>>,
        depth: usize,
        acc: &mut Accumulator,
    ) -> Result<(), NormalizeError> {
        let mut data = Map::new();
        let mut arrays: Vec<(String, Vec<Value>)> = Vec::new();
        self.flatten_into(obj, "", table, &mut data, &mut arrays)?;

        // Generated identity columns live in the same namespace as data
        // columns; a field that lands on one is a conflict, not an overwrite.
        for name in data.keys() {
            if self.config.identity.contains(name) {
                return Err(NormalizeError::StructuralConflict {
                    table: table.to_string(),
                    column: name.clone(),
                });
            }
        }

        // The hash covers the row's own fields only; array children are
        // separate rows and never feed back into their parent's identity.
        let hash = record_hash(
            table,
            link.as_ref().map(|l| l.position),
            link.as_ref().map(|l| l.parent_hash),
            &data,
        );
        let root_hash = link
            .as_ref()
            .map(|l| l.root_hash.to_string())
            .unwrap_or_else(|| hash.clone());

        acc.observe(table, link.as_ref().map(|l| l.parent_table), &data);
        trace!(table, hash = %hash, fields = data.len(), "row extracted");
        acc.push(
            table,
            Row {
                data,
                record_hash: hash.clone(),
                parent_hash: link.as_ref().map(|l| l.parent_hash.to_string()),
                root_hash: root_hash.clone(),
                list_position: link.as_ref().map(|l| l.position),
            },
        );

        for (field, elements) in arrays {
            if depth >= self.config.max_depth {
                return Err(NormalizeError::DepthExceeded {
                    max_depth: self.config.max_depth,
                });
            }
            let child_table = format!("{}{}{}", table, self.config.table_separator, field);
            for (index, element) in elements.into_iter().enumerate() {
                self.extract_element(
                    element,
                    &child_table,
                    Some(Linkage {
                        parent_table: table,
                        parent_hash: &hash,
                        root_hash: &root_hash,
                        position: index as u64,
                    }),
                    depth + 1,
                    acc,
                )?;
            }
        }

        Ok(())
    }

    /// Flatten an object into row columns. Nested objects recurse with a
    /// path-joined prefix; arrays are set aside for child-table extraction;
    /// a name produced twice is a structural conflict.
    fn flatten_into(
        &self,
        obj: Map<String, Value>,
        prefix: &str,
        table: &str,
        data: &mut Map<String, Value>,
        arrays: &mut Vec<(String, Vec<Value>)>,
    ) -> Result<(), NormalizeError> {
        for (key, value) in obj {
            let name = if prefix.is_empty() {
                key
            } else {
                format!("{prefix}{}{key}", self.config.column_separator)
            };
            match value {
                Value::Object(inner) => {
                    self.flatten_into(inner, &name, table, data, arrays)?;
                }
                Value::Array(elements) => {
                    // Empty arrays produce no child rows and force no table.
                    if elements.is_empty() {
                        continue;
                    }
                    if arrays.iter().any(|(existing, _)| *existing == name) {
                        return Err(NormalizeError::StructuralConflict {
                            table: table.to_string(),
                            column: name,
                        });
                    }
                    arrays.push((name, elements));
                }
                scalar => {
                    if data.contains_key(&name) {
                        return Err(NormalizeError::StructuralConflict {
                            table: table.to_string(),
                            column: name,
                        });
                    }
                    data.insert(name, scalar);
                }
            }
        }
        Ok(())
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer::new(NormalizeConfig::default())
    }
}

#[derive(Default)]
struct Accumulator {
    tables: BTreeMap<String, Vec<Row>>,
    observed: BTreeMap<String, ObservedTable>,
}

#[derive(Default)]
struct ObservedTable {
    parent: Option<String>,
    columns: BTreeMap<String, Option<ColumnType>>,
}

impl Accumulator {
    fn push(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Record (column, inferred type) pairs for one row, merging with what
    /// earlier rows of the same table observed.
    fn observe(&mut self, table: &str, parent: Option<&str>, data: &Map<String, Value>) {
        let entry = self.observed.entry(table.to_string()).or_default();
        if entry.parent.is_none() {
            entry.parent = parent.map(str::to_string);
        }
        for (name, value) in data {
            let inferred = infer_type(value);
            let slot = entry.columns.entry(name.clone()).or_default();
            *slot = match (*slot, inferred) {
                (Some(a), Some(b)) => Some(merge_types(a, b)),
                (Some(a), None) => Some(a),
                (None, other) => other,
            };
        }
    }

    fn finish(self) -> NormalizedDoc {
        NormalizedDoc {
            tables: self.tables,
            observations: self
                .observed
                .into_iter()
                .map(|(table, observed)| TableObservation {
                    table,
                    parent: observed.parent,
                    columns: observed.columns.into_iter().collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(doc: Value) -> NormalizedDoc {
        Normalizer::default().normalize(doc, "json_doc").unwrap()
    }

    #[test]
    fn test_flat_document_single_row() {
        let out = normalize(json!({"id": 1, "name": "Ana"}));

        assert_eq!(out.tables.len(), 1);
        let rows = &out.tables["json_doc"];
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["name"], "Ana");
        assert_eq!(rows[0].parent_hash, None);
        assert_eq!(rows[0].root_hash, rows[0].record_hash);
        assert_eq!(rows[0].list_position, None);
    }

    #[test]
    fn test_nested_array_generates_child_table() {
        let out = normalize(json!({
            "name": "Ana", "age": 30, "id": 456,
            "children": [
                {"name": "Bill", "id": 625},
                {"name": "Elli", "id": 591}
            ]
        }));

        let parent = &out.tables["json_doc"][0];
        let children = &out.tables["json_doc__children"];
        assert_eq!(children.len(), 2);

        for (index, child) in children.iter().enumerate() {
            assert_eq!(child.parent_hash.as_deref(), Some(parent.record_hash.as_str()));
            assert_eq!(child.root_hash, parent.record_hash);
            assert_eq!(child.list_position, Some(index as u64));
        }
        assert_eq!(children[0].data["name"], "Bill");
        assert_eq!(children[1].data["name"], "Elli");
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let doc = json!({
            "id": 7,
            "tags": ["a", "b"],
            "meta": {"kind": "x"}
        });

        let first = normalize(doc.clone());
        let second = normalize(doc);

        for (table, rows) in &first.tables {
            let again = &second.tables[table];
            let hashes: Vec<_> = rows.iter().map(|r| &r.record_hash).collect();
            let again_hashes: Vec<_> = again.iter().map(|r| &r.record_hash).collect();
            assert_eq!(hashes, again_hashes);
        }
    }

    #[test]
    fn test_nested_object_flattens_into_same_row() {
        let out = normalize(json!({
            "id": 1,
            "address": {"city": "Berlin", "geo": {"lat": 52.5}}
        }));

        assert_eq!(out.tables.len(), 1);
        let row = &out.tables["json_doc"][0];
        assert_eq!(row.data["address__city"], "Berlin");
        assert_eq!(row.data["address__geo__lat"], 52.5);
    }

    #[test]
    fn test_array_under_nested_object() {
        let out = normalize(json!({
            "id": 1,
            "meta": {"labels": [{"k": "env", "v": "prod"}]}
        }));

        let labels = &out.tables["json_doc__meta__labels"];
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].data["k"], "env");

        let obs = out
            .observations
            .iter()
            .find(|o| o.table == "json_doc__meta__labels")
            .unwrap();
        assert_eq!(obs.parent.as_deref(), Some("json_doc"));
    }

    #[test]
    fn test_scalar_array_rows_use_value_column() {
        let out = normalize(json!({"id": 1, "tags": ["rust", "json"]}));

        let tags = &out.tables["json_doc__tags"];
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].data["value"], "rust");
        assert_eq!(tags[0].list_position, Some(0));
        assert_eq!(tags[1].data["value"], "json");
        assert_eq!(tags[1].list_position, Some(1));
    }

    #[test]
    fn test_array_of_arrays() {
        let out = normalize(json!({"grid": [[1, 2], [3]]}));

        // Each inner array gets a wrapper row, its elements land one level
        // deeper under a `value`-named child table.
        let wrappers = &out.tables["json_doc__grid"];
        assert_eq!(wrappers.len(), 2);
        let cells = &out.tables["json_doc__grid__value"];
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[2].data["value"], 3);
        assert_eq!(cells[2].parent_hash.as_deref(), Some(wrappers[1].record_hash.as_str()));
    }

    #[test]
    fn test_empty_array_produces_nothing() {
        let out = normalize(json!({"id": 1, "children": []}));
        assert_eq!(out.tables.len(), 1);
        assert!(!out.tables.contains_key("json_doc__children"));
    }

    #[test]
    fn test_null_recorded_without_observation() {
        let out = normalize(json!({"id": 1, "note": null}));

        let row = &out.tables["json_doc"][0];
        assert_eq!(row.data["note"], Value::Null);

        let obs = &out.observations[0];
        let note = obs.columns.iter().find(|(n, _)| n == "note").unwrap();
        assert_eq!(note.1, None);
        let id = obs.columns.iter().find(|(n, _)| n == "id").unwrap();
        assert_eq!(id.1, Some(ColumnType::Integer));
    }

    #[test]
    fn test_flattening_collision_is_reported() {
        let err = Normalizer::default()
            .normalize(json!({"a": {"b": 1}, "a__b": 2}), "json_doc")
            .unwrap_err();

        assert_eq!(
            err,
            NormalizeError::StructuralConflict {
                table: "json_doc".to_string(),
                column: "a__b".to_string(),
            }
        );
    }

    #[test]
    fn test_identity_column_collision_is_reported() {
        let err = Normalizer::default()
            .normalize(json!({"record_hash": "spoofed"}), "json_doc")
            .unwrap_err();

        assert!(matches!(
            err,
            NormalizeError::StructuralConflict { column, .. } if column == "record_hash"
        ));
    }

    #[test]
    fn test_top_level_array_is_a_stream_of_root_rows() {
        let out = normalize(json!([
            {"id": 1},
            {"id": 2}
        ]));

        let rows = &out.tables["json_doc"];
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.parent_hash, None);
            assert_eq!(row.list_position, None);
        }
        assert_ne!(rows[0].record_hash, rows[1].record_hash);
    }

    #[test]
    fn test_depth_limit() {
        let mut config = NormalizeConfig::default();
        config.max_depth = 1;
        let err = Normalizer::new(config)
            .normalize(
                json!({"a": [{"b": [{"c": 1}]}]}),
                "json_doc",
            )
            .unwrap_err();

        assert_eq!(err, NormalizeError::DepthExceeded { max_depth: 1 });
    }

    #[test]
    fn test_observation_types_merge_across_rows() {
        let out = normalize(json!([
            {"score": 1},
            {"score": 1.5}
        ]));

        let obs = &out.observations[0];
        let score = obs.columns.iter().find(|(n, _)| n == "score").unwrap();
        assert_eq!(score.1, Some(ColumnType::Float));
    }
}
