use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Semantic column types. Closed set: values observed in documents always
/// infer to one of these, and type merging never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Text,
    Timestamp,
    Binary,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Names of the generated identity columns materialized on every loaded row.
///
/// The defaults are the durable contract consumers join on. The names are
/// configuration, not constants: destinations that already reserve one of
/// them can remap the whole block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityColumns {
    pub record_hash: String,
    pub parent_hash: String,
    pub root_hash: String,
    pub list_position: String,
    pub load_id: String,
}

impl Default for IdentityColumns {
    fn default() -> Self {
        IdentityColumns {
            record_hash: "record_hash".to_string(),
            parent_hash: "parent_hash".to_string(),
            root_hash: "root_hash".to_string(),
            list_position: "list_position".to_string(),
            load_id: "load_id".to_string(),
        }
    }
}

impl IdentityColumns {
    /// Whether `name` is one of the generated identity columns.
    pub fn contains(&self, name: &str) -> bool {
        name == self.record_hash
            || name == self.parent_hash
            || name == self.root_hash
            || name == self.list_position
            || name == self.load_id
    }

    /// The identity columns seeded into a new table. Child tables carry the
    /// parent-linkage and list-position columns in addition to the root set.
    pub fn table_columns(&self, child: bool) -> Vec<Column> {
        let mut columns = vec![
            Column::new(&self.record_hash, ColumnType::Text),
            Column::new(&self.root_hash, ColumnType::Text),
            Column::new(&self.load_id, ColumnType::Text),
        ];
        if child {
            columns.push(Column::new(&self.parent_hash, ColumnType::Text));
            columns.push(Column::new(&self.list_position, ColumnType::Integer));
        }
        columns
    }
}

/// A named table: ordered, append-only columns plus the parent table link
/// for tables generated from nested arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            parent: None,
            columns: Vec::new(),
        }
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }
}

// Column order records discovery order and carries no meaning; two tables
// with the same column set are the same table.
impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name || self.parent != other.parent {
            return false;
        }
        let ours: BTreeMap<&str, (&ColumnType, bool)> = self
            .columns
            .iter()
            .map(|c| (c.name.as_str(), (&c.ty, c.nullable)))
            .collect();
        let theirs: BTreeMap<&str, (&ColumnType, bool)> = other
            .columns
            .iter()
            .map(|c| (c.name.as_str(), (&c.ty, c.nullable)))
            .collect();
        ours == theirs
    }
}

impl Eq for Table {}

/// The full discovered schema: table definitions keyed by name, with a
/// version counter bumped on every evolution that changed something.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            version: 0,
            tables: BTreeMap::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Serialize to YAML. With `remove_defaults`, cosmetic defaults
    /// (`nullable: false`, `version: 0`) are omitted; the round trip is
    /// otherwise lossless.
    pub fn as_yaml(&self, remove_defaults: bool) -> Result<String, serde_yaml::Error> {
        let mut value = serde_yaml::to_value(self)?;
        if remove_defaults {
            strip_defaults(&mut value);
        }
        serde_yaml::to_string(&value)
    }

    pub fn from_yaml(text: &str) -> Result<Schema, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

// Semantic equality: identical table/column sets, regardless of the order
// documents happened to arrive in. Version is bookkeeping, not identity.
impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.tables == other.tables
    }
}

impl Eq for Schema {}

fn strip_defaults(value: &mut serde_yaml::Value) {
    let Some(root) = value.as_mapping_mut() else {
        return;
    };
    if root.get("version").and_then(serde_yaml::Value::as_u64) == Some(0) {
        root.remove("version");
    }
    let Some(tables) = root
        .get_mut("tables")
        .and_then(serde_yaml::Value::as_mapping_mut)
    else {
        return;
    };
    for (_, table) in tables.iter_mut() {
        let Some(columns) = table
            .as_mapping_mut()
            .and_then(|t| t.get_mut("columns"))
            .and_then(serde_yaml::Value::as_sequence_mut)
        else {
            continue;
        };
        for column in columns {
            if let Some(map) = column.as_mapping_mut() {
                if map.get("nullable").and_then(serde_yaml::Value::as_bool) == Some(false) {
                    map.remove("nullable");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let mut schema = Schema::new("example");
        let mut table = Table::new("docs");
        table.columns.push(Column::new("id", ColumnType::Integer));
        table
            .columns
            .push(Column::new("name", ColumnType::Text).nullable());
        schema.tables.insert("docs".to_string(), table);
        schema
    }

    #[test]
    fn test_equality_ignores_column_order() {
        let mut a = Table::new("t");
        a.columns.push(Column::new("x", ColumnType::Integer));
        a.columns.push(Column::new("y", ColumnType::Text));

        let mut b = Table::new("t");
        b.columns.push(Column::new("y", ColumnType::Text));
        b.columns.push(Column::new("x", ColumnType::Integer));

        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_respects_types() {
        let mut a = Table::new("t");
        a.columns.push(Column::new("x", ColumnType::Integer));

        let mut b = Table::new("t");
        b.columns.push(Column::new("x", ColumnType::Float));

        assert_ne!(a, b);
    }

    #[test]
    fn test_yaml_round_trip() {
        let schema = sample_schema();
        let yaml = schema.as_yaml(false).unwrap();
        let restored = Schema::from_yaml(&yaml).unwrap();
        assert_eq!(schema, restored);
    }

    #[test]
    fn test_yaml_round_trip_without_defaults() {
        let schema = sample_schema();
        let yaml = schema.as_yaml(true).unwrap();
        assert!(!yaml.contains("nullable: false"));
        assert!(yaml.contains("nullable: true"));

        let restored = Schema::from_yaml(&yaml).unwrap();
        assert_eq!(schema, restored);
    }

    #[test]
    fn test_identity_columns_for_child_table() {
        let ident = IdentityColumns::default();
        let root: Vec<String> = ident
            .table_columns(false)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(root, vec!["record_hash", "root_hash", "load_id"]);

        let child = ident.table_columns(true);
        assert!(child.iter().any(|c| c.name == "parent_hash"));
        assert!(child.iter().any(|c| c.name == "list_position"));
    }

    #[test]
    fn test_identity_contains() {
        let ident = IdentityColumns::default();
        assert!(ident.contains("record_hash"));
        assert!(!ident.contains("record"));
    }
}
