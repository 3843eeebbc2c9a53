//! The destination seam.
//!
//! [`DestinationGateway`] is the contract the orchestrator drives loads
//! through; a concrete warehouse client lives behind it, outside this
//! crate. Two implementations ship here: an in-memory destination for
//! tests and a directory-of-JSONL destination for local use. Both honor
//! the idempotency requirement: materializing a row is keyed on
//! `(table, record_hash)`, so replays overwrite instead of duplicating.

use crate::error::{GatewayError, RowFailure};
use crate::schema::{IdentityColumns, Table};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// What the load orchestrator needs from a destination.
pub trait DestinationGateway: Send + Sync {
    /// Bring the destination's definition of the table up to `table`,
    /// creating it if absent. Must be idempotent.
    fn ensure_table(&self, table: &Table) -> Result<(), GatewayError>;

    /// Materialize rows idempotently on `(table, record_hash)`: loading
    /// the same rows again is an overwrite, never a duplicate.
    fn load_rows(
        &self,
        table: &str,
        rows: &[Map<String, Value>],
        load_id: &str,
    ) -> Result<(), GatewayError>;

    /// Downstream inspection only; the load path never calls this.
    fn query(&self, _sql: &str) -> Result<Vec<Map<String, Value>>, GatewayError> {
        Err(GatewayError::Unavailable(
            "destination does not support queries".to_string(),
        ))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn hash_of(row: &Map<String, Value>, identity: &IdentityColumns) -> Result<String, RowFailure> {
    match row.get(&identity.record_hash).and_then(Value::as_str) {
        Some(hash) => Ok(hash.to_string()),
        None => Err(RowFailure {
            record_hash: String::new(),
            message: format!("row carries no {} column", identity.record_hash),
        }),
    }
}

/// Check that an incoming definition only grows the known one; returns the
/// merged definition.
fn merge_definition(known: &Table, incoming: &Table) -> Result<Table, GatewayError> {
    let mut merged = known.clone();
    for column in &incoming.columns {
        match merged.column_mut(&column.name) {
            None => merged.columns.push(column.clone()),
            Some(existing) if existing.ty == column.ty => {
                existing.nullable |= column.nullable;
            }
            Some(existing) => {
                return Err(GatewayError::Schema(format!(
                    "column {}.{} is {} at the destination, {} in the load",
                    incoming.name, column.name, existing.ty, column.ty
                )));
            }
        }
    }
    Ok(merged)
}

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, Table>,
    rows: BTreeMap<String, BTreeMap<String, Map<String, Value>>>,
}

/// In-memory destination with failure injection, for exercising the load
/// path hermetically.
pub struct MemoryGateway {
    identity: IdentityColumns,
    state: Mutex<MemoryState>,
    failing_tables: Mutex<BTreeSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::with_identity(IdentityColumns::default())
    }

    pub fn with_identity(identity: IdentityColumns) -> Self {
        MemoryGateway {
            identity,
            state: Mutex::new(MemoryState::default()),
            failing_tables: Mutex::new(BTreeSet::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent load into `table` fail row-by-row.
    pub fn fail_table(&self, table: &str) {
        lock(&self.failing_tables).insert(table.to_string());
    }

    /// Lift all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.failing_tables).clear();
    }

    /// Simulate a transport outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of a table's rows, ordered by record hash.
    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        lock(&self.state)
            .rows
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        lock(&self.state).tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        lock(&self.state).tables.keys().cloned().collect()
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationGateway for MemoryGateway {
    fn ensure_table(&self, table: &Table) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("destination offline".to_string()));
        }
        let mut state = lock(&self.state);
        let merged = match state.tables.get(&table.name) {
            Some(known) => merge_definition(known, table)?,
            None => table.clone(),
        };
        state.tables.insert(table.name.clone(), merged);
        Ok(())
    }

    fn load_rows(
        &self,
        table: &str,
        rows: &[Map<String, Value>],
        _load_id: &str,
    ) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("destination offline".to_string()));
        }
        if lock(&self.failing_tables).contains(table) {
            let failures = rows
                .iter()
                .map(|row| RowFailure {
                    record_hash: hash_of(row, &self.identity).unwrap_or_default(),
                    message: format!("destination rejected row for table {table}"),
                })
                .collect();
            return Err(GatewayError::Rejected { failures });
        }

        let mut state = lock(&self.state);
        let stored = state.rows.entry(table.to_string()).or_default();
        let mut failures = Vec::new();
        for row in rows {
            match hash_of(row, &self.identity) {
                Ok(hash) => {
                    stored.insert(hash, row.clone());
                }
                Err(failure) => failures.push(failure),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Rejected { failures })
        }
    }
}

/// Destination that materializes each table as a JSONL file in a
/// directory, with an upsert on record hash. Survives process restarts:
/// existing files are re-indexed on open, so a later run re-loading the
/// same content rewrites rows instead of appending duplicates.
pub struct DirectoryGateway {
    dir: PathBuf,
    identity: IdentityColumns,
    index: Mutex<BTreeMap<String, BTreeMap<String, Map<String, Value>>>>,
}

impl DirectoryGateway {
    pub fn open<P: AsRef<Path>>(dir: P, identity: IdentityColumns) -> Result<Self, GatewayError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(dir.join("_schemas")).map_err(io_unavailable)?;

        let mut index: BTreeMap<String, BTreeMap<String, Map<String, Value>>> = BTreeMap::new();
        for entry in std::fs::read_dir(&dir).map_err(io_unavailable)? {
            let path = entry.map_err(io_unavailable)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(table) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let text = std::fs::read_to_string(&path).map_err(io_unavailable)?;
            let mut rows = BTreeMap::new();
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let row: Map<String, Value> = serde_json::from_str(line)
                    .map_err(|e| GatewayError::Schema(format!("corrupt row in {table}: {e}")))?;
                if let Ok(hash) = hash_of(&row, &identity) {
                    rows.insert(hash, row);
                }
            }
            index.insert(table, rows);
        }

        Ok(DirectoryGateway {
            dir,
            identity,
            index: Mutex::new(index),
        })
    }

    fn schema_path(&self, table: &str) -> PathBuf {
        self.dir.join("_schemas").join(format!("{table}.yml"))
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.jsonl"))
    }

    fn write_table(
        &self,
        table: &str,
        rows: &BTreeMap<String, Map<String, Value>>,
    ) -> Result<(), GatewayError> {
        let mut out = String::new();
        for row in rows.values() {
            let line = serde_json::to_string(row)
                .map_err(|e| GatewayError::Schema(format!("unserializable row: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        let tmp = self.dir.join(format!(".{table}.jsonl.tmp"));
        std::fs::write(&tmp, out).map_err(io_unavailable)?;
        std::fs::rename(&tmp, self.table_path(table)).map_err(io_unavailable)?;
        Ok(())
    }
}

fn io_unavailable(err: std::io::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

impl DestinationGateway for DirectoryGateway {
    fn ensure_table(&self, table: &Table) -> Result<(), GatewayError> {
        let path = self.schema_path(&table.name);
        let merged = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(io_unavailable)?;
            let known: Table = serde_yaml::from_str(&text)
                .map_err(|e| GatewayError::Schema(format!("corrupt table definition: {e}")))?;
            merge_definition(&known, table)?
        } else {
            table.clone()
        };
        let text = serde_yaml::to_string(&merged)
            .map_err(|e| GatewayError::Schema(format!("unserializable table definition: {e}")))?;
        std::fs::write(&path, text).map_err(io_unavailable)?;
        Ok(())
    }

    fn load_rows(
        &self,
        table: &str,
        rows: &[Map<String, Value>],
        _load_id: &str,
    ) -> Result<(), GatewayError> {
        let mut index = lock(&self.index);
        let stored = index.entry(table.to_string()).or_default();
        let mut failures = Vec::new();
        for row in rows {
            match hash_of(row, &self.identity) {
                Ok(hash) => {
                    stored.insert(hash, row.clone());
                }
                Err(failure) => failures.push(failure),
            }
        }
        self.write_table(table, stored)?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::Rejected { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use serde_json::json;

    fn row(hash: &str, value: Value) -> Map<String, Value> {
        let mut map = match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        };
        map.insert("record_hash".to_string(), Value::String(hash.to_string()));
        map
    }

    fn docs_table() -> Table {
        let mut table = Table::new("docs");
        table.columns.push(Column::new("id", ColumnType::Integer));
        table
    }

    #[test]
    fn test_memory_gateway_upserts_on_record_hash() {
        let gateway = MemoryGateway::new();
        gateway.ensure_table(&docs_table()).unwrap();

        let rows = vec![row("h1", json!({"id": 1}))];
        gateway.load_rows("docs", &rows, "load-1").unwrap();
        gateway.load_rows("docs", &rows, "load-2").unwrap();

        assert_eq!(gateway.rows("docs").len(), 1);
    }

    #[test]
    fn test_memory_gateway_rejects_incompatible_redefinition() {
        let gateway = MemoryGateway::new();
        gateway.ensure_table(&docs_table()).unwrap();

        let mut changed = Table::new("docs");
        changed.columns.push(Column::new("id", ColumnType::Boolean));

        let err = gateway.ensure_table(&changed).unwrap_err();
        assert!(matches!(err, GatewayError::Schema(_)));
    }

    #[test]
    fn test_memory_gateway_failure_injection() {
        let gateway = MemoryGateway::new();
        gateway.fail_table("docs");

        let err = gateway
            .load_rows("docs", &[row("h1", json!({}))], "load-1")
            .unwrap_err();
        match err {
            GatewayError::Rejected { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].record_hash, "h1");
            }
            other => panic!("expected rejection, got {other}"),
        }
    }

    #[test]
    fn test_directory_gateway_round_trips_rows() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = DirectoryGateway::open(dir.path(), IdentityColumns::default()).unwrap();
        gateway.ensure_table(&docs_table()).unwrap();
        gateway
            .load_rows("docs", &[row("h1", json!({"id": 1}))], "load-1")
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("docs.jsonl")).unwrap();
        assert!(text.contains("\"record_hash\":\"h1\""));
    }

    #[test]
    fn test_directory_gateway_is_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![row("h1", json!({"id": 1}))];
        {
            let gateway = DirectoryGateway::open(dir.path(), IdentityColumns::default()).unwrap();
            gateway.load_rows("docs", &rows, "load-1").unwrap();
        }
        {
            let gateway = DirectoryGateway::open(dir.path(), IdentityColumns::default()).unwrap();
            gateway.load_rows("docs", &rows, "load-2").unwrap();
        }

        let text = std::fs::read_to_string(dir.path().join("docs.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
