use crate::error::LoadError;
use crate::normalize::Row;
use crate::schema::{Schema, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of one load package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadId(String);

impl LoadId {
    pub(crate) fn generate() -> Self {
        LoadId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rows destined for one table, together with the table definition the
/// destination should be brought up to.
#[derive(Debug, Clone)]
pub struct TableLoad {
    pub definition: Table,
    pub rows: Vec<Row>,
}

/// An immutable set of rows grouped by table under a single load id. Once
/// submitted it is never mutated; retrying failed tables produces a new
/// package that references the same rows.
#[derive(Debug, Clone)]
pub struct LoadPackage {
    load_id: LoadId,
    tables: BTreeMap<String, TableLoad>,
}

impl LoadPackage {
    /// Assemble a package from normalized row batches, snapshotting each
    /// table's definition out of the schema.
    pub fn assemble(
        schema: &Schema,
        batches: BTreeMap<String, Vec<Row>>,
    ) -> Result<LoadPackage, LoadError> {
        let mut tables = BTreeMap::new();
        for (name, rows) in batches {
            let definition = schema
                .table(&name)
                .ok_or_else(|| LoadError::MissingTableDefinition {
                    table: name.clone(),
                })?
                .clone();
            tables.insert(name, TableLoad { definition, rows });
        }
        Ok(LoadPackage {
            load_id: LoadId::generate(),
            tables,
        })
    }

    pub(crate) fn from_parts(load_id: LoadId, tables: BTreeMap<String, TableLoad>) -> Self {
        LoadPackage { load_id, tables }
    }

    pub fn load_id(&self) -> &LoadId {
        &self.load_id
    }

    pub fn tables(&self) -> &BTreeMap<String, TableLoad> {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }
}

/// Lifecycle of one job. Terminal states are never left; a retry is a new
/// job, not a resurrection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One unit of load work: one table within one package. Retained after it
/// reaches a terminal state so finished loads stay enumerable.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub load_id: LoadId,
    pub table: String,
    pub state: JobState,
    pub failure: Option<String>,
}

impl Job {
    pub(crate) fn new(load_id: &LoadId, table: &str) -> Self {
        Job {
            id: format!("{load_id}/{table}"),
            load_id: load_id.clone(),
            table: table.to_string(),
            state: JobState::Pending,
            failure: None,
        }
    }
}

/// A failed job and its captured message, as returned by failed-job
/// enumeration. An empty list means the whole package succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    pub job_id: String,
    pub table: String,
    pub message: String,
}
