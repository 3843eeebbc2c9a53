//! Error taxonomy for normalization, schema evolution, and loading.
//!
//! Job-level load failures are deliberately absent here: a failed job is
//! recorded state on the load package, enumerated via
//! [`list_failed_jobs`](crate::load::LoadOrchestrator::list_failed_jobs),
//! and never raised while a load is running.

use crate::schema::ColumnType;
use thiserror::Error;

/// Schema evolution rejected an observation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A column was observed with a type the existing column cannot widen to.
    /// The caller decides whether to coerce, skip the document, or abort.
    #[error("type conflict on {table}.{column}: {existing} cannot accept {observed}")]
    TypeConflict {
        table: String,
        column: String,
        existing: ColumnType,
        observed: ColumnType,
    },
}

/// Normalization of a single document failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// Two fields flatten to the same column name, or a field collides with
    /// a generated identity column. Never resolved by overwriting.
    #[error("column {column:?} in table {table:?} is produced by more than one field")]
    StructuralConflict { table: String, column: String },

    /// Nesting deeper than the configured maximum.
    #[error("document exceeds maximum nesting depth {max_depth}")]
    DepthExceeded { max_depth: usize },
}

/// A single row the destination could not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub record_hash: String,
    pub message: String,
}

/// Destination-side failures, as seen through the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The destination rejected a table definition.
    #[error("destination rejected table definition: {0}")]
    Schema(String),

    /// The destination rejected specific rows. Isolated to the job that
    /// carried them; sibling jobs are unaffected.
    #[error("destination rejected {} row(s): {}", .failures.len(), summarize(.failures))]
    Rejected { failures: Vec<RowFailure> },

    /// Transport-level failure. The job stays pending and can be retried by
    /// re-running the load.
    #[error("destination unavailable: {0}")]
    Unavailable(String),
}

fn summarize(failures: &[RowFailure]) -> String {
    failures
        .first()
        .map(|f| f.message.clone())
        .unwrap_or_default()
}

/// Load bookkeeping errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("unknown load id {0}")]
    UnknownLoad(String),

    /// Not a failure: the package still has pending or running jobs.
    #[error("load {0} has jobs that have not reached a terminal state")]
    PackageIncomplete(String),

    /// A row batch references a table the schema does not define.
    #[error("no table definition for {table:?}")]
    MissingTableDefinition { table: String },
}

/// Umbrella error for the pipeline facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("nothing staged for loading; extract and unpack documents first")]
    NothingToLoad,
}
