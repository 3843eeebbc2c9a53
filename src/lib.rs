//! # Ingot - relational loading for nested JSON
//!
//! A unified library for normalizing arbitrary nested JSON documents into
//! flat relational tables with content-derived identity, and loading those
//! tables into a destination through a job-tracked, partially-retryable
//! pipeline.
//!
//! ## Modules
//!
//! - **normalize**: flatten nested documents into parent/child row batches
//! - **schema**: typed table model, inference, and monotonic evolution
//! - **load**: packages, jobs, and the destination gateway seam
//! - **pipeline**: the extract → unpack → load facade
//!
//! ## Quick Start
//!
//! ### Normalization
//!
//! ```rust
//! use ingot::normalize::Normalizer;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let doc = json!({
//!     "id": 456,
//!     "name": "Ana",
//!     "children": [
//!         {"id": 625, "name": "Bill"},
//!         {"id": 591, "name": "Elli"}
//!     ]
//! });
//!
//! let normalized = Normalizer::default().normalize(doc, "json_doc")?;
//!
//! // One parent row, two child rows linked back to it by content hash.
//! assert_eq!(normalized.tables["json_doc"].len(), 1);
//! assert_eq!(normalized.tables["json_doc__children"].len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ### The full pipeline
//!
//! ```rust
//! use ingot::load::MemoryGateway;
//! use ingot::pipeline::Pipeline;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let gateway = Arc::new(MemoryGateway::new());
//! let mut pipeline = Pipeline::new("example", gateway);
//!
//! pipeline.extract([json!({"id": 1, "tags": ["a", "b"]})], "docs");
//! pipeline.unpack()?;
//! let load_id = pipeline.load()?;
//!
//! // A load can finish with failed jobs without raising; ask.
//! assert!(pipeline.list_failed_jobs(&load_id)?.is_empty());
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::BufRead;

pub mod error;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod schema;

// Re-export commonly used types for convenience
pub use error::{GatewayError, LoadError, NormalizeError, PipelineError, SchemaError};
pub use load::{
    DestinationGateway, DirectoryGateway, FailedJob, Job, JobState, LoadId, LoadOrchestrator,
    LoadPackage, MemoryGateway,
};
pub use normalize::{NormalizeConfig, NormalizedDoc, Normalizer, Row};
pub use pipeline::{ErrorMode, Pipeline, UnpackReport};
pub use schema::{Column, ColumnType, IdentityColumns, Schema, Table, TableObservation};

/// Main entry point for streams: stage one NDJSON line per document into
/// the pipeline's root table. Returns the number of documents staged.
pub fn extract_ndjson<R: BufRead>(
    reader: R,
    pipeline: &mut Pipeline,
    table_name: &str,
) -> Result<usize> {
    let mut staged = 0;
    for line in reader.lines() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).context("Failed to parse JSON")?;
        staged += pipeline.extract([value], table_name);
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_extract_ndjson() {
        let input = b"{\"id\": 1}\n\n{\"id\": 2, \"tags\": [\"x\"]}\n" as &[u8];
        let gateway = Arc::new(MemoryGateway::new());
        let mut pipeline = Pipeline::new("example", gateway.clone());

        let staged = extract_ndjson(input, &mut pipeline, "docs").unwrap();
        assert_eq!(staged, 2);

        pipeline.unpack().unwrap();
        pipeline.load().unwrap();
        assert_eq!(gateway.rows("docs").len(), 2);
        assert_eq!(gateway.rows("docs__tags").len(), 1);
    }
}
