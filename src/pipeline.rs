//! The extract → unpack → load driver.
//!
//! Ties the pieces together the way callers use them: stage raw documents,
//! normalize them into row batches while evolving the schema, then hand
//! the batches to the load orchestrator as a package. The schema is only
//! ever mutated here, between normalizer passes, never while a load is
//! executing against it.

use crate::error::{LoadError, PipelineError};
use crate::load::{DestinationGateway, FailedJob, Job, LoadId, LoadOrchestrator, LoadPackage};
use crate::normalize::{NormalizeConfig, Normalizer, Row};
use crate::schema::Schema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do when a single document cannot be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Abort the whole submission on the first bad document.
    #[default]
    Strict,
    /// Skip the offending document, record it in the report, continue
    /// with the rest of the stream.
    Permissive,
}

/// A document dropped during a permissive unpack.
#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub index: usize,
    pub table: String,
    pub reason: String,
}

/// Outcome of one unpack pass.
#[derive(Debug, Clone, Default)]
pub struct UnpackReport {
    pub documents: usize,
    pub rows: usize,
    pub skipped: Vec<SkippedDocument>,
}

/// Facade over normalizer, schema evolution, and load orchestration.
pub struct Pipeline {
    schema: Schema,
    mode: ErrorMode,
    normalizer: Normalizer,
    gateway: Arc<dyn DestinationGateway>,
    orchestrator: LoadOrchestrator,
    staged: Vec<(String, Value)>,
    pending: BTreeMap<String, Vec<Row>>,
}

impl Pipeline {
    pub fn new(schema_name: &str, gateway: Arc<dyn DestinationGateway>) -> Self {
        Self::with_schema(Schema::new(schema_name), gateway)
    }

    /// Start from an existing schema, e.g. one reloaded from YAML.
    pub fn with_schema(schema: Schema, gateway: Arc<dyn DestinationGateway>) -> Self {
        let config = NormalizeConfig::default();
        let orchestrator = LoadOrchestrator::new(gateway.clone(), config.identity.clone());
        Pipeline {
            schema,
            mode: ErrorMode::default(),
            normalizer: Normalizer::new(config),
            gateway,
            orchestrator,
            staged: Vec::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the normalization config. Call before any work is staged;
    /// the orchestrator is rebuilt so both sides agree on the identity
    /// column names.
    pub fn normalize_config(mut self, config: NormalizeConfig) -> Self {
        self.orchestrator = LoadOrchestrator::new(self.gateway.clone(), config.identity.clone());
        self.normalizer = Normalizer::new(config);
        self
    }

    /// Stage documents for the given root table. Returns how many were
    /// staged; nothing is normalized yet.
    pub fn extract<I>(&mut self, documents: I, table_name: &str) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        let before = self.staged.len();
        self.staged
            .extend(documents.into_iter().map(|doc| (table_name.to_string(), doc)));
        self.staged.len() - before
    }

    /// Normalize every staged document and fold the observations into the
    /// schema. In strict mode the first bad document aborts the whole
    /// submission and nothing is committed; in permissive mode bad
    /// documents are skipped and reported, and the rest land.
    pub fn unpack(&mut self) -> Result<UnpackReport, PipelineError> {
        let staged = std::mem::take(&mut self.staged);
        let mut schema = self.schema.clone();
        let mut batch: BTreeMap<String, Vec<Row>> = BTreeMap::new();
        let mut report = UnpackReport::default();

        for (index, (table, doc)) in staged.into_iter().enumerate() {
            let outcome = self
                .normalizer
                .normalize(doc, &table)
                .map_err(PipelineError::from)
                .and_then(|normalized| {
                    let evolved = schema
                        .evolved(&normalized.observations, &self.normalizer.config().identity)?;
                    Ok((normalized, evolved))
                });

            match outcome {
                Ok((normalized, evolved)) => {
                    schema = evolved;
                    report.documents += 1;
                    report.rows += normalized.row_count();
                    for (name, rows) in normalized.tables {
                        batch.entry(name).or_default().extend(rows);
                    }
                }
                Err(err) => match self.mode {
                    ErrorMode::Strict => return Err(err),
                    ErrorMode::Permissive => {
                        warn!(index, table = %table, error = %err, "skipping document");
                        report.skipped.push(SkippedDocument {
                            index,
                            table,
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }

        self.schema = schema;
        for (name, rows) in batch {
            self.pending.entry(name).or_default().extend(rows);
        }
        debug!(
            documents = report.documents,
            rows = report.rows,
            skipped = report.skipped.len(),
            "unpack finished"
        );
        Ok(report)
    }

    /// Package the pending row batches under a fresh load id, submit, and
    /// run. Job failures do not surface here; enumerate them afterwards
    /// with [`list_failed_jobs`](Self::list_failed_jobs).
    pub fn load(&mut self) -> Result<LoadId, PipelineError> {
        if self.pending.is_empty() {
            return Err(PipelineError::NothingToLoad);
        }
        let batches = std::mem::take(&mut self.pending);
        let package = LoadPackage::assemble(&self.schema, batches)?;
        let load_id = self.orchestrator.submit(package);
        self.orchestrator.run(&load_id)?;
        Ok(load_id)
    }

    pub fn list_completed_loads(&self) -> Vec<LoadId> {
        self.orchestrator.list_completed_loads()
    }

    pub fn list_failed_jobs(&self, load_id: &LoadId) -> Result<Vec<FailedJob>, LoadError> {
        self.orchestrator.list_failed_jobs(load_id)
    }

    pub fn jobs(&self, load_id: &LoadId) -> Result<Vec<Job>, LoadError> {
        self.orchestrator.jobs(load_id)
    }

    pub fn abandon(&self, load_id: &LoadId) -> Result<(), LoadError> {
        self.orchestrator.abandon(load_id)
    }

    pub fn resubmit_failed(&self, load_id: &LoadId) -> Result<Option<LoadId>, LoadError> {
        self.orchestrator.resubmit_failed(load_id)
    }

    /// Re-run a load whose jobs went back to pending after a transport
    /// failure.
    pub fn run(&self, load_id: &LoadId) -> Result<(), LoadError> {
        self.orchestrator.run(load_id)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::MemoryGateway;
    use serde_json::json;

    fn ana() -> Value {
        json!({
            "name": "Ana", "age": 30, "id": 456,
            "children": [
                {"name": "Bill", "id": 625},
                {"name": "Elli", "id": 591}
            ]
        })
    }

    #[test]
    fn test_extract_unpack_load_end_to_end() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut pipeline = Pipeline::new("example", gateway.clone());

        assert_eq!(pipeline.extract([ana()], "json_doc"), 1);
        let report = pipeline.unpack().unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.rows, 3);

        let load_id = pipeline.load().unwrap();
        assert_eq!(pipeline.list_completed_loads(), vec![load_id.clone()]);
        assert_eq!(pipeline.list_failed_jobs(&load_id).unwrap(), vec![]);

        let parents = gateway.rows("json_doc");
        assert_eq!(parents.len(), 1);
        let parent_hash = parents[0]["record_hash"].as_str().unwrap();

        let children = gateway.rows("json_doc__children");
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child["parent_hash"].as_str().unwrap(), parent_hash);
            assert_eq!(child["root_hash"].as_str().unwrap(), parent_hash);
        }
        let positions: Vec<u64> = {
            let mut p: Vec<u64> = children
                .iter()
                .map(|c| c["list_position"].as_u64().unwrap())
                .collect();
            p.sort_unstable();
            p
        };
        assert_eq!(positions, vec![0, 1]);
    }

    #[test]
    fn test_rerunning_the_same_document_is_idempotent() {
        let gateway = Arc::new(MemoryGateway::new());

        let first_hash = {
            let mut pipeline = Pipeline::new("example", gateway.clone());
            pipeline.extract([ana()], "json_doc");
            pipeline.unpack().unwrap();
            pipeline.load().unwrap();
            gateway.rows("json_doc")[0]["record_hash"]
                .as_str()
                .unwrap()
                .to_string()
        };

        // A separate run over identical input: same hashes, no duplicates.
        let mut pipeline = Pipeline::new("example", gateway.clone());
        pipeline.extract([ana()], "json_doc");
        pipeline.unpack().unwrap();
        pipeline.load().unwrap();

        let parents = gateway.rows("json_doc");
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0]["record_hash"].as_str().unwrap(), first_hash);
        assert_eq!(gateway.rows("json_doc__children").len(), 2);
    }

    #[test]
    fn test_strict_mode_aborts_the_submission() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut pipeline = Pipeline::new("example", gateway);

        pipeline.extract(
            [json!({"active": true}), json!({"active": "yes"})],
            "json_doc",
        );
        let err = pipeline.unpack().unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));

        // Nothing committed: the schema is untouched and nothing loads.
        assert!(pipeline.schema().table("json_doc").is_none());
        assert!(matches!(
            pipeline.load(),
            Err(PipelineError::NothingToLoad)
        ));
    }

    #[test]
    fn test_permissive_mode_skips_and_reports() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut pipeline =
            Pipeline::new("example", gateway.clone()).error_mode(ErrorMode::Permissive);

        pipeline.extract(
            [
                json!({"active": true, "id": 1}),
                json!({"active": "yes", "id": 2}),
                json!({"active": false, "id": 3}),
            ],
            "json_doc",
        );
        let report = pipeline.unpack().unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);

        pipeline.load().unwrap();
        assert_eq!(gateway.rows("json_doc").len(), 2);
    }

    #[test]
    fn test_load_without_rows() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut pipeline = Pipeline::new("example", gateway);
        assert!(matches!(
            pipeline.load(),
            Err(PipelineError::NothingToLoad)
        ));
    }

    #[test]
    fn test_schema_survives_yaml_round_trip_between_runs() {
        let gateway = Arc::new(MemoryGateway::new());
        let yaml = {
            let mut pipeline = Pipeline::new("example", gateway.clone());
            pipeline.extract([ana()], "json_doc");
            pipeline.unpack().unwrap();
            pipeline.schema().as_yaml(true).unwrap()
        };

        let restored = Schema::from_yaml(&yaml).unwrap();
        let mut pipeline = Pipeline::with_schema(restored, gateway);
        pipeline.extract([ana()], "json_doc");
        pipeline.unpack().unwrap();

        // Replaying identical observations changes nothing.
        let replayed = Schema::from_yaml(&yaml).unwrap();
        assert_eq!(pipeline.schema(), &replayed);
    }
}
