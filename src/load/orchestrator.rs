use crate::error::{GatewayError, LoadError};
use crate::load::gateway::DestinationGateway;
use crate::load::types::{FailedJob, Job, JobState, LoadId, LoadPackage, TableLoad};
use crate::schema::{IdentityColumns, Table};
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Drives submitted load packages to a terminal state.
///
/// One job per table per package. Jobs of the same package run
/// concurrently across tables; rows within a table are handed to the
/// gateway in order in a single call, so within-table ordering is
/// preserved. A job failure is captured on the job and never raised from
/// `run`; callers discover failures by enumeration.
pub struct LoadOrchestrator {
    gateway: Arc<dyn DestinationGateway>,
    identity: IdentityColumns,
    state: Mutex<OrchestratorState>,
}

#[derive(Default)]
struct OrchestratorState {
    packages: BTreeMap<LoadId, PackageRecord>,
    order: Vec<LoadId>,
}

struct PackageRecord {
    tables: BTreeMap<String, TableLoad>,
    jobs: BTreeMap<String, Job>,
    abandoned: bool,
}

struct JobWork {
    load_id: LoadId,
    table: String,
    definition: Table,
    rows: Vec<Map<String, Value>>,
}

enum JobOutcome {
    Completed,
    Failed(String),
    /// Transport failure: the job goes back to pending and a later `run`
    /// retries it.
    Retry,
}

fn lock(mutex: &Mutex<OrchestratorState>) -> MutexGuard<'_, OrchestratorState> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LoadOrchestrator {
    pub fn new(gateway: Arc<dyn DestinationGateway>, identity: IdentityColumns) -> Self {
        LoadOrchestrator {
            gateway,
            identity,
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    /// Register a package and create one pending job per table. Safe to
    /// call repeatedly with packages sharing record hashes: the gateway
    /// materializes idempotently on `(table, record_hash)`.
    pub fn submit(&self, package: LoadPackage) -> LoadId {
        let load_id = package.load_id().clone();
        let tables = package.tables().clone();
        let jobs = tables
            .keys()
            .map(|table| (table.clone(), Job::new(&load_id, table)))
            .collect();

        debug!(load_id = %load_id, tables = tables.len(), "package submitted");
        let mut state = lock(&self.state);
        state.packages.insert(
            load_id.clone(),
            PackageRecord {
                tables,
                jobs,
                abandoned: false,
            },
        );
        state.order.push(load_id.clone());
        load_id
    }

    /// Execute the package's pending jobs. Returns once every claimed job
    /// has finished; failures are recorded on the jobs, not raised. Jobs
    /// that hit a transport failure return to pending and are picked up
    /// by the next `run` of the same load.
    pub fn run(&self, load_id: &LoadId) -> Result<(), LoadError> {
        let work: Vec<JobWork> = {
            let mut state = lock(&self.state);
            let record = state
                .packages
                .get_mut(load_id)
                .ok_or_else(|| LoadError::UnknownLoad(load_id.to_string()))?;
            if record.abandoned {
                return Ok(());
            }

            let mut claimed = Vec::new();
            for (table, job) in record.jobs.iter_mut() {
                if job.state != JobState::Pending {
                    continue;
                }
                job.state = JobState::Running;
                let load = &record.tables[table];
                claimed.push(JobWork {
                    load_id: load_id.clone(),
                    table: table.clone(),
                    definition: load.definition.clone(),
                    rows: load
                        .rows
                        .iter()
                        .map(|row| row.materialize(&self.identity, Some(load_id.as_str())))
                        .collect(),
                });
            }
            claimed
        };

        let gateway = &self.gateway;
        let outcomes: Vec<(String, JobOutcome)> = work
            .into_par_iter()
            .map(|work| {
                let outcome = execute(gateway.as_ref(), &work);
                (work.table, outcome)
            })
            .collect();

        let mut state = lock(&self.state);
        let record = state
            .packages
            .get_mut(load_id)
            .ok_or_else(|| LoadError::UnknownLoad(load_id.to_string()))?;
        for (table, outcome) in outcomes {
            let Some(job) = record.jobs.get_mut(&table) else {
                continue;
            };
            match outcome {
                JobOutcome::Completed => {
                    debug!(job = %job.id, "job completed");
                    job.state = JobState::Completed;
                }
                JobOutcome::Failed(message) => {
                    warn!(job = %job.id, message = %message, "job failed");
                    job.state = JobState::Failed;
                    job.failure = Some(message);
                }
                JobOutcome::Retry => {
                    job.state = JobState::Pending;
                }
            }
        }
        Ok(())
    }

    /// Mark a package abandoned: pending jobs fail immediately with an
    /// abandonment message, in-flight jobs are left to finish.
    pub fn abandon(&self, load_id: &LoadId) -> Result<(), LoadError> {
        let mut state = lock(&self.state);
        let record = state
            .packages
            .get_mut(load_id)
            .ok_or_else(|| LoadError::UnknownLoad(load_id.to_string()))?;
        record.abandoned = true;
        for job in record.jobs.values_mut() {
            if job.state == JobState::Pending {
                job.state = JobState::Failed;
                job.failure = Some("load abandoned before execution".to_string());
            }
        }
        Ok(())
    }

    /// Build and submit a new package carrying the rows of this package's
    /// failed tables. The old jobs keep their terminal state; the new
    /// package gets fresh pending jobs. `None` when nothing failed.
    pub fn resubmit_failed(&self, load_id: &LoadId) -> Result<Option<LoadId>, LoadError> {
        let retry_tables: BTreeMap<String, TableLoad> = {
            let state = lock(&self.state);
            let record = state
                .packages
                .get(load_id)
                .ok_or_else(|| LoadError::UnknownLoad(load_id.to_string()))?;
            record
                .jobs
                .iter()
                .filter(|(_, job)| job.state == JobState::Failed)
                .map(|(table, _)| (table.clone(), record.tables[table].clone()))
                .collect()
        };

        if retry_tables.is_empty() {
            return Ok(None);
        }
        let package = LoadPackage::from_parts(LoadId::generate(), retry_tables);
        Ok(Some(self.submit(package)))
    }

    /// Loads whose jobs have all reached a terminal state, in submission
    /// order. "Completed" means finished processing, not succeeded: a
    /// package with failed jobs is listed and must be inspected.
    pub fn list_completed_loads(&self) -> Vec<LoadId> {
        let state = lock(&self.state);
        state
            .order
            .iter()
            .filter(|id| {
                state.packages[id]
                    .jobs
                    .values()
                    .all(|job| job.state.is_terminal())
            })
            .cloned()
            .collect()
    }

    /// The failed jobs of a finished package with their captured messages;
    /// empty means full success. A package that is still processing is a
    /// distinct signal, not a failure.
    pub fn list_failed_jobs(&self, load_id: &LoadId) -> Result<Vec<FailedJob>, LoadError> {
        let state = lock(&self.state);
        let record = state
            .packages
            .get(load_id)
            .ok_or_else(|| LoadError::UnknownLoad(load_id.to_string()))?;
        if record.jobs.values().any(|job| !job.state.is_terminal()) {
            return Err(LoadError::PackageIncomplete(load_id.to_string()));
        }
        Ok(record
            .jobs
            .values()
            .filter(|job| job.state == JobState::Failed)
            .map(|job| FailedJob {
                job_id: job.id.clone(),
                table: job.table.clone(),
                message: job.failure.clone().unwrap_or_default(),
            })
            .collect())
    }

    /// All jobs of a package, for audit.
    pub fn jobs(&self, load_id: &LoadId) -> Result<Vec<Job>, LoadError> {
        let state = lock(&self.state);
        state
            .packages
            .get(load_id)
            .map(|record| record.jobs.values().cloned().collect())
            .ok_or_else(|| LoadError::UnknownLoad(load_id.to_string()))
    }
}

fn execute(gateway: &dyn DestinationGateway, work: &JobWork) -> JobOutcome {
    let result = gateway
        .ensure_table(&work.definition)
        .and_then(|()| gateway.load_rows(&work.table, &work.rows, work.load_id.as_str()));
    match result {
        Ok(()) => JobOutcome::Completed,
        Err(GatewayError::Unavailable(message)) => {
            warn!(table = %work.table, message = %message, "destination unavailable, job stays pending");
            JobOutcome::Retry
        }
        Err(err) => JobOutcome::Failed(err.to_string()),
    }
}
