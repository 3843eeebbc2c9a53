//! Job-tracked loading of normalized row batches into a destination.
//!
//! A load package is an immutable set of rows under one load id; each of
//! its tables becomes one job with its own terminal outcome. Finishing
//! and succeeding are distinct: a package whose jobs all reached a
//! terminal state is "completed" even when some of them failed, and the
//! failures are enumerated rather than thrown.

pub mod gateway;
pub mod orchestrator;
pub mod types;

pub use gateway::{DestinationGateway, DirectoryGateway, MemoryGateway};
pub use orchestrator::LoadOrchestrator;
pub use types::{FailedJob, Job, JobState, LoadId, LoadPackage, TableLoad};
