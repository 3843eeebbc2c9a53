//! Document normalization: nested JSON in, flat relational row batches out.
//!
//! Nested objects flatten into their row under path-joined column names;
//! nested arrays generate child tables linked by content hashes. The
//! output is arena-style: independent per-table row vectors, not a live
//! object graph.

pub mod hash;
pub mod normalizer;
pub mod types;
pub mod writer;

pub use hash::record_hash;
pub use normalizer::Normalizer;
pub use types::{NormalizeConfig, NormalizedDoc, Row};
pub use writer::{StreamWriter, TableWriter};
