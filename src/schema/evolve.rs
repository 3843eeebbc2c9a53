//! Schema evolution from normalization observations.
//!
//! Evolution is an explicit transition: the current schema goes in, an
//! updated schema (or a conflict) comes out, and the caller decides what
//! to do with either. Changes are monotonic within a run: tables and
//! columns only grow, types only widen along the sanctioned lattice.
//! Shrinking a schema is an external edit, never inferred.

use crate::error::SchemaError;
use crate::schema::infer::{is_widening, merge_types};
use crate::schema::{Column, ColumnType, IdentityColumns, Schema, Table};
use std::collections::btree_map::Entry;
use tracing::{debug, warn};

/// Everything the normalizer learned about one table from one document:
/// the parent link (for tables generated from nested arrays) and each
/// column with its inferred type, `None` when only nulls were seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableObservation {
    pub table: String,
    pub parent: Option<String>,
    pub columns: Vec<(String, Option<ColumnType>)>,
}

impl Schema {
    /// Apply a batch of observations, returning the evolved schema and
    /// leaving `self` untouched. Unknown tables are created with their
    /// identity columns seeded; unknown columns are appended nullable;
    /// known columns widen along the lattice. An observation the existing
    /// column cannot widen to returns [`SchemaError::TypeConflict`];
    /// this function never guesses on the caller's behalf.
    ///
    /// Idempotent: replaying the same batch yields an identical schema,
    /// and the version counter only moves when something changed.
    pub fn evolved(
        &self,
        observations: &[TableObservation],
        identity: &IdentityColumns,
    ) -> Result<Schema, SchemaError> {
        let mut next = self.clone();
        let mut changed = false;

        for obs in observations {
            let table = match next.tables.entry(obs.table.clone()) {
                Entry::Vacant(slot) => {
                    debug!(table = %obs.table, parent = ?obs.parent, "creating table");
                    changed = true;
                    let mut table = Table::new(&obs.table);
                    table.parent = obs.parent.clone();
                    table.columns = identity.table_columns(obs.parent.is_some());
                    slot.insert(table)
                }
                Entry::Occupied(slot) => slot.into_mut(),
            };

            for (name, inferred) in &obs.columns {
                // Null-only columns are deferred until a typed value shows
                // up; inferred columns are nullable from creation, so the
                // null itself needs no recording.
                let Some(observed) = *inferred else {
                    continue;
                };

                match table.column_mut(name) {
                    None => {
                        debug!(table = %obs.table, column = %name, ty = %observed, "adding column");
                        table.columns.push(Column::new(name, observed).nullable());
                        changed = true;
                    }
                    Some(column) if column.ty == observed => {}
                    Some(column) if is_widening(column.ty, observed) => {
                        let merged = merge_types(column.ty, observed);
                        if merged != column.ty {
                            debug!(
                                table = %obs.table,
                                column = %name,
                                from = %column.ty,
                                to = %merged,
                                "widening column type"
                            );
                            column.ty = merged;
                            changed = true;
                        }
                    }
                    Some(column) => {
                        warn!(
                            table = %obs.table,
                            column = %name,
                            existing = %column.ty,
                            observed = %observed,
                            "type conflict"
                        );
                        return Err(SchemaError::TypeConflict {
                            table: obs.table.clone(),
                            column: name.clone(),
                            existing: column.ty,
                            observed,
                        });
                    }
                }
            }
        }

        if changed {
            next.version += 1;
        }
        Ok(next)
    }
}
