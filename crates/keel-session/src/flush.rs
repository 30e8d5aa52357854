//! Unit-of-work flush planning and execution.
//!
//! A flush runs in a fixed order:
//!
//! 1. **DELETE** - Deleted entries, so foreign keys are released first
//! 2. **INSERT** - Added entries
//! 3. **UPDATE** - Modified entries, then Unchanged entries whose fields
//!    differ from their snapshot
//!
//! Within each group entries run in tracking order. UPDATE sets only the
//! changed columns; an entry with nothing changed produces no statement.
//! The first failing statement aborts the flush.

use crate::change_tracker::ChangeTracker;
use crate::entry::{ChangedFields, EntityEntry};
use keel_core::{Dialect, EntityState, Error, FlushError, Result, TransactionOps, Value};
use keel_query::{DeleteBuilder, InsertBuilder, UpdateBuilder};
use std::sync::Arc;

/// A single statement the flush will run for one entry.
#[derive(Debug)]
pub enum PendingOp {
    /// DELETE by persisted key.
    Delete { entry: Arc<EntityEntry>, sql: String, params: Vec<Value> },
    /// INSERT of every field, less an unset key.
    Insert {
        entry: Arc<EntityEntry>,
        sql: String,
        params: Vec<Value>,
        /// The store assigns the key; read it back after the insert.
        generates_key: bool,
        /// The key comes back as a RETURNING row rather than via `last_insert_id`.
        returning: bool,
    },
    /// UPDATE of the changed fields only.
    Update {
        entry: Arc<EntityEntry>,
        sql: String,
        params: Vec<Value>,
        changed: ChangedFields,
    },
}

impl PendingOp {
    pub fn entry(&self) -> &Arc<EntityEntry> {
        match self {
            PendingOp::Delete { entry, .. }
            | PendingOp::Insert { entry, .. }
            | PendingOp::Update { entry, .. } => entry,
        }
    }

    pub fn sql(&self) -> &str {
        match self {
            PendingOp::Delete { sql, .. }
            | PendingOp::Insert { sql, .. }
            | PendingOp::Update { sql, .. } => sql,
        }
    }

    pub fn params(&self) -> &[Value] {
        match self {
            PendingOp::Delete { params, .. }
            | PendingOp::Insert { params, .. }
            | PendingOp::Update { params, .. } => params,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, PendingOp::Delete { .. })
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, PendingOp::Insert { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self, PendingOp::Update { .. })
    }

    /// Wrap a failure of this op's statement with the entry that caused it.
    fn failure(&self, applied_rows: u64, source: Error) -> Error {
        let entry = self.entry();
        Error::Flush(FlushError {
            entity: entry.shape(),
            key: entry.identity_key().to_string(),
            state: entry.state(),
            applied_rows,
            source: Box::new(source),
        })
    }
}

/// Outcome of executing a flush plan.
#[derive(Debug, Default)]
pub struct FlushResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Sum of rows affected across every statement.
    pub affected_rows: u64,
    /// Keys written into entities by inserts, with the value each replaced.
    assigned_keys: Vec<(Arc<EntityEntry>, Value)>,
}

impl FlushResult {
    /// Total number of statements run.
    pub fn statements(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    /// Put back the keys inserts wrote into entities.
    ///
    /// Used when the transaction the flush ran in does not commit.
    pub fn revert_keys(&self) {
        for (entry, previous) in self.assigned_keys.iter().rev() {
            if let Err(e) = entry.set_primary_key(previous.clone()) {
                tracing::warn!(
                    key = %entry.identity_key(),
                    error = %e,
                    "Failed to restore primary key after aborted flush"
                );
            }
        }
    }
}

/// Ordered statements for one flush.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Delete operations, run first.
    pub deletes: Vec<PendingOp>,
    /// Insert operations.
    pub inserts: Vec<PendingOp>,
    /// Update operations, Modified entries before dirty Unchanged ones.
    pub updates: Vec<PendingOp>,
}

impl FlushPlan {
    /// Build the plan from the tracker's current entries.
    ///
    /// This does not run change detection; dirty Unchanged entries are
    /// picked up by the final UPDATE group either way.
    #[tracing::instrument(level = "debug", skip(tracker))]
    pub fn build(tracker: &ChangeTracker, dialect: Dialect) -> Result<Self> {
        let mut plan = Self::default();

        for entry in tracker.entries_by_state(EntityState::Deleted) {
            let (sql, params) = DeleteBuilder::new(entry.descriptor(), entry.persisted_key())
                .build_with_dialect(dialect)
                .map_err(|e| plan_failure(&entry, e))?;
            plan.deletes.push(PendingOp::Delete { entry, sql, params });
        }

        for entry in tracker.entries_by_state(EntityState::Added) {
            let insert = InsertBuilder::new(entry.descriptor(), entry.values());
            let generates_key = insert.generates_key();
            let (sql, params) = insert
                .build_with_dialect(dialect)
                .map_err(|e| plan_failure(&entry, e))?;
            plan.inserts.push(PendingOp::Insert {
                entry,
                sql,
                params,
                generates_key,
                returning: generates_key && dialect.supports_returning(),
            });
        }

        let modified = tracker.entries_by_state(EntityState::Modified);
        let dirty_unchanged = tracker
            .entries_by_state(EntityState::Unchanged)
            .into_iter()
            .filter(|e| e.has_changes());
        for entry in modified.into_iter().chain(dirty_unchanged) {
            let changed = entry.changed_fields();
            let built = UpdateBuilder::new(entry.descriptor(), changed.clone(), entry.persisted_key())
                .build_with_dialect(dialect)
                .map_err(|e| plan_failure(&entry, e))?;
            if let Some((sql, params)) = built {
                plan.updates.push(PendingOp::Update {
                    entry,
                    sql,
                    params,
                    changed,
                });
            }
        }

        tracing::debug!(
            deletes = plan.deletes.len(),
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            "Built flush plan"
        );
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }

    /// Total number of statements in the plan.
    pub fn len(&self) -> usize {
        self.deletes.len() + self.inserts.len() + self.updates.len()
    }

    /// Every op in execution order.
    pub fn ops(&self) -> impl Iterator<Item = &PendingOp> {
        self.deletes
            .iter()
            .chain(&self.inserts)
            .chain(&self.updates)
    }

    /// Run the plan inside `tx`.
    ///
    /// Generated keys are written into their entities as inserts succeed.
    /// On failure they are reverted and a [`FlushError`] naming the failing
    /// entry is returned; ending the transaction is left to the caller.
    #[tracing::instrument(level = "info", skip(self, tx))]
    pub fn execute<T: TransactionOps>(&self, tx: &T) -> Result<FlushResult> {
        tracing::info!(
            deletes = self.deletes.len(),
            inserts = self.inserts.len(),
            updates = self.updates.len(),
            "Executing flush plan"
        );
        let start = std::time::Instant::now();
        let mut result = FlushResult::default();

        for op in self.ops() {
            if let Err(e) = Self::execute_op(tx, op, &mut result) {
                tracing::warn!(
                    sql = op.sql(),
                    key = %op.entry().identity_key(),
                    applied_rows = result.affected_rows,
                    error = %e,
                    "Flush statement failed"
                );
                result.revert_keys();
                return Err(op.failure(result.affected_rows, e));
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            affected_rows = result.affected_rows,
            "Flush complete"
        );
        Ok(result)
    }

    fn execute_op<T: TransactionOps>(tx: &T, op: &PendingOp, result: &mut FlushResult) -> Result<()> {
        tracing::trace!(sql = op.sql(), params = op.params().len(), "Executing flush statement");
        match op {
            PendingOp::Delete { sql, params, .. } => {
                result.affected_rows += tx.execute(sql, params)?;
                result.deleted += 1;
            }
            PendingOp::Update { sql, params, .. } => {
                result.affected_rows += tx.execute(sql, params)?;
                result.updated += 1;
            }
            PendingOp::Insert {
                entry,
                sql,
                params,
                generates_key,
                returning,
            } => {
                let generated = if *returning {
                    let rows = tx.query(sql, params)?;
                    result.affected_rows += rows.len() as u64;
                    let key = rows.first().and_then(|row| row.get(0)).cloned();
                    Some(key.ok_or_else(|| Error::query(sql.as_str(), "INSERT returned no generated key"))?)
                } else {
                    result.affected_rows += tx.execute(sql, params)?;
                    if *generates_key {
                        tx.last_insert_id()?.map(Value::BigInt)
                    } else {
                        None
                    }
                };
                result.inserted += 1;

                match generated {
                    Some(key) => {
                        let previous = entry.primary_key();
                        entry.set_primary_key(key)?;
                        result.assigned_keys.push((Arc::clone(entry), previous));
                    }
                    None if *generates_key => tracing::warn!(
                        shape = entry.shape(),
                        "Store did not report a generated key; entity key left unset"
                    ),
                    None => {}
                }
            }
        }
        Ok(())
    }
}

fn plan_failure(entry: &EntityEntry, source: Error) -> Error {
    Error::Flush(FlushError {
        entity: entry.shape(),
        key: entry.identity_key().to_string(),
        state: entry.state(),
        applied_rows: 0,
        source: Box::new(source),
    })
}
