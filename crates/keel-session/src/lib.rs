//! Change tracking and unit-of-work persistence for Keel.
//!
//! `keel-session` is the **stateful layer**. A [`Database`] owns a
//! connection and a [`ChangeTracker`]; entities loaded through it or
//! registered with it are tracked, and [`Database::save_changes`] writes
//! every pending change in one transaction.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one tracked entry per `(shape, primary key)`, or per
//!   instance while the key is unset.
//! - **Change tracking**: snapshots taken at load time are diffed field by
//!   field to find what changed.
//! - **Unit of work**: DELETE, then INSERT, then UPDATE, committed or rolled
//!   back as a whole.
//!
//! # Concurrency
//!
//! `Database` is `Send + Sync` and may be shared across threads. The
//! tracker's map is guarded by a lock, but flushes are not serialized:
//! callers must not run two `save_changes` calls concurrently over
//! overlapping entities, and must not hold an entity's write guard while
//! calling into the database for that entity.
//!
//! # Example
//!
//! ```ignore
//! let db = Database::new(conn);
//!
//! let patient = db.query::<Patient>().find(7)?.expect("exists");
//! write(&patient).age += 1;
//!
//! db.add(&entity_ref(Patient::new("Bea", 30)));
//! let affected = db.save_changes()?;
//! ```

pub mod change_tracker;
pub mod entry;
pub mod flush;
pub mod identity;
pub mod query;

pub use change_tracker::ChangeTracker;
pub use entry::{ChangedFields, EntityEntry, OriginalValues};
pub use flush::{FlushPlan, FlushResult, PendingOp};
pub use identity::{
    EntityReadGuard, EntityRef, EntityWriteGuard, IdentityKey, KeyValue, entity_ref, read, write,
};
pub use query::{DbSet, Query};

use keel_core::{Connection, Dialect, Entity, EntityState, Result, TransactionOps};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Database Configuration
// ============================================================================

/// Configuration for [`Database`] behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Whether queries track their results unless told otherwise.
    pub track_queries_by_default: bool,
    /// Whether `save_changes` sweeps for changed Unchanged entries first.
    pub auto_detect_changes: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            track_queries_by_default: true,
            auto_detect_changes: true,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `track_queries_by_default` (builder pattern).
    #[must_use]
    pub fn track_queries_by_default(mut self, value: bool) -> Self {
        self.track_queries_by_default = value;
        self
    }

    /// Set `auto_detect_changes` (builder pattern).
    #[must_use]
    pub fn auto_detect_changes(mut self, value: bool) -> Self {
        self.auto_detect_changes = value;
        self
    }
}

// ============================================================================
// Database
// ============================================================================

/// A connection plus the change tracker for everything loaded through it.
#[derive(Debug)]
pub struct Database<C: Connection> {
    conn: C,
    tracker: ChangeTracker,
    config: DatabaseConfig,
}

impl<C: Connection> Database<C> {
    /// Create a database handle with the default configuration.
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, DatabaseConfig::default())
    }

    pub fn with_config(conn: C, config: DatabaseConfig) -> Self {
        Self {
            conn,
            tracker: ChangeTracker::new(),
            config,
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.conn.dialect()
    }

    // ------------------------------------------------------------------------
    // Querying
    // ------------------------------------------------------------------------

    /// A query over every `E`.
    pub fn query<E: Entity>(&self) -> Query<'_, E, C> {
        Query::new(self)
    }

    /// The [`DbSet`] for `E`.
    pub fn set<E: Entity>(&self) -> DbSet<'_, E, C> {
        DbSet::new(self)
    }

    // ------------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------------

    /// Track `entity` in an explicit state.
    pub fn track<E: Entity>(&self, entity: &EntityRef<E>, state: EntityState) -> Arc<EntityEntry> {
        self.tracker.track(entity, state)
    }

    /// Mark `entity` for insertion.
    pub fn add<E: Entity>(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        self.tracker.track(entity, EntityState::Added)
    }

    pub fn add_range<'a, E, I>(&self, entities: I) -> Vec<Arc<EntityEntry>>
    where
        E: Entity,
        I: IntoIterator<Item = &'a EntityRef<E>>,
    {
        self.tracker.track_range(entities, EntityState::Added)
    }

    /// Mark `entity` for update.
    ///
    /// A pending insert stays Added. Any other tracked entry becomes
    /// Modified; an untracked entity is tracked Modified with its current
    /// values as the baseline, so only later edits are written.
    pub fn update<E: Entity>(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        match self.tracker.entry(entity) {
            Some(entry) => {
                if entry.state() != EntityState::Added {
                    entry.set_state(EntityState::Modified);
                }
                entry
            }
            None => self.tracker.track(entity, EntityState::Modified),
        }
    }

    pub fn update_range<'a, E, I>(&self, entities: I) -> Vec<Arc<EntityEntry>>
    where
        E: Entity,
        I: IntoIterator<Item = &'a EntityRef<E>>,
    {
        entities.into_iter().map(|e| self.update(e)).collect()
    }

    /// Mark `entity` for deletion.
    ///
    /// Removing a pending insert just forgets it; the returned entry is
    /// then Detached. An untracked entity is tracked Deleted.
    pub fn remove<E: Entity>(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        match self.tracker.entry(entity) {
            Some(entry) if entry.state() == EntityState::Added => {
                self.tracker.untrack(entity);
                entry.set_state(EntityState::Detached);
                entry
            }
            Some(entry) => {
                entry.set_state(EntityState::Deleted);
                entry
            }
            None => self.tracker.track(entity, EntityState::Deleted),
        }
    }

    pub fn remove_range<'a, E, I>(&self, entities: I) -> Vec<Arc<EntityEntry>>
    where
        E: Entity,
        I: IntoIterator<Item = &'a EntityRef<E>>,
    {
        entities.into_iter().map(|e| self.remove(e)).collect()
    }

    /// Track `entity` as Unchanged, taking its current values as persisted.
    pub fn attach<E: Entity>(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        self.tracker.track(entity, EntityState::Unchanged)
    }

    /// The entry tracking `entity`, if any.
    pub fn entry<E: Entity>(&self, entity: &EntityRef<E>) -> Option<Arc<EntityEntry>> {
        self.tracker.entry(entity)
    }

    pub fn untrack<E: Entity>(&self, entity: &EntityRef<E>) -> bool {
        self.tracker.untrack(entity)
    }

    pub fn detect_changes(&self) -> usize {
        self.tracker.detect_changes()
    }

    pub fn has_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    pub fn accept_all_changes(&self) {
        self.tracker.accept_all_changes();
    }

    // ------------------------------------------------------------------------
    // Unit of work
    // ------------------------------------------------------------------------

    fn plan(&self) -> Result<FlushPlan> {
        if self.config.auto_detect_changes {
            self.tracker.detect_changes();
        }
        FlushPlan::build(&self.tracker, self.dialect())
    }

    /// Write every pending change in one transaction.
    ///
    /// Returns the total rows affected. With nothing pending no transaction
    /// is opened and 0 is returned. On failure the transaction is rolled
    /// back, the tracker is left as it was and the error is a
    /// [`FlushError`](keel_core::FlushError) naming the failing entry. On
    /// success the tracker accepts all changes after the commit.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn save_changes(&self) -> Result<u64> {
        let plan = self.plan()?;
        if plan.is_empty() {
            tracing::debug!("Nothing to save");
            return Ok(0);
        }

        let tx = self.conn.begin()?;
        let result = match plan.execute(&tx) {
            Ok(result) => result,
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "Rollback after failed flush also failed");
                }
                return Err(e);
            }
        };

        if let Err(e) = tx.commit() {
            tracing::warn!(error = %e, "Commit failed; changes not accepted");
            result.revert_keys();
            return Err(e);
        }

        self.tracker.accept_all_changes();
        tracing::info!(
            affected_rows = result.affected_rows,
            statements = result.statements(),
            "Changes saved"
        );
        Ok(result.affected_rows)
    }

    /// Write every pending change inside a caller-owned transaction.
    ///
    /// Nothing is accepted: once `tx` commits, call
    /// [`accept_all_changes`](Self::accept_all_changes). If it rolls back
    /// instead, keys written by inserts stay in the entities.
    #[tracing::instrument(level = "info", skip(self, tx))]
    pub fn save_changes_in<T: TransactionOps>(&self, tx: &T) -> Result<u64> {
        let plan = self.plan()?;
        if plan.is_empty() {
            return Ok(0);
        }
        Ok(plan.execute(tx)?.affected_rows)
    }
}
