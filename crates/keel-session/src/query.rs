//! Executing queries and the per-shape [`DbSet`] entry point.

use crate::Database;
use crate::entry::EntityEntry;
use crate::identity::{EntityRef, entity_ref};
use keel_core::{
    Connection, Entity, EntityState, Error, MappingError, Result, Value, ValidationErrorKind,
};
use keel_query::{Condition, OrderBy, Select};
use std::marker::PhantomData;
use std::sync::Arc;

/// A SELECT over one entity shape, bound to a database.
///
/// Conditions added with [`filter`](Self::filter) are combined with AND.
/// Results are tracked as Unchanged unless [`as_no_tracking`](Self::as_no_tracking)
/// is called.
pub struct Query<'db, E: Entity, C: Connection> {
    db: &'db Database<C>,
    select: Select,
    tracking: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity, C: Connection> std::fmt::Debug for Query<'_, E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("shape", &E::descriptor().name())
            .field("select", &self.select)
            .field("tracking", &self.tracking)
            .finish_non_exhaustive()
    }
}

impl<'db, E: Entity, C: Connection> Query<'db, E, C> {
    pub(crate) fn new(db: &'db Database<C>) -> Self {
        Self {
            db,
            select: Select::from_descriptor(E::descriptor()),
            tracking: db.config().track_queries_by_default,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.select = self.select.filter(condition);
        self
    }

    /// Add a sort key. The first call is the primary key of the sort.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.select = self.select.order_by(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.select = self.select.limit(n);
        self
    }

    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.select = self.select.offset(n);
        self
    }

    /// Track returned entities as Unchanged.
    #[must_use]
    pub fn as_tracking(mut self) -> Self {
        self.tracking = true;
        self
    }

    /// Return entities without tracking them.
    #[must_use]
    pub fn as_no_tracking(mut self) -> Self {
        self.tracking = false;
        self
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// The SELECT this query runs, in the database's dialect.
    ///
    /// Fails without touching storage if a condition does not lower.
    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        self.select.build_with_dialect(self.db.dialect())
    }

    /// Run the query and return every matching entity.
    ///
    /// All rows are mapped before any is tracked, so a mapping failure
    /// leaves the tracker untouched. A tracked result replaces any entry
    /// already filed under the same key.
    #[tracing::instrument(level = "debug", skip(self), fields(shape = E::descriptor().name()))]
    pub fn all(self) -> Result<Vec<EntityRef<E>>> {
        let (sql, params) = self.to_sql()?;
        let start = std::time::Instant::now();
        let rows = self.db.connection().query(&sql, &params)?;

        let descriptor = E::descriptor();
        let entities = rows
            .iter()
            .map(|row| {
                row.check_shape(descriptor)?;
                E::from_row(row).map(entity_ref)
            })
            .collect::<Result<Vec<_>>>()?;

        if self.tracking {
            for entity in &entities {
                self.db.tracker().track(entity, EntityState::Unchanged);
            }
        }
        tracing::debug!(
            sql = %sql,
            params = params.len(),
            rows = entities.len(),
            tracked = self.tracking,
            elapsed_ms = start.elapsed().as_millis(),
            "Query complete"
        );
        Ok(entities)
    }

    /// The first matching entity, or `None` when nothing matches.
    pub fn first(self) -> Result<Option<EntityRef<E>>> {
        Ok(self.limit(1).all()?.into_iter().next())
    }

    /// The entity with primary key `pk`.
    ///
    /// A tracked instance with that key is returned as is, in whatever state
    /// it is in, without touching storage. Otherwise storage is queried.
    #[tracing::instrument(level = "debug", skip(self, pk), fields(shape = E::descriptor().name()))]
    pub fn find(self, pk: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        let pk = pk.into();
        if let Some(hit) = self.db.tracker().find_tracked::<E>(&pk) {
            tracing::debug!(pk = %pk, "Identity map hit");
            return Ok(Some(hit));
        }
        let descriptor = E::descriptor();
        let column = descriptor.primary_key().ok_or_else(|| {
            Error::validation(
                ValidationErrorKind::PrimaryKey,
                descriptor.name(),
                "cannot find by key: entity has no primary key column",
            )
        })?;
        self.filter(Condition::eq(column.column_name(), pk)).first()
    }

    /// Number of matching rows, via `SELECT COUNT(*)`.
    ///
    /// Ordering and paging do not apply to the count.
    ///
    /// A result without a row, or whose first value is not a non-negative
    /// integer, is a mapping error.
    pub fn count(&self) -> Result<u64> {
        let (sql, params) = self.select.build_count(self.db.dialect())?;
        let row = self.db.connection().query_one(&sql, &params)?;
        let value = row.as_ref().and_then(|r| r.get(0));
        let count = value
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                Error::Mapping(MappingError {
                    entity: Some(E::descriptor().name()),
                    column: Some("COUNT(*)".to_string()),
                    expected: "a non-negative integer count".to_string(),
                    actual: match value {
                        Some(Value::BigInt(n)) => format!("BIGINT {}", n),
                        Some(Value::Int(n)) => format!("INTEGER {}", n),
                        Some(other) => other.type_name().to_string(),
                        None => "no row".to_string(),
                    },
                })
            })?;
        tracing::debug!(sql = %sql, count, "Count complete");
        Ok(count)
    }

    /// Whether any row matches.
    pub fn exists(&self) -> Result<bool> {
        Ok(self.count()? > 0)
    }
}

/// Entry point for one entity shape: `db.set::<Patient>()`.
pub struct DbSet<'db, E: Entity, C: Connection> {
    db: &'db Database<C>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity, C: Connection> std::fmt::Debug for DbSet<'_, E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSet")
            .field("shape", &E::descriptor().name())
            .finish_non_exhaustive()
    }
}

impl<'db, E: Entity, C: Connection> DbSet<'db, E, C> {
    pub(crate) fn new(db: &'db Database<C>) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }

    /// A fresh query over this shape.
    pub fn query(&self) -> Query<'db, E, C> {
        Query::new(self.db)
    }

    pub fn filter(&self, condition: Condition) -> Query<'db, E, C> {
        self.query().filter(condition)
    }

    pub fn find(&self, pk: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        self.query().find(pk)
    }

    pub fn all(&self) -> Result<Vec<EntityRef<E>>> {
        self.query().all()
    }

    pub fn first(&self) -> Result<Option<EntityRef<E>>> {
        self.query().first()
    }

    pub fn count(&self) -> Result<u64> {
        self.query().count()
    }

    pub fn add(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        self.db.add(entity)
    }

    pub fn update(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        self.db.update(entity)
    }

    pub fn remove(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        self.db.remove(entity)
    }

    pub fn attach(&self, entity: &EntityRef<E>) -> Arc<EntityEntry> {
        self.db.attach(entity)
    }
}
