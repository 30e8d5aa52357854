//! Keel - change-tracking persistence for relational stores.
//!
//! Keel maps Rust structs to table rows, remembers what was loaded, and
//! writes back only what changed:
//!
//! - Composable conditions that lower to parameterized SQL with correctly
//!   numbered placeholders, however deeply they nest
//! - Typed column accessors for building those conditions
//! - An identity map so one row is one in-memory instance
//! - Snapshot diffing and a unit-of-work flush that runs DELETE, INSERT and
//!   UPDATE in one transaction
//! - Create-if-absent table setup
//!
//! The driver is yours: anything implementing [`Connection`] will do.
//!
//! # Quick Start
//!
//! ```ignore
//! use keel::prelude::*;
//!
//! static COLUMNS: [ColumnDescriptor; 3] = [
//!     ColumnDescriptor::new("id", SqlType::BigInt).primary_key(),
//!     ColumnDescriptor::new("name", SqlType::Text).not_null(),
//!     ColumnDescriptor::new("age", SqlType::Integer),
//! ];
//! static PATIENT: EntityDescriptor = EntityDescriptor::new("Patient", "patients", &COLUMNS);
//!
//! struct Patient { id: i64, name: String, age: i32 }
//!
//! impl Patient {
//!     const AGE: Column<i32> = Column::new("age");
//! }
//!
//! impl Entity for Patient { /* descriptor, to_values, from_row, set_primary_key */ }
//!
//! fn run(conn: impl Connection) -> Result<()> {
//!     auto_migrate(&conn, &[&PATIENT])?;
//!     let db = Database::new(conn);
//!
//!     db.add(&entity_ref(Patient { id: 0, name: "Ana".into(), age: 25 }));
//!     db.save_changes()?;
//!
//!     for p in db.set::<Patient>().filter(Patient::AGE.gt(18)).all()? {
//!         write(&p).age += 1;
//!     }
//!     db.save_changes()?;
//!     Ok(())
//! }
//! ```

pub use keel_core::{
    ColumnDescriptor, ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Dialect,
    Entity, EntityDescriptor, EntityState, Error, FlushError, FromValue, IsolationLevel,
    MappingError, QueryError, QueryErrorKind, Result, Row, SqlType, Timestamp, TransactionOps,
    ValidationError, ValidationErrorKind, Value,
};
pub use keel_query::{
    Column, CompareOp, Condition, DeleteBuilder, InsertBuilder, Limit, Lowered, Offset, OrderBy,
    OrderDirection, Select, Statement, UpdateBuilder,
};
pub use keel_schema::{CreateTable, auto_migrate, create_table_sql};
pub use keel_session::{
    ChangeTracker, ChangedFields, Database, DatabaseConfig, DbSet, EntityEntry, EntityReadGuard,
    EntityRef, EntityWriteGuard, FlushPlan, FlushResult, IdentityKey, KeyValue, OriginalValues,
    PendingOp, Query, entity_ref, read, write,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use keel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Shape
        Column,
        ColumnDescriptor,
        // Conditions
        Condition,
        Connection,
        // Session
        Database,
        DatabaseConfig,
        DbSet,
        Dialect,
        Entity,
        EntityDescriptor,
        EntityRef,
        EntityState,
        Error,
        OrderBy,
        Result,
        Row,
        SqlType,
        TransactionOps,
        Value,
        // Schema
        auto_migrate,
        entity_ref,
        read,
        write,
    };
}
