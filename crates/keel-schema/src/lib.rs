//! Table creation for Keel entities.
//!
//! Only create-if-absent is supported: [`auto_migrate`] issues one
//! `CREATE TABLE IF NOT EXISTS` per entity descriptor and never alters an
//! existing table.

pub mod create;
pub mod migrate;

pub use create::CreateTable;
pub use migrate::auto_migrate;

use keel_core::{Dialect, Entity};

/// The CREATE TABLE IF NOT EXISTS for `E` in `dialect`.
///
/// # Example
///
/// ```ignore
/// let sql = create_table_sql::<Patient>(Dialect::Sqlite);
/// conn.execute(&sql, &[])?;
/// ```
pub fn create_table_sql<E: Entity>(dialect: Dialect) -> String {
    CreateTable::new(E::descriptor()).dialect(dialect).build()
}
