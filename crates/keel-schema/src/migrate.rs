//! Create-if-absent table setup.

use crate::create::CreateTable;
use keel_core::{Connection, EntityDescriptor, Error, Result};

/// Create the table of every descriptor that does not exist yet.
///
/// Each descriptor is validated before any DDL runs, so a malformed shape
/// creates nothing. Tables are created in the given order, each in its own
/// statement outside any transaction; the first failure stops the run and
/// names its table. Existing tables are never altered.
#[tracing::instrument(level = "info", skip(conn, descriptors), fields(count = descriptors.len()))]
pub fn auto_migrate<C: Connection>(conn: &C, descriptors: &[&EntityDescriptor]) -> Result<()> {
    for descriptor in descriptors {
        descriptor.validate()?;
    }

    let dialect = conn.dialect();
    for descriptor in descriptors {
        let sql = CreateTable::new(descriptor).dialect(dialect).build();
        tracing::debug!(table = descriptor.table(), sql = %sql, "Creating table if absent");
        conn.execute(&sql, &[]).map_err(|e| {
            Error::Schema(format!(
                "failed to create table {}: {}",
                descriptor.table(),
                e
            ))
        })?;
    }

    tracing::info!(tables = descriptors.len(), "Auto-migrate complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ColumnDescriptor, Entity, SqlType};
    use keel_test_utils::{MockConnection, Patient, Ward};

    static BAD_COLUMNS: [ColumnDescriptor; 1] = [ColumnDescriptor::new("name", SqlType::Text)];
    static BAD: EntityDescriptor = EntityDescriptor::new("Bad", "bad table", &BAD_COLUMNS);

    #[test]
    fn test_creates_in_order() {
        let conn = MockConnection::new();
        auto_migrate(&conn, &[Patient::descriptor(), Ward::descriptor()]).unwrap();
        let statements = conn.committed();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].0.starts_with("CREATE TABLE IF NOT EXISTS patients ("));
        assert!(statements[1].0.starts_with("CREATE TABLE IF NOT EXISTS wards ("));
        assert!(statements.iter().all(|(_, params)| params.is_empty()));
    }

    #[test]
    fn test_invalid_descriptor_creates_nothing() {
        let conn = MockConnection::new();
        let err = auto_migrate(&conn, &[Patient::descriptor(), &BAD]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(conn.attempted().is_empty());
    }

    #[test]
    fn test_failure_names_table() {
        let conn = MockConnection::new().fail_on_statement(2);
        let err = auto_migrate(&conn, &[Patient::descriptor(), Ward::descriptor()]).unwrap_err();
        assert!(err.to_string().contains("failed to create table wards"));
        assert_eq!(conn.committed().len(), 1);
    }

    #[test]
    fn test_empty_list_is_a_no_op() {
        let conn = MockConnection::new();
        auto_migrate(&conn, &[]).unwrap();
        assert!(conn.attempted().is_empty());
    }
}
