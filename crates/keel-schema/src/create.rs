//! CREATE TABLE statement builder.

use keel_core::{ColumnDescriptor, Dialect, EntityDescriptor, SqlType};

/// Builder for the CREATE TABLE of one entity shape.
#[derive(Debug, Clone, Copy)]
pub struct CreateTable<'a> {
    descriptor: &'a EntityDescriptor,
    dialect: Dialect,
    if_not_exists: bool,
}

impl<'a> CreateTable<'a> {
    /// A `CREATE TABLE IF NOT EXISTS` in the Postgres dialect.
    pub fn new(descriptor: &'a EntityDescriptor) -> Self {
        Self {
            descriptor,
            dialect: Dialect::default(),
            if_not_exists: true,
        }
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Fail if the table exists instead of skipping it.
    pub fn strict(mut self) -> Self {
        self.if_not_exists = false;
        self
    }

    /// Build the CREATE TABLE SQL.
    ///
    /// One column per line in descriptor order:
    ///
    /// ```text
    /// CREATE TABLE IF NOT EXISTS patients (
    ///     id BIGSERIAL PRIMARY KEY,
    ///     name VARCHAR(100) NOT NULL
    /// )
    /// ```
    pub fn build(&self) -> String {
        let mut sql = String::from("CREATE TABLE ");
        if self.if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(self.descriptor.table());
        sql.push_str(" (\n");

        let pk_index = self.descriptor.primary_key_index();
        let defs: Vec<_> = self
            .descriptor
            .columns()
            .iter()
            .enumerate()
            .map(|(i, column)| format!("    {}", self.column_definition(column, Some(i) == pk_index)))
            .collect();

        sql.push_str(&defs.join(",\n"));
        sql.push_str("\n)");
        sql
    }

    fn column_definition(&self, column: &ColumnDescriptor, primary_key: bool) -> String {
        let ty = column.storage_type();
        let mut parts = vec![column.column_name().to_string()];

        if primary_key && ty.is_integer() {
            parts.push(generated_key_type(ty, self.dialect));
        } else {
            parts.push(ty.ddl_name(self.dialect));
            if primary_key {
                parts.push("PRIMARY KEY".to_string());
            }
        }

        // Primary keys are implicitly NOT NULL.
        if column.is_not_null() && !primary_key {
            parts.push("NOT NULL".to_string());
        }
        if column.is_unique() && !primary_key {
            parts.push("UNIQUE".to_string());
        }
        if let Some(default) = column.default() {
            parts.push(format!("DEFAULT {}", default));
        }

        parts.join(" ")
    }
}

/// Type and key clause for an integer primary key the store assigns.
fn generated_key_type(ty: SqlType, dialect: Dialect) -> String {
    match (dialect, ty) {
        (Dialect::Postgres, SqlType::BigInt) => "BIGSERIAL PRIMARY KEY".to_string(),
        (Dialect::Postgres, _) => "SERIAL PRIMARY KEY".to_string(),
        (Dialect::Sqlite, _) => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        (Dialect::Mysql, _) => format!("{} PRIMARY KEY AUTO_INCREMENT", ty.ddl_name(dialect)),
    }
}
