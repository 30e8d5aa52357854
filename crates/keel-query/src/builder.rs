//! INSERT, UPDATE and DELETE statements for one entity row.
//!
//! These work from a descriptor plus values rather than a concrete entity
//! type, so the flush can build them for type-erased tracked entries. The
//! WHERE clauses go through [`Condition`] lowering like any query.

use crate::condition::Condition;
use keel_core::{Dialect, EntityDescriptor, Error, Result, Value, ValidationErrorKind};

/// A built statement: SQL text plus arguments in placeholder order.
pub type Statement = (String, Vec<Value>);

fn primary_key_column(descriptor: &EntityDescriptor) -> Result<&'static str> {
    descriptor
        .primary_key()
        .map(|c| c.column_name())
        .ok_or_else(|| {
            Error::validation(
                ValidationErrorKind::PrimaryKey,
                descriptor.name(),
                "entity has no primary key column",
            )
        })
}

/// INSERT for one row.
#[derive(Debug)]
pub struct InsertBuilder<'a> {
    descriptor: &'a EntityDescriptor,
    values: Vec<Value>,
}

impl<'a> InsertBuilder<'a> {
    /// `values` are the entity's field values in descriptor order.
    pub fn new(descriptor: &'a EntityDescriptor, values: Vec<Value>) -> Self {
        Self { descriptor, values }
    }

    /// Whether the primary key is unset and left for the store to assign.
    pub fn generates_key(&self) -> bool {
        self.descriptor
            .primary_key_index()
            .and_then(|i| self.values.get(i))
            .is_some_and(Value::is_zero)
    }

    /// Build the INSERT.
    ///
    /// An unset primary key is omitted. When the dialect can, the generated
    /// key is requested back with `RETURNING`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<Statement> {
        let columns = self.descriptor.columns();
        if self.values.len() != columns.len() {
            return Err(Error::validation(
                ValidationErrorKind::Empty,
                self.descriptor.name(),
                format!(
                    "{} value(s) for {} column(s)",
                    self.values.len(),
                    columns.len()
                ),
            ));
        }

        let skip = if self.generates_key() {
            self.descriptor.primary_key_index()
        } else {
            None
        };

        let mut names = Vec::with_capacity(columns.len());
        let mut params = Vec::with_capacity(columns.len());
        for (i, (column, value)) in columns.iter().zip(&self.values).enumerate() {
            if Some(i) == skip {
                continue;
            }
            names.push(column.column_name());
            params.push(value.clone());
        }

        let placeholders: Vec<_> = (1..=params.len()).map(|i| dialect.placeholder(i)).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.descriptor.table(),
            names.join(", "),
            placeholders.join(", ")
        );

        if let Some(pk_index) = skip {
            if dialect.supports_returning() {
                sql.push_str(" RETURNING ");
                sql.push_str(columns[pk_index].column_name());
            }
        }

        Ok((sql, params))
    }
}

/// UPDATE of selected columns of one row.
#[derive(Debug)]
pub struct UpdateBuilder<'a> {
    descriptor: &'a EntityDescriptor,
    set: Vec<(&'static str, Value)>,
    key: Value,
}

impl<'a> UpdateBuilder<'a> {
    /// `set` pairs field names with their new values; `key` selects the row.
    pub fn new(descriptor: &'a EntityDescriptor, set: Vec<(&'static str, Value)>, key: Value) -> Self {
        Self {
            descriptor,
            set,
            key,
        }
    }

    /// Build the UPDATE, or `None` when there is nothing to set.
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<Option<Statement>> {
        if self.set.is_empty() {
            return Ok(None);
        }
        let pk = primary_key_column(self.descriptor)?;

        let mut params = Vec::with_capacity(self.set.len() + 1);
        let mut assignments = Vec::with_capacity(self.set.len());
        for (field, value) in &self.set {
            let column = self.descriptor.column(field).ok_or_else(|| {
                Error::validation(
                    ValidationErrorKind::Identifier,
                    *field,
                    format!("{} has no field named {}", self.descriptor.name(), field),
                )
            })?;
            params.push(value.clone());
            assignments.push(format!(
                "{} = {}",
                column.column_name(),
                dialect.placeholder(params.len())
            ));
        }

        let target = Condition::eq(pk, self.key.clone()).lower_with(dialect, params.len() + 1)?;
        params.extend(target.args);

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.descriptor.table(),
            assignments.join(", "),
            target.sql
        );
        Ok(Some((sql, params)))
    }
}

/// DELETE of one row by primary key.
#[derive(Debug)]
pub struct DeleteBuilder<'a> {
    descriptor: &'a EntityDescriptor,
    key: Value,
}

impl<'a> DeleteBuilder<'a> {
    pub fn new(descriptor: &'a EntityDescriptor, key: Value) -> Self {
        Self { descriptor, key }
    }

    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<Statement> {
        let pk = primary_key_column(self.descriptor)?;
        let target = Condition::eq(pk, self.key.clone()).lower_with(dialect, 1)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.descriptor.table(), target.sql);
        Ok((sql, target.args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ColumnDescriptor, SqlType};

    static COLUMNS: [ColumnDescriptor; 3] = [
        ColumnDescriptor::new("id", SqlType::BigInt).primary_key(),
        ColumnDescriptor::new("name", SqlType::Text),
        ColumnDescriptor::new("age", SqlType::Integer).column("age_years"),
    ];
    static PATIENT: EntityDescriptor = EntityDescriptor::new("Patient", "patients", &COLUMNS);

    static NO_KEY_COLUMNS: [ColumnDescriptor; 1] = [ColumnDescriptor::new("label", SqlType::Text)];
    static LABEL: EntityDescriptor = EntityDescriptor::new("Label", "labels", &NO_KEY_COLUMNS);

    #[test]
    fn test_insert_omits_unset_key_and_returns_it() {
        let insert = InsertBuilder::new(
            &PATIENT,
            vec![Value::BigInt(0), Value::Text("Ana".into()), Value::Int(30)],
        );
        assert!(insert.generates_key());
        let (sql, params) = insert.build_with_dialect(Dialect::Postgres).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO patients (name, age_years) VALUES ($1, $2) RETURNING id"
        );
        assert_eq!(params, vec![Value::Text("Ana".into()), Value::Int(30)]);
    }

    #[test]
    fn test_insert_keeps_assigned_key() {
        let insert = InsertBuilder::new(
            &PATIENT,
            vec![Value::BigInt(9), Value::Text("Ana".into()), Value::Int(30)],
        );
        let (sql, params) = insert.build_with_dialect(Dialect::Postgres).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO patients (id, name, age_years) VALUES ($1, $2, $3)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_insert_without_returning_support() {
        let insert = InsertBuilder::new(
            &PATIENT,
            vec![Value::Null, Value::Text("Ana".into()), Value::Int(30)],
        );
        let (sql, _) = insert.build_with_dialect(Dialect::Mysql).unwrap();
        assert_eq!(sql, "INSERT INTO patients (name, age_years) VALUES (?, ?)");
    }

    #[test]
    fn test_insert_arity_checked() {
        let insert = InsertBuilder::new(&PATIENT, vec![Value::BigInt(1)]);
        assert!(insert.build_with_dialect(Dialect::Postgres).is_err());
    }

    #[test]
    fn test_update_sets_only_given_fields() {
        let update = UpdateBuilder::new(&PATIENT, vec![("age", Value::Int(26))], Value::BigInt(7));
        let (sql, params) = update
            .build_with_dialect(Dialect::Postgres)
            .unwrap()
            .unwrap();
        assert_eq!(sql, "UPDATE patients SET age_years = $1 WHERE id = $2");
        assert_eq!(params, vec![Value::Int(26), Value::BigInt(7)]);
    }

    #[test]
    fn test_update_with_nothing_to_set() {
        let update = UpdateBuilder::new(&PATIENT, Vec::new(), Value::BigInt(7));
        assert!(update.build_with_dialect(Dialect::Postgres).unwrap().is_none());
    }

    #[test]
    fn test_update_unknown_field() {
        let update = UpdateBuilder::new(&PATIENT, vec![("weight", Value::Int(80))], Value::BigInt(7));
        assert!(update.build_with_dialect(Dialect::Postgres).is_err());
    }

    #[test]
    fn test_delete_by_key() {
        let (sql, params) = DeleteBuilder::new(&PATIENT, Value::BigInt(3))
            .build_with_dialect(Dialect::Sqlite)
            .unwrap();
        assert_eq!(sql, "DELETE FROM patients WHERE id = ?1");
        assert_eq!(params, vec![Value::BigInt(3)]);
    }

    #[test]
    fn test_delete_requires_primary_key() {
        let err = DeleteBuilder::new(&LABEL, Value::Text("x".into()))
            .build_with_dialect(Dialect::Postgres)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
