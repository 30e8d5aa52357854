//! SELECT statement builder.

use crate::clause::{Limit, Offset, OrderBy};
use crate::condition::Condition;
use keel_core::{Dialect, EntityDescriptor, Result, Value};

/// A SELECT statement over one table.
///
/// Conditions added with [`Select::filter`] are combined with AND. Building
/// never mutates the builder, so the same `Select` lowers to the same text
/// and arguments every time. Building fails if a condition does not lower,
/// such as an IN list mixing value kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    columns: Vec<String>,
    conditions: Vec<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
}

impl Select {
    /// Select every column of `table` (`SELECT *`).
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Select an entity's columns in descriptor order.
    pub fn from_descriptor(descriptor: &EntityDescriptor) -> Self {
        Self::new(descriptor.table()).columns(descriptor.column_names())
    }

    /// Set the projected columns.
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a condition, combined with the others by AND.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an ORDER BY term. The first term added is the primary sort key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(Limit(n));
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(Offset(n));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn current_limit(&self) -> Option<u64> {
        self.limit.map(|Limit(n)| n)
    }

    /// Build the SQL query and parameters with `$n` placeholders.
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        self.build_with_dialect(Dialect::default())
    }

    /// Build the SQL query and parameters for `dialect`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        let mut params = Vec::new();
        self.push_where(dialect, &mut sql, &mut params)?;

        // ORDER BY
        if !self.order_by.is_empty() {
            let terms: Vec<_> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        // LIMIT
        if let Some(Limit(n)) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        // OFFSET
        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }

        tracing::trace!(sql = %sql, params = params.len(), "Built SELECT");
        Ok((sql, params))
    }

    /// `SELECT COUNT(*)` over the same table and conditions.
    ///
    /// Ordering and paging do not apply to a count.
    pub fn build_count(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let mut params = Vec::new();
        self.push_where(dialect, &mut sql, &mut params)?;
        Ok((sql, params))
    }

    fn push_where(&self, dialect: Dialect, sql: &mut String, params: &mut Vec<Value>) -> Result<()> {
        if self.conditions.is_empty() {
            return Ok(());
        }
        // Each condition continues numbering where the previous one stopped.
        let parts = self
            .conditions
            .iter()
            .map(|c| c.build(dialect, params, 0))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(" WHERE ");
        sql.push_str(&parts.join(" AND "));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{ColumnDescriptor, SqlType};

    static COLUMNS: [ColumnDescriptor; 3] = [
        ColumnDescriptor::new("id", SqlType::BigInt).primary_key(),
        ColumnDescriptor::new("name", SqlType::Text),
        ColumnDescriptor::new("age", SqlType::Integer),
    ];
    static PATIENT: EntityDescriptor = EntityDescriptor::new("Patient", "patients", &COLUMNS);

    #[test]
    fn test_bare_select() {
        let (sql, params) = Select::from_descriptor(&PATIENT).build().unwrap();
        assert_eq!(sql, "SELECT id, name, age FROM patients");
        assert!(params.is_empty());
    }

    #[test]
    fn test_select_star() {
        let (sql, _) = Select::new("patients").build().unwrap();
        assert_eq!(sql, "SELECT * FROM patients");
    }

    #[test]
    fn test_full_statement() {
        let select = Select::from_descriptor(&PATIENT)
            .filter(Condition::gte("age", 18))
            .filter(Condition::any([
                Condition::starts_with("name", "A"),
                Condition::is_null("name"),
            ]))
            .filter(Condition::between("id", 10_i64, 20_i64))
            .order_by(OrderBy::desc("age"))
            .order_by(OrderBy::asc("name"))
            .limit(10)
            .offset(20);
        let (sql, params) = select.build().unwrap();
        assert_eq!(
            sql,
            "SELECT id, name, age FROM patients WHERE age >= $1 AND (name LIKE $2 OR name IS NULL) AND id BETWEEN $3 AND $4 ORDER BY age DESC, name ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(
            params,
            vec![
                Value::Int(18),
                Value::Text("A%".into()),
                Value::BigInt(10),
                Value::BigInt(20),
            ]
        );
    }

    #[test]
    fn test_build_is_repeatable() {
        let select = Select::from_descriptor(&PATIENT)
            .filter(Condition::eq("name", "Ana"))
            .filter(Condition::gt("age", 30));
        assert_eq!(select.build().unwrap(), select.build().unwrap());
    }

    #[test]
    fn test_count_ignores_paging() {
        let select = Select::from_descriptor(&PATIENT)
            .filter(Condition::gt("age", 30))
            .order_by(OrderBy::asc("name"))
            .limit(5);
        let (sql, params) = select.build_count(Dialect::Postgres).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM patients WHERE age > $1");
        assert_eq!(params, vec![Value::Int(30)]);
    }

    #[test]
    fn test_bad_in_list_fails_the_build() {
        let select = Select::from_descriptor(&PATIENT).filter(Condition::In {
            column: "age".into(),
            values: vec![Value::Int(1), Value::Text("x".into())],
        });
        assert!(select.build().is_err());
        assert!(select.build_count(Dialect::Postgres).is_err());
    }

    #[test]
    fn test_sqlite_placeholders() {
        let select = Select::from_descriptor(&PATIENT)
            .filter(Condition::eq("name", "Ana"))
            .filter(Condition::gt("age", 30));
        let (sql, _) = select.build_with_dialect(Dialect::Sqlite).unwrap();
        assert!(sql.ends_with("WHERE name = ?1 AND age > ?2"));
    }
}
