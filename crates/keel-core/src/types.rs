//! Semantic column types and their SQL spellings.

use crate::connection::Dialect;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Semantic type of an entity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    // Integer types
    Integer,
    BigInt,

    // Floating point
    Double,

    // Boolean
    Boolean,

    // String types
    Text,
    VarChar(u32),

    // Binary
    Bytes,

    // Date/time
    Timestamp,
}

impl SqlType {
    /// Whether a non-null `value` can be stored in a column of this type.
    ///
    /// Drivers are allowed to widen integers and to hand back booleans and
    /// timestamps in their integer storage form.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::Integer | SqlType::BigInt, Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Double, Value::Double(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Boolean, Value::Bool(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Text | SqlType::VarChar(_), Value::Text(_)) => true,
            (SqlType::Bytes, Value::Bytes(_)) => true,
            (SqlType::Timestamp, Value::Timestamp(_) | Value::BigInt(_)) => true,
            _ => false,
        }
    }

    /// Whether this type is an integer type.
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Whether this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::Text | SqlType::VarChar(_))
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> String {
        self.ddl_name(Dialect::Postgres)
    }

    /// Column type as written in CREATE TABLE for `dialect`.
    pub fn ddl_name(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (SqlType::Integer, _) => "INTEGER".to_string(),
            (SqlType::BigInt, Dialect::Sqlite) => "INTEGER".to_string(),
            (SqlType::BigInt, _) => "BIGINT".to_string(),
            (SqlType::Double, Dialect::Postgres) => "DOUBLE PRECISION".to_string(),
            (SqlType::Double, Dialect::Sqlite) => "REAL".to_string(),
            (SqlType::Double, Dialect::Mysql) => "DOUBLE".to_string(),
            (SqlType::Boolean, _) => "BOOLEAN".to_string(),
            (SqlType::Text, _) => "TEXT".to_string(),
            (SqlType::VarChar(len), _) => format!("VARCHAR({})", len),
            (SqlType::Bytes, Dialect::Postgres) => "BYTEA".to_string(),
            (SqlType::Bytes, _) => "BLOB".to_string(),
            (SqlType::Timestamp, Dialect::Mysql) => "DATETIME(6)".to_string(),
            (SqlType::Timestamp, _) => "TIMESTAMP".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_widened_integers() {
        assert!(SqlType::Integer.accepts(&Value::BigInt(3)));
        assert!(SqlType::BigInt.accepts(&Value::Int(3)));
        assert!(!SqlType::Integer.accepts(&Value::Text("3".into())));
    }

    #[test]
    fn test_accepts_null_everywhere() {
        for ty in [
            SqlType::Integer,
            SqlType::Double,
            SqlType::Boolean,
            SqlType::VarChar(10),
            SqlType::Bytes,
            SqlType::Timestamp,
        ] {
            assert!(ty.accepts(&Value::Null), "{:?}", ty);
        }
    }

    #[test]
    fn test_boolean_storage_forms() {
        assert!(SqlType::Boolean.accepts(&Value::Bool(true)));
        assert!(SqlType::Boolean.accepts(&Value::Int(1)));
        assert!(!SqlType::Boolean.accepts(&Value::Text("true".into())));
    }

    #[test]
    fn test_ddl_names_per_dialect() {
        assert_eq!(SqlType::Double.ddl_name(Dialect::Postgres), "DOUBLE PRECISION");
        assert_eq!(SqlType::Double.ddl_name(Dialect::Sqlite), "REAL");
        assert_eq!(SqlType::VarChar(100).ddl_name(Dialect::Mysql), "VARCHAR(100)");
        assert_eq!(SqlType::Bytes.ddl_name(Dialect::Postgres), "BYTEA");
        assert_eq!(SqlType::BigInt.ddl_name(Dialect::Sqlite), "INTEGER");
    }
}
