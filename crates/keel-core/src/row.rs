//! Database row representation.

use crate::Result;
use crate::entity::EntityDescriptor;
use crate::error::{Error, MappingError};
use crate::value::{Timestamp, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
///
/// Column metadata is shared via `Arc` by every row of one result set.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row from column names and values.
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self {
            values,
            columns: Arc::new(ColumnInfo::new(names)),
        }
    }

    /// Create a row sharing column metadata with its siblings.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Number of values in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .index_of(name)
            .and_then(|index| self.values.get(index))
    }

    /// Get a typed value by position.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            Error::Mapping(MappingError {
                entity: None,
                column: Some(format!("#{}", index)),
                expected: "a column".to_string(),
                actual: format!("a row of {} value(s)", self.values.len()),
            })
        })?;
        T::from_value(value).map_err(|err| with_column(err, self.column_name(index)))
    }

    /// Get a typed value by column name.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self.columns.index_of(name).ok_or_else(|| {
            Error::Mapping(MappingError {
                entity: None,
                column: Some(name.to_string()),
                expected: "a column".to_string(),
                actual: "nothing".to_string(),
            })
        })?;
        self.get_as(index)
    }

    /// All values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Column names of the result set.
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    /// Check that this row can be mapped onto `descriptor` positionally.
    ///
    /// The arity must equal the descriptor's column count and every value
    /// must be storable in the column at the same position.
    pub fn check_shape(&self, descriptor: &EntityDescriptor) -> Result<()> {
        let columns = descriptor.columns();
        if self.values.len() != columns.len() {
            return Err(Error::Mapping(MappingError {
                entity: Some(descriptor.name()),
                column: None,
                expected: format!("{} column(s)", columns.len()),
                actual: format!("{} column(s)", self.values.len()),
            }));
        }
        for (column, value) in columns.iter().zip(&self.values) {
            if !column.sql_type().accepts(value) {
                return Err(Error::Mapping(MappingError {
                    entity: Some(descriptor.name()),
                    column: Some(column.name().to_string()),
                    expected: column.sql_type().name(),
                    actual: value.type_name().to_string(),
                }));
            }
        }
        Ok(())
    }

    fn column_name(&self, index: usize) -> String {
        self.columns
            .names()
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("#{}", index))
    }
}

fn with_column(err: Error, column: String) -> Error {
    match err {
        Error::Mapping(mut mapping) => {
            mapping.column.get_or_insert(column);
            Error::Mapping(mapping)
        }
        other => other,
    }
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Mapping(MappingError {
        entity: None,
        column: None,
        expected: expected.to_string(),
        actual: value.type_name().to_string(),
    })
}

/// Conversion from a [`Value`] into a Rust field type.
pub trait FromValue: Sized {
    /// Convert from a Value, returning a mapping error if the kind is wrong.
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(*v),
            Value::BigInt(v) => i32::try_from(*v).map_err(|_| mismatch("i32", value)),
            _ => Err(mismatch("i32", value)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch("i64", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("String", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| mismatch("Vec<u8>", value))
    }
}

impl FromValue for Timestamp {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(v) | Value::BigInt(v) => Ok(Timestamp(*v)),
            _ => Err(mismatch("Timestamp", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! impl_try_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = Error;

                fn try_from(value: Value) -> Result<Self> {
                    <$ty as FromValue>::from_value(&value)
                }
            }
        )*
    };
}

impl_try_from_value!(bool, i32, i64, f64, String, Vec<u8>, Timestamp);
