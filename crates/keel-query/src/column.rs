//! Typed column handles.
//!
//! Declare one constant per field next to the entity:
//!
//! ```
//! use keel_query::Column;
//!
//! pub struct PatientColumns;
//!
//! impl PatientColumns {
//!     pub const AGE: Column<i32> = Column::new("age");
//!     pub const NAME: Column<String> = Column::new("name");
//! }
//!
//! let adults = PatientColumns::AGE.gte(18).and(PatientColumns::NAME.starts_with("A"));
//! assert_eq!(adults.lower(1).unwrap().sql, "(age >= $1 AND name LIKE $2)");
//! ```
//!
//! The type parameter fixes what a column can be compared against, so a
//! typed IN list can never mix kinds.

use crate::clause::OrderBy;
use crate::condition::Condition;
use keel_core::Value;
use std::fmt;
use std::marker::PhantomData;

/// A column of Rust type `T`.
pub struct Column<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Column<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_null(&self) -> Condition {
        Condition::is_null(self.name)
    }

    pub fn is_not_null(&self) -> Condition {
        Condition::is_not_null(self.name)
    }

    pub fn asc(&self) -> OrderBy {
        OrderBy::asc(self.name)
    }

    pub fn desc(&self) -> OrderBy {
        OrderBy::desc(self.name)
    }
}

impl<T: Into<Value>> Column<T> {
    /// Equality. On an optional column `eq(None)` lowers to `IS NULL`.
    pub fn eq(&self, value: T) -> Condition {
        Condition::eq(self.name, value)
    }

    pub fn ne(&self, value: T) -> Condition {
        Condition::ne(self.name, value)
    }

    pub fn gt(&self, value: T) -> Condition {
        Condition::gt(self.name, value)
    }

    pub fn gte(&self, value: T) -> Condition {
        Condition::gte(self.name, value)
    }

    pub fn lt(&self, value: T) -> Condition {
        Condition::lt(self.name, value)
    }

    pub fn lte(&self, value: T) -> Condition {
        Condition::lte(self.name, value)
    }

    /// Set membership. A `None` element of an optional column is rejected
    /// with a validation error when the condition is lowered.
    pub fn is_in(&self, values: impl IntoIterator<Item = T>) -> Condition {
        Condition::In {
            column: self.name.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn between(&self, low: T, high: T) -> Condition {
        Condition::between(self.name, low, high)
    }
}

impl Column<String> {
    pub fn like(&self, pattern: &str) -> Condition {
        Condition::like(self.name, pattern)
    }

    pub fn contains(&self, text: &str) -> Condition {
        Condition::contains(self.name, text)
    }

    pub fn starts_with(&self, text: &str) -> Condition {
        Condition::starts_with(self.name, text)
    }

    pub fn ends_with(&self, text: &str) -> Condition {
        Condition::ends_with(self.name, text)
    }
}

impl Column<bool> {
    pub fn is_true(&self) -> Condition {
        Condition::eq(self.name, true)
    }

    pub fn is_false(&self) -> Condition {
        Condition::eq(self.name, false)
    }
}

impl<T> Clone for Column<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Column<T> {}

impl<T> fmt::Debug for Column<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Column").field(&self.name).finish()
    }
}
