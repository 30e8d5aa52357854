//! Entity shapes and the trait that maps a Rust struct onto a table.
//!
//! A shape is declared once, statically, as an [`EntityDescriptor`] over a
//! slice of [`ColumnDescriptor`]s. Nothing is discovered at runtime:
//!
//! ```
//! use keel_core::{ColumnDescriptor, EntityDescriptor, SqlType};
//!
//! static COLUMNS: [ColumnDescriptor; 3] = [
//!     ColumnDescriptor::new("id", SqlType::BigInt).primary_key(),
//!     ColumnDescriptor::new("name", SqlType::Text).not_null(),
//!     ColumnDescriptor::new("age", SqlType::Integer),
//! ];
//! static PATIENT: EntityDescriptor = EntityDescriptor::new("Patient", "patients", &COLUMNS);
//!
//! assert_eq!(PATIENT.primary_key().map(|c| c.name()), Some("id"));
//! ```

use crate::error::{Error, Result, ValidationErrorKind};
use crate::row::Row;
use crate::types::SqlType;
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Not tracked.
    Detached,
    /// Tracked and believed to match storage.
    Unchanged,
    /// Pending INSERT.
    Added,
    /// Pending UPDATE.
    Modified,
    /// Pending DELETE.
    Deleted,
}

impl EntityState {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        }
    }

    /// Whether entries in this state keep a snapshot for diffing.
    pub const fn needs_snapshot(self) -> bool {
        matches!(self, EntityState::Unchanged | EntityState::Modified)
    }
}

/// Metadata for one entity field and the column it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDescriptor {
    name: &'static str,
    column: &'static str,
    sql_type: SqlType,
    primary_key: bool,
    not_null: bool,
    unique: bool,
    default: Option<&'static str>,
    size: Option<u32>,
}

impl ColumnDescriptor {
    /// Describe field `name`, stored in a column of the same name.
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column: name,
            sql_type,
            primary_key: false,
            not_null: false,
            unique: false,
            default: None,
            size: None,
        }
    }

    /// Store the field under a different column name.
    pub const fn column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Default value, as a SQL literal.
    pub const fn default_value(mut self, literal: &'static str) -> Self {
        self.default = Some(literal);
        self
    }

    /// Maximum length for text columns.
    pub const fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Field name, the key used in snapshots and change sets.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn column_name(&self) -> &'static str {
        self.column
    }

    pub const fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub const fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub const fn is_not_null(&self) -> bool {
        self.not_null
    }

    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    pub const fn default(&self) -> Option<&'static str> {
        self.default
    }

    pub const fn declared_size(&self) -> Option<u32> {
        self.size
    }

    /// Semantic type with the declared size applied to text columns.
    pub const fn storage_type(&self) -> SqlType {
        match (self.sql_type, self.size) {
            (SqlType::Text, Some(len)) => SqlType::VarChar(len),
            (ty, _) => ty,
        }
    }
}

/// The statically declared shape of an entity: table plus ordered columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    name: &'static str,
    table: &'static str,
    columns: &'static [ColumnDescriptor],
}

impl EntityDescriptor {
    pub const fn new(
        name: &'static str,
        table: &'static str,
        columns: &'static [ColumnDescriptor],
    ) -> Self {
        Self {
            name,
            table,
            columns,
        }
    }

    /// Shape name, the first component of identity keys.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn table(&self) -> &'static str {
        self.table
    }

    /// Columns in declaration order. Rows map onto entities in this order.
    pub const fn columns(&self) -> &'static [ColumnDescriptor] {
        self.columns
    }

    /// Position of the primary-key column.
    ///
    /// A column tagged as primary key wins; otherwise a field named `id`.
    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns
            .iter()
            .position(ColumnDescriptor::is_primary_key)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case("id"))
            })
    }

    pub fn primary_key(&self) -> Option<&'static ColumnDescriptor> {
        self.primary_key_index().map(|i| &self.columns[i])
    }

    /// Look up a column by field name.
    pub fn column(&self, name: &str) -> Option<&'static ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.column).collect()
    }

    /// Reject shapes the rest of the crate cannot lower safely.
    pub fn validate(&self) -> Result<()> {
        let pattern = identifier_pattern()?;
        if !pattern.is_match(self.table) {
            return Err(Error::validation(
                ValidationErrorKind::Identifier,
                self.table,
                "table name is not a plain SQL identifier",
            ));
        }
        if self.columns.is_empty() {
            return Err(Error::validation(
                ValidationErrorKind::Empty,
                self.name,
                "entity declares no columns",
            ));
        }

        let mut seen = HashSet::new();
        for column in self.columns {
            if !pattern.is_match(column.column) {
                return Err(Error::validation(
                    ValidationErrorKind::Identifier,
                    column.column,
                    "column name is not a plain SQL identifier",
                ));
            }
            if !seen.insert(column.column) {
                return Err(Error::validation(
                    ValidationErrorKind::DuplicateColumn,
                    column.column,
                    format!("column declared twice on {}", self.name),
                ));
            }
        }

        let tagged = self.columns.iter().filter(|c| c.primary_key).count();
        if tagged > 1 {
            return Err(Error::validation(
                ValidationErrorKind::PrimaryKey,
                self.name,
                format!("{} columns are tagged as primary key", tagged),
            ));
        }
        tracing::trace!(
            entity = self.name,
            table = self.table,
            columns = self.columns.len(),
            "Descriptor validated"
        );
        Ok(())
    }
}

fn identifier_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"))
        .as_ref()
        .map_err(|e| Error::Custom(format!("identifier pattern: {}", e)))
}

/// A Rust type persisted as one row of a table.
///
/// Implementations are written by hand against a static descriptor;
/// `to_values` and `from_row` both follow the descriptor's column order.
pub trait Entity: Sized + Send + Sync + 'static {
    /// The shape of this entity.
    fn descriptor() -> &'static EntityDescriptor;

    /// Current field values in descriptor order.
    fn to_values(&self) -> Vec<Value>;

    /// Build an entity from a row whose shape was already checked.
    fn from_row(row: &Row) -> Result<Self>;

    /// Write a store-generated key into the primary-key field.
    fn set_primary_key(&mut self, value: Value) -> Result<()>;

    /// Current value of the primary-key field, `Null` if the shape has none.
    fn primary_key_value(&self) -> Value {
        Self::descriptor()
            .primary_key_index()
            .and_then(|i| self.to_values().into_iter().nth(i))
            .unwrap_or(Value::Null)
    }

    /// Field values keyed by field name.
    fn field_values(&self) -> Vec<(&'static str, Value)> {
        Self::descriptor()
            .columns()
            .iter()
            .map(ColumnDescriptor::name)
            .zip(self.to_values())
            .collect()
    }
}
