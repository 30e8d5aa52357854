//! Error types for Keel operations.

use crate::entity::EntityState;
use std::fmt;

/// The primary error type for all Keel operations.
#[derive(Debug)]
pub enum Error {
    /// Transport or driver failure reported by the connection
    Connection(ConnectionError),
    /// Statement execution failure
    Query(QueryError),
    /// A row could not be mapped onto an entity shape
    Mapping(MappingError),
    /// A condition or descriptor is malformed
    Validation(ValidationError),
    /// A unit-of-work flush failed and was rolled back
    Flush(FlushError),
    /// Transaction lifecycle errors (begin/commit/rollback)
    Transaction(String),
    /// DDL errors raised while creating tables
    Schema(String),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// The driver refused the request
    Refused,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

/// A result row does not fit the entity shape it is being mapped onto.
#[derive(Debug)]
pub struct MappingError {
    /// Shape the row was mapped onto, when known.
    pub entity: Option<&'static str>,
    pub column: Option<String>,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Column or identifier the problem was found on.
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Values of different kinds mixed in one IN list
    MixedTypes,
    /// An identifier is not a plain SQL identifier
    Identifier,
    /// A descriptor declares more than one primary key
    PrimaryKey,
    /// A descriptor declares the same column twice
    DuplicateColumn,
    /// A descriptor or statement has no columns
    Empty,
    /// Placeholder numbering that does not start at 1 or later
    Placeholder,
}

/// The first failing statement of a flush, together with the entry that caused it.
#[derive(Debug)]
pub struct FlushError {
    /// Shape name of the failing entry.
    pub entity: &'static str,
    /// Identity of the failing entry, rendered for diagnostics.
    pub key: String,
    /// State the entry was in when its statement failed.
    pub state: EntityState,
    /// Rows affected by statements that ran before the failure. Rolled back.
    pub applied_rows: u64,
    pub source: Box<Error>,
}

impl Error {
    /// Whether this error came from the connection collaborator.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Flush(e) => e.source.is_connection_error(),
            _ => false,
        }
    }

    /// The SQL text attached to this error, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(e) => e.sql.as_deref(),
            Error::Flush(e) => e.source.sql(),
            _ => None,
        }
    }

    /// Shorthand for a connection error with no underlying source.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a database error raised while running `sql`.
    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: Some(sql.into()),
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a validation failure.
    pub fn validation(
        kind: ValidationErrorKind,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Validation(ValidationError {
            kind,
            field: field.into(),
            message: message.into(),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => match &e.sql {
                Some(sql) => write!(f, "Query error: {} (sql: {})", e.message, sql),
                None => write!(f, "Query error: {}", e.message),
            },
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Flush(e) => write!(f, "Flush error: {}", e),
            Error::Transaction(msg) => write!(f, "Transaction error: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity) = self.entity {
            write!(f, "{} ", entity)?;
        }
        if let Some(col) = &self.column {
            write!(f, "column '{}': ", col)?;
        }
        write!(f, "expected {}, found {}", self.expected, self.actual)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} entry {} failed after {} applied row(s): {}",
            self.entity,
            self.state.as_str(),
            self.key,
            self.applied_rows,
            self.source
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Flush(e) => Some(e.source.as_ref()),
            _ => None,
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<FlushError> for Error {
    fn from(err: FlushError) -> Self {
        Error::Flush(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Keel operations.
pub type Result<T> = std::result::Result<T, Error>;
