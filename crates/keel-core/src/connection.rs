//! Database connection traits.
//!
//! Keel never talks to a driver directly. Everything it needs from the
//! store goes through two blocking traits:
//!
//! - [`Connection`] - runs statements and opens transactions
//! - [`TransactionOps`] - runs statements inside a transaction and ends it
//!
//! Timeouts, retries and cancellation belong to the implementor. A call
//! either returns or blocks on the implementor's I/O.

use crate::error::Result;
use crate::row::Row;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// SQL dialect of the connected store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Whether INSERT ... RETURNING can read a generated key back.
    pub const fn supports_returning(self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    /// The default for PostgreSQL.
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A blocking database connection.
pub trait Connection: Send + Sync {
    /// The transaction type returned by this connection.
    type Tx<'conn>: TransactionOps
    where
        Self: 'conn;

    /// Dialect used to render placeholders and DDL.
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a statement (INSERT, UPDATE, DELETE, DDL) and return rows affected.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Begin a transaction with the default isolation level.
    fn begin(&self) -> Result<Self::Tx<'_>> {
        self.begin_with(IsolationLevel::default())
    }

    /// Begin a transaction with a specific isolation level.
    fn begin_with(&self, isolation: IsolationLevel) -> Result<Self::Tx<'_>>;
}

/// Operations available inside a transaction.
///
/// `commit` and `rollback` consume the handle, so a finished transaction
/// cannot be used again.
pub trait TransactionOps: Send {
    /// Execute a query within this transaction.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement within this transaction.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Key generated by the last INSERT, for dialects without RETURNING.
    fn last_insert_id(&self) -> Result<Option<i64>> {
        Ok(None)
    }

    /// Commit the transaction.
    fn commit(self) -> Result<()>;

    /// Roll back the transaction.
    fn rollback(self) -> Result<()>;
}
