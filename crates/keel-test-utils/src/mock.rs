//! A scripted, in-memory [`Connection`].
//!
//! Statements run inside a transaction are staged on the transaction and
//! only appear in [`MockConnection::committed`] once it commits, so tests
//! can check that a rolled-back flush left nothing behind. Queries are
//! answered by a handler closure; INSERT ... RETURNING is answered with a
//! fresh key.

use keel_core::{Connection, Dialect, Error, IsolationLevel, Result, Row, TransactionOps, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded statement.
pub type Recorded = (String, Vec<Value>);

type QueryHandler = dyn Fn(&str, &[Value]) -> Result<Vec<Row>> + Send + Sync;

#[derive(Debug)]
struct MockState {
    committed: Vec<Recorded>,
    attempted: Vec<Recorded>,
    queries: Vec<Recorded>,
    begins: usize,
    commits: usize,
    rollbacks: usize,
    fail_on_statement: Option<usize>,
    fail_commit: bool,
    affected_rows: u64,
    next_id: i64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            committed: Vec::new(),
            attempted: Vec::new(),
            queries: Vec::new(),
            begins: 0,
            commits: 0,
            rollbacks: 0,
            fail_on_statement: None,
            fail_commit: false,
            affected_rows: 1,
            next_id: 1000,
        }
    }
}

impl MockState {
    /// Record a write statement; fails if it is the one scripted to fail.
    fn attempt(&mut self, sql: &str, params: &[Value]) -> Result<()> {
        self.attempted.push((sql.to_string(), params.to_vec()));
        if self.fail_on_statement == Some(self.attempted.len()) {
            tracing::trace!(sql, "injected statement failure");
            return Err(Error::query(sql, "injected failure"));
        }
        Ok(())
    }

    fn generate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Scripted connection shared by clones.
#[derive(Clone)]
pub struct MockConnection {
    state: Arc<Mutex<MockState>>,
    handler: Arc<QueryHandler>,
    dialect: Dialect,
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("state", &self.state)
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    /// A Postgres-dialect connection whose queries return no rows.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            handler: Arc::new(|_, _| Ok(Vec::new())),
            dialect: Dialect::Postgres,
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Answer SELECTs with `handler`.
    pub fn on_query<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// Make the `n`-th write statement (1-based, counted across the
    /// connection's lifetime) fail.
    pub fn fail_on_statement(self, n: usize) -> Self {
        self.lock().fail_on_statement = Some(n);
        self
    }

    /// Make every commit fail, discarding the staged writes.
    pub fn fail_commit(self) -> Self {
        self.lock().fail_commit = true;
        self
    }

    /// Rows reported as affected by each UPDATE/DELETE. Defaults to 1.
    pub fn affected_rows(self, rows: u64) -> Self {
        self.lock().affected_rows = rows;
        self
    }

    /// Write statements that reached durable state.
    pub fn committed(&self) -> Vec<Recorded> {
        self.lock().committed.clone()
    }

    /// Every write statement attempted, including rolled-back ones.
    pub fn attempted(&self) -> Vec<Recorded> {
        self.lock().attempted.clone()
    }

    /// Every SELECT run through the connection or a transaction.
    pub fn queries(&self) -> Vec<Recorded> {
        self.lock().queries.clone()
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries.len()
    }

    pub fn begins(&self) -> usize {
        self.lock().begins
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.lock().queries.push((sql.to_string(), params.to_vec()));
        (self.handler)(sql, params)
    }
}

fn returning_column(sql: &str) -> Option<&str> {
    sql.split_once(" RETURNING ").map(|(_, col)| col.trim())
}

impl Connection for MockConnection {
    type Tx<'conn>
        = MockTransaction
    where
        Self: 'conn;

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.run_query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut state = self.lock();
        state.attempt(sql, params)?;
        state.committed.push((sql.to_string(), params.to_vec()));
        Ok(state.affected_rows)
    }

    fn begin_with(&self, _isolation: IsolationLevel) -> Result<Self::Tx<'_>> {
        self.lock().begins += 1;
        Ok(MockTransaction {
            conn: self.clone(),
            staged: Mutex::new(Vec::new()),
            last_id: Mutex::new(None),
        })
    }
}

/// Transaction handle staging writes until commit.
#[derive(Debug)]
pub struct MockTransaction {
    conn: MockConnection,
    staged: Mutex<Vec<Recorded>>,
    last_id: Mutex<Option<i64>>,
}

impl MockTransaction {
    fn stage(&self, sql: &str, params: &[Value]) {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((sql.to_string(), params.to_vec()));
    }

    fn remember_id(&self, id: i64) {
        *self.last_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
    }
}

impl TransactionOps for MockTransaction {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let Some(column) = returning_column(sql) else {
            return self.conn.run_query(sql, params);
        };
        let id = {
            let mut state = self.conn.lock();
            state.attempt(sql, params)?;
            state.generate_id()
        };
        self.stage(sql, params);
        self.remember_id(id);
        Ok(vec![Row::new(vec![column.to_string()], vec![Value::BigInt(id)])])
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let (affected, id) = {
            let mut state = self.conn.lock();
            state.attempt(sql, params)?;
            let id = sql.starts_with("INSERT").then(|| state.generate_id());
            (state.affected_rows, id)
        };
        self.stage(sql, params);
        if let Some(id) = id {
            self.remember_id(id);
        }
        Ok(affected)
    }

    fn last_insert_id(&self) -> Result<Option<i64>> {
        Ok(*self.last_id.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn commit(self) -> Result<()> {
        let staged = self.staged.into_inner().unwrap_or_else(|e| e.into_inner());
        let mut state = self.conn.lock();
        if state.fail_commit {
            state.rollbacks += 1;
            return Err(Error::Transaction("injected commit failure".to_string()));
        }
        state.commits += 1;
        state.committed.extend(staged);
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.conn.lock().rollbacks += 1;
        Ok(())
    }
}
