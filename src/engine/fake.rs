//! In-memory query engine for tests and local smoke runs.
//!
//! Tables live in a shared map; every clone of [`FakeQueryEngine`] sees the
//! same state, so a test can keep a handle for inspection while the pipeline
//! owns another. Failures are injected with the `fail_*` methods.

use crate::cloud::{CloudIOError, CloudResult, ErrorKind};
use crate::engine::{
    ColumnMeta, ConnectionFactory, ConnectionParams, Cursor, QueryConnection, QueryEngine, Row,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Default rows per block, matching common engine drivers.
pub const DEFAULT_BLOCK_SIZE: usize = 10_000;

/// A table served by the fake engine.
#[derive(Debug, Clone, Default)]
pub struct FakeEngineTable {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

struct EngineState {
    tables: HashMap<String, FakeEngineTable>,
    block_size: usize,
    connect_failures: u32,
    cursor_failures: u32,
    execute_failures: HashSet<String>,
    fetch_failures: HashMap<String, usize>,
    connect_attempts: u32,
    closed_cursors: u32,
    statements: Vec<String>,
}

#[derive(Clone)]
pub struct FakeQueryEngine {
    state: Arc<Mutex<EngineState>>,
}

impl FakeQueryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState {
                tables: HashMap::new(),
                block_size: DEFAULT_BLOCK_SIZE,
                connect_failures: 0,
                cursor_failures: 0,
                execute_failures: HashSet::new(),
                fetch_failures: HashMap::new(),
                connect_attempts: 0,
                closed_cursors: 0,
                statements: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine mutex poisoned")
    }

    #[must_use]
    pub fn with_block_size(self, block_size: usize) -> Self {
        self.lock().block_size = block_size.max(1);
        self
    }

    /// Register a table. Column names may be `table.column` qualified.
    ///
    /// # Panics
    ///
    /// Panics if the engine mutex is poisoned.
    pub fn add_table(&self, name: &str, columns: Vec<ColumnMeta>, rows: Vec<Row>) {
        self.lock()
            .tables
            .insert(name.to_string(), FakeEngineTable { columns, rows });
    }

    /// The next `n` connection attempts fail with a network error.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// The next `n` cursor derivations fail with a network error.
    pub fn fail_next_cursors(&self, n: u32) {
        self.lock().cursor_failures = n;
    }

    /// Every execution against `table` fails.
    pub fn fail_execute(&self, table: &str) {
        self.lock().execute_failures.insert(table.to_string());
    }

    /// Pulling block number `block` (0-based) of `table` fails.
    pub fn fail_fetch_at(&self, table: &str, block: usize) {
        self.lock().fetch_failures.insert(table.to_string(), block);
    }

    /// A connection factory bound to this engine.
    #[must_use]
    pub fn factory(&self) -> Self {
        self.clone()
    }

    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    #[must_use]
    pub fn closed_cursors(&self) -> u32 {
        self.lock().closed_cursors
    }

    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    fn open_connection(&self) -> CloudResult<Box<dyn QueryConnection>> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(CloudIOError::new(ErrorKind::Network, "connection refused"));
        }
        drop(state);
        Ok(Box::new(FakeConnection {
            engine: self.clone(),
        }))
    }
}

impl Default for FakeQueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for FakeQueryEngine {
    fn connect(&self) -> CloudResult<Box<dyn QueryConnection>> {
        self.open_connection()
    }
}

impl QueryEngine for FakeQueryEngine {
    fn open(&self, _params: &ConnectionParams) -> CloudResult<Box<dyn QueryConnection>> {
        self.open_connection()
    }
}

struct FakeConnection {
    engine: FakeQueryEngine,
}

impl QueryConnection for FakeConnection {
    fn cursor(&mut self) -> CloudResult<Box<dyn Cursor>> {
        let mut state = self.engine.lock();
        if state.cursor_failures > 0 {
            state.cursor_failures -= 1;
            return Err(CloudIOError::new(ErrorKind::Network, "session expired"));
        }
        let block_size = state.block_size;
        drop(state);
        Ok(Box::new(FakeCursor {
            engine: self.engine.clone(),
            block_size,
            table: None,
            position: 0,
            blocks_served: 0,
        }))
    }
}

struct FakeCursor {
    engine: FakeQueryEngine,
    block_size: usize,
    table: Option<String>,
    position: usize,
    blocks_served: usize,
}

impl FakeCursor {
    fn current(&self) -> CloudResult<&str> {
        self.table
            .as_deref()
            .ok_or_else(|| CloudIOError::new(ErrorKind::InvalidInput, "no statement executed"))
    }
}

impl Cursor for FakeCursor {
    fn execute(&mut self, sql: &str) -> CloudResult<()> {
        let mut state = self.engine.lock();
        state.statements.push(sql.to_string());

        // Only `SELECT * FROM <table>` is understood
        let table = sql.split_whitespace().last().unwrap_or_default().to_string();
        if state.execute_failures.contains(&table) {
            return Err(CloudIOError::new(
                ErrorKind::InternalError,
                format!("execution of `{sql}` failed"),
            ));
        }
        if !state.tables.contains_key(&table) {
            return Err(CloudIOError::new(
                ErrorKind::NotFound,
                format!("Table not found: {table}"),
            ));
        }
        drop(state);

        self.table = Some(table);
        self.position = 0;
        self.blocks_served = 0;
        Ok(())
    }

    fn columns(&self) -> CloudResult<Vec<ColumnMeta>> {
        let table = self.current()?;
        let state = self.engine.lock();
        Ok(state
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    fn has_more_rows(&self) -> bool {
        let Some(table) = self.table.as_deref() else {
            return false;
        };
        let state = self.engine.lock();
        state
            .tables
            .get(table)
            .is_some_and(|t| self.position < t.rows.len())
    }

    fn fetch_block(&mut self) -> CloudResult<Vec<Row>> {
        let table = self.current()?.to_string();
        let state = self.engine.lock();
        if state.fetch_failures.get(&table) == Some(&self.blocks_served) {
            return Err(CloudIOError::new(
                ErrorKind::Network,
                format!("fetching block {} of {table} timed out", self.blocks_served),
            ));
        }
        let rows = state.tables.get(&table).map_or(&[][..], |t| &t.rows[..]);
        let end = (self.position + self.block_size).min(rows.len());
        let block = rows[self.position.min(end)..end].to_vec();
        drop(state);

        self.position = end;
        self.blocks_served += 1;
        Ok(block)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn close(&mut self) -> CloudResult<()> {
        self.engine.lock().closed_cursors += 1;
        self.table = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Row {
        values.iter().map(|v| Some((*v).to_string())).collect()
    }

    #[test]
    fn serves_blocks_in_order() -> CloudResult<()> {
        let engine = FakeQueryEngine::new().with_block_size(2);
        engine.add_table(
            "t",
            vec![ColumnMeta::new("t.a", "INT_TYPE")],
            vec![row(&["1"]), row(&["2"]), row(&["3"])],
        );

        let mut conn = engine.connect()?;
        let mut cursor = conn.cursor()?;
        cursor.execute("SELECT * FROM t")?;
        assert_eq!(cursor.columns()?[0].name, "t.a");

        assert!(cursor.has_more_rows());
        assert_eq!(cursor.fetch_block()?.len(), 2);
        assert_eq!(cursor.fetch_block()?, vec![row(&["3"])]);
        assert!(!cursor.has_more_rows());
        assert_eq!(engine.statements(), vec!["SELECT * FROM t"]);
        Ok(())
    }

    #[test]
    fn unknown_table_fails_execution() -> CloudResult<()> {
        let engine = FakeQueryEngine::new();
        let mut cursor = engine.connect()?.cursor()?;
        let err = cursor.execute("SELECT * FROM missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        Ok(())
    }
}
