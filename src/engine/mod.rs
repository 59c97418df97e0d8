//! Query-engine side of the pipeline.
//!
//! The engine is consumed through three blocking traits:
//!
//! - [`ConnectionFactory`] - opens a fresh [`QueryConnection`]
//! - [`QueryConnection`] - hands out cursors
//! - [`Cursor`] - executes one statement and pulls fixed-size row blocks
//!
//! A cursor is stateful and sequential; one table is always read through one
//! cursor from start to end. [`connection`] renews cursors and connections with
//! retry, [`fetch`] turns a cursor into a lazy sequence of row blocks.

pub mod connection;
pub mod fake;
pub mod fetch;

use crate::cloud::CloudResult;
use std::fmt;
use std::sync::Arc;

pub use connection::{ConnectionManager, CursorLease};
pub use fake::{FakeEngineTable, FakeQueryEngine};
pub use fetch::{BlockStream, PaginatedFetcher, RowBlock};

/// One fetched row; `None` is a SQL `NULL`.
pub type Row = Vec<Option<String>>;

/// Engine-native column metadata as reported after query execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column name, possibly qualified as `table.column`.
    pub name: String,
    /// Native type tag such as `BIGINT_TYPE` or `VARCHAR_TYPE`.
    pub type_tag: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// A stateful statement cursor.
pub trait Cursor: Send {
    /// Execute a statement, replacing any previous result set.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement is rejected or the connection drops
    fn execute(&mut self, sql: &str) -> CloudResult<()>;

    /// Column metadata of the current result set.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing has been executed yet
    fn columns(&self) -> CloudResult<Vec<ColumnMeta>>;

    /// Whether another block can be pulled.
    fn has_more_rows(&self) -> bool;

    /// Pull the next block of at most [`Cursor::block_size`] rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails
    fn fetch_block(&mut self) -> CloudResult<Vec<Row>>;

    /// Maximum rows returned by one [`Cursor::fetch_block`] call.
    fn block_size(&self) -> usize;

    /// Release server-side resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses; callers ignore it
    fn close(&mut self) -> CloudResult<()>;
}

/// An open session with the query engine.
pub trait QueryConnection: Send {
    /// # Errors
    ///
    /// Returns an error if the session is no longer usable
    fn cursor(&mut self) -> CloudResult<Box<dyn Cursor>>;
}

/// Opens new connections on demand.
pub trait ConnectionFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the engine cannot be reached or authentication fails
    fn connect(&self) -> CloudResult<Box<dyn QueryConnection>>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> CloudResult<Box<dyn QueryConnection>> + Send + Sync,
{
    fn connect(&self) -> CloudResult<Box<dyn QueryConnection>> {
        self()
    }
}

/// Parameters for opening an engine session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub auth_mechanism: String,
    pub ssl: bool,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .field("auth_mechanism", &self.auth_mechanism)
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// A query-engine driver: `(host, user, password, database) -> connection`.
pub trait QueryEngine: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened
    fn open(&self, params: &ConnectionParams) -> CloudResult<Box<dyn QueryConnection>>;
}

/// Binds a driver to fixed parameters, yielding a [`ConnectionFactory`].
#[derive(Clone)]
pub struct EngineConnector {
    engine: Arc<dyn QueryEngine>,
    params: ConnectionParams,
}

impl EngineConnector {
    #[must_use]
    pub fn new(engine: Arc<dyn QueryEngine>, params: ConnectionParams) -> Self {
        Self { engine, params }
    }

    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

impl ConnectionFactory for EngineConnector {
    fn connect(&self) -> CloudResult<Box<dyn QueryConnection>> {
        self.engine.open(&self.params)
    }
}
