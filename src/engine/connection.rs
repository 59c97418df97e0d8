//! Cursor and connection renewal.

use crate::cloud::{CloudIOError, ErrorKind};
use crate::engine::{ConnectionFactory, Cursor, QueryConnection};
use crate::error::{PipelineError, Result};
use crate::retry::{RetryConfig, retry};
use tracing::debug;

/// A live cursor together with the connection it was derived from.
///
/// Both are handed back to [`ConnectionManager::get_cursor`] for the next table
/// so the connection can be reused.
pub struct CursorLease {
    pub cursor: Box<dyn Cursor>,
    pub connection: Box<dyn QueryConnection>,
}

impl CursorLease {
    /// Split back into the parts `get_cursor` accepts.
    #[must_use]
    pub fn into_parts(self) -> (Option<Box<dyn Cursor>>, Option<Box<dyn QueryConnection>>) {
        (Some(self.cursor), Some(self.connection))
    }
}

/// Obtains fresh cursors, reusing an existing connection when it still works.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    retry: RetryConfig,
}

impl ConnectionManager {
    #[must_use]
    pub const fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// Close `existing_cursor` (errors ignored), then derive a new cursor.
    ///
    /// The first attempt reuses `existing_conn` when present; every later
    /// attempt opens a new connection through `factory`.
    ///
    /// # Errors
    ///
    /// Returns a `Connection` error carrying the last failure once all attempts
    /// are used up. Callers skip the unit of work.
    pub fn get_cursor(
        &self,
        existing_cursor: Option<Box<dyn Cursor>>,
        existing_conn: Option<Box<dyn QueryConnection>>,
        factory: &dyn ConnectionFactory,
    ) -> Result<CursorLease> {
        if let Some(mut cursor) = existing_cursor
            && let Err(e) = cursor.close()
        {
            debug!("closing previous cursor: {e}");
        }

        let mut reusable = existing_conn;
        let state = retry(&self.retry, |attempt| {
            let mut connection = match reusable.take() {
                Some(conn) => conn,
                None => factory.connect()?,
            };
            debug!(attempt, "deriving cursor");
            let cursor = connection.cursor()?;
            Ok::<_, CloudIOError>(CursorLease { cursor, connection })
        });

        state
            .into_result(|| CloudIOError::new(ErrorKind::InvalidInput, "retry ceiling is zero"))
            .map_err(PipelineError::Connection)
    }
}
