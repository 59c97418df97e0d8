//! Paginated extraction from a cursor.

use crate::engine::{Cursor, Row};
use crate::error::{PipelineError, Result};
use std::iter::FusedIterator;
use tracing::{debug, info};

/// One fetched block, numbered from 1 in fetch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBlock {
    pub number: usize,
    pub rows: Vec<Row>,
}

/// Drives a cursor through a full-table read.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaginatedFetcher;

impl PaginatedFetcher {
    /// The statement issued for `table`.
    #[must_use]
    pub fn select_statement(table: &str) -> String {
        format!("SELECT * FROM {table}")
    }

    /// Execute the table query and return the lazy block sequence.
    ///
    /// Nothing is pulled until the stream is iterated, and each block is
    /// yielded before the next one is requested.
    ///
    /// # Errors
    ///
    /// Returns a `Fetch` error if the query cannot be executed.
    pub fn fetch_all<'c>(&self, cursor: &'c mut dyn Cursor, table: &str) -> Result<BlockStream<'c>> {
        cursor
            .execute(&Self::select_statement(table))
            .map_err(|source| PipelineError::Fetch {
                table: table.to_string(),
                source,
            })?;

        Ok(BlockStream {
            cursor,
            table: table.to_string(),
            next_number: 1,
            rows_fetched: 0,
            finished: false,
        })
    }
}

/// Finite, non-restartable sequence of row blocks for one table.
///
/// A failed pull is yielded once as `Err` and ends the sequence. Empty blocks
/// are skipped without consuming a number, so yielded blocks are always
/// numbered `1..n` without gaps.
pub struct BlockStream<'c> {
    cursor: &'c mut dyn Cursor,
    table: String,
    next_number: usize,
    rows_fetched: usize,
    finished: bool,
}

impl BlockStream<'_> {
    /// The executed cursor, for reading result-set metadata.
    #[must_use]
    pub fn cursor(&self) -> &dyn Cursor {
        &*self.cursor
    }

    #[must_use]
    pub const fn rows_fetched(&self) -> usize {
        self.rows_fetched
    }
}

impl Iterator for BlockStream<'_> {
    type Item = Result<RowBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished && self.cursor.has_more_rows() {
            match self.cursor.fetch_block() {
                Ok(rows) if rows.is_empty() => {
                    debug!(table = %self.table, "empty block");
                }
                Ok(rows) => {
                    let number = self.next_number;
                    self.next_number += 1;
                    self.rows_fetched += rows.len();
                    info!(table = %self.table, rows = self.rows_fetched, "fetching");
                    return Some(Ok(RowBlock { number, rows }));
                }
                Err(source) => {
                    self.finished = true;
                    return Some(Err(PipelineError::Fetch {
                        table: self.table.clone(),
                        source,
                    }));
                }
            }
        }
        self.finished = true;
        None
    }
}

impl FusedIterator for BlockStream<'_> {}
