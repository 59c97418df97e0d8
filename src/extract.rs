//! Table-by-table extraction into local staged files.
//!
//! For every requested table the orchestrator acquires a cursor, infers and
//! persists the schema, writes one slice per fetched block, concatenates the
//! slices into `{table}{ext}` and deletes them. A table that fails at any step
//! is recorded as failed and the run moves on to the next one.

use crate::engine::{
    ConnectionFactory, ConnectionManager, Cursor, CursorLease, PaginatedFetcher, QueryConnection,
};
use crate::error::PipelineError;
use crate::pool::WorkerPool;
use crate::schema::{SchemaField, infer_schema};
use crate::staging::{SlicePattern, concatenate, remove_slices, write_slice};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Pending,
    Ok,
    Failed,
}

/// One unit of extraction work and what became of it.
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub name: String,
    pub schema: Vec<SchemaField>,
    /// Slice files written, in block order. Removed from disk after concatenation.
    pub slices: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub status: TableStatus,
    pub rows: usize,
    /// Every error met while extracting, prefixed with its kind.
    pub errors: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Vec::new(),
            slices: Vec::new(),
            output: None,
            status: TableStatus::Pending,
            rows: 0,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, err: &PipelineError) {
        error!(table = %self.name, kind = err.kind_name(), "{err}");
        self.errors.push(format!("{}: {err}", err.kind_name()));
    }

    fn fail(&mut self, err: &PipelineError) {
        self.record(err);
        self.status = TableStatus::Failed;
    }
}

/// Outcome of [`ExtractionOrchestrator::extract_all`], in request order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub tables: Vec<Table>,
}

impl ExtractionReport {
    /// Names of the tables that were fully extracted.
    #[must_use]
    pub fn succeeded(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Ok)
            .map(|t| t.name.clone())
            .collect()
    }

    #[must_use]
    pub fn failed(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Ok)
            .map(|t| t.name.clone())
            .collect()
    }

    /// Whether every requested table, by name, was extracted.
    #[must_use]
    pub fn is_complete(&self, requested: &[String]) -> bool {
        let done: BTreeSet<&str> = self
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Ok)
            .map(|t| t.name.as_str())
            .collect();
        requested.iter().all(|name| done.contains(name.as_str()))
    }
}

pub struct ExtractionOrchestrator {
    connections: ConnectionManager,
    fetcher: PaginatedFetcher,
    cleanup_pool: WorkerPool,
    table_pool: Option<WorkerPool>,
}

impl ExtractionOrchestrator {
    #[must_use]
    pub fn new(connections: ConnectionManager, cleanup_pool: WorkerPool) -> Self {
        Self {
            connections,
            fetcher: PaginatedFetcher,
            cleanup_pool,
            table_pool: None,
        }
    }

    /// Extract tables concurrently on `pool`, one private connection per table.
    #[must_use]
    pub fn with_table_pool(mut self, pool: WorkerPool) -> Self {
        self.table_pool = Some(pool).filter(|p| p.size() > 1);
        self
    }

    /// Extract every table in `tables` into `{work_dir}/{table}{ext}`.
    ///
    /// Tables are independent: a connection, fetch or concatenation failure
    /// on one is recorded in the report and the remaining tables still run.
    pub fn extract_all(
        &self,
        tables: &[String],
        factory: &dyn ConnectionFactory,
        work_dir: &Path,
        ext: &str,
    ) -> ExtractionReport {
        let start = Instant::now();
        let tables = match &self.table_pool {
            Some(pool) => pool.map(tables.to_vec(), |name| {
                let mut table = Table::new(name);
                if let Some(lease) = self.acquire(&mut table, None, None, factory) {
                    let CursorLease { mut cursor, .. } = lease;
                    self.extract_table(&mut table, cursor.as_mut(), work_dir, ext);
                    close_quietly(cursor.as_mut());
                }
                table
            }),
            None => self.extract_sequential(tables, factory, work_dir, ext),
        };

        let report = ExtractionReport { tables };
        info!(
            succeeded = report.succeeded().len(),
            requested = report.tables.len(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "extraction finished"
        );
        report
    }

    /// One cursor at a time; the connection is handed from table to table.
    fn extract_sequential(
        &self,
        names: &[String],
        factory: &dyn ConnectionFactory,
        work_dir: &Path,
        ext: &str,
    ) -> Vec<Table> {
        let mut cursor = None;
        let mut connection = None;
        let mut tables = Vec::with_capacity(names.len());

        for name in names {
            let mut table = Table::new(name.as_str());
            if let Some(lease) = self.acquire(&mut table, cursor.take(), connection.take(), factory)
            {
                let CursorLease {
                    cursor: mut current,
                    connection: conn,
                } = lease;
                self.extract_table(&mut table, current.as_mut(), work_dir, ext);
                cursor = Some(current);
                connection = Some(conn);
            }
            tables.push(table);
        }

        if let Some(mut last) = cursor {
            close_quietly(last.as_mut());
        }
        tables
    }

    fn acquire(
        &self,
        table: &mut Table,
        cursor: Option<Box<dyn Cursor>>,
        connection: Option<Box<dyn QueryConnection>>,
        factory: &dyn ConnectionFactory,
    ) -> Option<CursorLease> {
        match self.connections.get_cursor(cursor, connection, factory) {
            Ok(lease) => Some(lease),
            Err(e) => {
                warn!(table = %table.name, "skipping table, no cursor");
                table.fail(&e);
                None
            }
        }
    }

    /// Fetch, stage and concatenate one table. Slices are always cleaned up.
    fn extract_table(&self, table: &mut Table, cursor: &mut dyn Cursor, work_dir: &Path, ext: &str) {
        let start = Instant::now();
        let pattern = SlicePattern::new(work_dir, &table.name, ext);

        let stale = remove_slices(&pattern, &self.cleanup_pool);
        if stale > 0 {
            debug!(table = %table.name, stale, "removed slices from an earlier run");
        }

        let staged = self.stage(table, cursor, &pattern);
        if staged {
            match concatenate(&pattern) {
                Ok(output) => table.output = Some(output),
                Err(e) => table.record(&e),
            }
        }

        let removed = remove_slices(&pattern, &self.cleanup_pool);
        debug!(table = %table.name, removed, "slices cleaned up");

        table.status = if staged && table.output.is_some() {
            TableStatus::Ok
        } else {
            TableStatus::Failed
        };
        info!(
            table = %table.name,
            rows = table.rows,
            status = ?table.status,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "extracted"
        );
    }

    /// Run the query and write every block as a slice. Returns whether every
    /// block was both fetched and written. A slice write failure does not stop
    /// the remaining blocks, but the table can no longer be concatenated.
    fn stage(&self, table: &mut Table, cursor: &mut dyn Cursor, pattern: &SlicePattern) -> bool {
        let mut stream = match self.fetcher.fetch_all(cursor, &table.name) {
            Ok(stream) => stream,
            Err(e) => {
                table.record(&e);
                return false;
            }
        };

        match infer_schema(&table.name, stream.cursor(), pattern.work_dir()) {
            Ok(fields) => table.schema = fields,
            Err(e) => {
                table.record(&e);
                return false;
            }
        }

        let mut complete = true;
        for block in stream.by_ref() {
            match block {
                Ok(block) => {
                    let path = pattern.slice_path(block.number);
                    match write_slice(&path, &block, &table.schema) {
                        Ok(_) => table.slices.push(path),
                        Err(e) => {
                            table.record(&e);
                            complete = false;
                        }
                    }
                }
                Err(e) => {
                    table.record(&e);
                    complete = false;
                }
            }
        }
        table.rows = stream.rows_fetched();
        complete
    }
}

fn close_quietly(cursor: &mut dyn Cursor) {
    if let Err(e) = cursor.close() {
        debug!("closing cursor: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ColumnMeta, FakeQueryEngine};
    use crate::retry::RetryConfig;

    fn orchestrator() -> ExtractionOrchestrator {
        ExtractionOrchestrator::new(
            ConnectionManager::new(RetryConfig::default()),
            WorkerPool::new("cleanup", Some(2)).unwrap(),
        )
    }

    fn engine() -> FakeQueryEngine {
        let engine = FakeQueryEngine::new().with_block_size(2);
        engine.add_table(
            "people",
            vec![
                ColumnMeta::new("people.id", "INT_TYPE"),
                ColumnMeta::new("people.name", "STRING_TYPE"),
            ],
            (1..=5)
                .map(|i| vec![Some(i.to_string()), Some(format!("p{i}"))])
                .collect(),
        );
        engine
    }

    #[test]
    fn extracts_and_cleans_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = engine();
        let report = orchestrator().extract_all(&["people".to_string()], &engine, dir.path(), ".csv");

        assert_eq!(report.succeeded(), vec!["people"]);
        let table = &report.tables[0];
        assert_eq!(table.rows, 5);
        assert_eq!(table.slices.len(), 3);
        assert!(table.slices.iter().all(|p| !p.exists()));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("people.csv"))?,
            "1,p1\n2,p2\n3,p3\n4,p4\n5,p5\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("people_schema.csv"))?,
            "id:INTEGER,name:STRING"
        );
        Ok(())
    }

    #[test]
    fn fetch_failure_marks_table_failed_without_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = engine();
        engine.fail_fetch_at("people", 1);

        let report = orchestrator().extract_all(&["people".to_string()], &engine, dir.path(), ".csv");
        let table = &report.tables[0];
        assert_eq!(table.status, TableStatus::Failed);
        assert!(table.errors[0].starts_with("FetchError"));
        assert!(!dir.path().join("people.csv").exists());
        assert!(!dir.path().join("people.slice_1.csv").exists());
        Ok(())
    }

    #[test]
    fn unknown_table_does_not_stop_the_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = engine();
        let requested = vec!["ghost".to_string(), "people".to_string()];

        let report = orchestrator().extract_all(&requested, &engine, dir.path(), ".csv");
        assert_eq!(report.succeeded(), vec!["people"]);
        assert_eq!(report.failed(), vec!["ghost"]);
        assert!(!report.is_complete(&requested));
        // the connection survived the failed execution
        assert_eq!(engine.connect_attempts(), 1);
        Ok(())
    }

    #[test]
    fn table_pool_extracts_in_parallel() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = engine();
        engine.add_table("empty", vec![ColumnMeta::new("x", "INT_TYPE")], vec![]);
        let requested = vec!["people".to_string(), "empty".to_string()];

        let report = orchestrator()
            .with_table_pool(WorkerPool::new("tables", Some(2))?)
            .extract_all(&requested, &engine, dir.path(), ".csv");

        assert!(report.is_complete(&requested));
        assert_eq!(engine.connect_attempts(), 2);
        assert!(std::fs::read(dir.path().join("empty.csv"))?.is_empty());
        Ok(())
    }
}
