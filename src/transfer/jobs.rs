//! Warehouse entity management and load/extract jobs.
//!
//! The warehouse client is an explicit value: every call that may create one
//! takes an `Option<WarehouseClient>` and hands the (possibly new) client back,
//! so callers decide where it is reused. A pooled caller keeps one client per
//! worker.

use crate::cloud::{
    CloudIOError, Compression, CredentialProvider, Entity, EntityRef, ExtractConfig, Job,
    JobState, JobStatus, LoadConfig, SourceFormat, Warehouse, WarehouseConnector,
    WriteDisposition, ensure_scheme,
};
use crate::compression::is_gzip_path;
use crate::error::{PipelineError, Result};
use crate::retry::{RetryConfig, retry};
use crate::schema::{SchemaField, read_schema, to_warehouse_fields};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on an extract job.
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(1800);

/// A connected warehouse handle scoped to one project.
#[derive(Clone)]
pub struct WarehouseClient {
    warehouse: Arc<dyn Warehouse>,
    project: String,
}

impl WarehouseClient {
    pub fn new(warehouse: Arc<dyn Warehouse>, project: impl Into<String>) -> Self {
        Self {
            warehouse,
            project: project.into(),
        }
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub fn warehouse(&self) -> &dyn Warehouse {
        self.warehouse.as_ref()
    }

    fn dataset_ref(&self, dataset: &str) -> EntityRef {
        EntityRef::dataset(self.project.as_str(), dataset)
    }
}

impl fmt::Debug for WarehouseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseClient")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

/// Result of [`WarehouseJobRunner::load`].
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// The client used, for the next call. `None` only if none could be built.
    pub client: Option<WarehouseClient>,
    /// `exporting to warehouse `{table}` OK`, or the error in place of `OK`.
    pub message: String,
    pub success: bool,
}

/// Result of [`WarehouseJobRunner::extract`].
#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    /// `{job id}/{state}` once the job is done.
    pub job: Result<String>,
    /// Comma-joined `name:type` from the metadata catalog; empty if unavailable.
    pub schema: String,
}

/// The load configuration for a manifest: its fields, or autodetect when empty.
#[must_use]
pub fn load_config(fields: &[SchemaField]) -> LoadConfig {
    LoadConfig {
        source_format: SourceFormat::Csv,
        skip_leading_rows: 0,
        allow_quoted_newlines: true,
        write_disposition: WriteDisposition::Truncate,
        schema: to_warehouse_fields(fields),
        autodetect: fields.is_empty(),
    }
}

/// The extract configuration for `destination`: gzip when it ends in `.gz`.
#[must_use]
pub fn extract_config(destination: &str) -> ExtractConfig {
    ExtractConfig {
        destination_format: SourceFormat::Csv,
        compression: if is_gzip_path(destination) {
            Compression::Gzip
        } else {
            Compression::None
        },
    }
}

/// Metadata query returning `name:type,...` for one table.
#[must_use]
pub fn schema_query(dataset: &str, table: &str) -> String {
    format!(
        "SELECT string_agg(concat(column_name,':',data_type),',') AS schema \
         FROM `{dataset}.INFORMATION_SCHEMA.COLUMNS` WHERE table_name='{table}'"
    )
}

pub struct WarehouseJobRunner {
    connector: Arc<dyn WarehouseConnector>,
    credentials: Arc<dyn CredentialProvider>,
    retry: RetryConfig,
    poll_interval: Duration,
    load_timeout: Option<Duration>,
    scheme: String,
}

impl WarehouseJobRunner {
    #[must_use]
    pub fn new(
        connector: Arc<dyn WarehouseConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            connector,
            credentials,
            retry: RetryConfig::default(),
            poll_interval: Duration::from_secs(1),
            load_timeout: None,
            scheme: "gs".to_string(),
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_load_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Scheme prepended to extract destinations that have none.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Reuse `existing`, or resolve credentials and connect a new client.
    ///
    /// # Errors
    ///
    /// Returns a `Job` error if credentials cannot be resolved or the
    /// connector refuses them.
    pub fn client(&self, existing: Option<WarehouseClient>) -> Result<WarehouseClient> {
        if let Some(client) = existing {
            return Ok(client);
        }
        let credentials = self
            .credentials
            .credentials()
            .map_err(|e| PipelineError::job("credentials", e))?;
        let warehouse = self
            .connector
            .connect(&credentials)
            .map_err(|e| PipelineError::job(&credentials.project_id, e))?;
        debug!(project = %credentials.project_id, "warehouse client connected");
        Ok(WarehouseClient::new(warehouse, credentials.project_id))
    }

    /// Get or create `dataset`, or `dataset.table` when `table` is given.
    pub fn ensure_entity(
        &self,
        client: Option<WarehouseClient>,
        dataset: &str,
        table: Option<&str>,
    ) -> (Option<WarehouseClient>, Result<Entity>) {
        let client = match self.client(client) {
            Ok(client) => client,
            Err(e) => return (None, Err(e)),
        };

        let dataset_ref = client.dataset_ref(dataset);
        let entity = client
            .warehouse()
            .create_dataset(&dataset_ref)
            .and_then(|ds| match table {
                None => Ok(ds),
                Some(t) => client.warehouse().create_table(&dataset_ref.clone().with_table(t)),
            })
            .map_err(|e| {
                let target = table.map_or_else(|| dataset_ref.to_string(), |t| {
                    dataset_ref.clone().with_table(t).to_string()
                });
                PipelineError::job(target, e)
            });

        if let Ok(entity) = &entity
            && entity.created
        {
            info!(entity = %entity.reference, "created");
        }
        (Some(client), entity)
    }

    /// Poll `job` until it reaches a terminal state or its timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns a `Job` error if polling fails or the timeout elapses first. The
    /// job itself is left running.
    pub fn await_job(&self, warehouse: &dyn Warehouse, job: &Job) -> Result<JobStatus> {
        let start = Instant::now();
        loop {
            let status = warehouse
                .job_status(&job.id)
                .map_err(|e| PipelineError::job(&job.id, e))?;
            if status.state.is_terminal() {
                debug!(job = %job.id, state = %status.state, "job finished");
                return Ok(status);
            }

            let elapsed = start.elapsed();
            let mut pause = self.poll_interval;
            if let Some(timeout) = job.timeout {
                if elapsed >= timeout {
                    return Err(PipelineError::job(
                        &job.id,
                        format!("timed out after {timeout:?} in state {}", status.state),
                    ));
                }
                pause = pause.min(timeout - elapsed);
            }
            std::thread::sleep(pause);
        }
    }

    /// Submit one job and wait for it; a job ending in `Error` is an `Err`.
    fn run_job(
        &self,
        warehouse: &dyn Warehouse,
        target: &EntityRef,
        submit: impl FnOnce() -> std::result::Result<Job, CloudIOError>,
        timeout: Option<Duration>,
    ) -> Result<Job> {
        let mut job = submit().map_err(|e| PipelineError::job(target.to_string(), e))?;
        job.timeout = timeout;
        let status = self.await_job(warehouse, &job)?;
        job.state = status.state;
        match status.state {
            JobState::Done => Ok(job),
            _ => Err(PipelineError::job(
                target.to_string(),
                status.error.unwrap_or_else(|| format!("job {} failed", job.id)),
            )),
        }
    }

    /// Load `remote_path` into `dataset.table`, retrying submission and
    /// completion together as one unit.
    ///
    /// The schema comes from the manifest at `schema_path`; a missing or empty
    /// manifest switches the load to autodetect.
    pub fn load(
        &self,
        client: Option<WarehouseClient>,
        dataset: &str,
        table: &str,
        remote_path: &str,
        schema_path: &Path,
    ) -> LoadOutcome {
        let message = |outcome: &str| format!("exporting to warehouse `{table}` {outcome}");

        let (client, entity) = self.ensure_entity(client, dataset, Some(table));
        let client = match (client, entity) {
            (Some(client), Ok(_)) => client,
            (client, Err(e)) => {
                return LoadOutcome {
                    client,
                    message: message(&e.to_string()),
                    success: false,
                };
            }
            (None, Ok(_)) => {
                return LoadOutcome {
                    client: None,
                    message: message("FAIL"),
                    success: false,
                };
            }
        };

        let fields = read_schema(schema_path);
        if fields.is_empty() {
            info!(table, "no schema manifest, using autodetect");
        }
        let config = load_config(&fields);
        let target = client.dataset_ref(dataset).with_table(table);

        let state = retry(&self.retry, |attempt| {
            debug!(table, attempt, "submitting load");
            self.run_job(
                client.warehouse(),
                &target,
                || client.warehouse().submit_load(&target, remote_path, &config),
                self.load_timeout,
            )
        });

        let (success, outcome) = match (state.result, state.last_error) {
            (Some(job), _) => {
                info!(table, job = %job.id, attempts = state.attempts, "loaded");
                (true, "OK".to_string())
            }
            (None, Some(e)) => {
                warn!(table, attempts = state.attempts, "load failed: {e}");
                (false, e.to_string())
            }
            (None, None) => (false, "FAIL".to_string()),
        };
        LoadOutcome {
            client: Some(client),
            message: message(&outcome),
            success,
        }
    }

    /// Export `dataset.table` to `remote_path`, bounded by `timeout`, and look
    /// up the table's column list from the metadata catalog.
    ///
    /// The job is attempted once. The schema lookup is independent and best
    /// effort.
    pub fn extract(
        &self,
        dataset: &str,
        table: &str,
        remote_path: &str,
        timeout: Duration,
    ) -> ExtractOutcome {
        let client = match self.client(None) {
            Ok(client) => client,
            Err(e) => {
                return ExtractOutcome {
                    job: Err(e),
                    schema: String::new(),
                };
            }
        };

        let destination = ensure_scheme(remote_path, &self.scheme);
        let config = extract_config(&destination);
        let target = client.dataset_ref(dataset).with_table(table);
        info!(table = %target, destination = %destination, compression = ?config.compression, "extracting");

        let job = self
            .run_job(
                client.warehouse(),
                &target,
                || client.warehouse().submit_extract(&target, &destination, &config),
                Some(timeout),
            )
            .map(|job| format!("{}/{}", job.id, job.state));
        if let Err(e) = &job {
            warn!(table = %target, "extract failed: {e}");
        }

        ExtractOutcome {
            job,
            schema: self.table_schema(&client, dataset, table),
        }
    }

    /// `name:type,...` for `dataset.table`, or empty when the catalog cannot
    /// answer.
    #[must_use]
    pub fn table_schema(&self, client: &WarehouseClient, dataset: &str, table: &str) -> String {
        match client.warehouse().query(&schema_query(dataset, table)) {
            Ok(result) => result
                .rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or_default(),
            Err(e) => {
                warn!(dataset, table, "schema lookup failed: {e}");
                String::new()
            }
        }
    }
}
