//! Core traits for the cloud side of the pipeline.
//!
//! These traits provide synchronous interfaces for object storage and the
//! analytical warehouse. Implementations may drive async SDKs internally but
//! must expose blocking calls: the pipeline gets its concurrency from worker
//! pools, never from async interleaving.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Core Error Type
// ============================================================================

/// Generic error type for cloud IO operations
#[derive(Debug, Clone)]
pub struct CloudIOError {
    pub message: String,
    pub kind: ErrorKind,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    AlreadyExists,
    InvalidInput,
    Network,
    Timeout,
    ServiceUnavailable,
    RateLimited,
    InternalError,
    Other,
}

impl fmt::Display for CloudIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for CloudIOError {}

impl CloudIOError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type CloudResult<T> = Result<T, CloudIOError>;

// ============================================================================
// Credentials
// ============================================================================

/// Resolved credential plus the project it is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Opaque token handed to provider clients.
    pub token: String,
    pub project_id: String,
}

/// Source of `(credential, project-id)` pairs.
pub trait CredentialProvider: Send + Sync {
    /// Resolve credentials for the cloud platform.
    ///
    /// # Errors
    ///
    /// Returns an `Authentication` error if no usable credential is available.
    fn credentials(&self) -> CloudResult<Credentials>;
}

// ============================================================================
// ObjectStore - Object Storage
// ============================================================================

/// A resolved bucket handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
}

/// An in-progress chunked upload of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub id: String,
    pub bucket: String,
    pub object: String,
    pub chunk_size: usize,
}

/// Metadata for a finished object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

/// Trait for object storage operations
pub trait ObjectStore: Send + Sync {
    /// URI scheme used for canonical object paths (`gs`, `s3`, ...).
    fn scheme(&self) -> &str;

    /// Look up an existing bucket
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` error if the bucket does not exist, or any other
    /// error kind if the lookup itself failed
    fn get_bucket(&self, name: &str) -> CloudResult<Bucket>;

    /// Create a bucket
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken, permissions are not enough, or the call fails
    fn create_bucket(&self, name: &str) -> CloudResult<Bucket>;

    /// Open a chunked upload for `object` inside `bucket`
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened
    fn start_upload(
        &self,
        bucket: &Bucket,
        object: &str,
        chunk_size: usize,
    ) -> CloudResult<UploadSession>;

    /// Send one chunk starting at byte `offset`
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk is rejected or the transfer fails
    fn upload_chunk(&self, session: &UploadSession, offset: u64, data: &[u8]) -> CloudResult<()>;

    /// Commit the upload once `total_size` bytes have been sent
    ///
    /// # Errors
    ///
    /// Returns an error if the stored size disagrees or the commit fails
    fn finish_upload(&self, session: &UploadSession, total_size: u64)
    -> CloudResult<ObjectMetadata>;
}

// ============================================================================
// Warehouse - Analytical Databases
// ============================================================================

/// Query result from a warehouse
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_count: usize,
}

/// A dataset or table identity, fully qualified by project.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub project: String,
    pub dataset: String,
    pub table: Option<String>,
}

impl EntityRef {
    pub fn dataset(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: None,
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

/// Dotted identifier, skipping empty components (`project.dataset.table`).
impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [
            self.project.as_str(),
            self.dataset.as_str(),
            self.table.as_deref().unwrap_or(""),
        ]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
        f.write_str(&parts.join("."))
    }
}

/// A dataset or table that exists in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub reference: EntityRef,
    /// `true` when this call created it.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Replace the table contents.
    Truncate,
    Append,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

/// Warehouse column definition: `(name, TYPE)`.
pub type WarehouseField = (String, String);

/// Configuration for a load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    pub source_format: SourceFormat,
    pub skip_leading_rows: u32,
    pub allow_quoted_newlines: bool,
    pub write_disposition: WriteDisposition,
    pub schema: Vec<WarehouseField>,
    /// Let the warehouse infer the schema; set when `schema` is empty.
    pub autodetect: bool,
}

/// Configuration for an extract job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractConfig {
    pub destination_format: SourceFormat,
    pub compression: Compression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum JobKind {
    Load,
    Extract,
}

/// Warehouse-reported job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JobState {
    Pending,
    Running,
    Done,
    Error,
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A polled job status; `error` is set when the job finished in `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub error: Option<String>,
}

/// A submitted warehouse job tracked until terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub timeout: Option<Duration>,
}

/// Trait for analytical data warehouse operations
pub trait Warehouse: Send + Sync {
    /// Get or create a dataset (`exists_ok` semantics)
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset can neither be found nor created
    fn create_dataset(&self, dataset: &EntityRef) -> CloudResult<Entity>;

    /// Get or create a table inside an existing dataset
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset is missing or the table cannot be created
    fn create_table(&self, table: &EntityRef) -> CloudResult<Entity>;

    /// Submit a load job reading `source_uri` into `table`
    ///
    /// # Errors
    ///
    /// Returns an error if the job is rejected at submission
    fn submit_load(&self, table: &EntityRef, source_uri: &str, config: &LoadConfig)
    -> CloudResult<Job>;

    /// Submit an extract job writing `table` to `destination_uri`
    ///
    /// # Errors
    ///
    /// Returns an error if the job is rejected at submission
    fn submit_extract(
        &self,
        table: &EntityRef,
        destination_uri: &str,
        config: &ExtractConfig,
    ) -> CloudResult<Job>;

    /// Poll a job's current state
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown or the status call fails
    fn job_status(&self, job_id: &str) -> CloudResult<JobStatus>;

    /// Execute a metadata or analytical query and return results
    ///
    /// # Errors
    ///
    /// Returns an error if the query is invalid or execution fails
    fn query(&self, sql: &str) -> CloudResult<QueryResult>;
}

/// Builds warehouse clients from resolved credentials.
pub trait WarehouseConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if a client cannot be constructed for these credentials
    fn connect(&self, credentials: &Credentials) -> CloudResult<Arc<dyn Warehouse>>;
}
