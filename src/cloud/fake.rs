//! Fake implementations for testing.
//!
//! These implementations use in-memory data structures to simulate the object
//! store and the warehouse, so the whole transfer side can be exercised without
//! external services. Every clone shares state with the original: keep one
//! handle for assertions and give the other to the pipeline.

use crate::cloud::traits::{
    Bucket, CloudIOError, CloudResult, CredentialProvider, Credentials, Entity, EntityRef,
    ErrorKind, ExtractConfig, Job, JobKind, JobState, JobStatus, LoadConfig, ObjectMetadata,
    ObjectStore, QueryResult, UploadSession, Warehouse, WarehouseConnector,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

type BucketStorage = HashMap<String, HashMap<String, Vec<u8>>>;

// ============================================================================
// Fake Credentials
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeCredentials {
    pub project_id: String,
    pub token: String,
}

impl FakeCredentials {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            token: "fake-token".to_string(),
        }
    }
}

impl CredentialProvider for FakeCredentials {
    fn credentials(&self) -> CloudResult<Credentials> {
        if self.project_id.is_empty() {
            return Err(CloudIOError::new(
                ErrorKind::Authentication,
                "Empty project id",
            ));
        }
        Ok(Credentials {
            token: self.token.clone(),
            project_id: self.project_id.clone(),
        })
    }
}

// ============================================================================
// FakeObjectStore
// ============================================================================

/// One accepted chunk: `(object, offset, len)`.
pub type ChunkRecord = (String, u64, usize);

#[derive(Default)]
struct StoreState {
    buckets: BucketStorage,
    sessions: HashMap<String, Vec<u8>>,
    next_session: u64,
    chunk_log: Vec<ChunkRecord>,
    upload_failures: HashMap<String, u32>,
    upload_attempts: HashMap<String, u32>,
    bucket_error: Option<ErrorKind>,
    created_buckets: Vec<String>,
}

#[derive(Clone)]
pub struct FakeObjectStore {
    scheme: String,
    state: Arc<Mutex<StoreState>>,
}

impl FakeObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheme("gs")
    }

    pub fn with_scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("store mutex poisoned")
    }

    /// Pre-create a bucket.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    pub fn add_bucket(&self, name: &str) {
        self.lock().buckets.entry(name.to_string()).or_default();
    }

    /// The next `n` upload attempts of `object` fail on their first chunk.
    pub fn fail_uploads(&self, object: &str, n: u32) {
        self.lock().upload_failures.insert(object.to_string(), n);
    }

    /// Every bucket lookup fails with `kind`.
    pub fn fail_bucket_lookups(&self, kind: ErrorKind) {
        self.lock().bucket_error = Some(kind);
    }

    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    /// Object names in `bucket`, sorted.
    #[must_use]
    pub fn objects(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn chunk_log(&self) -> Vec<ChunkRecord> {
        self.lock().chunk_log.clone()
    }

    /// How many upload sessions were opened for `object`.
    #[must_use]
    pub fn upload_attempts(&self, object: &str) -> u32 {
        self.lock()
            .upload_attempts
            .get(object)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn created_buckets(&self) -> Vec<String> {
        self.lock().created_buckets.clone()
    }
}

impl Default for FakeObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for FakeObjectStore {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn get_bucket(&self, name: &str) -> CloudResult<Bucket> {
        let state = self.lock();
        if let Some(kind) = &state.bucket_error {
            return Err(CloudIOError::new(
                kind.clone(),
                format!("lookup of bucket {name} failed"),
            ));
        }
        if state.buckets.contains_key(name) {
            Ok(Bucket {
                name: name.to_string(),
            })
        } else {
            Err(CloudIOError::new(
                ErrorKind::NotFound,
                format!("Bucket {name} not found"),
            ))
        }
    }

    fn create_bucket(&self, name: &str) -> CloudResult<Bucket> {
        let mut state = self.lock();
        if state.buckets.contains_key(name) {
            return Err(CloudIOError::new(
                ErrorKind::AlreadyExists,
                format!("Bucket {name} already exists"),
            ));
        }
        state.buckets.insert(name.to_string(), HashMap::new());
        state.created_buckets.push(name.to_string());
        Ok(Bucket {
            name: name.to_string(),
        })
    }

    fn start_upload(
        &self,
        bucket: &Bucket,
        object: &str,
        chunk_size: usize,
    ) -> CloudResult<UploadSession> {
        let mut state = self.lock();
        if !state.buckets.contains_key(&bucket.name) {
            return Err(CloudIOError::new(
                ErrorKind::NotFound,
                format!("Bucket {} not found", bucket.name),
            ));
        }
        *state.upload_attempts.entry(object.to_string()).or_default() += 1;
        state.next_session += 1;
        let id = format!("upload-{}", state.next_session);
        state.sessions.insert(id.clone(), Vec::new());
        Ok(UploadSession {
            id,
            bucket: bucket.name.clone(),
            object: object.to_string(),
            chunk_size,
        })
    }

    fn upload_chunk(&self, session: &UploadSession, offset: u64, data: &[u8]) -> CloudResult<()> {
        let mut state = self.lock();
        if let Some(remaining) = state.upload_failures.get_mut(&session.object)
            && *remaining > 0
        {
            *remaining -= 1;
            state.sessions.remove(&session.id);
            return Err(CloudIOError::new(
                ErrorKind::Network,
                format!("connection reset while uploading {}", session.object),
            ));
        }
        let buffer = state.sessions.get_mut(&session.id).ok_or_else(|| {
            CloudIOError::new(ErrorKind::NotFound, format!("No session {}", session.id))
        })?;
        if buffer.len() as u64 != offset {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("chunk at offset {offset}, expected {}", buffer.len()),
            ));
        }
        buffer.extend_from_slice(data);
        state
            .chunk_log
            .push((session.object.clone(), offset, data.len()));
        Ok(())
    }

    fn finish_upload(
        &self,
        session: &UploadSession,
        total_size: u64,
    ) -> CloudResult<ObjectMetadata> {
        let mut state = self.lock();
        let data = state.sessions.remove(&session.id).ok_or_else(|| {
            CloudIOError::new(ErrorKind::NotFound, format!("No session {}", session.id))
        })?;
        if data.len() as u64 != total_size {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("received {} bytes, expected {total_size}", data.len()),
            ));
        }
        state
            .buckets
            .entry(session.bucket.clone())
            .or_default()
            .insert(session.object.clone(), data);
        Ok(ObjectMetadata {
            bucket: session.bucket.clone(),
            key: session.object.clone(),
            size: total_size,
        })
    }
}

// ============================================================================
// FakeWarehouse
// ============================================================================

/// A load that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub source_uri: String,
    pub config: LoadConfig,
}

/// An extract that was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRecord {
    pub table: String,
    pub destination_uri: String,
    pub config: ExtractConfig,
}

struct FakeJob {
    kind: JobKind,
    target: String,
    source_uri: String,
    config: Option<LoadConfig>,
    script: VecDeque<JobState>,
    error: Option<String>,
}

struct WarehouseState {
    datasets: HashSet<String>,
    tables: HashSet<String>,
    loaded: HashMap<String, LoadedTable>,
    extracts: Vec<ExtractRecord>,
    jobs: HashMap<String, FakeJob>,
    next_job: u64,
    script: Vec<JobState>,
    load_failures: HashMap<String, u32>,
    load_submissions: HashMap<String, u32>,
    submit_failures: u32,
    extract_failure: Option<String>,
    column_schemas: HashMap<String, String>,
    metadata_fails: bool,
    queries: Vec<String>,
    connects: u32,
}

#[derive(Clone)]
pub struct FakeWarehouse {
    state: Arc<Mutex<WarehouseState>>,
}

impl FakeWarehouse {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WarehouseState {
                datasets: HashSet::new(),
                tables: HashSet::new(),
                loaded: HashMap::new(),
                extracts: Vec::new(),
                jobs: HashMap::new(),
                next_job: 0,
                script: vec![JobState::Pending, JobState::Running, JobState::Done],
                load_failures: HashMap::new(),
                load_submissions: HashMap::new(),
                submit_failures: 0,
                extract_failure: None,
                column_schemas: HashMap::new(),
                metadata_fails: false,
                queries: Vec::new(),
                connects: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WarehouseState> {
        self.state.lock().expect("warehouse mutex poisoned")
    }

    /// States every new job walks through, one per poll. The last state sticks;
    /// a script ending in a non-terminal state never finishes.
    ///
    /// # Panics
    ///
    /// Panics if the warehouse mutex is poisoned.
    pub fn script_jobs(&self, states: Vec<JobState>) {
        self.lock().script = states;
    }

    /// The next `n` load jobs into `table` (unqualified name) end in `Error`.
    pub fn fail_loads(&self, table: &str, n: u32) {
        self.lock().load_failures.insert(table.to_string(), n);
    }

    /// The next `n` job submissions are rejected outright.
    pub fn reject_next_submissions(&self, n: u32) {
        self.lock().submit_failures = n;
    }

    /// Every extract job ends in `Error` with `message`.
    pub fn fail_extracts(&self, message: &str) {
        self.lock().extract_failure = Some(message.to_string());
    }

    /// Register the metadata-catalog answer for `dataset.table`.
    pub fn set_column_schema(&self, dataset: &str, table: &str, schema: &str) {
        self.lock()
            .column_schemas
            .insert(format!("{dataset}.{table}"), schema.to_string());
    }

    /// Every metadata query fails.
    pub fn fail_metadata_queries(&self) {
        self.lock().metadata_fails = true;
    }

    #[must_use]
    pub fn has_dataset(&self, reference: &str) -> bool {
        self.lock().datasets.contains(reference)
    }

    #[must_use]
    pub fn has_table(&self, reference: &str) -> bool {
        let state = self.lock();
        state.tables.contains(reference) || state.loaded.contains_key(reference)
    }

    /// The completed load into `reference` (`project.dataset.table`).
    #[must_use]
    pub fn loaded(&self, reference: &str) -> Option<LoadedTable> {
        self.lock().loaded.get(reference).cloned()
    }

    #[must_use]
    pub fn extracts(&self) -> Vec<ExtractRecord> {
        self.lock().extracts.clone()
    }

    /// How many load jobs were submitted for `table` (unqualified name).
    #[must_use]
    pub fn load_submissions(&self, table: &str) -> u32 {
        self.lock()
            .load_submissions
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    /// Clients handed out through [`WarehouseConnector::connect`].
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    fn submit(
        &self,
        kind: JobKind,
        target: &EntityRef,
        source_uri: &str,
        config: Option<LoadConfig>,
        error: Option<String>,
    ) -> CloudResult<Job> {
        let mut state = self.lock();
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(CloudIOError::new(
                ErrorKind::ServiceUnavailable,
                "job submission rejected",
            ));
        }
        state.next_job += 1;
        let id = format!("job_{}", state.next_job);
        let mut script: VecDeque<JobState> = state.script.iter().copied().collect();
        if error.is_some() {
            // failing jobs still pass through the scripted non-terminal states
            script.retain(|s| !s.is_terminal());
            script.push_back(JobState::Error);
        }
        let first = script.front().copied().unwrap_or(JobState::Done);
        state.jobs.insert(
            id.clone(),
            FakeJob {
                kind,
                target: target.to_string(),
                source_uri: source_uri.to_string(),
                config,
                script,
                error,
            },
        );
        Ok(Job {
            id,
            kind,
            state: first,
            timeout: None,
        })
    }
}

impl Default for FakeWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

fn dataset_key(reference: &EntityRef) -> String {
    EntityRef::dataset(reference.project.clone(), reference.dataset.clone()).to_string()
}

/// Pull `key='value'` out of a statement.
fn quoted_after<'a>(sql: &'a str, key: &str) -> Option<&'a str> {
    let rest = &sql[sql.find(key)? + key.len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start().strip_prefix('\'')?;
    rest.split('\'').next()
}

impl Warehouse for FakeWarehouse {
    fn create_dataset(&self, dataset: &EntityRef) -> CloudResult<Entity> {
        let created = self.lock().datasets.insert(dataset_key(dataset));
        Ok(Entity {
            reference: EntityRef::dataset(dataset.project.clone(), dataset.dataset.clone()),
            created,
        })
    }

    fn create_table(&self, table: &EntityRef) -> CloudResult<Entity> {
        let mut state = self.lock();
        if !state.datasets.contains(&dataset_key(table)) {
            return Err(CloudIOError::new(
                ErrorKind::NotFound,
                format!("Dataset {} not found", dataset_key(table)),
            ));
        }
        let created = state.tables.insert(table.to_string());
        Ok(Entity {
            reference: table.clone(),
            created,
        })
    }

    fn submit_load(
        &self,
        table: &EntityRef,
        source_uri: &str,
        config: &LoadConfig,
    ) -> CloudResult<Job> {
        let name = table.table.clone().unwrap_or_default();
        let error = {
            let mut state = self.lock();
            *state.load_submissions.entry(name.clone()).or_default() += 1;
            match state.load_failures.get_mut(&name) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Some(format!("Error while reading data, table {name}"))
                }
                _ => None,
            }
        };
        self.submit(JobKind::Load, table, source_uri, Some(config.clone()), error)
    }

    fn submit_extract(
        &self,
        table: &EntityRef,
        destination_uri: &str,
        config: &ExtractConfig,
    ) -> CloudResult<Job> {
        let error = {
            let mut state = self.lock();
            state.extracts.push(ExtractRecord {
                table: table.to_string(),
                destination_uri: destination_uri.to_string(),
                config: config.clone(),
            });
            state.extract_failure.clone()
        };
        self.submit(JobKind::Extract, table, destination_uri, None, error)
    }

    fn job_status(&self, job_id: &str) -> CloudResult<JobStatus> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| {
            CloudIOError::new(ErrorKind::NotFound, format!("Job {job_id} not found"))
        })?;
        if job.script.len() > 1 {
            job.script.pop_front();
        }
        let current = job.script.front().copied().unwrap_or(JobState::Done);
        let status = JobStatus {
            state: current,
            error: (current == JobState::Error)
                .then(|| job.error.clone().unwrap_or_else(|| "job failed".to_string())),
        };

        if current == JobState::Done
            && job.kind == JobKind::Load
            && let Some(config) = job.config.clone()
        {
            let target = job.target.clone();
            let loaded = LoadedTable {
                source_uri: job.source_uri.clone(),
                config,
            };
            state.loaded.insert(target, loaded);
        }
        Ok(status)
    }

    fn query(&self, sql: &str) -> CloudResult<QueryResult> {
        let mut state = self.lock();
        state.queries.push(sql.to_string());
        if !sql.contains("INFORMATION_SCHEMA") {
            return Ok(QueryResult::default());
        }
        if state.metadata_fails {
            return Err(CloudIOError::new(
                ErrorKind::Authorization,
                "Access denied on INFORMATION_SCHEMA",
            ));
        }
        // FROM `dataset.INFORMATION_SCHEMA.COLUMNS` WHERE table_name='t'
        let dataset = sql
            .split('`')
            .nth(1)
            .and_then(|qualified| qualified.split('.').next())
            .unwrap_or_default();
        let table = quoted_after(sql, "table_name").unwrap_or_default();
        let schema = state
            .column_schemas
            .get(&format!("{dataset}.{table}"))
            .cloned();
        let rows: Vec<Vec<String>> = schema.into_iter().map(|s| vec![s]).collect();
        Ok(QueryResult {
            columns: vec!["schema".to_string()],
            row_count: rows.len(),
            rows,
        })
    }
}

impl WarehouseConnector for FakeWarehouse {
    fn connect(&self, credentials: &Credentials) -> CloudResult<Arc<dyn Warehouse>> {
        if credentials.project_id.is_empty() {
            return Err(CloudIOError::new(
                ErrorKind::Authentication,
                "missing project id",
            ));
        }
        self.lock().connects += 1;
        Ok(Arc::new(self.clone()))
    }
}
