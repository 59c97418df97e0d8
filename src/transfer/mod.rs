//! Upload of staged files and their load into the warehouse.
//!
//! Uploads and loads run on two separate [`WorkerPool`]s. Every load worker
//! keeps its own [`WarehouseClient`] for the files it handles, so a client is
//! never shared between threads.

pub mod jobs;
pub mod upload;

use crate::pool::WorkerPool;
use crate::schema::manifest_path;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

pub use jobs::{
    DEFAULT_EXTRACT_TIMEOUT, ExtractOutcome, LoadOutcome, WarehouseClient, WarehouseJobRunner,
};
pub use upload::{ChunkedUploader, DEFAULT_CHUNK_SIZE, UploadOutcome};

/// What happened to one staged file.
#[derive(Debug, Clone, Serialize)]
pub struct FileTransfer {
    pub table: String,
    pub local_path: PathBuf,
    /// Empty when the upload failed.
    pub remote_path: String,
    pub loaded: bool,
    pub message: String,
}

/// Outcome of [`TransferOrchestrator::export_all`], in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferReport {
    pub files: Vec<FileTransfer>,
}

impl TransferReport {
    /// Remote paths whose load succeeded.
    #[must_use]
    pub fn loaded_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.loaded)
            .map(|f| f.remote_path.clone())
            .collect()
    }

    /// Tables whose load succeeded.
    #[must_use]
    pub fn loaded_tables(&self) -> BTreeSet<String> {
        self.files
            .iter()
            .filter(|f| f.loaded)
            .map(|f| f.table.clone())
            .collect()
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&FileTransfer> {
        self.files.iter().filter(|f| !f.loaded).collect()
    }

    /// Whether every requested table, by name, was loaded.
    #[must_use]
    pub fn is_complete(&self, requested: &[String]) -> bool {
        let loaded = self.loaded_tables();
        requested.iter().all(|t| loaded.contains(t))
    }
}

/// `orders.csv.gz` with `.csv.gz` -> `orders`. A file without the extension
/// keeps its full name.
#[must_use]
pub fn table_name(file: &Path, ext: &str) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(ext) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

pub struct TransferOrchestrator {
    uploader: ChunkedUploader,
    jobs: WarehouseJobRunner,
    upload_pool: WorkerPool,
    load_pool: WorkerPool,
}

impl TransferOrchestrator {
    #[must_use]
    pub const fn new(
        uploader: ChunkedUploader,
        jobs: WarehouseJobRunner,
        upload_pool: WorkerPool,
        load_pool: WorkerPool,
    ) -> Self {
        Self {
            uploader,
            jobs,
            upload_pool,
            load_pool,
        }
    }

    #[must_use]
    pub const fn jobs(&self) -> &WarehouseJobRunner {
        &self.jobs
    }

    /// Upload every file to `bucket` under `prefix` on the upload pool.
    pub fn upload_all(&self, files: Vec<PathBuf>, bucket: &str, prefix: &str) -> Vec<UploadOutcome> {
        info!(files = files.len(), bucket, workers = self.upload_pool.size(), "uploading");
        self.upload_pool
            .map(files, |file| self.uploader.upload(&file, bucket, prefix))
    }

    /// Load every successful upload into `dataset` on the load pool.
    ///
    /// The table name is the local file name minus `ext`; its schema manifest
    /// is looked up beside the local file. Failed uploads are carried through
    /// as failures without a load attempt.
    pub fn export_all(&self, uploads: Vec<UploadOutcome>, dataset: &str, ext: &str) -> TransferReport {
        let files = self.load_pool.map_with_state(
            uploads,
            || None::<WarehouseClient>,
            |client, upload| {
                let table = table_name(&upload.local_path, ext);
                if !upload.succeeded() {
                    let message = upload
                        .error
                        .as_ref()
                        .map_or_else(|| "upload failed".to_string(), ToString::to_string);
                    return FileTransfer {
                        table,
                        local_path: upload.local_path,
                        remote_path: String::new(),
                        loaded: false,
                        message,
                    };
                }

                let work_dir = upload.local_path.parent().unwrap_or_else(|| Path::new("."));
                let schema = manifest_path(work_dir, &table);
                let outcome =
                    self.jobs
                        .load(client.take(), dataset, &table, &upload.remote_path, &schema);
                *client = outcome.client;
                if outcome.success {
                    info!("{}", outcome.message);
                } else {
                    error!("{}", outcome.message);
                }
                FileTransfer {
                    table,
                    local_path: upload.local_path,
                    remote_path: upload.remote_path,
                    loaded: outcome.success,
                    message: outcome.message,
                }
            },
        );
        TransferReport { files }
    }

    /// Upload then load `files`.
    pub fn transfer(
        &self,
        files: Vec<PathBuf>,
        bucket: &str,
        prefix: &str,
        dataset: &str,
        ext: &str,
    ) -> TransferReport {
        let start = Instant::now();
        let uploads = self.upload_all(files, bucket, prefix);
        let report = self.export_all(uploads, dataset, ext);
        info!(
            loaded = report.loaded_paths().len(),
            failed = report.failures().len(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "transfer finished"
        );
        report
    }
}
