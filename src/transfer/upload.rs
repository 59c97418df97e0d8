//! Chunked, retried upload of staged files.

use crate::cloud::{
    Bucket, CloudIOError, CloudResult, ErrorKind, ObjectMetadata, ObjectStore, object_uri,
    validate_key_path,
};
use crate::error::PipelineError;
use crate::retry::{RetryConfig, retry};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Default chunk size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 23;

/// Result of one file upload.
///
/// On failure `remote_path` is empty and `error` holds the last observed error.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub remote_path: String,
    pub local_path: PathBuf,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<PipelineError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<PipelineError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl UploadOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && !self.remote_path.is_empty()
    }

    fn failed(local_path: &Path, error: PipelineError) -> Self {
        Self {
            remote_path: String::new(),
            local_path: local_path.to_path_buf(),
            error: Some(error),
        }
    }
}

/// Uploads local files to an object store in fixed-size chunks.
#[derive(Clone)]
pub struct ChunkedUploader {
    store: Arc<dyn ObjectStore>,
    chunk_size: usize,
    retry: RetryConfig,
}

impl ChunkedUploader {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.store.scheme()
    }

    /// Look the bucket up, creating it only when the store reports it missing.
    ///
    /// # Errors
    ///
    /// Returns any lookup error other than `NotFound`, or the creation error.
    pub fn resolve_bucket(&self, name: &str) -> CloudResult<Bucket> {
        match self.store.get_bucket(name) {
            Ok(bucket) => Ok(bucket),
            Err(e) if e.is_not_found() => {
                info!(bucket = name, "bucket not found, creating");
                self.store.create_bucket(name)
            }
            Err(e) => Err(e),
        }
    }

    /// `{prefix}/{basename}`, or just the basename with an empty prefix.
    #[must_use]
    pub fn object_name(prefix: &str, file: &Path) -> String {
        let basename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            basename
        } else {
            format!("{prefix}/{basename}")
        }
    }

    /// Upload `file` to `bucket_name` as `{prefix}/{basename}`.
    ///
    /// Bucket resolution runs once and is not retried. The transfer itself is
    /// retried as a whole, re-reading the file from the start on each attempt.
    pub fn upload(&self, file: &Path, bucket_name: &str, prefix: &str) -> UploadOutcome {
        let object = Self::object_name(prefix, file);
        let transfer_error = |source: CloudIOError| PipelineError::Transfer {
            file: file.display().to_string(),
            source,
        };

        if let Err(e) = validate_key_path(&object) {
            return UploadOutcome::failed(file, transfer_error(e));
        }

        let bucket = match self.resolve_bucket(bucket_name) {
            Ok(bucket) => bucket,
            Err(e) => {
                error!(file = %file.display(), bucket = bucket_name, "resolving bucket: {e}");
                return UploadOutcome::failed(file, transfer_error(e));
            }
        };

        let state = retry(&self.retry, |attempt| {
            debug!(file = %file.display(), attempt, "uploading");
            self.send(&bucket, &object, file)
        });
        let attempts = state.attempts;

        match state.into_result(|| CloudIOError::new(ErrorKind::InvalidInput, "retry ceiling is zero"))
        {
            Ok(meta) => {
                let remote_path = object_uri(self.store.scheme(), &meta.bucket, &meta.key);
                info!(file = %file.display(), remote = %remote_path, bytes = meta.size, attempts, "uploaded");
                UploadOutcome {
                    remote_path,
                    local_path: file.to_path_buf(),
                    error: None,
                }
            }
            Err(e) => {
                error!(file = %file.display(), attempts, "upload failed: {e}");
                UploadOutcome::failed(file, transfer_error(e))
            }
        }
    }

    /// One complete upload attempt.
    fn send(&self, bucket: &Bucket, object: &str, file: &Path) -> CloudResult<ObjectMetadata> {
        let read_error = |e: std::io::Error| {
            CloudIOError::new(ErrorKind::Other, format!("reading {}", file.display()))
                .with_source(e.to_string())
        };

        let mut reader = BufReader::new(File::open(file).map_err(read_error)?);
        let session = self.store.start_upload(bucket, object, self.chunk_size)?;

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let mut offset = 0u64;
        loop {
            chunk.clear();
            let n = (&mut reader)
                .take(self.chunk_size as u64)
                .read_to_end(&mut chunk)
                .map_err(read_error)?;
            if n == 0 {
                break;
            }
            self.store.upload_chunk(&session, offset, &chunk)?;
            offset += n as u64;
        }

        self.store.finish_upload(&session, offset)
    }
}
