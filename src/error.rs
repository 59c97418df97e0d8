//! Pipeline error taxonomy.
//!
//! Every per-unit failure (a table during extraction, a file during transfer) is
//! represented by one [`PipelineError`] variant. Provider calls underneath return
//! [`CloudIOError`]; the pipeline wraps those with the stage they failed in.

use crate::cloud::CloudIOError;

/// Errors produced while moving a table from the query engine to the warehouse.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// Cursor or connection acquisition failed after all attempts.
    #[error("getting cursor: {0}")]
    Connection(CloudIOError),

    /// Query execution or a block pull failed.
    #[error("fetching `{table}`: {source}")]
    Fetch { table: String, source: CloudIOError },

    /// A slice could not be coerced or written.
    #[error("saving slice `{slice}`: {message}")]
    Transform { slice: String, message: String },

    /// The concatenated output could not be opened or a slice could not be read.
    #[error("saving `{output}`: {message}")]
    Concatenation { output: String, message: String },

    /// Bucket resolution or chunk upload failed.
    #[error("uploading `{file}`: {source}")]
    Transfer { file: String, source: CloudIOError },

    /// A warehouse job failed, timed out, or could not be submitted.
    #[error("job on `{target}`: {message}")]
    Job { target: String, message: String },

    /// The schema manifest is missing or unreadable.
    #[error("reading schema `{path}`: {message}")]
    Schema { path: String, message: String },

    /// Invalid configuration or command-line input.
    #[error("configuration: {0}")]
    Config(String),

    /// Local file-system failure outside the stages above.
    #[error("i/o: {0}")]
    Io(String),
}

impl PipelineError {
    /// Name of the taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Connection(_) => "ConnectionError",
            Self::Fetch { .. } => "FetchError",
            Self::Transform { .. } => "TransformError",
            Self::Concatenation { .. } => "ConcatenationError",
            Self::Transfer { .. } => "TransferError",
            Self::Job { .. } => "JobError",
            Self::Schema { .. } => "SchemaError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
        }
    }

    pub(crate) fn job(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Job {
            target: target.into(),
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ErrorKind;

    #[test]
    fn fetch_error_names_the_table() {
        let err = PipelineError::Fetch {
            table: "orders".into(),
            source: CloudIOError::new(ErrorKind::Network, "reset by peer"),
        };
        let msg = err.to_string();
        assert!(msg.contains("`orders`"), "got: {msg}");
        assert!(msg.contains("reset by peer"), "got: {msg}");
        assert_eq!(err.kind_name(), "FetchError");
    }

    #[test]
    fn io_error_converts() {
        let err: PipelineError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, PipelineError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
