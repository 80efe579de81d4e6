use std::path::PathBuf;

use thiserror::Error;

use crate::core::job::JobStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid job: {message}")]
    Validation { message: String },
    #[error("{what} {path} does not exist")]
    PathNotFound { what: &'static str, path: PathBuf },
    #[error("container engine `{engine}` is not available: {message}")]
    SandboxUnavailable { engine: String, message: String },
    #[error("failed to build image '{image}': {stderr}")]
    BuildFailure { image: String, stderr: String },
    #[error("process failed (exit_code={exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("sync command `{command}` failed (exit_code={exit_code:?}): {stderr}")]
    SyncCommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("sync command `{command}` timed out after {seconds}s")]
    SyncTimeout { command: String, seconds: u64 },
    #[error("cannot {action} job with status {from}")]
    InvalidTransition {
        action: &'static str,
        from: JobStatus,
    },
    #[error("job {id} not found")]
    JobNotFound { id: String },
    #[error("results for job {id} are not available: {reason}")]
    ResultsNotReady { id: String, reason: String },
    #[error("dataset '{name}' not found")]
    DatasetNotFound { name: String },
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },
    #[error("unsupported file type: {path}")]
    UnsupportedFileType { path: PathBuf },
    #[error("file {path} exceeds the maximum loadable size of {max_bytes} bytes")]
    FileTooLarge { path: PathBuf, max_bytes: u64 },
    #[error("{what} is not supported")]
    Unsupported { what: String },
    #[error("{path} already exists; use force_overwrite to replace it")]
    AlreadyExists { path: PathBuf },
    #[error("configuration error: {message}")]
    Config { message: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Errors that end one job but leave the queue running.
    pub fn is_job_local(&self) -> bool {
        matches!(
            self,
            Error::PathNotFound { .. }
                | Error::SandboxUnavailable { .. }
                | Error::BuildFailure { .. }
                | Error::ExecutionFailed { .. }
                | Error::Unsupported { .. }
                | Error::DatasetNotFound { .. }
                | Error::PermissionDenied { .. }
        )
    }
}
