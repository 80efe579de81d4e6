use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::job_config::ResourceLimits;
use crate::core::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    PendingCodeReview,
    InProgress,
    RunFinished,
    RunFailed,
    Rejected,
    Shared,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::PendingCodeReview => "pending_code_review",
            JobStatus::InProgress => "in_progress",
            JobStatus::RunFinished => "run_finished",
            JobStatus::RunFailed => "run_failed",
            JobStatus::Rejected => "rejected",
            JobStatus::Shared => "shared",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Rejected | JobStatus::Shared)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    #[default]
    NoError,
    Timeout,
    Cancelled,
    ExecutionFailed,
    FailedCodeReview,
    FailedOutputReview,
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobErrorKind::NoError => "no_error",
            JobErrorKind::Timeout => "timeout",
            JobErrorKind::Cancelled => "cancelled",
            JobErrorKind::ExecutionFailed => "execution_failed",
            JobErrorKind::FailedCodeReview => "failed_code_review",
            JobErrorKind::FailedOutputReview => "failed_output_review",
        };
        f.write_str(name)
    }
}

/// A submitted job. Everything above `status` is fixed at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub dataset_name: String,
    /// Relative paths resolve against the job's bundle folder `jobs/<uid>/`.
    pub code_dir: PathBuf,
    /// Entrypoint (relative to `code_dir`) followed by its arguments.
    pub args: Vec<String>,
    pub runtime: Runtime,
    pub timeout: u64,
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Option<ResourceLimits>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub status: JobStatus,
    #[serde(default)]
    pub error: JobErrorKind,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub output_location: Option<PathBuf>,
}

impl Job {
    pub fn entrypoint(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn apply(&mut self, update: JobUpdate) {
        self.status = update.status;
        self.error = update.error;
        self.error_message = update.error_message;
        if update.output_location.is_some() {
            self.output_location = update.output_location;
        }
        self.updated_at = Utc::now();
    }
}

/// The mutable half of a job, produced by the lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub uid: String,
    pub status: JobStatus,
    pub error: JobErrorKind,
    pub error_message: Option<String>,
    #[serde(default)]
    pub output_location: Option<PathBuf>,
}

impl JobUpdate {
    pub fn with_output_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.output_location = Some(location.into());
        self
    }
}
