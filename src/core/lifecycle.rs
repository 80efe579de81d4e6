//! Job state machine.
//!
//! Every transition is a pure function from the current [`Job`] to a
//! [`JobUpdate`]; persisting the update is left to the single writer that
//! owns the job's queue directory.

use crate::core::error::{Error, Result};
use crate::core::job::{Job, JobErrorKind, JobStatus, JobUpdate};

/// Substring that marks a failed run even when the process exits with 0.
///
/// Some job code logs its own failures with a `time | LEVEL | message`
/// formatter and still exits cleanly. This is a heuristic and can misfire
/// on jobs that legitimately print the marker.
pub const STDERR_ERROR_MARKER: &str = "| ERROR";

pub fn validate(job: &Job) -> Result<()> {
    if job.uid.trim().is_empty() {
        return Err(invalid("uid must not be empty"));
    }
    if job.dataset_name.trim().is_empty() {
        return Err(invalid("dataset_name must not be empty"));
    }
    if job.entrypoint().map_or(true, |entry| entry.trim().is_empty()) {
        return Err(invalid("args must start with an entrypoint"));
    }
    if job.timeout == 0 {
        return Err(invalid("timeout must be at least one second"));
    }
    if matches!(job.status, JobStatus::RunFailed | JobStatus::Rejected)
        && job.error == JobErrorKind::NoError
    {
        return Err(invalid(&format!(
            "error must be set when status is {}",
            job.status
        )));
    }
    if job.status == JobStatus::RunFinished && job.error != JobErrorKind::NoError {
        return Err(invalid("a finished job cannot carry an error"));
    }
    Ok(())
}

pub fn transition_in_progress(job: &Job) -> Result<JobUpdate> {
    if job.status != JobStatus::PendingCodeReview {
        return Err(Error::InvalidTransition {
            action: "start",
            from: job.status,
        });
    }
    Ok(update(job, JobStatus::InProgress, JobErrorKind::NoError, None))
}

pub fn transition_from_exit_code(job: &Job, exit_code: i32, stderr: Option<&str>) -> JobUpdate {
    let stderr = stderr.filter(|text| !text.trim().is_empty());

    if exit_code == 0 {
        match stderr {
            Some(text) if text.contains(STDERR_ERROR_MARKER) => {
                tracing::debug!(uid = %job.uid, "error marker found in stderr despite exit code 0");
                update(
                    job,
                    JobStatus::RunFailed,
                    JobErrorKind::ExecutionFailed,
                    Some(text.to_string()),
                )
            }
            _ => update(job, JobStatus::RunFinished, JobErrorKind::NoError, None),
        }
    } else {
        let message = stderr
            .map(str::to_string)
            .unwrap_or_else(|| format!("job exited with code {exit_code}"));
        update(
            job,
            JobStatus::RunFailed,
            JobErrorKind::ExecutionFailed,
            Some(message),
        )
    }
}

pub fn transition_timeout(job: &Job, seconds: u64) -> JobUpdate {
    update(
        job,
        JobStatus::RunFailed,
        JobErrorKind::Timeout,
        Some(format!("job timed out after {seconds} seconds")),
    )
}

/// A failure raised before or around the process (missing paths, image
/// build, unavailable engine).
pub fn transition_failure(job: &Job, message: impl Into<String>) -> JobUpdate {
    let mut message = message.into();
    if message.trim().is_empty() {
        message = "job failed".to_string();
    }
    update(
        job,
        JobStatus::RunFailed,
        JobErrorKind::ExecutionFailed,
        Some(message),
    )
}

pub fn transition_reject(job: &Job, reason: &str) -> Result<JobUpdate> {
    let error = match job.status {
        JobStatus::PendingCodeReview => JobErrorKind::FailedCodeReview,
        JobStatus::RunFinished | JobStatus::RunFailed => JobErrorKind::FailedOutputReview,
        from => {
            return Err(Error::InvalidTransition {
                action: "reject",
                from,
            })
        }
    };
    let reason = if reason.trim().is_empty() {
        "Unspecified"
    } else {
        reason
    };
    Ok(update(job, JobStatus::Rejected, error, Some(reason.to_string())))
}

pub fn transition_share(job: &Job) -> Result<JobUpdate> {
    match job.status {
        JobStatus::RunFinished | JobStatus::RunFailed => Ok(update(
            job,
            JobStatus::Shared,
            job.error,
            job.error_message.clone(),
        )),
        from => Err(Error::InvalidTransition {
            action: "share",
            from,
        }),
    }
}

fn update(
    job: &Job,
    status: JobStatus,
    error: JobErrorKind,
    error_message: Option<String>,
) -> JobUpdate {
    JobUpdate {
        uid: job.uid.clone(),
        status,
        error,
        error_message,
        output_location: None,
    }
}

fn invalid(message: &str) -> Error {
    Error::Validation {
        message: message.to_string(),
    }
}
