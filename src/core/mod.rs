pub mod coordinator;
pub mod dataset;
pub mod error;
pub mod event;
pub mod formatter;
pub mod job;
pub mod job_config;
pub mod lifecycle;
pub mod queue;
pub mod results;
pub mod runner;
pub mod runtime;
pub mod sync;
pub mod workspace;

use error::Result;
use event::OutputHandlers;
use job::{Job, JobUpdate};
use job_config::JobConfig;
use runner::RunnerFactory;

/// Runs `job` to completion with the backend its runtime selects and maps
/// the outcome onto the job lifecycle. Failures that happen before the
/// process starts are returned as errors, untouched.
pub fn run_job(
    job: &Job,
    config: &JobConfig,
    runners: &RunnerFactory,
    handlers: &mut OutputHandlers,
) -> Result<JobUpdate> {
    let runner = runners.for_config(config);
    runner.validate(config)?;

    let report = runner.run(config, handlers)?.into_report(handlers)?;
    let update = if report.timed_out {
        lifecycle::transition_timeout(job, config.timeout)
    } else {
        lifecycle::transition_from_exit_code(job, report.exit_code, report.error_message.as_deref())
    };
    Ok(update)
}
